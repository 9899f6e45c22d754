use anyhow::{Context, Result};
use facegate_core::Detector;
use facegate_hw::{CameraOpener, V4lOpener};
use facegated::config::Config;
use facegated::engine::{spawn_engine, EngineSettings};
use facegated::session::SessionConfig;
use facegated::store::EnrollmentStore;
use facegated::{build_router, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        db = %config.db_path.display(),
        "facegated starting"
    );

    let store = EnrollmentStore::open(&config.db_path, config.gate.enroll_threshold)
        .await
        .context("failed to open enrollment store")?;
    tracing::info!(enrolled = store.count().await?, "enrollment store ready");

    let camera: Option<Box<dyn CameraOpener>> = if config.camera_enabled {
        Some(Box::new(V4lOpener::new(config.camera_device.clone())))
    } else {
        tracing::info!("camera disabled via FACEGATE_CAMERA_ENABLED=0; capture sessions are refused");
        None
    };

    let engine = spawn_engine(
        load_detector(&config),
        camera,
        EngineSettings {
            session: SessionConfig {
                gate: config.gate.clone(),
                abort_on_face_lost: config.abort_on_face_lost,
                timeout: config.session_timeout,
            },
            warmup_frames: config.warmup_frames,
            preview_dir: config.preview_dir.clone(),
        },
    )?;

    let state = AppState::new(store, engine, config.matcher(), config.api_token.as_deref());
    if config.api_token.is_none() {
        tracing::warn!("FACEGATE_API_TOKEN not set; API authentication is disabled");
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facegated ready");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facegated shutting down");
        })
        .await?;

    Ok(())
}

/// Load the ONNX detector. A missing model leaves the daemon in store-only
/// mode rather than refusing to start.
#[cfg(feature = "onnx")]
fn load_detector(config: &Config) -> Option<Box<dyn Detector + Send>> {
    match facegate_core::onnx::OnnxDetector::load(&config.model_dir) {
        Ok(detector) => {
            tracing::info!(dir = %config.model_dir.display(), "face detector loaded");
            Some(Box::new(detector))
        }
        Err(e) => {
            tracing::warn!(
                dir = %config.model_dir.display(),
                error = %e,
                "face detector unavailable; capture sessions are refused"
            );
            None
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn load_detector(_config: &Config) -> Option<Box<dyn Detector + Send>> {
    tracing::warn!("built without the onnx feature; capture sessions are refused");
    None
}
