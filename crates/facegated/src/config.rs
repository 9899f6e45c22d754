use facegate_core::matcher::{DEFAULT_MATCH_THRESHOLD, DEFAULT_TIE_EPSILON};
use facegate_core::quality::{
    DEFAULT_ENROLL_THRESHOLD, DEFAULT_FRAME_THRESHOLD, DEFAULT_MAX_CONSECUTIVE_MISSES,
    DEFAULT_REQUIRED_SAMPLES,
};
use facegate_core::{EuclideanMatcher, GateConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub bind: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// When false the daemon serves the store only; capture sessions are refused.
    pub camera_enabled: bool,
    /// Frames discarded after opening the camera (AGC/AE stabilisation).
    pub warmup_frames: usize,
    pub gate: GateConfig,
    /// Euclidean acceptance radius for a positive match.
    pub match_threshold: f32,
    pub tie_epsilon: f32,
    /// Keep waiting (false) or abort (true) when the face is lost mid-session.
    pub abort_on_face_lost: bool,
    /// Deadline for a capture session to collect its frames.
    pub session_timeout: Duration,
    /// Where enrollment previews are written; `None` disables overlays and previews.
    pub preview_dir: Option<PathBuf>,
    /// Bearer token required on API routes; `None` disables the check.
    pub api_token: Option<String>,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = data_dir(
            std::env::var("XDG_DATA_HOME").ok(),
            std::env::var("HOME").ok(),
        );

        Self {
            bind: std::env::var("FACEGATE_BIND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 7878))),
            db_path: std::env::var("FACEGATE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("faces.db")),
            model_dir: std::env::var("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models")),
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_enabled: env_bool("FACEGATE_CAMERA_ENABLED", true),
            warmup_frames: env_parse("FACEGATE_WARMUP_FRAMES", 4),
            gate: GateConfig {
                frame_threshold: env_parse("FACEGATE_FRAME_THRESHOLD", DEFAULT_FRAME_THRESHOLD),
                enroll_threshold: env_parse("FACEGATE_ENROLL_THRESHOLD", DEFAULT_ENROLL_THRESHOLD),
                required_samples: env_parse("FACEGATE_SAMPLES_PER_ENROLL", DEFAULT_REQUIRED_SAMPLES),
                max_consecutive_misses: env_parse(
                    "FACEGATE_MAX_CONSECUTIVE_MISSES",
                    DEFAULT_MAX_CONSECUTIVE_MISSES,
                ),
            },
            match_threshold: env_parse("FACEGATE_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            tie_epsilon: env_parse("FACEGATE_TIE_EPSILON", DEFAULT_TIE_EPSILON),
            abort_on_face_lost: env_bool("FACEGATE_ABORT_ON_FACE_LOST", false),
            session_timeout: Duration::from_secs(env_parse("FACEGATE_SESSION_TIMEOUT_SECS", 20)),
            preview_dir: std::env::var("FACEGATE_PREVIEW_DIR").ok().map(PathBuf::from),
            api_token: std::env::var("FACEGATE_API_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    /// Defaults with an in-memory friendly layout; used by tests and embedders.
    pub fn for_testing() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            db_path: PathBuf::from(":memory:"),
            model_dir: PathBuf::from("/nonexistent"),
            camera_device: "/dev/null".to_string(),
            camera_enabled: false,
            warmup_frames: 0,
            gate: GateConfig::default(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            tie_epsilon: DEFAULT_TIE_EPSILON,
            abort_on_face_lost: false,
            session_timeout: Duration::from_secs(2),
            preview_dir: None,
            api_token: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.gate.validate()?;
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            anyhow::bail!("FACEGATE_MATCH_THRESHOLD must be positive, got {}", self.match_threshold);
        }
        if !(self.tie_epsilon.is_finite() && self.tie_epsilon >= 0.0) {
            anyhow::bail!("FACEGATE_TIE_EPSILON must be non-negative, got {}", self.tie_epsilon);
        }
        if self.session_timeout.is_zero() {
            anyhow::bail!("FACEGATE_SESSION_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn matcher(&self) -> EuclideanMatcher {
        EuclideanMatcher::new(self.match_threshold, self.tie_epsilon)
    }
}

/// Base directory for the database and models: `$XDG_DATA_HOME/facegate`,
/// falling back to `$HOME/.local/share/facegate`.
fn data_dir(xdg_data_home: Option<String>, home: Option<String>) -> PathBuf {
    xdg_data_home
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(home.unwrap_or_else(|| "/tmp".to_string())).join(".local/share"))
        .join("facegate")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.trim(), "0" | "false" | "no" | "off"))
        .unwrap_or(default)
}
