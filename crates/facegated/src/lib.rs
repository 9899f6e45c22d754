//! facegated library: enrollment store, capture engine and HTTP API.

use axum::Router;
use facegate_core::EuclideanMatcher;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod directory;
pub mod engine;
pub mod sampler;
pub mod session;
pub mod store;

use api::TokenDigest;
use directory::MemberDirectory;
use engine::EngineHandle;
use store::EnrollmentStore;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: EnrollmentStore,
    pub directory: MemberDirectory,
    pub engine: EngineHandle,
    pub matcher: EuclideanMatcher,
    /// `None` disables authentication.
    pub api_token: Option<TokenDigest>,
}

impl AppState {
    pub fn new(
        store: EnrollmentStore,
        engine: EngineHandle,
        matcher: EuclideanMatcher,
        api_token: Option<&str>,
    ) -> Self {
        Self {
            directory: MemberDirectory::new(store.connection()),
            store,
            engine,
            matcher,
            api_token: api_token.map(TokenDigest::new),
        }
    }
}

/// Build the application router. `/health` is public; everything else sits
/// behind the bearer-token middleware.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{delete, get, post};

    let protected = Router::new()
        .route(
            "/facial-recognition",
            post(api::register_descriptor).get(api::list_descriptors),
        )
        .route("/facial-recognition/:id", delete(api::delete_descriptor))
        .route(
            "/facial-recognition/members",
            get(api::list_members).post(api::upsert_member),
        )
        .route("/facial-recognition/identify", post(api::identify))
        .route("/facial-recognition/sessions/enroll", post(api::enroll_session))
        .route("/facial-recognition/sessions/check-in", post(api::check_in_session))
        .route("/facial-recognition/sessions/cancel", post(api::cancel_session))
        .route("/status", get(api::status))
        .layer(middleware::from_fn_with_state(state.clone(), api::auth_middleware));

    Router::new()
        .merge(protected)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
