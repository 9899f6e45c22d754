//! HTTP API handlers for facegated

pub mod auth;
pub mod error;
pub mod facial;
pub mod health;
pub mod members;
pub mod sessions;

pub use auth::{auth_middleware, TokenDigest};
pub use error::ApiError;
pub use facial::{delete_descriptor, identify, list_descriptors, register_descriptor};
pub use health::{health_routes, status};
pub use members::{list_members, upsert_member};
pub use sessions::{cancel_session, check_in_session, enroll_session};
