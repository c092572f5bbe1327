//! imgd HTTP service: avatar, body and skin routes over the resolver.

pub mod app;
pub mod error;
pub mod processing;

pub use app::{AppState, HttpConfig, build_router};
pub use error::ServerError;
