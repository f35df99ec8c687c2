//! Strata API Library
//!
//! HTTP handlers, application state and setup for the storage browsing and
//! transfer service.

mod api_doc;
pub mod auth;
pub mod constants;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;

pub use error::HttpAppError;
pub use state::AppState;
pub use strata_infra::ErrorResponse;
