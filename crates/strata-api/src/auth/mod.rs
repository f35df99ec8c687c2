//! Caller identity
//!
//! Authentication happens in the OAuth proxy in front of the service; the
//! proxy forwards the user name in `X-Forwarded-User`. Handlers only attach it
//! to their spans for audit logging.

mod user;

pub use user::{CurrentUser, ANONYMOUS_USER};
