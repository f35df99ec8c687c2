use crate::constants::FORWARDED_USER_HEADER;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};

pub const ANONYMOUS_USER: &str = "anonymous";

/// Longest forwarded user name that is accepted as-is.
const MAX_USER_LEN: usize = 256;

/// User on whose behalf the request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl CurrentUser {
    pub fn anonymous() -> Self {
        CurrentUser(ANONYMOUS_USER.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    fn from_parts(parts: &Parts) -> Self {
        parts
            .headers
            .get(FORWARDED_USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty() && name.len() <= MAX_USER_LEN)
            .map(|name| CurrentUser(name.to_string()))
            .unwrap_or_else(Self::anonymous)
    }
}

impl Display for CurrentUser {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}
