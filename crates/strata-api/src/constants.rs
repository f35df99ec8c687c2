//! API constants

/// Prefix of every versioned route.
pub const API_PREFIX: &str = "/api/v1";

/// Body limit for JSON endpoints. Uploads stream and are bounded by the
/// storage size limit instead.
pub const MAX_JSON_BODY_BYTES: usize = 1024 * 1024;

/// Header set by the fronting OAuth proxy.
pub const FORWARDED_USER_HEADER: &str = "X-Forwarded-User";
