use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

/// Prefix of local filesystem location ids (`local-0`, `local-1`, ...).
pub const LOCAL_ID_PREFIX: &str = "local-";
/// Prefix of object storage location ids (`s3:{bucket}`).
pub const S3_ID_PREFIX: &str = "s3:";

/// Storage backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    S3,
    Local,
}

impl FromStr for LocationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(LocationKind::S3),
            "local" => Ok(LocationKind::Local),
            _ => Err(anyhow::anyhow!("Invalid location kind: {}", s)),
        }
    }
}

impl Display for LocationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LocationKind::S3 => write!(f, "s3"),
            LocationKind::Local => write!(f, "local"),
        }
    }
}

/// A configured storage location as presented to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocation {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LocationKind,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Parsed location id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationRef {
    /// Index into the configured local roots.
    Local(usize),
    Bucket(String),
}

impl LocationRef {
    pub fn kind(&self) -> LocationKind {
        match self {
            LocationRef::Local(_) => LocationKind::Local,
            LocationRef::Bucket(_) => LocationKind::S3,
        }
    }

    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl FromStr for LocationRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(index) = s.strip_prefix(LOCAL_ID_PREFIX) {
            // Reject "local-01" and "local-+1" so every root has exactly one id.
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                return Err(anyhow::anyhow!("Invalid local location id: {}", s));
            }
            if index.len() > 1 && index.starts_with('0') {
                return Err(anyhow::anyhow!("Invalid local location id: {}", s));
            }
            let index = index
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("Invalid local location id: {}", s))?;
            return Ok(LocationRef::Local(index));
        }
        if let Some(bucket) = s.strip_prefix(S3_ID_PREFIX) {
            if !is_valid_bucket_name(bucket) {
                return Err(anyhow::anyhow!("Invalid bucket name: {}", bucket));
            }
            return Ok(LocationRef::Bucket(bucket.to_string()));
        }
        Err(anyhow::anyhow!("Unknown location id: {}", s))
    }
}

impl Display for LocationRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LocationRef::Local(index) => write!(f, "{}{}", LOCAL_ID_PREFIX, index),
            LocationRef::Bucket(bucket) => write!(f, "{}{}", S3_ID_PREFIX, bucket),
        }
    }
}

/// S3 bucket naming rules (length, charset, no leading/trailing punctuation).
fn is_valid_bucket_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        && !name.starts_with(['-', '.'])
        && !name.ends_with(['-', '.'])
        && !name.contains("..")
}
