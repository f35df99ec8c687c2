//! Location-relative path validation.
//!
//! Every path that reaches the filesystem or an object key goes through
//! [`PathValidator`]. Rejections are reported as [`StorageError::Security`] and
//! logged at warn level; the raw input is logged but never returned to clients.

use std::io;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use strata_core::SettingsHandle;
use unicode_normalization::UnicodeNormalization;

use crate::error::{StorageError, StorageResult};

/// Percent-decoding rounds applied before checking segments, enough to
/// unwrap double and triple encoding (`%252e%252e`).
const DECODE_ROUNDS: usize = 3;

/// Resolves user-supplied relative paths against configured roots.
#[derive(Clone, Debug)]
pub struct PathValidator {
    settings: SettingsHandle,
}

impl PathValidator {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Root of local location `local-{index}`.
    pub fn root(&self, index: usize) -> StorageResult<PathBuf> {
        self.settings
            .local_root(index)
            .ok_or_else(|| StorageError::NotFound(format!("location local-{}", index)))
    }

    /// Resolve `raw` under local root `index`. The empty path resolves to the
    /// root itself.
    ///
    /// The returned path is `root.join(normalized)`; symlinks are left in place
    /// but every existing component has been checked to stay inside the root.
    pub async fn resolve(&self, index: usize, raw: &str) -> StorageResult<PathBuf> {
        let root = self.root(index)?;
        let relative = normalize(raw)?;
        let joined = join_checked(&root, &relative)?;

        let canonical_root = canonical_root(&root).await?;
        check_canonical(&canonical_root, &joined, raw).await?;
        Ok(joined)
    }

    /// Like [`resolve`](Self::resolve) but refuses the location root. Used for
    /// writes and deletes.
    pub async fn resolve_entry(
        &self,
        index: usize,
        raw: &str,
    ) -> StorageResult<(PathBuf, String)> {
        let relative = normalize(raw)?;
        if relative.is_empty() {
            tracing::warn!(raw_path = %raw, "Refusing to modify location root");
            return Err(StorageError::Security(
                "operation not permitted on the location root".to_string(),
            ));
        }
        let absolute = self.resolve(index, &relative).await?;
        Ok((absolute, relative))
    }

    /// Validate `raw` as an object key (no filesystem involved). The empty
    /// string denotes the bucket root.
    pub fn resolve_key(&self, raw: &str) -> StorageResult<String> {
        normalize(raw)
    }

    /// Canonical root for `local-{index}`, failing with `NotFound` when the
    /// directory is gone.
    pub async fn canonical_root(&self, index: usize) -> StorageResult<PathBuf> {
        canonical_root(&self.root(index)?).await
    }

    /// Whether an existing path (typically a symlink found while listing)
    /// resolves inside `canonical_root`. Blocking; call it from a blocking
    /// context.
    pub fn stays_within(canonical_root: &Path, path: &Path) -> bool {
        match std::fs::canonicalize(path) {
            Ok(resolved) => resolved.starts_with(canonical_root),
            Err(_) => false,
        }
    }
}

/// Normalize a user-supplied relative path into `a/b/c` form, or `""` for the
/// root.
///
/// Checks run against the percent-decoded, NFKC-folded form, but the result
/// keeps the caller's own segment bytes: a name like `a%20b.txt` or one in NFD
/// form round-trips exactly as it was listed.
pub fn normalize(raw: &str) -> StorageResult<String> {
    if raw.contains('\0') {
        return Err(reject(raw, "path contains a NUL byte"));
    }

    let mut decoded = raw.to_string();
    for _ in 0..DECODE_ROUNDS {
        // Lossy: invalid sequences cannot hide a separator or a dot.
        let next = percent_decode_str(&decoded)
            .decode_utf8_lossy()
            .into_owned();
        if next == decoded {
            break;
        }
        decoded = next;
    }

    let folded: String = decoded.nfkc().collect();

    if folded.contains('\0') {
        return Err(reject(raw, "path contains an encoded NUL byte"));
    }
    if folded.starts_with('/') || folded.starts_with('\\') {
        return Err(reject(raw, "absolute paths are not allowed"));
    }
    if has_drive_prefix(&folded) {
        return Err(reject(raw, "drive prefixes are not allowed"));
    }
    if folded.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(reject(raw, "parent directory segments are not allowed"));
    }

    let segments: Vec<&str> = raw
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

fn reject(raw: &str, reason: &str) -> StorageError {
    tracing::warn!(raw_path = %raw.escape_debug(), reason = reason, "Path security violation");
    StorageError::Security(reason.to_string())
}

fn join_checked(root: &Path, relative: &str) -> StorageResult<PathBuf> {
    let joined = if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    };
    if !joined.starts_with(root) {
        return Err(reject(relative, "path resolves outside the location root"));
    }
    Ok(joined)
}

async fn canonical_root(root: &Path) -> StorageResult<PathBuf> {
    tokio::fs::canonicalize(root).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            StorageError::NotFound(format!("storage root {} is unavailable", root.display()))
        }
        _ => StorageError::from_io(e, &root.display().to_string()),
    })
}

/// Canonicalize `path` (or its deepest existing ancestor) and make sure it
/// stays under `canonical_root`. A dangling symlink anywhere on the way is
/// rejected since writing through it would create its target.
async fn check_canonical(canonical_root: &Path, path: &Path, raw: &str) -> StorageResult<()> {
    let mut current = path;
    loop {
        match tokio::fs::canonicalize(current).await {
            Ok(resolved) => {
                if resolved.starts_with(canonical_root) {
                    return Ok(());
                }
                return Err(reject(raw, "path resolves outside the location root"));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if tokio::fs::symlink_metadata(current).await.is_ok() {
                    return Err(reject(raw, "path traverses a dangling symbolic link"));
                }
                match current.parent() {
                    Some(parent) => current = parent,
                    None => return Err(reject(raw, "path has no existing ancestor")),
                }
            }
            Err(e) => return Err(StorageError::from_io(e, raw)),
        }
    }
}
