//! Utility functions for file naming and path manipulation

use crate::config::FileCollisionAction;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Name used when a URL has no usable last path segment
const FALLBACK_FILE_NAME: &str = "media";

/// Counter keeping temp file names unique within the process
static TEMP_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Create a new file at `path`, handling collisions according to the specified action
///
/// The file is opened with `create_new`, so two callers racing for the same
/// name never receive the same path. For Rename, a `(1)`, `(2)`, ... suffix is
/// added before the extension until a name is free. For Skip, an existing file
/// is an `AlreadyExists` error. For Overwrite, an existing file is truncated.
///
/// # Examples
///
/// ```no_run
/// use media_dl::utils::create_unique_file;
/// use media_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// # async fn example() -> std::io::Result<()> {
/// let path = Path::new("/tmp/media-dl-doc/cat.png");
/// let (_file, created) = create_unique_file(path, FileCollisionAction::Rename).await?;
/// // If cat.png exists, creates cat (1).png, then cat (2).png, etc.
/// # let _ = created;
/// # Ok(())
/// # }
/// ```
pub async fn create_unique_file(
    path: &Path,
    action: FileCollisionAction,
) -> std::io::Result<(tokio::fs::File, PathBuf)> {
    match action {
        FileCollisionAction::Overwrite => {
            let file = tokio::fs::File::create(path).await?;
            Ok((file, path.to_path_buf()))
        }
        FileCollisionAction::Skip => {
            let file = create_new(path).await?;
            Ok((file, path.to_path_buf()))
        }
        FileCollisionAction::Rename => {
            for attempt in 0..=MAX_RENAME_ATTEMPTS {
                let candidate = numbered_path(path, attempt)?;
                match create_new(&candidate).await {
                    Ok(file) => return Ok((file, candidate)),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(e),
                }
            }

            Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "could not find a unique name for {} after {} attempts",
                    path.display(),
                    MAX_RENAME_ATTEMPTS
                ),
            ))
        }
    }
}

async fn create_new(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

/// `path` itself for `n == 0`, otherwise `stem (n).ext` next to it
fn numbered_path(path: &Path, n: u32) -> std::io::Result<PathBuf> {
    if n == 0 {
        return Ok(path.to_path_buf());
    }

    let invalid = |what: &str| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no {} in {}", what, path.display()),
        )
    };
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("file stem"))?;
    let parent = path.parent().ok_or_else(|| invalid("parent directory"))?;

    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, n, ext),
        None => format!("{} ({})", stem, n),
    };
    Ok(parent.join(name))
}

/// File name (with extension) from the last path segment of a URL
///
/// Percent-encoding is decoded and path separators and control characters are
/// replaced, so the result is safe to join onto a directory. Falls back to
/// `"media"` when the URL has no usable segment.
///
/// # Examples
///
/// ```
/// use media_dl::utils::file_name_from_url;
///
/// assert_eq!(file_name_from_url("https://i.example.com/a/cat%20pic.png?w=100"), "cat pic.png");
/// assert_eq!(file_name_from_url("https://example.com/"), "media");
/// ```
#[must_use]
pub fn file_name_from_url(url: &str) -> String {
    let segment = url::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });

    let Some(segment) = segment.filter(|s| !s.is_empty()) else {
        return FALLBACK_FILE_NAME.to_string();
    };

    let decoded = urlencoding::decode(&segment)
        .map(|d| d.into_owned())
        .unwrap_or(segment);
    let sanitized = sanitize_file_name(&decoded);

    if sanitized.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        sanitized
    }
}

/// Replace characters that are not allowed in file names
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == ' ').to_string()
}

/// Fresh path inside `temp_dir` for downloading `url`
///
/// Names carry a process-wide sequence number so concurrent downloads of
/// different URLs sharing a file name never collide.
pub(crate) fn temp_file_path(temp_dir: &Path, prefix: &str, url: &str) -> PathBuf {
    let seq = TEMP_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    temp_dir.join(format!("{}-{}-{}", prefix, seq, file_name_from_url(url)))
}

/// Best-effort removal of a temporary file
pub(crate) async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file")
        }
    }
}
