//! Input handling: find source PDFs, resolve paths or URLs to local files,
//! and move finished sources out of the way.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path; it cannot stream from a byte buffer.
//! Downloading to a `TempDir` gives us a path pdfium can open while ensuring
//! cleanup happens automatically when `ResolvedInput` is dropped, even if
//! the process panics. We validate the PDF magic bytes (`%PDF`) before
//! returning so callers get a meaningful error rather than a pdfium crash.

use crate::error::OcrMdError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, OcrMdError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, OcrMdError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(OcrMdError::FileNotFound { path });
    }

    // Check read permission by attempting to open
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            // Verify PDF magic bytes
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(OcrMdError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrMdError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(OcrMdError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, OcrMdError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OcrMdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            OcrMdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            OcrMdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(OcrMdError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let temp_dir = TempDir::new().map_err(|e| OcrMdError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(download_file_name(url));

    let bytes = response
        .bytes()
        .await
        .map_err(|e| OcrMdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| OcrMdError::Internal(format!("Failed to write temp file: {}", e)))?;

    // Verify PDF magic bytes
    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(OcrMdError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it looks like a file name, else `downloaded.pdf`.
///
/// The name becomes the Markdown stem, so query strings never leak into it.
fn download_file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

/// List the PDFs directly inside `dir`, sorted by lower-cased file name.
///
/// Not recursive. Hidden files (leading `.`) are skipped and the extension
/// match is case-insensitive. A missing directory yields an empty list.
pub fn find_root_pdfs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        debug!("Cannot read {}; no PDFs discovered", dir.display());
        return Vec::new();
    };

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_visible_pdf(path))
        .collect();
    pdfs.sort_by_key(|path| file_name_lossy(path).to_lowercase());
    pdfs
}

fn is_visible_pdf(path: &Path) -> bool {
    let name = file_name_lossy(path);
    !name.starts_with('.')
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Keep only the files whose name is in `names` (blank names ignored).
///
/// Requested names with no match are logged at warn level and returned so
/// the caller can report them.
pub fn select_by_name(files: Vec<PathBuf>, names: &[String]) -> (Vec<PathBuf>, Vec<String>) {
    let wanted: BTreeSet<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();
    if wanted.is_empty() {
        return (files, Vec::new());
    }

    let selected: Vec<PathBuf> = files
        .into_iter()
        .filter(|f| wanted.contains(file_name_lossy(f).as_str()))
        .collect();

    let found: BTreeSet<String> = selected.iter().map(|f| file_name_lossy(f)).collect();
    let missing: Vec<String> = wanted
        .into_iter()
        .filter(|n| !found.contains(*n))
        .map(str::to_string)
        .collect();
    for name in &missing {
        warn!("Selected PDF not found: {}", name);
    }
    (selected, missing)
}

/// First free path of the form `stem.ext`, `stem-1.ext`, `stem-2.ext`, ...
pub fn unique_target(target: &Path) -> PathBuf {
    if !target.exists() {
        return target.to_path_buf();
    }
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| parent.join(format!("{stem}-{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| target.to_path_buf())
}

/// Move `source` into `processed_dir`, never overwriting an existing file.
pub fn move_to_processed(source: &Path, processed_dir: &Path) -> Result<PathBuf, OcrMdError> {
    let name = source
        .file_name()
        .ok_or_else(|| OcrMdError::InvalidInput {
            input: source.display().to_string(),
        })?;

    std::fs::create_dir_all(processed_dir).map_err(|e| OcrMdError::MoveFailed {
        from: source.to_path_buf(),
        to: processed_dir.to_path_buf(),
        source: e,
    })?;

    let target = unique_target(&processed_dir.join(name));
    if std::fs::rename(source, &target).is_err() {
        // Cross-device moves cannot rename; copy then remove instead.
        std::fs::copy(source, &target)
            .and_then(|_| std::fs::remove_file(source))
            .map_err(|e| OcrMdError::MoveFailed {
                from: source.to_path_buf(),
                to: target.clone(),
                source: e,
            })?;
    }

    info!("Moved {} to {}", source.display(), target.display());
    Ok(target)
}
