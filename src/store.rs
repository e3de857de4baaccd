//! Secure storage for untrusted image uploads.
//!
//! [`UploadStore`] owns a single upload root directory and persists
//! attacker-controlled byte payloads into it without ever letting the caller
//! influence where the bytes land.  The pipeline for a single upload is:
//!
//! 1. size gate: empty and over-limit payloads are rejected before any
//!    classification or filesystem interaction
//! 2. content sniffing: the payload must carry PNG or JPEG magic bytes
//!    ([`crate::sniff`])
//! 3. path allocation: the stored name is a fresh UUID plus the sniffed
//!    extension; the client filename is accepted only as an audit hint
//! 4. containment check: the candidate path is re-resolved and must lie
//!    strictly inside the canonical root, with no symlinked ancestor
//! 5. atomic write: data goes to a same-directory temp file which is synced
//!    and renamed over the final name, with the temp unlinked on every
//!    failure path
//!
//! Reads and deletes re-apply the containment check on each call, since they
//! may be handed paths reconstructed from user-visible filenames.  A path
//! that resolves outside the root behaves exactly like a missing file.
//!
//! # Layout
//!
//! The root is flat: `<root>/<uuid>.png` or `<root>/<uuid>.jpg`, no
//! subdirectories and no sidecar metadata.  File metadata is recomputed from
//! stat on every query so it can never drift from the filesystem.
//!
//! # Concurrency
//!
//! Uploads need no coordination: names are collision-free by construction and
//! temp names are derived from the same UUID as the final name, so two
//! concurrent uploads never share a path.  The blocking operations have
//! `*_async` wrappers that run them on the tokio blocking pool.

use std::{
    fs::{create_dir_all, File},
    io::{self, Write},
    os::fd::OwnedFd,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use rustix::{
    fs::{fchmod, openat, renameat, statat, unlinkat, AtFlags, FileType, Mode, OFlags, CWD},
    io::Errno,
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    sniff::{sniff, ImageKind},
    MAX_UPLOAD_SIZE,
};

/// Storing an upload failed.
///
/// All variants are expected, recoverable outcomes surfaced to the caller;
/// none should be treated as a fault.  The exception is
/// [`DirectoryUnavailable`](UploadError::DirectoryUnavailable), which means
/// the upload root itself is unusable and should be handled as a
/// service-level outage rather than a per-request error.
#[derive(Error, Debug)] // can't derive PartialEq because of std::io::Error
pub enum UploadError {
    #[error("empty file not allowed")]
    EmptyFile,
    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: usize, limit: usize },
    #[error("unsupported file type: only PNG and JPEG images are allowed")]
    UnsupportedType,
    #[error("upload directory unavailable")]
    DirectoryUnavailable(#[source] io::Error),
    #[error("allocated path escapes the upload root")]
    PathEscape,
    #[error("symlink in ancestor of upload path")]
    SymlinkDetected,
    #[error("writing upload data failed")]
    WriteFailed(#[source] io::Error),
    #[error("finalizing upload failed")]
    RenameFailed(#[source] io::Error),
    #[error("file not found")]
    NotFound,
}

/// A successfully stored upload.
///
/// Invariant: `path` is the canonical absolute location of the file and,
/// after resolving all symlinks, is a strict descendant of the upload root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    path: PathBuf,
    filename: String,
    kind: ImageKind,
}

impl StoredFile {
    /// Canonical absolute path of the stored file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The generated filename: a 36-character UUID stem plus extension.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The sniffed image kind the extension was derived from.
    pub fn kind(&self) -> ImageKind {
        self.kind
    }
}

/// Read-only metadata for a stored file, recomputed from stat on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub created: SystemTime,
    pub modified: SystemTime,
}

/// The provisioned upload root: its canonical path and an open directory fd.
///
/// Holding the fd lets all writes, stats and unlinks run relative to the
/// directory we validated, rather than re-walking the path for each
/// operation.
#[derive(Debug)]
struct RootDir {
    fd: OwnedFd,
    path: PathBuf,
}

/// A store for untrusted image uploads rooted at a single directory.
#[derive(Debug)]
pub struct UploadStore {
    configured: PathBuf,
    root: OnceCell<RootDir>,
}

/// Containment predicate: does `path`, after resolving all symlinks, lie
/// strictly inside `root`?  `root` must already be in canonical form.
///
/// The comparison must happen on the resolved path.  Checking the unresolved
/// string is the classic mistake: a symlink inside the root can point
/// anywhere, and only canonicalization reveals where the path actually leads.
/// Paths that cannot be resolved (including nonexistent ones) are not
/// contained.
pub fn is_contained(root: &Path, path: &Path) -> bool {
    match std::fs::canonicalize(path) {
        Ok(resolved) => resolved.starts_with(root) && resolved != root,
        Err(_) => false,
    }
}

fn filetime(secs: i64, nanos: u32) -> SystemTime {
    if secs < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(secs as u64, nanos)
}

/// Verify that a freshly-allocated candidate path stays inside the root.
///
/// By construction the candidate is `root/<uuid>.<ext>`, so this should be
/// unreachable, but the environment can change underneath us: the parent is
/// re-resolved and compared in canonical form, and every ancestor directory
/// is checked for being a symlink.  A symlinked ancestor would let the final
/// rename land outside the root even though the containment check passed.
fn check_candidate(root: &Path, candidate: &Path) -> Result<(), UploadError> {
    let (Some(parent), Some(name)) = (candidate.parent(), candidate.file_name()) else {
        return Err(UploadError::PathEscape);
    };

    let resolved = std::fs::canonicalize(parent)
        .map_err(UploadError::DirectoryUnavailable)?
        .join(name);
    if !(resolved.starts_with(root) && resolved != root) {
        error!(
            "allocated path {} escapes upload root {}",
            resolved.display(),
            root.display()
        );
        return Err(UploadError::PathEscape);
    }

    for ancestor in resolved.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        if let Ok(stat) = statat(CWD, ancestor, AtFlags::SYMLINK_NOFOLLOW) {
            if FileType::from_raw_mode(stat.st_mode).is_symlink() {
                error!(
                    "symlink ancestor {} while storing under {}",
                    ancestor.display(),
                    root.display()
                );
                return Err(UploadError::SymlinkDetected);
            }
        }
    }

    Ok(())
}

/// Write `data` to `<name>.tmp` in `dirfd`, sync it, then rename it over
/// `name`.
///
/// The rename is atomic because source and destination share a directory
/// (and therefore a filesystem).  Every failure path after the temp file is
/// created unlinks it before returning, so a failed upload leaves nothing
/// behind and a partial write is never observable at the final name.
fn write_atomic(dirfd: &OwnedFd, name: &str, data: &[u8]) -> Result<(), UploadError> {
    let tmp_name = format!("{name}.tmp");

    let fd = openat(
        dirfd,
        tmp_name.as_str(),
        OFlags::CREATE | OFlags::EXCL | OFlags::WRONLY | OFlags::CLOEXEC,
        Mode::from_raw_mode(0o600),
    )
    .map_err(|err| UploadError::WriteFailed(err.into()))?;

    let mut file = File::from(fd);
    if let Err(err) = file.write_all(data).and_then(|()| file.sync_data()) {
        drop(file);
        let _ = unlinkat(dirfd, tmp_name.as_str(), AtFlags::empty());
        return Err(UploadError::WriteFailed(err));
    }
    drop(file);

    if let Err(err) = renameat(dirfd, tmp_name.as_str(), dirfd, name) {
        let _ = unlinkat(dirfd, tmp_name.as_str(), AtFlags::empty());
        return Err(UploadError::RenameFailed(err.into()));
    }

    Ok(())
}

impl UploadStore {
    /// Create a store for the given root directory without touching the
    /// filesystem.  The root is provisioned lazily before the first write;
    /// use [`open`](Self::open) or [`ensure_ready`](Self::ensure_ready) to
    /// provision it eagerly at startup.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            configured: root.into(),
            root: OnceCell::new(),
        }
    }

    /// Create a store and provision its root directory immediately.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let store = Self::new(root);
        store.ensure_ready()?;
        Ok(store)
    }

    /// Idempotent root provisioning: create the directory (with parents) if
    /// needed, restrict it to owner-only access, canonicalize it and hold an
    /// open fd to it.
    pub fn ensure_ready(&self) -> Result<(), UploadError> {
        self.root_dir().map(|_| ())
    }

    /// The canonical upload root.  Provisions the root on first use.
    pub fn root_path(&self) -> Result<&Path, UploadError> {
        Ok(&self.root_dir()?.path)
    }

    fn root_dir(&self) -> Result<&RootDir, UploadError> {
        self.root.get_or_try_init(|| {
            create_dir_all(&self.configured).map_err(UploadError::DirectoryUnavailable)?;
            let path = std::fs::canonicalize(&self.configured)
                .map_err(UploadError::DirectoryUnavailable)?;
            let fd = openat(
                CWD,
                &path,
                OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
                Mode::empty(),
            )
            .map_err(|err| UploadError::DirectoryUnavailable(err.into()))?;
            fchmod(&fd, Mode::from_raw_mode(0o700))
                .map_err(|err| UploadError::DirectoryUnavailable(err.into()))?;
            info!("upload root ready: {}", path.display());
            Ok(RootDir { fd, path })
        })
    }

    /// Validate and persist an upload.
    ///
    /// `filename_hint` is the client-supplied filename; it is used for audit
    /// logging only and never influences the stored path.  On success the
    /// returned [`StoredFile`] names a complete, durable file inside the
    /// root.  On failure nothing is left behind, not even a temp file.
    pub fn store(&self, data: &[u8], filename_hint: &str) -> Result<StoredFile, UploadError> {
        if data.is_empty() {
            warn!("rejecting upload {filename_hint:?}: empty payload");
            return Err(UploadError::EmptyFile);
        }
        if data.len() > MAX_UPLOAD_SIZE {
            warn!(
                "rejecting upload {filename_hint:?}: {} bytes exceeds limit of {MAX_UPLOAD_SIZE}",
                data.len()
            );
            return Err(UploadError::FileTooLarge {
                size: data.len(),
                limit: MAX_UPLOAD_SIZE,
            });
        }

        let Some(kind) = sniff(data) else {
            warn!("rejecting upload {filename_hint:?}: content is not PNG or JPEG");
            return Err(UploadError::UnsupportedType);
        };

        let root = self.root_dir()?;

        let filename = format!("{}.{}", Uuid::new_v4(), kind.extension());
        let final_path = root.path.join(&filename);
        check_candidate(&root.path, &final_path)?;

        write_atomic(&root.fd, &filename, data)?;

        debug!(
            "stored upload {filename_hint:?} ({} bytes) as {}",
            data.len(),
            final_path.display()
        );
        Ok(StoredFile {
            path: final_path,
            filename,
            kind,
        })
    }

    /// Resolve an externally-supplied path and verify containment.
    ///
    /// Returns the target's location relative to the root.  A path that does
    /// not exist, cannot be resolved, or resolves outside the root all come
    /// back as `NotFound`: callers must not be able to tell "outside the
    /// root" apart from "does not exist".
    fn contained(&self, path: &Path) -> Result<(&RootDir, PathBuf), UploadError> {
        let root = self.root_dir()?;
        let resolved = std::fs::canonicalize(path).map_err(|_| UploadError::NotFound)?;
        let Ok(relative) = resolved.strip_prefix(&root.path) else {
            error!("access attempt outside upload root: {}", path.display());
            return Err(UploadError::NotFound);
        };
        if relative.as_os_str().is_empty() {
            // the root itself is not a stored file
            return Err(UploadError::NotFound);
        }
        Ok((root, relative.to_path_buf()))
    }

    /// Stat a stored file.
    ///
    /// Returns `None` for anything that is missing, not a regular file, or
    /// not contained in the root.  Absence and non-containment are
    /// deliberately indistinguishable so probes can't map directory
    /// structure outside the root.
    pub fn info(&self, path: impl AsRef<Path>) -> Option<FileInfo> {
        let path = path.as_ref();
        let (root, relative) = self.contained(path).ok()?;
        let stat = statat(&root.fd, &relative, AtFlags::SYMLINK_NOFOLLOW).ok()?;
        if !FileType::from_raw_mode(stat.st_mode).is_file() {
            return None;
        }
        Some(FileInfo {
            filename: relative.to_string_lossy().into_owned(),
            size: stat.st_size as u64,
            created: filetime(stat.st_ctime as i64, stat.st_ctime_nsec as u32),
            modified: filetime(stat.st_mtime as i64, stat.st_mtime_nsec as u32),
        })
    }

    /// Delete a stored file.
    ///
    /// Returns whether a file was actually removed.  Missing and
    /// non-contained paths return `false` without raising, so redundant
    /// deletes are safe.
    pub fn delete(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let Ok((root, relative)) = self.contained(path) else {
            return false;
        };
        match unlinkat(&root.fd, &relative, AtFlags::empty()) {
            Ok(()) => {
                debug!("deleted stored file {}", path.display());
                true
            }
            Err(Errno::NOENT) => false,
            Err(err) => {
                warn!("failed to delete {}: {err}", path.display());
                false
            }
        }
    }

    /// Same as [`store`](Self::store) but runs on the blocking thread pool
    /// to avoid stalling async tasks on filesystem I/O.
    pub async fn store_async(
        self: &Arc<Self>,
        data: Vec<u8>,
        filename_hint: String,
    ) -> Result<StoredFile, UploadError> {
        let self_ = Arc::clone(self);
        tokio::task::spawn_blocking(move || self_.store(&data, &filename_hint))
            .await
            .map_err(|err| UploadError::WriteFailed(io::Error::other(err)))?
    }

    /// Same as [`info`](Self::info) but runs on the blocking thread pool.
    pub async fn info_async(self: &Arc<Self>, path: PathBuf) -> Option<FileInfo> {
        let self_ = Arc::clone(self);
        tokio::task::spawn_blocking(move || self_.info(&path))
            .await
            .unwrap_or(None)
    }

    /// Same as [`delete`](Self::delete) but runs on the blocking thread pool.
    pub async fn delete_async(self: &Arc<Self>, path: PathBuf) -> bool {
        let self_ = Arc::clone(self);
        tokio::task::spawn_blocking(move || self_.delete(&path))
            .await
            .unwrap_or(false)
    }
}
