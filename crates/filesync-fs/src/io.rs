//! Atomic I/O operations with file locking

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;

use crate::{Error, NormalizedPath, Result};

/// Default permission bits for files created without an explicit mode.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default permission bits for directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write content atomically to a file with locking.
///
/// Uses write-to-temp-then-rename strategy to prevent partial writes.
/// Acquires an advisory lock to prevent concurrent access.
pub fn write_atomic(path: &NormalizedPath, content: &[u8]) -> Result<()> {
    let native_path = path.to_native();

    if let Some(parent) = native_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    // Temp file lives in the same directory so the rename stays on one filesystem
    let temp_name = format!(
        ".{}.{}.{}.tmp",
        native_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = native_path.with_file_name(&temp_name);

    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    temp_file
        .lock_exclusive()
        .map_err(|_| Error::LockFailed {
            path: native_path.clone(),
        })?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(&temp_path, e))?;
    temp_file.sync_all().map_err(|e| Error::io(&temp_path, e))?;

    temp_file.unlock().map_err(|_| Error::LockFailed {
        path: native_path.clone(),
    })?;

    if let Err(e) = fs::rename(&temp_path, &native_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::io(&native_path, e));
    }

    Ok(())
}

/// Write a file atomically and apply the given permission bits.
pub fn write_file(path: &NormalizedPath, content: &[u8], mode: u32) -> Result<()> {
    write_atomic(path, content)?;
    set_mode(path, mode)
}

/// Create a directory and all of its parents.
pub fn create_dir(path: &NormalizedPath) -> Result<()> {
    fs::create_dir_all(path.to_native()).map_err(|e| Error::io(path.to_native(), e))
}

/// Read a file's raw bytes.
pub fn read_bytes(path: &NormalizedPath) -> Result<Vec<u8>> {
    let native_path = path.to_native();
    fs::read(&native_path).map_err(|e| Error::io(&native_path, e))
}

/// Read text content from a file.
pub fn read_text(path: &NormalizedPath) -> Result<String> {
    let native_path = path.to_native();
    fs::read_to_string(&native_path).map_err(|e| Error::io(&native_path, e))
}

/// Move a file or directory tree, replacing anything already at `to`.
///
/// Returns `Ok(false)` when `from` does not exist.
pub fn move_replacing(from: &NormalizedPath, to: &NormalizedPath) -> Result<bool> {
    let source = from.to_native();
    let target = to.to_native();

    if fs::symlink_metadata(&source).is_err() {
        return Ok(false);
    }

    match fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(&target).map_err(|e| Error::io(&target, e))?
        }
        Ok(_) => fs::remove_file(&target).map_err(|e| Error::io(&target, e))?,
        Err(_) => {}
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    match fs::rename(&source, &target) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(&source, e)),
    }
}

/// Permission bits of an existing path.
#[cfg(unix)]
pub fn mode_of(path: &NormalizedPath) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;

    let native_path = path.to_native();
    let meta = fs::metadata(&native_path).map_err(|e| Error::io(&native_path, e))?;
    Ok(meta.permissions().mode() & 0o7777)
}

/// Permission bits of an existing path.
#[cfg(not(unix))]
pub fn mode_of(path: &NormalizedPath) -> Result<u32> {
    let native_path = path.to_native();
    let meta = fs::metadata(&native_path).map_err(|e| Error::io(&native_path, e))?;
    Ok(if meta.is_dir() {
        DEFAULT_DIR_MODE
    } else {
        DEFAULT_FILE_MODE
    })
}

/// Apply permission bits to a path.
#[cfg(unix)]
pub fn set_mode(path: &NormalizedPath, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let native_path = path.to_native();
    fs::set_permissions(&native_path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| Error::io(&native_path, e))
}

/// Apply permission bits to a path.
///
/// Only the owner-write bit has a native equivalent here.
#[cfg(not(unix))]
pub fn set_mode(path: &NormalizedPath, mode: u32) -> Result<()> {
    let native_path = path.to_native();
    let mut permissions = fs::metadata(&native_path)
        .map_err(|e| Error::io(&native_path, e))?
        .permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(&native_path, permissions).map_err(|e| Error::io(&native_path, e))
}
