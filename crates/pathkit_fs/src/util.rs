use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::spec::TreeError;

////////////////////////////////////////////////////////////////////////////////
// #region DirectoryIdentity

/// Filesystem-stable identity of a directory, used for cycle detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DirIdentity {
    /// `(st_dev, st_ino)`.
    Inode(u64, u64),
    /// Canonical path where inode numbers are unavailable.
    Canonical(PathBuf),
}

/// Resolve `path` (following symlinks) to its [`DirIdentity`].
pub(crate) fn identify_dir(path: &Path) -> io::Result<DirIdentity> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let stat_dir = fs::metadata(path)?;
        Ok(DirIdentity::Inode(stat_dir.dev(), stat_dir.ino()))
    }
    #[cfg(not(unix))]
    {
        fs::canonicalize(path).map(DirIdentity::Canonical)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

fn _normalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    _absolutize_path(path)
}

fn _absolutize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

/// Whether one of `src`/`dst` contains the other once both are resolved.
pub(crate) fn is_overlap(src: &Path, dst: &Path) -> bool {
    let src_resolved = _normalize_path(src);
    let dst_resolved = match dst.parent() {
        // `dst` may not exist yet; resolve via its parent when possible.
        Some(parent) if !dst.exists() && parent.exists() => dst
            .file_name()
            .map(|name| _normalize_path(parent).join(name))
            .unwrap_or_else(|| _normalize_path(dst)),
        _ => _normalize_path(dst),
    };
    dst_resolved.starts_with(&src_resolved) || src_resolved.starts_with(&dst_resolved)
}

/// Reject destination writes that would escape `path_dir_dst_root` or pass
/// through a symlinked component.
pub(crate) fn validate_destination_path_safety(
    path_dst_item: &Path,
    path_dir_dst_root: &Path,
) -> Result<(), TreeError> {
    let unsafe_destination = |message: String| TreeError::UnsafeDestination {
        path: path_dst_item.to_path_buf(),
        message,
    };

    let path_dir_dst_root_abs = _absolutize_path(path_dir_dst_root);
    let path_dst_item_abs = _absolutize_path(path_dst_item);

    let path_rel = path_dst_item_abs
        .strip_prefix(&path_dir_dst_root_abs)
        .map_err(|_| {
            unsafe_destination(format!(
                "Unsafe destination path escapes destination root: {} (root={})",
                path_dst_item.display(),
                path_dir_dst_root.display()
            ))
        })?;

    // Every component below the root, including the item itself, must not be a symlink.
    let mut path_cursor = path_dir_dst_root_abs.clone();
    for part_rel in path_rel.components() {
        path_cursor.push(part_rel.as_os_str());
        match fs::symlink_metadata(&path_cursor) {
            Ok(meta_cursor) if meta_cursor.file_type().is_symlink() => {
                return Err(unsafe_destination(format!(
                    "Unsafe destination path traverses symlink component: {}",
                    path_cursor.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => {
                return Err(unsafe_destination(format!(
                    "Failed to inspect destination path component {} ({e})",
                    path_cursor.display()
                )));
            }
        }
    }
    Ok(())
}

/// Recreate the symlink at `path_src` as `path_dst`.
pub(crate) fn create_symbolic_link(path_src: &Path, path_dst: &Path) -> io::Result<()> {
    let target = fs::read_link(path_src)?;

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target, path_dst)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::{symlink_dir, symlink_file};
        if path_src.is_dir() {
            symlink_dir(&target, path_dst)
        } else {
            symlink_file(&target, path_dst)
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, path_dst);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Symbolic links are unsupported on this platform",
        ))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Metadata

/// Copy permissions and access/modification times from `path_src` to `path_dst`.
pub(crate) fn apply_metadata(path_src: &Path, path_dst: &Path) -> io::Result<()> {
    use filetime::{FileTime, set_file_times};

    let stat_src = fs::metadata(path_src)?;
    fs::set_permissions(path_dst, stat_src.permissions())?;

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_dst, file_time_access, file_time_modify)
}

/// Best-effort extended attribute copy; individual failures are ignored.
#[cfg(target_os = "linux")]
pub(crate) fn copy_xattrs(path_src: &Path, path_dst: &Path) {
    let Ok(iter_xattr_names) = xattr::list(path_src) else {
        return;
    };

    for name in iter_xattr_names {
        let Some(raw_value) = xattr::get(path_src, &name).ok().flatten() else {
            continue;
        };
        let _ = xattr::set(path_dst, &name, &raw_value);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn copy_xattrs(_path_src: &Path, _path_dst: &Path) {}

// #endregion
////////////////////////////////////////////////////////////////////////////////
