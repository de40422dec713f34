//! Disk layout and file lifecycle for artifacts.
//!
//! The in-progress file lives in a temp directory as `<filename>.part`; the
//! finished artifact is renamed into the downloads directory. Both paths are
//! derived from the descriptor's filename.

mod writer;

pub use writer::{finalize, ChunkWriter};

use std::io;
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Reduce a server-provided filename to a single safe path component.
/// Returns `None` if nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned)
}

/// Temp and final locations for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub temp: PathBuf,
    pub final_path: PathBuf,
}

impl ArtifactPaths {
    pub fn derive(temp_dir: &Path, download_dir: &Path, filename: &str) -> io::Result<Self> {
        let name = sanitize_filename(filename).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable artifact filename: {filename:?}"),
            )
        })?;
        Ok(Self {
            temp: temp_path(&temp_dir.join(&name)),
            final_path: download_dir.join(name),
        })
    }

    /// Remove both the partial and the final file, ignoring missing ones.
    pub fn remove_all(&self) -> io::Result<()> {
        remove_if_exists(&self.temp)?;
        remove_if_exists(&self.final_path)
    }
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Size of the file at `path`, or 0 when it does not exist.
pub fn file_len(path: &Path) -> io::Result<u64> {
    match std::fs::metadata(path) {
        Ok(m) => Ok(m.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Bytes available to an unprivileged writer on the filesystem holding `dir`.
/// `None` where the platform gives no answer.
#[cfg(unix)]
pub fn available_space(dir: &Path) -> io::Result<Option<u64>> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    // Walk up to an existing ancestor; the target dir may not exist yet.
    let mut probe = dir;
    while !probe.exists() {
        match probe.parent() {
            Some(p) => probe = p,
            None => return Ok(None),
        }
    }
    let c_path = CString::new(probe.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(stat.f_bavail as u64 * stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn available_space(_dir: &Path) -> io::Result<Option<u64>> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("file.iso"));
        assert_eq!(p.to_string_lossy(), "file.iso.part");
        let p2 = temp_path(Path::new("/tmp/archive.zip"));
        assert_eq!(p2.to_string_lossy(), "/tmp/archive.zip.part");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("fw.bin").as_deref(), Some("fw.bin"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("a\\b\\c.zip").as_deref(), Some("c.zip"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn paths_derived_from_filename() {
        let p = ArtifactPaths::derive(Path::new("/t"), Path::new("/d"), "ota-7.zip").unwrap();
        assert_eq!(p.temp, PathBuf::from("/t/ota-7.zip.part"));
        assert_eq!(p.final_path, PathBuf::from("/d/ota-7.zip"));
        assert!(ArtifactPaths::derive(Path::new("/t"), Path::new("/d"), "/").is_err());
    }

    #[test]
    fn remove_all_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = ArtifactPaths::derive(dir.path(), dir.path(), "x.bin").unwrap();
        std::fs::write(&p.temp, b"partial").unwrap();
        p.remove_all().unwrap();
        assert!(!p.temp.exists());
        assert_eq!(file_len(&p.temp).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn available_space_for_missing_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let space = available_space(&dir.path().join("not/yet/there")).unwrap();
        assert!(space.is_some());
    }
}
