//! Finding the running executable on disk.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Error;

/// The on-disk image of the running executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfImage {
    pub path: PathBuf,
    pub size: u64,
}
impl SelfImage {
    /// Resolves `argv0` the way a shell would and stats the result.
    pub fn locate<S: AsRef<OsStr>>(argv0: S) -> Result<Self, Error> {
        let path = look_path(argv0)?;
        let metadata = fs::metadata(&path).map_err(|source| Error::Stat {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), size = metadata.len(), "located self image");

        Ok(Self {
            path,
            size: metadata.len(),
        })
    }

    pub fn open(&self) -> Result<File, Error> {
        File::open(&self.path)
            .map_err(|e| Error::io(format!("failed opening self image {}", self.path.display()), e))
    }
}

/// Resolves an executable name against `PATH`, or directly when it already
/// contains a directory component. The result is absolute.
pub fn look_path<S: AsRef<OsStr>>(name: S) -> Result<PathBuf, Error> {
    look_path_in(name.as_ref(), env::var_os("PATH"))
}

fn look_path_in(name: &OsStr, search: Option<OsString>) -> Result<PathBuf, Error> {
    let failure = |reason: &str| Error::PathResolution {
        name: PathBuf::from(name),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(failure("empty executable name"));
    }

    let candidate = Path::new(name);

    if candidate.components().count() > 1 {
        return if is_executable(candidate) {
            absolute(candidate)
        }
        else {
            Err(failure("not an executable file"))
        };
    }

    let search = search.unwrap_or_default();

    for dir in env::split_paths(&search) {
        // an empty PATH entry means the working directory
        let dir = if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir };
        let full = dir.join(candidate);

        if is_executable(&full) {
            return absolute(&full);
        }
    }

    Err(failure("executable file not found in PATH"))
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(m) => m.is_file() && m.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = env::current_dir().map_err(|e| Error::PathResolution {
        name: path.to_path_buf(),
        reason: format!("working directory unavailable: {}", e),
    })?;

    Ok(cwd.join(path))
}
