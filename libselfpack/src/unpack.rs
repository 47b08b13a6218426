//! Restoring a packed payload over the running image and handing off to it.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use nix::errno::Errno;
use nix::unistd::execve;
use tracing::{debug, info};

use crate::compress::decompress_stream;
use crate::config::Config;
use crate::footer::Footer;
use crate::Error;

pub struct Unpacker<'a> {
    config: &'a Config,
}
impl<'a> Unpacker<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Restores the payload of `image` over `path` and execs it. Only
    /// returns on failure.
    pub fn run<R: Read + Seek>(&self, image: &mut R, size: u64, path: &Path) -> Result<Infallible, Error> {
        let restored = self.read_payload(image, size)?;
        self.restore(path, &restored)?;
        self.exec(path)
    }

    /// Decompresses the payload of a packed image of `size` bytes into
    /// memory. Nothing outside the payload range is read into the result.
    pub fn read_payload<R: Read + Seek>(&self, image: &mut R, size: u64) -> Result<Vec<u8>, Error> {
        let footer = Footer::read_from(image, size)?;
        let offset = footer.payload_offset(size)?;
        debug!(offset, payload_len = footer.payload_len, size, "payload located");

        image.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("failed seeking payload", e))?;

        // the destination is the file being read, so the whole result has to
        // exist in memory before anything is written
        let mut restored = Vec::new();
        let payload = image.by_ref().take(footer.payload_len);
        decompress_stream(&self.config.algorithm, &mut restored, payload)
            .map_err(Error::Decompression)?;

        info!(payload_len = footer.payload_len, restored_len = restored.len(), "payload decompressed");

        Ok(restored)
    }

    /// Overwrites `path` with `contents` and marks it executable.
    pub fn restore(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        let mut file = match create_executable(path) {
            Ok(f) => f,
            // a running executable can't be opened for writing on Linux, but
            // its directory entry can be replaced
            Err(e) if e.raw_os_error() == Some(Errno::ETXTBSY as i32) => {
                debug!(path = %path.display(), "image busy, recreating");
                fs::remove_file(path)
                    .map_err(|e| Error::io(format!("failed unlinking {}", path.display()), e))?;
                create_executable(path)
                    .map_err(|e| Error::io(format!("failed creating {}", path.display()), e))?
            },
            Err(e) => return Err(Error::io(format!("failed opening {} for overwrite", path.display()), e)),
        };

        file.write_all(contents)
            .map_err(|e| Error::io(format!("failed writing {}", path.display()), e))?;
        file.set_permissions(Permissions::from_mode(0o755))
            .map_err(|e| Error::io(format!("failed marking {} executable", path.display()), e))?;

        Ok(())
    }

    /// Replaces the current process with `path`, passing the environment
    /// through and `path` as the only argument.
    pub fn exec(&self, path: &Path) -> Result<Infallible, Error> {
        let program = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| Error::exec(path.to_path_buf(), e))?;
        let environment = std::env::vars_os()
            .map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry)
            })
            .collect::<Result<Vec<CString>, _>>()
            .map_err(|e| Error::exec(path.to_path_buf(), e))?;

        info!(path = %path.display(), "replacing process");

        match execve(&program, &[&program], &environment) {
            Ok(never) => match never {},
            Err(errno) => Err(Error::exec(path.to_path_buf(), errno)),
        }
    }
}

fn create_executable(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(path)
}
