//! Building packed images: stub, compressed target, footer.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::compress::{compress_stream, CountingWriter};
use crate::config::Config;
use crate::footer::{Footer, FOOTER_SIZE};
use crate::Error;

/// Sizes of a freshly written packed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackReport {
    pub output: PathBuf,
    pub stub_len: u64,
    pub original_len: u64,
    pub payload_len: u64,
}
impl PackReport {
    /// Size of the whole packed image on disk.
    pub fn packed_len(&self) -> u64 {
        self.stub_len + self.payload_len + FOOTER_SIZE
    }
}

pub struct Packer<'a> {
    config: &'a Config,
    stub: PathBuf,
}
impl<'a> Packer<'a> {
    /// `stub` is the executable copied in front of every payload, normally
    /// the running binary itself.
    pub fn new<P: AsRef<Path>>(config: &'a Config, stub: P) -> Self {
        Self {
            config,
            stub: stub.as_ref().to_path_buf(),
        }
    }

    /// Default output location for `target`.
    pub fn output_path<P: AsRef<Path>>(&self, target: P) -> PathBuf {
        let mut name = target.as_ref().as_os_str().to_os_string();
        name.push(&self.config.packed_suffix);

        PathBuf::from(name)
    }

    /// Writes `stub + compressed(target) + footer` to `output`. A failure
    /// after the stub copy leaves `output` without a footer, so it never
    /// detects as a packed image.
    pub fn pack<P: AsRef<Path>, Q: AsRef<Path>>(&self, target: P, output: Q) -> Result<PackReport, Error> {
        let target = target.as_ref();
        let output = output.as_ref();

        self.validate(target, output)?;

        info!(target = %target.display(), output = %output.display(), algorithm = %self.config.algorithm, "packing");

        let stub_len = self.copy_stub(output)?;
        debug!(stub_len, "stub copied");

        let input = File::open(target)
            .map_err(|e| Error::io(format!("failed opening target {}", target.display()), e))?;
        let destination = OpenOptions::new()
            .append(true)
            .open(output)
            .map_err(|e| Error::io(format!("failed opening {} for append", output.display()), e))?;

        let mut sink = CountingWriter::new(BufWriter::new(destination));
        let original_len = compress_stream(&self.config.algorithm, &mut sink, input)
            .map_err(|e| Error::io("failed appending compressed payload", e))?;
        let payload_len = sink.count();
        debug!(original_len, payload_len, "payload appended");

        let mut writer = sink.into_inner();
        writer.write_all(&Footer::new(payload_len).to_bytes()?)
            .map_err(|e| Error::io("failed appending footer", e))?;
        writer.into_inner()
            .map_err(|e| Error::io("failed flushing packed image", e.into_error()))?;

        let report = PackReport {
            output: output.to_path_buf(),
            stub_len,
            original_len,
            payload_len,
        };
        info!(packed_len = report.packed_len(), "packed");

        Ok(report)
    }

    fn validate(&self, target: &Path, output: &Path) -> Result<(), Error> {
        let metadata = fs::metadata(target).map_err(|e| Error::InvalidTarget {
            path: target.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !metadata.is_file() {
            return Err(Error::InvalidTarget {
                path: target.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        if same_file(output, target) || same_file(output, &self.stub) {
            return Err(Error::InvalidTarget {
                path: target.to_path_buf(),
                reason: format!("output {} would overwrite an input", output.display()),
            });
        }

        Ok(())
    }

    fn copy_stub(&self, output: &Path) -> Result<u64, Error> {
        let stub_len = fs::copy(&self.stub, output)
            .map_err(|e| Error::io(format!("failed copying stub {}", self.stub.display()), e))?;

        fs::set_permissions(output, Permissions::from_mode(0o755))
            .map_err(|e| Error::io(format!("failed marking {} executable", output.display()), e))?;

        Ok(stub_len)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }

    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
