//! Self-extracting executable packing.
//!
//! A packed binary is a copy of the packer's own executable with the target
//! program appended in compressed form:
//!
//! ```text
//! +---------------------------+
//! | Stub image                |  the packer itself, verbatim
//! +---------------------------+
//! | Compressed payload        |  C bytes
//! +---------------------------+
//! | Payload length (u64 LE)   |  C
//! +---------------------------+
//! | Footer magic              |  "LALALALA"
//! +---------------------------+
//! ```
//!
//! At startup the binary reads its own trailing eight bytes. Without the
//! magic it behaves as the packer; with it, it restores the payload over its
//! own path and replaces itself with the restored program.

use std::path::PathBuf;

pub mod compress;
pub mod config;
pub mod footer;
pub mod locate;
pub mod pack;
pub mod unpack;

pub use compress::{compress_stream, decompress_stream, Algorithm, Compression, CompressWriter, CountingWriter};
pub use config::{Config, PACKED_SUFFIX};
pub use footer::{detect_mode, Footer, RunMode, FOOTER_MAGIC, FOOTER_SIZE};
pub use locate::{look_path, SelfImage};
pub use pack::{PackReport, Packer};
pub use unpack::Unpacker;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not resolve executable {name:?}: {reason}")]
    PathResolution { name: PathBuf, reason: String },

    #[error("could not stat {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid target {}: {reason}", .path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    #[error("malformed packed image: {0}")]
    Format(String),

    #[error("payload decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("pkbuffer error: {0}")]
    Buffer(#[from] pkbuffer::Error),

    #[error("could not replace process with {}: {reason}", .path.display())]
    ProcessReplacement { path: PathBuf, reason: String },
}
impl Error {
    pub(crate) fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn exec<S: ToString>(path: PathBuf, reason: S) -> Self {
        Self::ProcessReplacement {
            path,
            reason: reason.to_string(),
        }
    }
}
