//! The fixed trailer of a packed image and run mode detection.

use std::io::{self, SeekFrom};

use pkbuffer::*;
use tracing::debug;

use crate::Error;

/// Last eight bytes of every packed image.
pub const FOOTER_MAGIC: [u8; 8] = *b"LALALALA";

/// Payload length field plus magic.
pub const FOOTER_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No footer: act as the packing tool.
    Packer,
    /// Footer present: restore the payload and hand off to it.
    Unpacker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Compressed payload size in bytes.
    pub payload_len: u64,
}
impl Footer {
    pub fn new(payload_len: u64) -> Self {
        Self { payload_len }
    }

    pub fn parse<B: AsRef<[u8]>>(data: B) -> Result<Self, Error> {
        let buf = data.as_ref();

        if buf.len() != FOOTER_SIZE as usize {
            return Err(Error::Format(format!("footer is {} bytes, expected {}", buf.len(), FOOTER_SIZE)));
        }

        let buffer = VecBuffer::from_data(buf);
        let magic = buffer.read(8, FOOTER_MAGIC.len())?;

        if magic != &FOOTER_MAGIC[..] {
            return Err(Error::Format("footer magic not found".to_string()));
        }

        let payload_len = buffer.get_ref::<u64>(0)?;

        Ok(Self {
            payload_len: u64::from_le(*payload_len),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = VecBuffer::new();

        buffer.append_ref(&self.payload_len.to_le())?;
        buffer.append(&FOOTER_MAGIC);

        Ok(buffer.to_vec())
    }

    /// Reads the trailer of an image that is `image_size` bytes long.
    pub fn read_from<R: io::Read + io::Seek>(reader: &mut R, image_size: u64) -> Result<Self, Error> {
        let start = image_size.checked_sub(FOOTER_SIZE).ok_or_else(|| {
            Error::Format(format!("image of {} bytes cannot hold a footer", image_size))
        })?;

        reader.seek(SeekFrom::Start(start))
            .map_err(|e| Error::io("failed seeking payload length", e))?;

        let mut raw = [0u8; FOOTER_SIZE as usize];
        reader.read_exact(&mut raw)
            .map_err(|e| Error::io("failed reading footer", e))?;

        Self::parse(raw)
    }

    /// Offset of the first payload byte, derived backwards from the end of
    /// an image of `image_size` bytes.
    pub fn payload_offset(&self, image_size: u64) -> Result<u64, Error> {
        image_size.checked_sub(FOOTER_SIZE)
            .and_then(|end| end.checked_sub(self.payload_len))
            .ok_or_else(|| Error::Format(format!("payload length {} does not fit in an image of {} bytes",
                                                 self.payload_len,
                                                 image_size)))
    }
}

/// Decides the run mode from the trailing magic of an image. Images shorter
/// than the magic are never read and always run as the packer.
pub fn detect_mode<R: io::Read + io::Seek>(reader: &mut R, size: u64) -> Result<RunMode, Error> {
    let magic_len = FOOTER_MAGIC.len() as u64;

    if size < magic_len {
        debug!(size, "image shorter than footer magic");
        return Ok(RunMode::Packer);
    }

    reader.seek(SeekFrom::Start(size - magic_len))
        .map_err(|e| Error::io("failed seeking footer magic", e))?;

    let mut found = [0u8; FOOTER_MAGIC.len()];
    reader.read_exact(&mut found)
        .map_err(|e| Error::io("failed reading footer magic", e))?;

    let mode = if found == FOOTER_MAGIC { RunMode::Unpacker } else { RunMode::Packer };
    debug!(?mode, size, "detected run mode");

    Ok(mode)
}
