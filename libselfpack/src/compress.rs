//! Streaming compression used for the packed payload.

use std::fmt;
use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use lzma_rust2::{XzOptions, XzReader, XzWriter};

/// zstd level used for payloads, tuned toward ratio over speed.
pub const ZSTD_LEVEL: i32 = 7;

/// xz preset used for payloads.
pub const XZ_PRESET: u32 = 6;

/// A compressing stream that has to be finished explicitly. Dropping it
/// without calling [`finish`](CompressWriter::finish) may lose buffered
/// output.
pub trait CompressWriter: Write {
    /// Flushes every pending compressed byte to the sink and writes the
    /// stream trailer.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write> CompressWriter for zstd::stream::write::Encoder<'static, W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        zstd::stream::write::Encoder::finish(*self).map(drop)
    }
}

impl<W: Write> CompressWriter for GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        GzEncoder::finish(*self).map(drop)
    }
}

impl<W: Write> CompressWriter for XzWriter<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        XzWriter::finish(*self)?;
        Ok(())
    }
}

/// The two capabilities the packer and unpacker need from an algorithm.
pub trait Compression {
    fn compress_writer<'a, W: Write + 'a>(&self, sink: W) -> io::Result<Box<dyn CompressWriter + 'a>>;
    fn decompress_reader<'a, R: Read + 'a>(&self, source: R) -> io::Result<Box<dyn Read + 'a>>;
}

/// The closed set of payload algorithms. Packed images carry no tag for
/// this, so packer and unpacker have to agree on it out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Zstd,
    Gzip,
    Xz,
}
impl Algorithm {
    /// The algorithm selected when this crate was built. `gzip` wins when
    /// both the `gzip` and `xz` features are on.
    pub const fn active() -> Self {
        if cfg!(feature = "gzip") {
            Self::Gzip
        }
        else if cfg!(feature = "xz") {
            Self::Xz
        }
        else {
            Self::Zstd
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Zstd => "zstd",
            Algorithm::Gzip => "gzip",
            Algorithm::Xz => "xz",
        }
    }
}
impl Default for Algorithm {
    fn default() -> Self {
        Self::active()
    }
}
impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl Compression for Algorithm {
    fn compress_writer<'a, W: Write + 'a>(&self, sink: W) -> io::Result<Box<dyn CompressWriter + 'a>> {
        match self {
            Algorithm::Zstd => Ok(Box::new(zstd::stream::write::Encoder::new(sink, ZSTD_LEVEL)?)),
            Algorithm::Gzip => Ok(Box::new(GzEncoder::new(sink, GzLevel::fast()))),
            Algorithm::Xz => Ok(Box::new(XzWriter::new(sink, XzOptions::with_preset(XZ_PRESET))?)),
        }
    }

    fn decompress_reader<'a, R: Read + 'a>(&self, source: R) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            Algorithm::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(source)?)),
            Algorithm::Gzip => Ok(Box::new(GzDecoder::new(source))),
            Algorithm::Xz => Ok(Box::new(XzReader::new(source, false))),
        }
    }
}

/// Compresses everything `input` yields into `out`, finishing the
/// compressor once the copy succeeded. Returns the number of uncompressed
/// bytes consumed.
pub fn compress_stream<C, W, R>(compression: &C, out: W, mut input: R) -> io::Result<u64>
where
    C: Compression,
    W: Write,
    R: Read,
{
    let mut writer = compression.compress_writer(out)?;
    let consumed = io::copy(&mut input, &mut writer)?;
    writer.finish()?;

    Ok(consumed)
}

/// Decompresses `input` into `out`. Returns the number of decompressed
/// bytes produced.
pub fn decompress_stream<C, W, R>(compression: &C, mut out: W, input: R) -> io::Result<u64>
where
    C: Compression,
    W: Write,
    R: Read,
{
    let mut reader = compression.decompress_reader(input)?;
    io::copy(&mut reader, &mut out)
}

/// Passes writes through to `inner` and remembers how many bytes it
/// accepted.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}
impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGORITHMS: [Algorithm; 3] = [Algorithm::Zstd, Algorithm::Gzip, Algorithm::Xz];

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i / 7) as u8).collect()
    }

    fn compress(algorithm: Algorithm, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let consumed = compress_stream(&algorithm, &mut out, data).unwrap();
        assert_eq!(consumed, data.len() as u64);
        out
    }

    #[test]
    fn streams_round_trip_for_every_algorithm() {
        let data = sample(64 * 1024 + 3);

        for algorithm in ALGORITHMS {
            let compressed = compress(algorithm, &data);
            let mut restored = Vec::new();
            let produced = decompress_stream(&algorithm, &mut restored, compressed.as_slice()).unwrap();

            assert_eq!(produced, data.len() as u64, "{}", algorithm);
            assert_eq!(restored, data, "{}", algorithm);
        }
    }

    #[test]
    fn empty_input_still_produces_a_valid_stream() {
        for algorithm in ALGORITHMS {
            let compressed = compress(algorithm, &[]);
            assert!(!compressed.is_empty(), "{} wrote no frame", algorithm);

            let mut restored = Vec::new();
            decompress_stream(&algorithm, &mut restored, compressed.as_slice()).unwrap();
            assert!(restored.is_empty());
        }
    }

    #[test]
    fn finishing_flushes_the_trailer() {
        // without finish() a gzip stream lacks its CRC/size trailer and
        // fails to decode to the end
        let data = sample(4096);
        let mut out = Vec::new();
        let mut writer = Algorithm::Gzip.compress_writer(&mut out).unwrap();
        writer.write_all(&data).unwrap();
        writer.finish().unwrap();

        let mut restored = Vec::new();
        GzDecoder::new(out.as_slice()).read_to_end(&mut restored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn xz_finish_writes_a_complete_stream() {
        // an xz stream ends in a footer carrying the "YZ" magic
        let compressed = compress(Algorithm::Xz, &sample(8192));
        assert_eq!(&compressed[..6], b"\xfd7zXZ\x00");
        assert_eq!(&compressed[compressed.len() - 2..], b"YZ");

        let mut restored = Vec::new();
        decompress_stream(&Algorithm::Xz, &mut restored, compressed.as_slice()).unwrap();
        assert_eq!(restored, sample(8192));
    }

    #[test]
    fn wrong_algorithm_is_a_decode_error() {
        let compressed = compress(Algorithm::Zstd, &sample(1000));
        let mut restored = Vec::new();

        assert!(decompress_stream(&Algorithm::Gzip, &mut restored, compressed.as_slice()).is_err());
    }

    #[test]
    fn counting_writer_counts_what_the_sink_accepted() {
        let mut counter = CountingWriter::new(Vec::new());
        counter.write_all(b"abc").unwrap();
        counter.write_all(&[0u8; 61]).unwrap();

        assert_eq!(counter.count(), 64);
        assert_eq!(counter.into_inner().len(), 64);
    }

    #[test]
    fn counted_bytes_match_compressed_length() {
        let data = sample(10_000);
        let mut counter = CountingWriter::new(Vec::new());
        compress_stream(&Algorithm::Zstd, &mut counter, data.as_slice()).unwrap();

        let count = counter.count();
        assert_eq!(count, counter.into_inner().len() as u64);
    }

    #[test]
    fn active_algorithm_follows_build_features() {
        let expected = if cfg!(feature = "gzip") {
            Algorithm::Gzip
        }
        else if cfg!(feature = "xz") {
            Algorithm::Xz
        }
        else {
            Algorithm::Zstd
        };
        assert_eq!(Algorithm::default(), expected);
        assert_eq!(Algorithm::Zstd.to_string(), "zstd");
        assert_eq!(Algorithm::Xz.to_string(), "xz");
    }
}
