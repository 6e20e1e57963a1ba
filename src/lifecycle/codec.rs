//! Archive payload encoding with LZ4 compression and CRC32 integrity.
//!
//! A payload is the bincode encoding of a partition's items, optionally
//! wrapped in an LZ4 frame. The checksum covers the stored bytes, so a
//! corrupted blob is rejected before anything is decoded from it.

use crate::error::{Error, Result};
use crate::types::Item;
use bytes::Bytes;
use crc::{Crc, CRC_32_ISCSI};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{Read, Write};

/// CRC-32 calculator (iSCSI polynomial)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Wrapper that calculates CRC32 while writing.
struct CrcWriter<W: Write> {
    inner: W,
    digest: crc::Digest<'static, u32>,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC32.digest(),
        }
    }

    fn finalize_crc(self) -> (W, u32) {
        (self.inner, self.digest.finalize())
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Wrapper that calculates CRC32 while reading.
struct CrcReader<R: Read> {
    inner: R,
    digest: crc::Digest<'static, u32>,
}

impl<R: Read> CrcReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            digest: CRC32.digest(),
        }
    }

    fn current_crc(&self) -> u32 {
        self.digest.clone().finalize()
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }
}

/// Encoded archive payload.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    /// Bytes to store.
    pub data: Bytes,
    /// Size of the uncompressed encoding.
    pub original_bytes: u64,
    /// CRC32 of `data`.
    pub checksum: u32,
}

/// Encode items, compressing when `compress` is set.
pub fn encode_items(items: &[Item], compress: bool) -> Result<EncodedPayload> {
    let raw = bincode::serialize(items)?;
    let original_bytes = raw.len() as u64;

    let (data, checksum) = if compress {
        let mut encoder = FrameEncoder::new(CrcWriter::new(Vec::with_capacity(raw.len() / 2)));
        encoder.write_all(&raw)?;
        let writer = encoder
            .finish()
            .map_err(|e| Error::Codec(format!("lz4 frame: {}", e)))?;
        writer.finalize_crc()
    } else {
        let mut writer = CrcWriter::new(Vec::with_capacity(raw.len()));
        writer.write_all(&raw)?;
        writer.finalize_crc()
    };

    Ok(EncodedPayload {
        data: Bytes::from(data),
        original_bytes,
        checksum,
    })
}

/// Decode items, verifying `expected_checksum` over the stored bytes.
pub fn decode_items(data: &[u8], compressed: bool, expected_checksum: u32) -> Result<Vec<Item>> {
    let mut raw = Vec::new();
    let actual = if compressed {
        let mut decoder = FrameDecoder::new(CrcReader::new(data));
        if let Err(e) = decoder.read_to_end(&mut raw) {
            // A damaged frame usually fails to decode; report it as a checksum
            // problem when the bytes do not match.
            let actual = CRC32.checksum(data);
            if actual != expected_checksum {
                return Err(Error::ChecksumMismatch {
                    expected: expected_checksum,
                    actual,
                });
            }
            return Err(Error::Codec(format!("lz4 frame: {}", e)));
        }
        let mut reader = decoder.into_inner();
        // Drain anything the decoder did not consume so the CRC covers it all.
        std::io::copy(&mut reader, &mut std::io::sink())?;
        reader.current_crc()
    } else {
        raw.extend_from_slice(data);
        CRC32.checksum(data)
    };

    if actual != expected_checksum {
        return Err(Error::ChecksumMismatch {
            expected: expected_checksum,
            actual,
        });
    }
    Ok(bincode::deserialize(&raw)?)
}
