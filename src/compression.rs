//! Magic-byte-sniffing decompressor for the SQLite databases referenced by a repomd manifest.

use crate::errors::*;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const BZIP2_MAGIC: [u8; 3] = [b'B', b'Z', b'h'];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

pub enum Decompressor<R: BufRead> {
    Plain(R),
    Gz(flate2::read::GzDecoder<R>),
    Bz2(bzip2::read::BzDecoder<R>),
    Xz(xz2::read::XzDecoder<R>),
    Zstd(zstd::stream::read::Decoder<'static, R>),
}

impl<R: BufRead> Decompressor<R> {
    /// Sniffs the first bytes of `reader` and wraps it in the matching decoder.
    /// Anything that doesn't match a known compressed magic (including the raw
    /// SQLite header) is passed through verbatim.
    pub fn detect(mut reader: R) -> Result<Self> {
        let mut sig = [0u8; 16];
        {
            let buf = reader.fill_buf()?;
            let n = buf.len().min(sig.len());
            sig[..n].copy_from_slice(&buf[..n]);
        }

        if sig[..2] == GZIP_MAGIC {
            Ok(Decompressor::Gz(flate2::read::GzDecoder::new(reader)))
        } else if sig[..3] == BZIP2_MAGIC {
            Ok(Decompressor::Bz2(bzip2::read::BzDecoder::new(reader)))
        } else if sig[..6] == XZ_MAGIC {
            Ok(Decompressor::Xz(xz2::read::XzDecoder::new(reader)))
        } else if sig[..4] == ZSTD_MAGIC {
            Ok(Decompressor::Zstd(zstd::stream::read::Decoder::with_buffer(reader)?))
        } else {
            Ok(Decompressor::Plain(reader))
        }
    }
}

impl<R: BufRead> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Plain(r) => r.read(buf),
            Decompressor::Gz(r) => r.read(buf),
            Decompressor::Bz2(r) => r.read(buf),
            Decompressor::Xz(r) => r.read(buf),
            Decompressor::Zstd(r) => r.read(buf),
        }
    }
}

/// Unpacks a (possibly compressed) database file at `src` into a fresh file at `dest`,
/// applying `mode` (unix permission bits) to the result when given.
pub fn unpack_to_path(src: &Path, dest: &Path, mode: Option<u32>) -> Result<()> {
    let reader = BufReader::new(File::open(src)?);
    let mut decompressor = Decompressor::detect(reader)?;

    let mut out = File::create(dest)?;
    io::copy(&mut decompressor, &mut out)?;
    out.flush()?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        out.set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// True iff `buf` starts with the raw SQLite file header.
pub fn is_raw_sqlite(buf: &[u8]) -> bool {
    buf.starts_with(SQLITE_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(compress: impl FnOnce(&[u8]) -> Vec<u8>) {
        let data = b"SQLite format 3\0and then some payload bytes to make this interesting".to_vec();
        let compressed = compress(&data);
        let mut decompressor = Decompressor::detect(BufReader::new(Cursor::new(compressed))).unwrap();
        let mut out = Vec::new();
        decompressor.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_gzip_roundtrip() {
        roundtrip(|data| {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        });
    }

    #[test]
    fn test_bzip2_roundtrip() {
        roundtrip(|data| {
            use bzip2::write::BzEncoder;
            use bzip2::Compression;
            let mut enc = BzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        });
    }

    #[test]
    fn test_xz_roundtrip() {
        roundtrip(|data| {
            let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        });
    }

    #[test]
    fn test_zstd_roundtrip() {
        roundtrip(|data| zstd::stream::encode_all(data, 0).unwrap());
    }

    #[test]
    fn test_plain_passthrough() {
        roundtrip(|data| data.to_vec());
    }

    #[test]
    fn test_is_raw_sqlite() {
        assert!(is_raw_sqlite(b"SQLite format 3\0rest"));
        assert!(!is_raw_sqlite(b"not a database"));
    }
}
