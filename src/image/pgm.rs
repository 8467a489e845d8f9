//! Portable graymap codec (P2 ASCII and P5 binary, 8-bit samples)
//!
//! ```text
//! P5 <ws> [# comment \n]* width <ws> height <ws> maxval <1 ws byte> raster
//! P2 ...same header...                                    ascii samples
//! ```
//! Images above `MAX_PIXELS` are rejected from the header, before the raster
//! is read.

use crate::types::{checked_pixel_count, ImageRecord};
use crate::{Result, StorageError};
use std::io::Write;
use std::path::Path;

/// Samples per line when writing P2
const ASCII_SAMPLES_PER_LINE: usize = 20;

/// Output flavour for [`encode_pgm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PgmFormat {
    /// P2, decimal samples
    Ascii,

    /// P5, raw bytes
    #[default]
    Binary,
}

impl PgmFormat {
    pub fn magic(&self) -> &'static str {
        match self {
            Self::Ascii => "P2",
            Self::Binary => "P5",
        }
    }
}

/// Decode the PGM file at `path`; the path becomes the record's source name
pub fn decode_pgm<P: AsRef<Path>>(path: P) -> Result<ImageRecord> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    decode_pgm_bytes(&path.to_string_lossy(), &bytes)
}

/// Decode an in-memory PGM image
pub fn decode_pgm_bytes(source_name: &str, bytes: &[u8]) -> Result<ImageRecord> {
    let format = match bytes.get(..2) {
        Some(b"P2") => PgmFormat::Ascii,
        Some(b"P5") => PgmFormat::Binary,
        _ => {
            return Err(StorageError::Format(format!(
                "{}: unsupported format (only P2 and P5)",
                source_name
            )))
        }
    };

    let mut cursor = Cursor { bytes, pos: 2 };
    let width = cursor.number(source_name, "width")?;
    let height = cursor.number(source_name, "height")?;
    let max_value = cursor.number(source_name, "max value")?;

    if max_value == 0 || max_value > u8::MAX as u32 {
        return Err(StorageError::Format(format!(
            "{}: max value {} is not an 8-bit graymap",
            source_name, max_value
        )));
    }
    let count = checked_pixel_count(width, height)?;

    let pixels = match format {
        PgmFormat::Binary => {
            // single whitespace byte ends the header
            cursor.pos += 1;
            cursor
                .bytes
                .get(cursor.pos..cursor.pos + count)
                .ok_or_else(|| {
                    StorageError::Format(format!(
                        "{}: raster truncated, expected {} bytes",
                        source_name, count
                    ))
                })?
                .to_vec()
        }
        PgmFormat::Ascii => {
            let mut pixels = Vec::with_capacity(count);
            for _ in 0..count {
                let value = cursor.number(source_name, "sample")?;
                if value > max_value {
                    return Err(StorageError::Format(format!(
                        "{}: sample {} exceeds max value {}",
                        source_name, value, max_value
                    )));
                }
                pixels.push(value as u8);
            }
            pixels
        }
    };

    ImageRecord::new(source_name, width, height, max_value as u8, pixels)
}

/// Encode `record` as PGM
pub fn encode_pgm(record: &ImageRecord, format: PgmFormat) -> Result<Vec<u8>> {
    record.validate()?;

    let mut out = Vec::with_capacity(record.pixel_count() * 4 + 32);
    write!(
        out,
        "{}\n{} {}\n{}\n",
        format.magic(),
        record.width,
        record.height,
        record.max_value
    )?;

    match format {
        PgmFormat::Binary => out.extend_from_slice(&record.pixels),
        PgmFormat::Ascii => {
            for (i, sample) in record.pixels.iter().enumerate() {
                write!(out, "{} ", sample)?;
                if (i + 1) % ASCII_SAMPLES_PER_LINE == 0 {
                    out.push(b'\n');
                }
            }
            out.push(b'\n');
        }
    }
    Ok(out)
}

/// Encode `record` and write it to `path`
pub fn write_pgm<P: AsRef<Path>>(record: &ImageRecord, path: P, format: PgmFormat) -> Result<()> {
    let data = encode_pgm(record, format)?;
    std::fs::write(path, data)?;
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn skip_blanks(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'#' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn number(&mut self, source_name: &str, what: &str) -> Result<u32> {
        self.skip_blanks();
        let start = self.pos;
        while self.bytes.get(self.pos).map_or(false, |b| b.is_ascii_digit()) {
            self.pos += 1;
        }

        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| {
                StorageError::Format(format!("{}: missing or invalid {} at byte {}", source_name, what, start))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_PIXELS;
    use tempfile::TempDir;

    #[test]
    fn test_decode_ascii_with_comment() {
        let data = b"P2\n# made by hand\n3 2\n255\n0 10 20\n30 40 255\n";
        let record = decode_pgm_bytes("hand.pgm", data).unwrap();

        assert_eq!((record.width, record.height, record.max_value), (3, 2, 255));
        assert_eq!(record.pixels, vec![0, 10, 20, 30, 40, 255]);
        assert_eq!(record.source_name, "hand.pgm");
        assert_eq!(record.threshold, None);
    }

    #[test]
    fn test_decode_binary() {
        let mut data = b"P5\n2 2\n200\n".to_vec();
        data.extend_from_slice(&[1, b'\n', b' ', 200]);

        let record = decode_pgm_bytes("raw.pgm", &data).unwrap();
        assert_eq!(record.max_value, 200);
        // raster bytes are taken verbatim, whitespace values included
        assert_eq!(record.pixels, vec![1, b'\n', b' ', 200]);
    }

    #[test]
    fn test_rejects_other_formats() {
        for data in [&b"P3\n1 1\n255\n0 0 0\n"[..], b"P6\n1 1\n255\n", b"", b"P"] {
            assert!(matches!(decode_pgm_bytes("x", data), Err(StorageError::Format(_))));
        }
    }

    #[test]
    fn test_rejects_oversized_before_raster() {
        let data = b"P5\n641 480\n255\n";
        assert!(matches!(decode_pgm_bytes("big.pgm", data), Err(StorageError::Format(_))));
        assert!(checked_pixel_count(640, 480).unwrap() == MAX_PIXELS);
    }

    #[test]
    fn test_rejects_truncated_and_sixteen_bit() {
        assert!(decode_pgm_bytes("t.pgm", b"P5\n4 4\n255\n\x01\x02").is_err());
        assert!(decode_pgm_bytes("t.pgm", b"P2\n2 1\n255\n7\n").is_err());
        assert!(decode_pgm_bytes("t.pgm", b"P2\n1 1\n65535\n7\n").is_err());
        assert!(decode_pgm_bytes("t.pgm", b"P2\n1 1\n255\n300\n").is_err());
    }

    #[test]
    fn test_rejects_ascii_sample_above_max_value() {
        let result = decode_pgm_bytes("m.pgm", b"P2\n2 1\n200\n10 255\n");
        assert!(matches!(result, Err(StorageError::Format(_))));

        let record = decode_pgm_bytes("m.pgm", b"P2\n2 1\n200\n10 200\n").unwrap();
        assert_eq!(record.pixels, vec![10, 200]);
    }

    #[test]
    fn test_ascii_encoding_wraps_lines() {
        let record = ImageRecord::new("w.pgm", 25, 1, 255, vec![7; 25]).unwrap();
        let text = String::from_utf8(encode_pgm(&record, PgmFormat::Ascii).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(&lines[..3], &["P2", "25 1", "255"]);
        assert_eq!(lines[3].split_whitespace().count(), 20);
        assert_eq!(lines[4].split_whitespace().count(), 5);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_written_files_decode_again() {
        let temp = TempDir::new().unwrap();
        let record = ImageRecord::new("src.pgm", 4, 3, 255, (0..12).map(|v| v * 20).collect()).unwrap();

        for (format, file) in [(PgmFormat::Binary, "out5.pgm"), (PgmFormat::Ascii, "out2.pgm")] {
            let path = temp.path().join(file);
            write_pgm(&record, &path, format).unwrap();
            let back = decode_pgm(&path).unwrap();
            assert_eq!(back.pixels, record.pixels);
            assert_eq!((back.width, back.height), (4, 3));
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(decode_pgm(temp.path().join("nope.pgm")), Err(StorageError::Io(_))));
    }
}
