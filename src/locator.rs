use crate::PrepError;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A byte range inside a packed archive: `<archive_path>:<offset>:<length>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureLocator {
    archive_path: PathBuf,
    byte_offset: u64,
    byte_length: u64,
}

impl FeatureLocator {
    /// Paths containing `:` are rejected since they could not be decoded again.
    pub fn new(
        archive_path: impl Into<PathBuf>,
        byte_offset: u64,
        byte_length: u64,
    ) -> Result<Self, PrepError> {
        let archive_path = archive_path.into();
        let Some(path_str) = archive_path.to_str() else {
            return Err(PrepError::MalformedLocator {
                input: archive_path.to_string_lossy().to_string(),
                reason: "archive path is not valid UTF-8".to_string(),
            });
        };
        if path_str.is_empty() {
            return Err(PrepError::MalformedLocator {
                input: String::new(),
                reason: "archive path is empty".to_string(),
            });
        }
        if path_str.contains(':') {
            return Err(PrepError::MalformedLocator {
                input: path_str.to_string(),
                reason: "archive path contains ':'".to_string(),
            });
        }
        Ok(Self { archive_path, byte_offset, byte_length })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    /// Read exactly the addressed bytes from the archive.
    pub fn read_bytes(&self) -> Result<Vec<u8>, PrepError> {
        let mut file = File::open(&self.archive_path)?;
        file.seek(SeekFrom::Start(self.byte_offset))?;
        let mut buf = vec![0u8; self.byte_length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

pub fn encode(locator: &FeatureLocator) -> String {
    locator.to_string()
}

pub fn decode(input: &str) -> Result<FeatureLocator, PrepError> {
    input.parse()
}

impl fmt::Display for FeatureLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // new() guarantees a UTF-8 path
        write!(
            f,
            "{}:{}:{}",
            self.archive_path.to_string_lossy(),
            self.byte_offset,
            self.byte_length
        )
    }
}

impl FromStr for FeatureLocator {
    type Err = PrepError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| PrepError::MalformedLocator {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = input.split(':').collect();
        if fields.len() != 3 {
            return Err(malformed(&format!("expected 3 ':'-separated fields, found {}", fields.len())));
        }
        let offset = parse_u64(fields[1]).ok_or_else(|| malformed("offset is not a non-negative integer"))?;
        let length = parse_u64(fields[2]).ok_or_else(|| malformed("length is not a non-negative integer"))?;
        FeatureLocator::new(fields[0], offset, length)
    }
}

// `u64::from_str` accepts a leading '+', which encode never produces.
fn parse_u64(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_example() {
        let loc = decode("archive.zip:128:4096").unwrap();
        assert_eq!(loc.archive_path(), Path::new("archive.zip"));
        assert_eq!(loc.byte_offset(), 128);
        assert_eq!(loc.byte_length(), 4096);
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            FeatureLocator::new("archive.zip", 0, 0).unwrap(),
            FeatureLocator::new("/data/cvss/hi-en/src_fbank80.zip", 98_765, 12_345).unwrap(),
            FeatureLocator::new("rel/dir/a b.zip", u64::MAX, u64::MAX).unwrap(),
        ];
        for loc in cases {
            assert_eq!(decode(&encode(&loc)).unwrap(), loc);
        }
    }

    #[test]
    fn test_encode_format() {
        let loc = FeatureLocator::new("/x/feats.zip", 30, 512).unwrap();
        assert_eq!(encode(&loc), "/x/feats.zip:30:512");
    }

    #[test]
    fn test_malformed_inputs() {
        let bad = [
            "",
            "archive.zip",
            "archive.zip:128",
            "archive.zip:128:4096:1",
            "c:/archive.zip:1:2",
            "archive.zip:-1:2",
            "archive.zip:1:x",
            "archive.zip::2",
            "archive.zip:+1:2",
            ":1:2",
        ];
        for input in bad {
            assert!(
                matches!(decode(input), Err(PrepError::MalformedLocator { .. })),
                "expected MalformedLocator for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_new_rejects_colon_path() {
        assert!(FeatureLocator::new("a:b.zip", 1, 2).is_err());
    }

    #[test]
    fn test_read_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("blob.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let loc = FeatureLocator::new(&path, 3, 4).unwrap();
        assert_eq!(loc.read_bytes().unwrap(), b"3456");
    }
}
