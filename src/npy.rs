//! Frame counts of packed `.npy` feature matrices, read from the header
//! without loading the data.

use crate::locator::FeatureLocator;
use crate::PrepError;
use npyz::WriterBuilder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub shape: Vec<u64>,
    pub fortran_order: bool,
}

impl NpyHeader {
    /// Leading dimension, i.e. the number of frames of a `(frames, dims)` matrix.
    pub fn n_frames(&self) -> Option<u64> {
        self.shape.first().copied()
    }
}

/// Parse the header at the start of an `.npy` stream.
pub fn read_header<R: Read>(reader: R) -> std::io::Result<NpyHeader> {
    let npy = npyz::NpyFile::new(reader)?;
    Ok(NpyHeader {
        shape: npy.shape().to_vec(),
        fortran_order: matches!(npy.order(), npyz::Order::Fortran),
    })
}

/// Read the header of the `.npy` member a locator points at. Reads never
/// leave the member's byte range.
pub fn member_header(locator: &FeatureLocator) -> Result<NpyHeader, PrepError> {
    let mut file = File::open(locator.archive_path())?;
    file.seek(SeekFrom::Start(locator.byte_offset()))?;
    let member = BufReader::new(file).take(locator.byte_length());

    read_header(member).map_err(|e| PrepError::MalformedInput {
        path: locator.archive_path().to_path_buf(),
        line: 0,
        reason: format!("npy member at offset {}: {}", locator.byte_offset(), e),
    })
}

/// A little-endian f32 matrix of the given shape. Used to write fixtures.
pub fn encode_f32(shape: &[u64]) -> Result<Vec<u8>, PrepError> {
    let mut out = Vec::new();
    let mut writer = npyz::WriteOptions::<f32>::new()
        .default_dtype()
        .shape(shape)
        .writer(&mut out)
        .begin_nd()?;
    let count: u64 = shape.iter().product();
    for i in 0..count {
        writer.push(&((i % 97) as f32 * 0.25))?;
    }
    writer.finish()?;
    Ok(out)
}
