use crate::locator::{self, FeatureLocator};
use crate::units::{format_units, parse_units};
use crate::PrepError;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const MANIFEST_COLUMNS: [&str; 7] = [
    "id",
    "src_audio",
    "src_n_frames",
    "src_text",
    "tgt_text",
    "tgt_audio",
    "tgt_n_frames",
];

/// One manifest row. Built by the joiner or read back from disk, never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub(crate) id: String,
    pub(crate) src_locator: FeatureLocator,
    pub(crate) src_n_frames: u64,
    pub(crate) src_text: String,
    pub(crate) tgt_text: String,
    pub(crate) tgt_units: Vec<u32>,
    pub(crate) tgt_n_frames: u64,
}

impl ManifestRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn src_locator(&self) -> &FeatureLocator {
        &self.src_locator
    }

    pub fn src_n_frames(&self) -> u64 {
        self.src_n_frames
    }

    pub fn src_text(&self) -> &str {
        &self.src_text
    }

    pub fn tgt_text(&self) -> &str {
        &self.tgt_text
    }

    pub fn tgt_units(&self) -> &[u32] {
        &self.tgt_units
    }

    pub fn tgt_n_frames(&self) -> u64 {
        self.tgt_n_frames
    }

    /// Tab-separated row in `MANIFEST_COLUMNS` order, without a newline.
    pub fn to_row(&self) -> String {
        [
            clean_field(&self.id),
            locator::encode(&self.src_locator),
            self.src_n_frames.to_string(),
            clean_field(&self.src_text),
            clean_field(&self.tgt_text),
            format_units(&self.tgt_units),
            self.tgt_n_frames.to_string(),
        ]
        .join("\t")
    }
}

/// Tabs and line breaks would split a row, so they become single spaces.
pub fn clean_field(text: &str) -> String {
    if !text.contains(['\t', '\n', '\r']) {
        return text.to_string();
    }
    text.split(['\t', '\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write the header and rows to `<path>.tmp`, then move it into place.
pub fn write_manifest(path: &Path, records: &[ManifestRecord]) -> Result<(), PrepError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tsv.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writeln!(writer, "{}", MANIFEST_COLUMNS.join("\t"))?;
        for record in records {
            writeln!(writer, "{}", record.to_row())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRecord>, PrepError> {
    if !path.is_file() {
        return Err(PrepError::missing(path, "manifest"));
    }
    let mut lines = BufReader::new(File::open(path)?).lines();
    let malformed = |line: usize, reason: String| PrepError::MalformedInput {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let header = lines.next().transpose()?.unwrap_or_default();
    if header.trim_end_matches('\r').split('\t').ne(MANIFEST_COLUMNS) {
        return Err(malformed(1, format!("unexpected header {:?}", header)));
    }

    let mut records = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != MANIFEST_COLUMNS.len() {
            return Err(malformed(line_no, format!("expected 7 fields, found {}", fields.len())));
        }
        let number = |field: &str, name: &str| {
            field
                .parse::<u64>()
                .map_err(|_| malformed(line_no, format!("{} {:?} is not a count", name, field)))
        };
        records.push(ManifestRecord {
            id: fields[0].to_string(),
            src_locator: locator::decode(fields[1])?,
            src_n_frames: number(fields[2], "src_n_frames")?,
            src_text: fields[3].to_string(),
            tgt_text: fields[4].to_string(),
            tgt_units: parse_units(fields[5])
                .map_err(|tok| malformed(line_no, format!("unit token {:?} is not an integer", tok)))?,
            tgt_n_frames: number(fields[6], "tgt_n_frames")?,
        });
    }
    Ok(records)
}
