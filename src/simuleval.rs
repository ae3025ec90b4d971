//! Reference files for simultaneous-translation evaluation, derived from a
//! finished manifest and an ordered list of source wav paths.

use crate::manifest::{read_manifest, ManifestRecord};
use crate::units::{format_units, normalize_key};
use crate::PrepError;
use rustc_hash::FxHashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};
use unicode_general_category::{get_general_category, GeneralCategory};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub written: usize,
    pub missing: Vec<String>,
}

/// Lowercase, then keep letters, numbers, `_` and whitespace. Combining marks
/// such as Devanagari vowel signs are dropped.
pub fn normalize_src_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| *c == '_' || c.is_whitespace() || is_letter_or_number(*c))
        .collect()
}

fn is_letter_or_number(c: char) -> bool {
    use GeneralCategory::*;
    matches!(
        get_general_category(c),
        UppercaseLetter
            | LowercaseLetter
            | TitlecaseLetter
            | ModifierLetter
            | OtherLetter
            | DecimalNumber
            | LetterNumber
            | OtherNumber
    )
}

/// The utterance id of a wav-list line: its last path component, suffix stripped.
pub fn wav_list_id<'a>(line: &'a str, suffixes: &[&str]) -> &'a str {
    let name = line.trim().rsplit('/').next().unwrap_or("");
    normalize_key(name, suffixes)
}

fn extract(
    manifest_path: &Path,
    wav_list_path: &Path,
    output_path: &Path,
    suffixes: &[&str],
    render: impl Fn(&ManifestRecord) -> String,
) -> Result<ExtractReport, PrepError> {
    let records = read_manifest(manifest_path)?;
    let by_id: FxHashMap<&str, &ManifestRecord> = records.iter().map(|r| (r.id(), r)).collect();

    if !wav_list_path.is_file() {
        return Err(PrepError::missing(wav_list_path, "wav list"));
    }
    let wav_list = fs::read_to_string(wav_list_path)?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output_path)?);
    let mut report = ExtractReport::default();
    for line in wav_list.lines().filter(|l| !l.trim().is_empty()) {
        let id = wav_list_id(line, suffixes);
        match by_id.get(id) {
            Some(record) => {
                writeln!(writer, "{}", render(record))?;
                report.written += 1;
            }
            None => report.missing.push(id.to_string()),
        }
    }
    writer.flush()?;

    if !report.missing.is_empty() {
        warn!(
            manifest = %manifest_path.display(),
            missing = report.missing.len(),
            "wav list ids not found in manifest"
        );
    }
    info!(output = %output_path.display(), lines = report.written, "wrote simuleval reference");
    Ok(report)
}

/// One normalized source sentence per wav-list entry.
pub fn extract_src(
    manifest_path: &Path,
    wav_list_path: &Path,
    output_path: &Path,
    suffixes: &[&str],
) -> Result<ExtractReport, PrepError> {
    extract(manifest_path, wav_list_path, output_path, suffixes, |r| {
        normalize_src_text(r.src_text())
    })
}

/// One unit sequence per wav-list entry.
pub fn extract_units(
    manifest_path: &Path,
    wav_list_path: &Path,
    output_path: &Path,
    suffixes: &[&str],
) -> Result<ExtractReport, PrepError> {
    extract(manifest_path, wav_list_path, output_path, suffixes, |r| {
        format_units(r.tgt_units())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::DEFAULT_KEY_SUFFIXES;

    #[test]
    fn test_normalize_src_text() {
        assert_eq!(normalize_src_text("Hello, World!"), "hello world");
        assert_eq!(normalize_src_text("Élan, vital."), "élan vital");
        assert_eq!(normalize_src_text("snake_case  stays"), "snake_case  stays");
    }

    #[test]
    fn test_normalize_drops_combining_marks() {
        assert_eq!(normalize_src_text("नमस्ते दुनिया, Hello!"), "नमसत दनय hello");
        assert_eq!(normalize_src_text("मराठी १२३"), "मरठ १२३");
    }

    #[test]
    fn test_wav_list_id() {
        assert_eq!(wav_list_id("/data/hi-en/test/audio_0_93.wav", DEFAULT_KEY_SUFFIXES), "audio_0_93");
        assert_eq!(wav_list_id("audio_1\n", DEFAULT_KEY_SUFFIXES), "audio_1");
    }
}
