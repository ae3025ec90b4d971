use crate::PrepError;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Filename suffixes stripped from unit-file item keys before joining.
pub const DEFAULT_KEY_SUFFIXES: &[&str] = &[".wav", ".mp3"];

/// Unit sequences keyed by normalized utterance id.
#[derive(Debug, Default, Clone)]
pub struct UnitTable {
    units: FxHashMap<String, Vec<u32>>,
    duplicate_keys: usize,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sequence; a repeated key replaces the earlier line. Returns false
    /// for repeats.
    pub fn insert(&mut self, key: String, units: Vec<u32>) -> bool {
        if self.units.insert(key, units).is_some() {
            self.duplicate_keys += 1;
            return false;
        }
        true
    }

    pub fn get(&self, key: &str) -> Option<&[u32]> {
        self.units.get(key).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of lines that replaced an earlier line for the same key.
    pub fn duplicate_keys(&self) -> usize {
        self.duplicate_keys
    }
}

/// Collapse runs of equal adjacent tokens. `[5,5,5,2,2,7]` becomes `[5,2,7]`.
pub fn reduce(sequence: &[u32]) -> Vec<u32> {
    sequence.iter().copied().dedup().collect()
}

/// Strip the first matching filename suffix from an item key.
pub fn normalize_key<'a>(key: &'a str, suffixes: &[&str]) -> &'a str {
    suffixes
        .iter()
        .find_map(|suffix| key.strip_suffix(suffix))
        .unwrap_or(key)
}

/// Render units the way the manifest stores them.
pub fn format_units(units: &[u32]) -> String {
    units.iter().join(" ")
}

/// Parse whitespace separated tokens. Returns the offending token on failure.
pub fn parse_units(text: &str) -> Result<Vec<u32>, String> {
    text.split_whitespace()
        .map(|tok| tok.parse::<u32>().map_err(|_| tok.to_string()))
        .collect()
}

/// Split a `<item_key>|<tokens>` line. Lines without a separator yield `None`.
pub fn parse_unit_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let (key, tokens) = line.split_once('|')?;
    Some((key.trim(), tokens))
}

/// Read a unit file into a table keyed by normalized id.
pub fn load_units(path: &Path, suffixes: &[&str]) -> Result<UnitTable, PrepError> {
    if !path.is_file() {
        return Err(PrepError::missing(path, "unit file"));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut table = UnitTable::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let Some((key, tokens)) = parse_unit_line(&line) else {
            continue;
        };
        let units = parse_units(tokens).map_err(|tok| PrepError::MalformedInput {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: format!("unit token {:?} is not a non-negative integer", tok),
        })?;
        table.insert(normalize_key(key, suffixes).to_string(), units);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_reduce_examples() {
        assert_eq!(reduce(&[5, 5, 5, 2, 2, 7]), vec![5, 2, 7]);
        assert_eq!(reduce(&[]), Vec::<u32>::new());
        assert_eq!(reduce(&[1, 1, 1]), vec![1]);
    }

    #[test]
    fn test_reduce_keeps_non_adjacent_repeats() {
        assert_eq!(reduce(&[3, 3, 4, 3, 3, 4]), vec![3, 4, 3, 4]);
    }

    #[test]
    fn test_reduce_idempotent() {
        let inputs: Vec<Vec<u32>> = vec![
            vec![],
            vec![0],
            vec![9, 9, 9, 9],
            vec![1, 2, 2, 3, 3, 3, 2, 2, 1],
            (0..200).map(|i| (i / 3) % 7).collect(),
        ];
        for input in inputs {
            let once = reduce(&input);
            assert_eq!(reduce(&once), once);
            assert!(once.len() <= input.len());
        }
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("audio_0_93.wav", DEFAULT_KEY_SUFFIXES), "audio_0_93");
        assert_eq!(normalize_key("clip.mp3", DEFAULT_KEY_SUFFIXES), "clip");
        assert_eq!(normalize_key("plain", DEFAULT_KEY_SUFFIXES), "plain");
        // only a trailing suffix is stripped
        assert_eq!(normalize_key("a.wav.npy", DEFAULT_KEY_SUFFIXES), "a.wav.npy");
    }

    #[test]
    fn test_parse_unit_line() {
        assert_eq!(parse_unit_line("a.wav|1 2 3\n"), Some(("a.wav", "1 2 3")));
        assert_eq!(parse_unit_line("no separator"), None);
        assert_eq!(parse_units("4 5  6").unwrap(), vec![4, 5, 6]);
        assert_eq!(parse_units("4 x").unwrap_err(), "x");
        assert_eq!(parse_units("-1").unwrap_err(), "-1");
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(&[63]), "63");
        assert_eq!(format_units(&[1, 2, 3]), "1 2 3");
        assert_eq!(format_units(&[]), "");
    }

    #[test]
    fn test_load_units() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("train.km1000");
        fs::write(&path, "a.wav|1 1 2\nheader line\nb.wav|7\na.wav|9 9\n").unwrap();

        let table = load_units(&path, DEFAULT_KEY_SUFFIXES).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Some(&[9, 9][..]));
        assert_eq!(table.get("b"), Some(&[7][..]));
        assert_eq!(table.duplicate_keys(), 1);
    }

    #[test]
    fn test_load_units_missing_and_malformed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("dev.km1000");
        assert!(matches!(
            load_units(&missing, DEFAULT_KEY_SUFFIXES),
            Err(PrepError::MissingInputFile { .. })
        ));

        let bad = temp_dir.path().join("bad.km1000");
        fs::write(&bad, "a.wav|1 2\nb.wav|3 oops\n").unwrap();
        match load_units(&bad, DEFAULT_KEY_SUFFIXES) {
            Err(PrepError::MalformedInput { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }
}
