use crate::PrepError;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Source-language text and translation keyed by utterance id.
#[derive(Debug, Default, Clone)]
pub struct TextTable {
    src_text: FxHashMap<String, String>,
    translation: FxHashMap<String, String>,
}

impl TextTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_text(&self, id: &str) -> Option<&str> {
        self.src_text.get(id).map(String::as_str)
    }

    pub fn translation(&self, id: &str) -> Option<&str> {
        self.translation.get(id).map(String::as_str)
    }

    /// A later value for the same id replaces the earlier one. Empty values are
    /// treated as absent so the fallback policy applies to them.
    pub fn insert_src_text(&mut self, id: &str, text: &str) {
        if !text.is_empty() {
            self.src_text.insert(id.to_string(), text.to_string());
        }
    }

    pub fn insert_translation(&mut self, id: &str, text: &str) {
        if !text.is_empty() {
            self.translation.insert(id.to_string(), text.to_string());
        }
    }

    /// Fill keys this table lacks from `other`; existing entries win.
    pub fn fill_from(&mut self, other: TextTable) {
        for (id, text) in other.src_text {
            self.src_text.entry(id).or_insert(text);
        }
        for (id, text) in other.translation {
            self.translation.entry(id).or_insert(text);
        }
    }

    pub fn len(&self) -> usize {
        self.src_text.len().max(self.translation.len())
    }

    pub fn is_empty(&self) -> bool {
        self.src_text.is_empty() && self.translation.is_empty()
    }
}

fn open_lines(path: &Path, what: &'static str) -> Result<std::io::Lines<BufReader<File>>, PrepError> {
    if !path.is_file() {
        return Err(PrepError::missing(path, what));
    }
    Ok(BufReader::new(File::open(path)?).lines())
}

/// Primary keys of a split: the first tab-separated column of each non-blank line,
/// in file order.
pub fn read_split_keys(path: &Path) -> Result<Vec<String>, PrepError> {
    let mut keys = Vec::new();
    for line in open_lines(path, "split key list")? {
        let line = line?;
        let key = line.split('\t').next().unwrap_or("").trim();
        if !key.is_empty() {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

/// Read a `{split}.short.tsv` file with header `audio_id  src_text  tgt_text`.
pub fn load_short_text(path: &Path) -> Result<TextTable, PrepError> {
    let mut lines = open_lines(path, "short text table")?;
    let header = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(PrepError::MalformedInput {
                path: path.to_path_buf(),
                line: 1,
                reason: "empty file, expected a header".to_string(),
            });
        }
    };
    let columns: Vec<&str> = header.trim_end_matches(['\r', '\n']).split('\t').map(str::trim).collect();
    let column = |name: &str| {
        columns.iter().position(|c| *c == name).ok_or_else(|| PrepError::MalformedInput {
            path: path.to_path_buf(),
            line: 1,
            reason: format!("header lacks column {:?}", name),
        })
    };
    let id_col = column("audio_id")?;
    let src_col = column("src_text")?;
    let tgt_col = column("tgt_text")?;

    let mut table = TextTable::new();
    for line in lines {
        let line = line?;
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        let Some(id) = fields.get(id_col).map(|s| s.trim()).filter(|s| !s.is_empty()) else {
            continue;
        };
        if let Some(text) = fields.get(src_col) {
            table.insert_src_text(id, text.trim());
        }
        if let Some(text) = fields.get(tgt_col) {
            table.insert_translation(id, text.trim());
        }
    }
    Ok(table)
}

/// Read a file whose line `i` belongs to `keys[i]`. Surplus lines are ignored;
/// keys past the end of the file get nothing. A key listed twice keeps its
/// later line.
pub fn load_line_aligned(path: &Path, keys: &[String]) -> Result<FxHashMap<String, String>, PrepError> {
    let mut out = FxHashMap::default();
    for (line, key) in open_lines(path, "line-aligned text")?.zip(keys) {
        let line = line?;
        let text = line.trim();
        if !text.is_empty() {
            out.insert(key.clone(), text.to_string());
        }
    }
    Ok(out)
}

/// Build a text table from optional line-aligned source/target files.
pub fn line_aligned_table(
    src_path: Option<&Path>,
    tgt_path: Option<&Path>,
    keys: &[String],
) -> Result<TextTable, PrepError> {
    let mut table = TextTable::new();
    if let Some(path) = src_path {
        for (id, text) in load_line_aligned(path, keys)? {
            table.insert_src_text(&id, &text);
        }
    }
    if let Some(path) = tgt_path {
        for (id, text) in load_line_aligned(path, keys)? {
            table.insert_translation(&id, &text);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_split_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("train.tsv");
        fs::write(&path, "utt_b\t\nutt_a\t\n\n  \nutt_c\textra\n").unwrap();
        assert_eq!(read_split_keys(&path).unwrap(), vec!["utt_b", "utt_a", "utt_c"]);
    }

    #[test]
    fn test_missing_split_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = read_split_keys(&temp_dir.path().join("dev.tsv")).unwrap_err();
        assert!(matches!(err, PrepError::MissingInputFile { .. }));
        assert!(err.to_string().contains("dev.tsv"));
    }

    #[test]
    fn test_load_short_text() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("train.short.tsv");
        fs::write(
            &path,
            "audio_id\tsrc_text\ttgt_text\na\tnamaste\thello\nb\t\tonly target\nc\tonly source\n",
        )
        .unwrap();
        let table = load_short_text(&path).unwrap();
        assert_eq!(table.src_text("a"), Some("namaste"));
        assert_eq!(table.translation("a"), Some("hello"));
        assert_eq!(table.src_text("b"), None);
        assert_eq!(table.translation("b"), Some("only target"));
        assert_eq!(table.src_text("c"), Some("only source"));
        assert_eq!(table.translation("c"), None);
    }

    #[test]
    fn test_short_text_column_order_and_bad_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("x.short.tsv");
        fs::write(&path, "tgt_text\taudio_id\tsrc_text\nhi\tk\tsrc\n").unwrap();
        let table = load_short_text(&path).unwrap();
        assert_eq!(table.translation("k"), Some("hi"));
        assert_eq!(table.src_text("k"), Some("src"));

        fs::write(&path, "id\tsrc_text\n").unwrap();
        assert!(matches!(load_short_text(&path), Err(PrepError::MalformedInput { .. })));
    }

    #[test]
    fn test_line_aligned() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("train.src");
        let tgt = temp_dir.path().join("train.txt");
        fs::write(&src, "one\ntwo\nthree\nsurplus\n").unwrap();
        fs::write(&tgt, "uno\n").unwrap();
        let keys: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        let table = line_aligned_table(Some(&src), Some(&tgt), &keys).unwrap();
        assert_eq!(table.src_text("c"), Some("three"));
        assert_eq!(table.translation("a"), Some("uno"));
        assert_eq!(table.translation("b"), None);
    }

    #[test]
    fn test_repeated_ids_keep_the_later_value() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("dev.short.tsv");
        fs::write(
            &path,
            "audio_id\tsrc_text\ttgt_text\na\told src\told tgt\na\tnew src\t\n",
        )
        .unwrap();
        let table = load_short_text(&path).unwrap();
        assert_eq!(table.src_text("a"), Some("new src"));
        // an empty cell never replaces text
        assert_eq!(table.translation("a"), Some("old tgt"));

        let src = temp_dir.path().join("dev.src");
        fs::write(&src, "first a\nb line\nsecond a\n").unwrap();
        let keys: Vec<String> = ["a", "b", "a"].iter().map(|s| s.to_string()).collect();
        let lines = load_line_aligned(&src, &keys).unwrap();
        assert_eq!(lines["a"], "second a");
        assert_eq!(lines["b"], "b line");
    }

    #[test]
    fn test_fill_from_keeps_existing() {
        let mut primary = TextTable::new();
        primary.insert_src_text("a", "primary");
        let mut secondary = TextTable::new();
        secondary.insert_src_text("a", "secondary");
        secondary.insert_src_text("b", "secondary b");
        primary.fill_from(secondary);
        assert_eq!(primary.src_text("a"), Some("primary"));
        assert_eq!(primary.src_text("b"), Some("secondary b"));
    }
}
