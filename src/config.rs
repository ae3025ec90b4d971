use crate::PrepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Dev, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "dev" => Ok(Split::Dev),
            "test" => Ok(Split::Test),
            other => Err(PrepError::Config(format!("unknown split {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VocoderPaths {
    pub checkpoint: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Everything a run needs, passed explicitly to each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Root holding one `<src>-<tgt>` directory per language pair.
    pub dataset_root: PathBuf,
    /// Consulted for a pair only when `dataset_root` has no directory for it.
    pub local_root: Option<PathBuf>,
    pub lang_pairs: Vec<String>,
    pub splits: Vec<Split>,
    pub reduce_units: bool,
    /// Unit emitted for utterances that have no unit sequence.
    pub default_unit: u32,
    /// Source frames per target unit, used when source frames are not measured.
    pub frame_ratio: f64,
    /// Read source frame counts from the packed feature headers.
    pub measure_frames: bool,
    pub unit_type: String,
    pub feature_extension: String,
    pub feature_dir_name: String,
    pub manifest_dir_name: String,
    pub key_suffixes: Vec<String>,
    pub vocoder: VocoderPaths,
    pub workers: usize,
    /// Delete the feature directory once its archive is complete.
    pub remove_sources: bool,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::new(),
            local_root: None,
            lang_pairs: Vec::new(),
            splits: Split::ALL.to_vec(),
            reduce_units: false,
            default_unit: 63,
            frame_ratio: 25.0,
            measure_frames: true,
            unit_type: "km1000".to_string(),
            feature_extension: ".npy".to_string(),
            feature_dir_name: "src_fbank80".to_string(),
            manifest_dir_name: "fbank2unit".to_string(),
            key_suffixes: vec![".wav".to_string(), ".mp3".to_string()],
            vocoder: VocoderPaths::default(),
            workers: 4,
            remove_sources: false,
        }
    }
}

impl PrepConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, PrepError> {
        if !path.is_file() {
            return Err(PrepError::missing(path, "config file"));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), PrepError> {
        if self.dataset_root.as_os_str().is_empty() {
            return Err("dataset_root is required".into());
        }
        for root in std::iter::once(&self.dataset_root).chain(self.local_root.as_ref()) {
            let text = root.to_str().ok_or("dataset roots must be valid UTF-8")?;
            if text.contains(':') {
                return Err(PrepError::Config(format!(
                    "dataset root {:?} contains ':' which feature locators cannot encode",
                    text
                )));
            }
        }
        if self.lang_pairs.is_empty() {
            return Err("at least one language pair is required".into());
        }
        for pair in &self.lang_pairs {
            parse_lang_pair(pair)?;
        }
        if self.splits.is_empty() {
            return Err("at least one split is required".into());
        }
        if !self.frame_ratio.is_finite() || self.frame_ratio <= 0.0 {
            return Err(PrepError::Config(format!("frame_ratio must be positive, got {}", self.frame_ratio)));
        }
        if !self.feature_extension.starts_with('.') || self.feature_extension.len() < 2 {
            return Err(PrepError::Config(format!(
                "feature_extension must look like \".npy\", got {:?}",
                self.feature_extension
            )));
        }
        if self.unit_type.is_empty() || self.unit_type.contains('/') {
            return Err(PrepError::Config(format!("bad unit_type {:?}", self.unit_type)));
        }
        if self.workers == 0 {
            return Err("workers must be at least 1".into());
        }
        for path in [&self.vocoder.checkpoint, &self.vocoder.config].into_iter().flatten() {
            if !path.is_file() {
                return Err(PrepError::missing(path, "vocoder file"));
            }
        }
        Ok(())
    }

    pub fn key_suffixes(&self) -> Vec<&str> {
        self.key_suffixes.iter().map(String::as_str).collect()
    }
}

/// `hi-en` -> `("hi", "en")`.
pub fn parse_lang_pair(pair: &str) -> Result<(&str, &str), PrepError> {
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    match pair.split_once('-') {
        Some((src, tgt)) if valid(src) && valid(tgt) => Ok((src, tgt)),
        _ => Err(PrepError::Config(format!("language pair must look like \"hi-en\", got {:?}", pair))),
    }
}

/// Where a pair's inputs live, decided once per pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRoot {
    Processed(PathBuf),
    Local(PathBuf),
}

impl SourceRoot {
    pub fn path(&self) -> &Path {
        match self {
            SourceRoot::Processed(p) | SourceRoot::Local(p) => p,
        }
    }
}

pub fn resolve_source_root(config: &PrepConfig, pair: &str) -> Result<SourceRoot, PrepError> {
    let processed = config.dataset_root.join(pair);
    if processed.is_dir() {
        return Ok(SourceRoot::Processed(processed));
    }
    if let Some(local) = config.local_root.as_ref().map(|root| root.join(pair)) {
        if local.is_dir() {
            return Ok(SourceRoot::Local(local));
        }
    }
    Err(PrepError::missing(processed, "language pair directory"))
}

/// File layout of one language pair.
#[derive(Debug, Clone)]
pub struct PairLayout {
    pub pair: String,
    pub root: SourceRoot,
    unit_type: String,
    feature_dir_name: String,
    manifest_dir_name: String,
}

impl PairLayout {
    pub fn resolve(config: &PrepConfig, pair: &str) -> Result<Self, PrepError> {
        parse_lang_pair(pair)?;
        Ok(Self {
            pair: pair.to_string(),
            root: resolve_source_root(config, pair)?,
            unit_type: config.unit_type.clone(),
            feature_dir_name: config.feature_dir_name.clone(),
            manifest_dir_name: config.manifest_dir_name.clone(),
        })
    }

    fn dir(&self) -> &Path {
        self.root.path()
    }

    pub fn split_keys(&self, split: Split) -> PathBuf {
        self.dir().join(format!("{}.tsv", split))
    }

    pub fn short_text(&self, split: Split) -> PathBuf {
        self.dir().join(format!("{}.short.tsv", split))
    }

    pub fn units(&self, split: Split) -> PathBuf {
        self.dir().join(format!("{}.{}", split, self.unit_type))
    }

    pub fn feature_dir(&self) -> PathBuf {
        self.dir().join(&self.feature_dir_name)
    }

    pub fn archive(&self) -> PathBuf {
        self.dir().join(format!("{}.zip", self.feature_dir_name))
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.dir().join(&self.manifest_dir_name)
    }

    pub fn manifest(&self, split: Split) -> PathBuf {
        self.manifest_dir().join(format!("{}.tsv", split))
    }

    /// Line-aligned source text, one line per split key.
    pub fn line_src(&self, split: Split) -> PathBuf {
        self.manifest_dir().join(format!("{}.src", split))
    }

    /// Line-aligned target text, one line per split key.
    pub fn line_tgt(&self, split: Split) -> PathBuf {
        self.manifest_dir().join(format!("{}.txt", split))
    }
}
