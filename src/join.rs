use crate::archive_index::OffsetIndex;
use crate::config::{PrepConfig, Split};
use crate::manifest::ManifestRecord;
use crate::npy;
use crate::sources::TextTable;
use crate::summary::{RecoveredKind, RunSummary};
use crate::units::{reduce, UnitTable};
use rustc_hash::FxHashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct JoinConfig {
    pub reduce_units: bool,
    pub default_unit: u32,
    pub frame_ratio: f64,
    pub measure_frames: bool,
}

impl From<&PrepConfig> for JoinConfig {
    fn from(config: &PrepConfig) -> Self {
        Self {
            reduce_units: config.reduce_units,
            default_unit: config.default_unit,
            frame_ratio: config.frame_ratio,
            measure_frames: config.measure_frames,
        }
    }
}

/// Side data for one split. `scope` names the language pair in the summary.
#[derive(Debug, Clone, Copy)]
pub struct JoinSources<'a> {
    pub scope: &'a str,
    pub texts: &'a TextTable,
    pub units: &'a UnitTable,
    pub locators: &'a OffsetIndex,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutput {
    pub records: Vec<ManifestRecord>,
    pub dropped: Vec<String>,
}

pub fn summary_unit(scope: &str, split: Split) -> String {
    format!("{}/{}", scope, split)
}

/// Join the split's keys, in the given order, against the side sources.
///
/// Keys without a feature locator are dropped; every other missing value is
/// filled by the fallback policy and counted in `summary`.
pub fn join(
    split: Split,
    primary_keys: &[String],
    sources: &JoinSources<'_>,
    config: &JoinConfig,
    summary: &mut RunSummary,
) -> JoinOutput {
    let unit = summary_unit(sources.scope, split);
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = JoinOutput::default();

    for id in primary_keys {
        if !seen.insert(id.as_str()) {
            summary.record(&unit, RecoveredKind::DuplicateKey);
            continue;
        }
        let Some(locator) = sources.locators.get(id) else {
            summary.record(&unit, RecoveredKind::DroppedNoLocator);
            out.dropped.push(id.clone());
            continue;
        };

        let translation = sources.texts.translation(id);
        if translation.is_none() {
            summary.record(&unit, RecoveredKind::MissingTranslation);
        }
        let src_text = match sources.texts.src_text(id) {
            Some(text) => text,
            None => {
                summary.record(&unit, RecoveredKind::MissingSrcText);
                translation.unwrap_or("")
            }
        };

        let tgt_units = match sources.units.get(id) {
            Some(raw) if config.reduce_units => reduce(raw),
            Some(raw) => raw.to_vec(),
            None => {
                summary.record(&unit, RecoveredKind::MissingUnits);
                vec![config.default_unit]
            }
        };
        let tgt_n_frames = tgt_units.len() as u64;

        let measured = if config.measure_frames {
            match npy::member_header(locator) {
                Ok(header) => header.n_frames(),
                Err(e) => {
                    debug!(id = %id, error = %e, "could not measure source frames");
                    None
                }
            }
        } else {
            None
        };
        let src_n_frames = match measured {
            Some(n) => n,
            None => {
                summary.record(&unit, RecoveredKind::EstimatedFrames);
                estimate_src_frames(tgt_n_frames, config.frame_ratio)
            }
        };

        out.records.push(ManifestRecord {
            id: id.clone(),
            src_locator: locator.clone(),
            src_n_frames,
            src_text: src_text.to_string(),
            tgt_text: translation.unwrap_or("").to_string(),
            tgt_units,
            tgt_n_frames,
        });
    }

    summary.record_rows(&unit, out.records.len());
    info!(
        unit = %unit,
        keys = primary_keys.len(),
        rows = out.records.len(),
        dropped = out.dropped.len(),
        "joined split"
    );
    out
}

pub fn estimate_src_frames(tgt_n_frames: u64, frame_ratio: f64) -> u64 {
    (tgt_n_frames as f64 * frame_ratio).round() as u64
}
