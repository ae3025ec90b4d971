use crate::PrepError;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Conditions the join recovers from instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecoveredKind {
    MissingSrcText,
    MissingTranslation,
    MissingUnits,
    EstimatedFrames,
    DroppedNoLocator,
    DuplicateKey,
    DuplicateUnitLine,
}

impl RecoveredKind {
    pub const ALL: [RecoveredKind; 7] = [
        RecoveredKind::MissingSrcText,
        RecoveredKind::MissingTranslation,
        RecoveredKind::MissingUnits,
        RecoveredKind::EstimatedFrames,
        RecoveredKind::DroppedNoLocator,
        RecoveredKind::DuplicateKey,
        RecoveredKind::DuplicateUnitLine,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RecoveredKind::MissingSrcText => "no_src_text",
            RecoveredKind::MissingTranslation => "no_translation",
            RecoveredKind::MissingUnits => "no_units",
            RecoveredKind::EstimatedFrames => "est_frames",
            RecoveredKind::DroppedNoLocator => "dropped",
            RecoveredKind::DuplicateKey => "dup_key",
            RecoveredKind::DuplicateUnitLine => "dup_unit",
        }
    }
}

impl fmt::Display for RecoveredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub kind: &'static str,
    pub message: String,
}

/// Per-unit-of-work counts, merged across workers at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    recovered: BTreeMap<String, BTreeMap<RecoveredKind, usize>>,
    rows: BTreeMap<String, usize>,
    failures: Vec<UnitFailure>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, unit: &str, kind: RecoveredKind) {
        self.add(unit, kind, 1);
    }

    pub fn add(&mut self, unit: &str, kind: RecoveredKind, n: usize) {
        if n == 0 {
            return;
        }
        *self
            .recovered
            .entry(unit.to_string())
            .or_default()
            .entry(kind)
            .or_insert(0) += n;
    }

    pub fn record_rows(&mut self, unit: &str, rows: usize) {
        *self.rows.entry(unit.to_string()).or_insert(0) += rows;
    }

    pub fn record_failure(&mut self, unit: &str, err: &PrepError) {
        warn!(unit, kind = err.kind(), error = %err, "unit of work failed");
        self.failures.push(UnitFailure {
            unit: unit.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// Total across all units.
    pub fn count(&self, kind: RecoveredKind) -> usize {
        self.recovered.values().filter_map(|m| m.get(&kind)).sum()
    }

    pub fn count_for(&self, unit: &str, kind: RecoveredKind) -> usize {
        self.recovered.get(unit).and_then(|m| m.get(&kind)).copied().unwrap_or(0)
    }

    pub fn rows_for(&self, unit: &str) -> usize {
        self.rows.get(unit).copied().unwrap_or(0)
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn merge(&mut self, other: RunSummary) {
        for (unit, kinds) in other.recovered {
            for (kind, n) in kinds {
                self.add(&unit, kind, n);
            }
        }
        for (unit, n) in other.rows {
            self.record_rows(&unit, n);
        }
        self.failures.extend(other.failures);
    }

    /// Table with one line per unit of work and one column per recovered kind.
    pub fn render(&self) -> String {
        let mut units: Vec<&String> = self.rows.keys().chain(self.recovered.keys()).collect();
        units.sort();
        units.dedup();

        let unit_width = units.iter().map(|u| u.len()).max().unwrap_or(4).max(4);
        let mut out = String::new();
        out.push_str(&format!("{:<w$} │ {:>7}", "unit", "rows", w = unit_width));
        for kind in RecoveredKind::ALL {
            out.push_str(&format!(" │ {:>14}", kind.label()));
        }
        out.push('\n');
        out.push_str(&"─".repeat(unit_width + 10 + 17 * RecoveredKind::ALL.len()));
        out.push('\n');
        for unit in units {
            out.push_str(&format!("{:<w$} │ {:>7}", unit, self.rows_for(unit), w = unit_width));
            for kind in RecoveredKind::ALL {
                out.push_str(&format!(" │ {:>14}", self.count_for(unit, kind)));
            }
            out.push('\n');
        }
        for failure in &self.failures {
            out.push_str(&format!("FAILED {} [{}]: {}\n", failure.unit, failure.kind, failure.message));
        }
        out
    }

    pub fn log(&self) {
        for kind in RecoveredKind::ALL {
            let n = self.count(kind);
            if n > 0 {
                info!(kind = kind.label(), count = n, "recovered condition totals");
            }
        }
        if self.has_failures() {
            warn!(failed_units = self.failures.len(), "run finished with failures");
        } else {
            info!(units = self.rows.len(), "run finished");
        }
    }
}
