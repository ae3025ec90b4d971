use crate::archive_builder;
use crate::archive_index::{self, OffsetIndex};
use crate::config::{PairLayout, PrepConfig, Split};
use crate::join::{self, JoinConfig, JoinSources};
use crate::manifest::write_manifest;
use crate::sources::{line_aligned_table, load_short_text, read_split_keys};
use crate::summary::{RecoveredKind, RunSummary};
use crate::units::load_units;
use crate::PrepError;
use crossbeam_channel::unbounded;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{info, info_span, warn};

/// Input and output files of one split join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitInputs {
    pub split: Split,
    pub keys: PathBuf,
    pub units: PathBuf,
    pub short_text: Option<PathBuf>,
    pub src_lines: Option<PathBuf>,
    pub tgt_lines: Option<PathBuf>,
    pub output: PathBuf,
}

impl SplitInputs {
    /// Standard layout; optional text sources are included only when present.
    pub fn from_layout(layout: &PairLayout, split: Split) -> Self {
        let existing = |path: PathBuf| path.is_file().then_some(path);
        Self {
            split,
            keys: layout.split_keys(split),
            units: layout.units(split),
            short_text: existing(layout.short_text(split)),
            src_lines: existing(layout.line_src(split)),
            tgt_lines: existing(layout.line_tgt(split)),
            output: layout.manifest(split),
        }
    }
}

/// Run `f` over `jobs` on `workers` threads. Results keep the job order.
pub fn run_pool<J, R, F>(jobs: Vec<J>, workers: usize, f: F) -> Vec<R>
where
    J: Send,
    R: Send,
    F: Fn(J) -> R + Sync,
{
    let total = jobs.len();
    let (job_tx, job_rx) = unbounded::<(usize, J)>();
    let (result_tx, result_rx) = unbounded::<(usize, R)>();
    for job in jobs.into_iter().enumerate() {
        // receiver is alive until the scope below ends
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let f = &f;
    thread::scope(|scope| {
        for _ in 0..workers.max(1).min(total.max(1)) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (idx, job) in job_rx.iter() {
                    if result_tx.send((idx, f(job))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, R)> = result_rx.iter().collect();
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Build (or reuse) a pair's archive and index it. Sources are removed only
/// after both succeeded and only when the config asks for it.
pub fn prepare_pair(config: &PrepConfig, pair: &str) -> Result<(PairLayout, OffsetIndex), PrepError> {
    let layout = PairLayout::resolve(config, pair)?;
    let archive = layout.archive();
    let receipt = archive_builder::build(&layout.feature_dir(), &archive, &config.feature_extension)?;
    let index = archive_index::index_cached(&archive, &config.feature_extension)?;

    if config.remove_sources {
        receipt.remove_source()?;
    } else {
        info!(archive = %receipt.archive_path.display(), reused = receipt.reused, "archive ready");
    }
    Ok((layout, index))
}

/// Load one split's sources, join them and write the manifest.
pub fn join_split(
    scope: &str,
    inputs: &SplitInputs,
    index: &OffsetIndex,
    config: &JoinConfig,
    suffixes: &[&str],
) -> Result<RunSummary, PrepError> {
    let mut summary = RunSummary::new();
    let unit = join::summary_unit(scope, inputs.split);

    let keys = read_split_keys(&inputs.keys)?;
    let units = load_units(&inputs.units, suffixes)?;
    summary.add(&unit, RecoveredKind::DuplicateUnitLine, units.duplicate_keys());

    let mut texts = match &inputs.short_text {
        Some(path) => load_short_text(path)?,
        None => Default::default(),
    };
    if inputs.src_lines.is_some() || inputs.tgt_lines.is_some() {
        texts.fill_from(line_aligned_table(
            inputs.src_lines.as_deref(),
            inputs.tgt_lines.as_deref(),
            &keys,
        )?);
    }
    if texts.is_empty() {
        warn!(unit = %unit, "no text sources for split, text columns fall back to empty");
    }

    let sources = JoinSources {
        scope,
        texts: &texts,
        units: &units,
        locators: index,
    };
    let output = join::join(inputs.split, &keys, &sources, config, &mut summary);
    write_manifest(&inputs.output, &output.records)?;
    info!(unit = %unit, manifest = %inputs.output.display(), rows = output.records.len(), "wrote manifest");
    Ok(summary)
}

/// Process every configured pair and split. A failing pair or split is
/// recorded in the summary and does not stop the others.
pub fn run(config: &PrepConfig) -> Result<RunSummary, PrepError> {
    config.validate()?;
    let mut summary = RunSummary::new();
    let join_config = JoinConfig::from(config);
    let suffixes = config.key_suffixes();

    let prepared = run_pool(config.lang_pairs.clone(), config.workers, |pair| {
        let result = info_span!("pair", pair = %pair).in_scope(|| prepare_pair(config, &pair));
        (pair, result)
    });

    let mut split_jobs = Vec::new();
    for (pair, result) in prepared {
        match result {
            Ok((layout, index)) => {
                let index = Arc::new(index);
                for split in &config.splits {
                    split_jobs.push((layout.clone(), Arc::clone(&index), *split));
                }
            }
            Err(e) => summary.record_failure(&pair, &e),
        }
    }

    let joined = run_pool(split_jobs, config.workers, |(layout, index, split)| {
        let unit = join::summary_unit(&layout.pair, split);
        let inputs = SplitInputs::from_layout(&layout, split);
        let result = info_span!("split", unit = %unit)
            .in_scope(|| join_split(&layout.pair, &inputs, &index, &join_config, &suffixes));
        (unit, result)
    });

    for (unit, result) in joined {
        match result {
            Ok(unit_summary) => summary.merge(unit_summary),
            Err(e) => summary.record_failure(&unit, &e),
        }
    }
    Ok(summary)
}
