use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use unitpack::archive_builder;
use unitpack::archive_index;
use unitpack::config::{PrepConfig, Split};
use unitpack::join::JoinConfig;
use unitpack::pipeline::{self, SplitInputs};
use unitpack::simuleval;
use unitpack::units::DEFAULT_KEY_SUFFIXES;
use unitpack::{locator, PrepError, RunSummary};

#[derive(Parser)]
#[command(name = "unitpack")]
#[command(about = "Pack speech features and build speech-to-unit training manifests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory of feature files into one stored (uncompressed) zip
    Pack {
        #[arg(long)]
        source_dir: PathBuf,
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = ".npy")]
        extension: String,
        /// Delete the source directory once the archive is complete
        #[arg(long)]
        remove_source: bool,
    },
    /// Print `id<TAB>archive:offset:length` for every member of an archive
    Index {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = ".npy")]
        extension: String,
        /// Rescan the archive even if a current index cache exists
        #[arg(long)]
        no_cache: bool,
    },
    /// Join one split's sources against an archive and write its manifest
    Join(JoinArgs),
    /// Pack, index and join every configured language pair and split
    Prepare(PrepareArgs),
    /// Write normalized source text for each entry of a wav list
    SimulevalSrc {
        #[arg(long)]
        input_tsv: PathBuf,
        #[arg(long)]
        wav_list: PathBuf,
        #[arg(long)]
        output_src: PathBuf,
    },
    /// Write the unit sequence for each entry of a wav list
    SimulevalUnit {
        #[arg(long)]
        input_tsv: PathBuf,
        #[arg(long)]
        wav_list: PathBuf,
        #[arg(long)]
        output_unit: PathBuf,
    },
}

#[derive(Args)]
struct JoinArgs {
    #[arg(long)]
    archive: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[arg(long, value_enum)]
    split: Split,
    /// Split key list, one utterance id per line
    #[arg(long)]
    keys: PathBuf,
    /// Unit file with `<key>|<tokens>` lines
    #[arg(long)]
    units: PathBuf,
    /// TSV with header audio_id, src_text, tgt_text
    #[arg(long)]
    short_text: Option<PathBuf>,
    #[arg(long)]
    src_lines: Option<PathBuf>,
    #[arg(long)]
    tgt_lines: Option<PathBuf>,
    #[arg(long)]
    reduce_unit: bool,
    #[arg(long, default_value_t = 63)]
    default_unit: u32,
    #[arg(long, default_value_t = 25.0)]
    frame_ratio: f64,
    /// Estimate source frames from the unit count instead of reading feature headers
    #[arg(long)]
    no_measure_frames: bool,
    #[arg(long, default_value = ".npy")]
    extension: String,
    /// Name used for this join in the run summary
    #[arg(long, default_value = "manifest")]
    scope: String,
}

#[derive(Args)]
struct PrepareArgs {
    /// JSON config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    dataset_root: Option<PathBuf>,
    #[arg(long)]
    local_root: Option<PathBuf>,
    /// Language pair such as hi-en; repeatable
    #[arg(long = "lang-pair")]
    lang_pairs: Vec<String>,
    #[arg(long = "split", value_enum)]
    splits: Vec<Split>,
    #[arg(long)]
    reduce_unit: bool,
    #[arg(long)]
    default_unit: Option<u32>,
    #[arg(long)]
    frame_ratio: Option<f64>,
    #[arg(long)]
    no_measure_frames: bool,
    #[arg(long)]
    unit_type: Option<String>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    remove_sources: bool,
    #[arg(long)]
    vocoder_checkpoint: Option<PathBuf>,
    #[arg(long)]
    vocoder_cfg: Option<PathBuf>,
}

impl PrepareArgs {
    fn into_config(self) -> Result<PrepConfig, PrepError> {
        let mut config = match &self.config {
            Some(path) => PrepConfig::from_json_file(path)?,
            None => PrepConfig::default(),
        };
        if let Some(root) = self.dataset_root {
            config.dataset_root = root;
        }
        if self.local_root.is_some() {
            config.local_root = self.local_root;
        }
        if !self.lang_pairs.is_empty() {
            config.lang_pairs = self.lang_pairs;
        }
        if !self.splits.is_empty() {
            config.splits = self.splits;
        }
        config.reduce_units |= self.reduce_unit;
        config.remove_sources |= self.remove_sources;
        if self.no_measure_frames {
            config.measure_frames = false;
        }
        if let Some(unit) = self.default_unit {
            config.default_unit = unit;
        }
        if let Some(ratio) = self.frame_ratio {
            config.frame_ratio = ratio;
        }
        if let Some(unit_type) = self.unit_type {
            config.unit_type = unit_type;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.vocoder_checkpoint.is_some() {
            config.vocoder.checkpoint = self.vocoder_checkpoint;
        }
        if self.vocoder_cfg.is_some() {
            config.vocoder.config = self.vocoder_cfg;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run_join(args: JoinArgs) -> Result<RunSummary, PrepError> {
    if !args.frame_ratio.is_finite() || args.frame_ratio <= 0.0 {
        return Err(PrepError::Config(format!("--frame-ratio must be positive, got {}", args.frame_ratio)));
    }
    let index = archive_index::index_cached(&args.archive, &args.extension)?;
    let inputs = SplitInputs {
        split: args.split,
        keys: args.keys,
        units: args.units,
        short_text: args.short_text,
        src_lines: args.src_lines,
        tgt_lines: args.tgt_lines,
        output: args.output,
    };
    let config = JoinConfig {
        reduce_units: args.reduce_unit,
        default_unit: args.default_unit,
        frame_ratio: args.frame_ratio,
        measure_frames: !args.no_measure_frames,
    };
    pipeline::join_split(&args.scope, &inputs, &index, &config, DEFAULT_KEY_SUFFIXES)
}

fn run(cli: Cli) -> Result<bool, PrepError> {
    match cli.command {
        Commands::Pack { source_dir, archive, extension, remove_source } => {
            let receipt = archive_builder::build(&source_dir, &archive, &extension)?;
            println!("{} ({} members{})", receipt.archive_path.display(), receipt.members, if receipt.reused { ", reused" } else { "" });
            if remove_source {
                receipt.remove_source()?;
            }
            Ok(true)
        }
        Commands::Index { archive, extension, no_cache } => {
            let index = if no_cache {
                archive_index::index(&archive, &extension)?
            } else {
                archive_index::index_cached(&archive, &extension)?
            };
            for (id, loc) in index.iter() {
                println!("{}\t{}", id, locator::encode(loc));
            }
            Ok(true)
        }
        Commands::Join(args) => {
            let mut summary = RunSummary::new();
            let scope = args.scope.clone();
            match run_join(args) {
                Ok(unit_summary) => summary.merge(unit_summary),
                Err(e) => summary.record_failure(&scope, &e),
            }
            print!("{}", summary.render());
            summary.log();
            Ok(!summary.has_failures())
        }
        Commands::Prepare(args) => {
            let config = args.into_config()?;
            let summary = pipeline::run(&config)?;
            print!("{}", summary.render());
            summary.log();
            Ok(!summary.has_failures())
        }
        Commands::SimulevalSrc { input_tsv, wav_list, output_src } => {
            let report = simuleval::extract_src(&input_tsv, &wav_list, &output_src, DEFAULT_KEY_SUFFIXES)?;
            println!("wrote {} lines, {} ids missing", report.written, report.missing.len());
            Ok(true)
        }
        Commands::SimulevalUnit { input_tsv, wav_list, output_unit } => {
            let report = simuleval::extract_units(&input_tsv, &wav_list, &output_unit, DEFAULT_KEY_SUFFIXES)?;
            println!("wrote {} lines, {} ids missing", report.written, report.missing.len());
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    unitpack::init_tracing("unitpack");
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("[unitpack] error: {}", e);
            ExitCode::FAILURE
        }
    }
}
