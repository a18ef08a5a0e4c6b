use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use mscanner_core::{
    cross_validate, DocId, Smoothing, TrainConfig, ValidationConfig,
};

#[derive(Parser)]
#[command(name = "validate")]
#[command(about = "Cross-validate a topic's citations against the index", long_about = None)]
struct Cli {
    /// Feature index file
    #[arg(long)]
    index: PathBuf,
    /// Size of the feature universe
    #[arg(long)]
    numfeats: usize,
    /// File of positive PubMed IDs, one per line
    #[arg(long)]
    positives: PathBuf,
    /// Optional file of negative PubMed IDs; sampled from the index if absent
    #[arg(long)]
    negatives: Option<PathBuf>,
    /// Number of negatives to sample when none are supplied
    #[arg(long, default_value_t = 100_000)]
    numnegs: usize,
    /// Number of validation folds
    #[arg(long, default_value_t = 10)]
    nfolds: usize,
    /// Precision weight of the F measure used to tune the threshold
    #[arg(long, default_value_t = 0.5)]
    alpha: f64,
    /// Utility ratio for the tuned-threshold utility (defaults to N/P)
    #[arg(long)]
    utility_r: Option<f64>,
    /// Shuffle and sampling seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Fixed pseudocount; background-frequency smoothing when absent
    #[arg(long)]
    pseudocount: Option<f64>,
    /// Deselect features with fewer total occurrences
    #[arg(long, default_value_t = 0)]
    mincount: u32,
    /// Deselect features below this relative information gain
    #[arg(long, default_value_t = 0.0)]
    min_infogain: f64,
    /// Minimum completion date (YYYYMMDD)
    #[arg(long, default_value_t = 0)]
    mindate: u32,
    /// Maximum completion date (YYYYMMDD)
    #[arg(long, default_value_t = 99_999_999)]
    maxdate: u32,
    /// Directory for the report and score files
    #[arg(long, default_value = "./validation")]
    output: PathBuf,
}

/// Read PubMed IDs, one per line; blank lines and `#` comments are skipped,
/// unparseable lines are dropped with a warning.
fn read_pmids(path: &Path) -> Result<Vec<DocId>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut pmids = Vec::new();
    let mut broken = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<DocId>() {
            Ok(pmid) => pmids.push(pmid),
            Err(_) => broken += 1,
        }
    }
    if broken > 0 {
        tracing::warn!(broken, path = %path.display(), "unparseable PubMed ID lines");
    }
    Ok(pmids)
}

fn write_scores(path: &Path, scored: &[(DocId, f32)]) -> io::Result<()> {
    let mut ranked = scored.to_vec();
    ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut out = BufWriter::new(File::create(path)?);
    for (pmid, score) in ranked {
        writeln!(out, "{score:.5}\t{pmid}")?;
    }
    out.flush()
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();
    let cli = Cli::parse();

    let positives = read_pmids(&cli.positives)?;
    let negatives = cli.negatives.as_deref().map(read_pmids).transpose()?;

    let config = ValidationConfig {
        nfolds: cli.nfolds,
        alpha: cli.alpha,
        utility_r: cli.utility_r,
        seed: cli.seed,
        num_negatives: cli.numnegs,
        mindate: cli.mindate,
        maxdate: cli.maxdate,
        train: TrainConfig {
            smoothing: match cli.pseudocount {
                Some(alpha) => Smoothing::Constant(alpha),
                None => Smoothing::BgFreq,
            },
            min_count: cli.mincount,
            min_infogain: cli.min_infogain,
            prior_override: None,
        },
    };

    let cancel = AtomicBool::new(false);
    let validation = match cross_validate(
        &cli.index,
        cli.numfeats,
        &positives,
        negatives.as_deref(),
        &config,
        &cancel,
    ) {
        Ok(validation) => validation,
        Err(err) => {
            tracing::error!(%err, "validation failed");
            std::process::exit(err.exit_code());
        }
    };

    fs::create_dir_all(&cli.output)?;
    let report_path = cli.output.join("report.json");
    serde_json::to_writer_pretty(
        BufWriter::new(File::create(&report_path)?),
        &validation.stats,
    )?;
    write_scores(&cli.output.join("positives.txt"), &validation.positives)?;
    write_scores(&cli.output.join("negatives.txt"), &validation.negatives)?;

    tracing::info!(
        report = %report_path.display(),
        roc = validation.stats.wilcoxon,
        stderr = validation.stats.wilcoxon_stderr,
        averaged_precision = validation.stats.averaged_precision,
        breakeven = validation.stats.breakeven,
        threshold = validation.stats.tuned.threshold,
        "validation report written"
    );
    Ok(())
}
