use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use mscanner_core::scan::{read_score_vector, scan, write_results, ScanConfig};
use mscanner_core::Result;

#[derive(Parser)]
#[command(name = "score-calc")]
#[command(about = "Score every indexed citation against a feature score vector", long_about = None)]
struct Cli {
    /// Feature index file
    index: PathBuf,
    /// Number of records in the index (kept separately by the indexer)
    numdocs: u64,
    /// Size of the feature universe
    numfeats: usize,
    /// Scalar added to every citation score (base + prior)
    #[arg(allow_hyphen_values = true)]
    offset: f32,
    /// Maximum number of results
    limit: usize,
    /// Minimum score for a result to be reported; accepts -inf
    #[arg(allow_hyphen_values = true)]
    threshold: f32,
    /// Minimum completion date (YYYYMMDD)
    mindate: u32,
    /// Maximum completion date (YYYYMMDD)
    maxdate: u32,
    /// Worker threads for the scan (1 = sequential)
    #[arg(long, default_value_t = 1)]
    threads: usize,
}

fn run(cli: &Cli) -> Result<()> {
    let scores = read_score_vector(&mut io::stdin().lock(), cli.numfeats)?;
    let config = ScanConfig {
        offset: cli.offset,
        threshold: cli.threshold,
        limit: cli.limit,
        mindate: cli.mindate,
        maxdate: cli.maxdate,
        threads: cli.threads,
    };
    let cancel = AtomicBool::new(false);
    let (results, scanned) = scan(&cli.index, &scores, &config, &cancel)?;
    if scanned != cli.numdocs {
        tracing::warn!(
            scanned,
            expected = cli.numdocs,
            "index record count disagrees with the supplied numdocs"
        );
    }
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_results(&mut out, &results)?;
    out.flush().map_err(Into::into)
}

fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };
    if let Err(err) = run(&cli) {
        tracing::error!(%err, "score-calc failed");
        std::process::exit(err.exit_code());
    }
}
