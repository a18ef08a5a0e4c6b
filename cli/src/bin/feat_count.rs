use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use mscanner_core::{count_features, DocId, Result};

#[derive(Parser)]
#[command(name = "feat-count")]
#[command(about = "Count feature occurrences across the index within a date range", long_about = None)]
struct Cli {
    /// Feature index file
    index: PathBuf,
    /// Number of records in the index (kept separately by the indexer)
    numdocs: u64,
    /// Size of the feature universe
    numfeats: usize,
    /// Minimum completion date (YYYYMMDD)
    mindate: u32,
    /// Maximum completion date (YYYYMMDD)
    maxdate: u32,
    /// Number of excluded citation ids to read from stdin
    numexcluded: usize,
}

fn read_exclusions(input: &mut impl Read, count: usize) -> Result<Vec<DocId>> {
    let mut excluded = Vec::with_capacity(count);
    let mut buf = [0u8; 4];
    for _ in 0..count {
        input.read_exact(&mut buf)?;
        excluded.push(u32::from_le_bytes(buf));
    }
    Ok(excluded)
}

fn run(cli: &Cli) -> Result<()> {
    let excluded = read_exclusions(&mut io::stdin().lock(), cli.numexcluded)?;
    let cancel = AtomicBool::new(false);
    let counts = count_features(
        &cli.index,
        cli.numfeats,
        &excluded,
        cli.mindate,
        cli.maxdate,
        &cancel,
    )?;
    if counts.scanned != cli.numdocs {
        tracing::warn!(
            scanned = counts.scanned,
            expected = cli.numdocs,
            "index record count disagrees with the supplied numdocs"
        );
    }
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    counts.write_to(&mut out)?;
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
        tracing::error!(%err, "feat-count failed");
        std::process::exit(err.exit_code());
    }
}
