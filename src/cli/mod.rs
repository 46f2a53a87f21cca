//! regulon command-line front-end
//!
//! `solve` ranks regulators of one target from a delimited expression
//! matrix; `solvers` lists the recognized solver identifiers.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{EnsembleConfig, ReducerChoice};
use crate::ensemble::{EnsembleResult, ExecutionContext};
use crate::filter::{AllowListFilter, CandidateFilter, FilterChain, VarianceFilter};
use crate::solvers::{SolverKind, SolverParams};
use crate::utils::DataLoader;

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}
fn accent(s: &str) -> ColoredString {
    s.truecolor(120, 170, 255)
}
fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}
fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

#[derive(Parser)]
#[command(name = "regulon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ensemble ranking of candidate regulators for a target gene")]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rank candidate regulators of a target
    Solve(SolveArgs),
    /// List recognized solver identifiers
    Solvers,
}

#[derive(clap::Args, Debug)]
pub struct SolveArgs {
    /// Expression matrix (CSV or TSV, first column = row names)
    #[arg(short, long)]
    pub data: PathBuf,

    /// Field separator (default: tab for .tsv/.txt/.tab, comma otherwise)
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Target row name
    #[arg(short, long)]
    pub target: String,

    /// Comma-separated candidate regulators (default: every other row)
    #[arg(short, long, value_delimiter = ',')]
    pub candidates: Vec<String>,

    /// File with one candidate per line, e.g. a curated TF list
    #[arg(long)]
    pub candidates_file: Option<PathBuf>,

    /// Comma-separated solver identifiers (default: from config)
    #[arg(short, long, value_delimiter = ',')]
    pub solvers: Vec<String>,

    /// JSON ensemble configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Fit solvers on a pool of this many threads (0 = all cores)
    #[arg(long)]
    pub threads: Option<usize>,

    /// mean-rank or pca-max
    #[arg(long)]
    pub reducer: Option<String>,

    /// Drop candidates whose variance is below this value
    #[arg(long)]
    pub min_variance: Option<f64>,

    /// Keep only the k most variable candidates
    #[arg(long)]
    pub top_variable: Option<usize>,

    /// Rows to print
    #[arg(long, default_value = "20")]
    pub top: usize,

    /// Write the full result as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn read_candidates(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn build_config(args: &SolveArgs) -> anyhow::Result<EnsembleConfig> {
    let mut config = match &args.config {
        Some(path) => EnsembleConfig::load(&path.to_string_lossy())?,
        None => EnsembleConfig::new(),
    };
    if !args.solvers.is_empty() {
        config.solvers = args.solvers.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(n) = args.threads {
        config.execution = ExecutionContext::thread_pool(n);
    }
    if let Some(r) = &args.reducer {
        config.reducer = match r.as_str() {
            "mean-rank" => ReducerChoice::MeanRank,
            "pca-max" => ReducerChoice::PcaMax,
            other => anyhow::bail!("Invalid reducer: {} (expected mean-rank or pca-max)", other),
        };
    }
    config.validate()?;
    Ok(config)
}

pub fn cmd_solve(args: &SolveArgs) -> anyhow::Result<()> {
    section("Solve");
    let config = build_config(args)?;

    step_run("Loading matrix");
    let start = Instant::now();
    let mut loader = DataLoader::new();
    if let Some(d) = args.delimiter {
        if !d.is_ascii() {
            anyhow::bail!("Invalid delimiter: {:?} (expected a single ASCII character)", d);
        }
        loader = loader.with_delimiter(d as u8);
    }
    let matrix = Arc::new(loader.load(&args.data.to_string_lossy())?);
    step_done(&format!(
        "{} rows × {} samples in {:?}",
        matrix.n_rows(),
        matrix.n_samples(),
        start.elapsed()
    ));

    let mut universe: Vec<String> = if !args.candidates.is_empty() {
        args.candidates.clone()
    } else {
        matrix.row_names().to_vec()
    };
    if let Some(path) = &args.candidates_file {
        let listed = read_candidates(path)?;
        universe = AllowListFilter::new(listed).filter(&universe, &matrix)?;
    }

    let mut chain = FilterChain::new();
    if let Some(v) = args.min_variance {
        chain = chain.with(VarianceFilter::threshold(v)?);
    }
    if let Some(k) = args.top_variable {
        chain = chain.with(VarianceFilter::top_k(k));
    }
    let candidates = chain.filter(&universe, &matrix)?;

    step_run(&format!(
        "Running {} solver(s) on {} candidate(s)",
        config.solvers.len(),
        candidates.len()
    ));
    let start = Instant::now();
    let request = config.request(&args.target, &candidates);
    let result = config.ensemble()?.run(Arc::clone(&matrix), &request)?;
    step_done(&format!("{:?}", start.elapsed()));

    print_result(&result, args.top);

    if let Some(path) = &args.output {
        std::fs::write(path, result.to_json()?)?;
        println!("  {} {}", ok("✓"), format!("wrote {}", path.display()));
        println!();
    }
    Ok(())
}

fn fmt_cell(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{:>8.3}", x),
        None => format!("{:>8}", "—"),
    }
}

pub fn print_result(result: &EnsembleResult, top: usize) {
    println!();
    println!(
        "  {} {}   {} {}   {} {}",
        muted("target"),
        result.target.white().bold(),
        muted("reducer"),
        result.reducer.white(),
        muted("kendall W"),
        result
            .kendall_w
            .map(|w| format!("{:.3}", w))
            .unwrap_or_else(|| "n/a".to_string())
            .white()
    );
    println!();

    let mut header = format!("  {:>4}  {:<16} {:>9} {:>5} {:>6}", "#", "regulator", "consensus", "n", "conc");
    for s in &result.solvers {
        let id = s.id();
        header.push_str(&format!(" {:>8}", &id[..id.len().min(8)]));
    }
    println!("{}", header.dimmed());

    for (i, row) in result.top(top).iter().enumerate() {
        let mut line = format!(
            "  {:>4}  {:<16} {:>9} {:>5} {:>6.2}",
            i + 1,
            row.regulator,
            format!("{:.4}", row.consensus),
            row.n_solvers,
            row.concordance
        );
        for v in &row.normalized {
            line.push_str(&format!(" {}", fmt_cell(*v)));
        }
        if i == 0 {
            println!("{}", line.green());
        } else {
            println!("{}", line);
        }
    }
    if result.len() > top {
        println!("  {}", dim(&format!("… {} more", result.len() - top)));
    }

    if !result.warnings.is_empty() {
        println!();
        for w in &result.warnings {
            println!("  {} {}", "!".yellow().bold(), w.to_string().yellow());
        }
    }
    println!();
}

pub fn cmd_solvers() -> anyhow::Result<()> {
    section("Solvers");
    let defaults = SolverParams::default();
    for kind in SolverKind::ALL {
        let seeded = if kind.is_stochastic(&defaults) { "seeded" } else { "" };
        println!(
            "  {:<18} {} {:>2}   {}",
            kind.id().white().bold(),
            muted("min samples"),
            kind.min_samples(),
            accent(seeded)
        );
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve_args(argv: &[&str]) -> SolveArgs {
        let mut full = vec!["regulon", "solve"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Solve(args) => args,
            Commands::Solvers => panic!("expected solve"),
        }
    }

    #[test]
    fn test_delimiter_and_lists_parse() {
        let args = solve_args(&["-d", "m.txt", "-t", "G1", "--delimiter", ";", "-s", "pearson,spearman"]);
        assert_eq!(args.delimiter, Some(';'));
        assert_eq!(args.solvers, vec!["pearson", "spearman"]);
        assert_eq!(args.top, 20);
    }

    #[test]
    fn test_build_config_applies_flags() {
        let args = solve_args(&["-d", "m.csv", "-t", "G1", "--seed", "9", "--threads", "2", "--reducer", "pca-max"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.execution, ExecutionContext::thread_pool(2));
        assert!(matches!(config.reducer, ReducerChoice::PcaMax));

        let bad = solve_args(&["-d", "m.csv", "-t", "G1", "--reducer", "median"]);
        assert!(build_config(&bad).is_err());
    }
}
