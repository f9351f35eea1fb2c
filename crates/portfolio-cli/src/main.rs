mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use commands::estimate::EstimateArgs;
use commands::frontier::FrontierArgs;
use commands::optimize::OptimizeArgs;
use portfolio_core::{EngineConfig, PoolRanking, PortfolioEngine};

/// Long-only portfolio construction from historical prices
#[derive(Parser)]
#[command(
    name = "portopt",
    version,
    about = "Long-only portfolio construction from historical prices",
    long_about = "Estimates annualized returns and covariance from close-price history \
                  and solves for maximum-Sharpe or minimum-volatility weights under \
                  full-investment and no-short constraints."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Engine configuration file (JSON or YAML)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Pool ranking: expected_return, sharpe or low_volatility (overrides --config)
    #[arg(long, global = true)]
    ranking: Option<String>,

    /// Log solver iterations and other debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Annualized expected returns and covariance from a price table
    Estimate(EstimateArgs),
    /// Solve for portfolio weights
    Optimize(OptimizeArgs),
    /// Minimum-volatility portfolios across a range of target returns
    Frontier(FrontierArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();
}

fn build_engine(
    config_path: Option<&str>,
    ranking: Option<&str>,
) -> Result<PortfolioEngine, Box<dyn std::error::Error>> {
    let mut config: EngineConfig = match config_path {
        Some(path) => input::file::read_structured(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ranking) = ranking {
        config.pool_ranking = ranking.parse::<PoolRanking>()?;
    }
    Ok(PortfolioEngine::new(config)?)
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = cli.config.as_deref();
    let ranking = cli.ranking.as_deref();
    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Estimate(args) => build_engine(config, ranking)
            .and_then(|engine| commands::estimate::run_estimate(&engine, args)),
        Commands::Optimize(args) => build_engine(config, ranking)
            .and_then(|engine| commands::optimize::run_optimize(&engine, args)),
        Commands::Frontier(args) => build_engine(config, ranking)
            .and_then(|engine| commands::frontier::run_frontier(&engine, args)),
        Commands::Version => {
            println!("portopt {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_ranking_flag_overrides_config_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "pool_ranking: sharpe").unwrap();
        let path = file.path().to_str().unwrap();

        let engine = build_engine(Some(path), None).unwrap();
        assert_eq!(engine.config().pool_ranking, PoolRanking::Sharpe);

        let engine = build_engine(Some(path), Some("low_vol")).unwrap();
        assert_eq!(engine.config().pool_ranking, PoolRanking::LowVolatility);

        assert!(build_engine(None, Some("momentum")).is_err());
    }
}
