//! ope-eval: off-policy evaluation of logged decisions.
//!
//! Reads a JSON-lines decision log and prints a JSON report of every
//! estimator of the chosen mode, accumulated over parallel shards and merged.

mod input;
mod suite;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use ope_ccb::Episode;
use ope_core::{validate_alpha, DecisionExample, EvaluatorConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use suite::{BanditSuite, CcbSuite, MultislotSuite, SlateRecord, SlateSuite};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    /// One decision per line.
    Bandit,
    /// Ordered slot episodes, evaluated per position.
    Ccb,
    /// Labelled slot episodes, evaluated per label.
    Multislot,
    /// Slate decisions with one reward per slate.
    Slate,
}

#[derive(Parser, Debug)]
#[command(name = "ope-eval")]
#[command(about = "Off-policy evaluation of logged decisions")]
#[command(version)]
struct Cli {
    /// JSON-lines decision log
    #[arg(long)]
    input: PathBuf,

    /// Record layout of the input
    #[arg(long, value_enum, default_value_t = Mode::Bandit)]
    mode: Mode,

    /// Significance level (overrides config)
    #[arg(long, env = "OPE__ALPHA")]
    alpha: Option<f64>,

    /// Number of parallel shards (overrides config)
    #[arg(long, env = "OPE__SHARDS")]
    shards: Option<usize>,

    /// Optional TOML/JSON config file
    #[arg(long, env = "OPE_CONFIG")]
    config: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report<T> {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    input: String,
    mode: Mode,
    records: usize,
    alpha: f64,
    shards: usize,
    results: T,
}

/// A config file named on the command line must load; without one, bad
/// environment overrides fall back to defaults.
fn load_config(path: Option<&str>) -> anyhow::Result<EvaluatorConfig> {
    match path {
        Some(path) => EvaluatorConfig::load_from(Some(path))
            .with_context(|| format!("failed to load config from {path}")),
        None => Ok(EvaluatorConfig::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            EvaluatorConfig::default()
        })),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ope_eval=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("ope-eval starting up");

    let mut config = load_config(cli.config.as_deref())?;

    if let Some(alpha) = cli.alpha {
        config.alpha = alpha;
    }
    if let Some(shards) = cli.shards {
        config.shards = shards;
    }
    validate_alpha(config.alpha)?;

    info!(
        input = %cli.input.display(),
        mode = ?cli.mode,
        alpha = config.alpha,
        shards = config.shards,
        "Configuration loaded"
    );

    let started = Instant::now();
    let (records, results) = match cli.mode {
        Mode::Bandit => {
            let examples: Vec<DecisionExample> = input::read_file(&cli.input)?;
            let mut report = suite::evaluate::<BanditSuite>(&examples, &config)?;
            report.confidence_sequence = suite::confidence_sequence(&examples, &config)?;
            (examples.len(), serde_json::to_value(report)?)
        }
        Mode::Ccb => {
            let episodes: Vec<Episode> = input::read_file(&cli.input)?;
            let report = suite::evaluate::<CcbSuite>(&episodes, &config)?;
            (episodes.len(), serde_json::to_value(report)?)
        }
        Mode::Multislot => {
            let episodes: Vec<Episode> = input::read_file(&cli.input)?;
            let report = suite::evaluate::<MultislotSuite>(&episodes, &config)?;
            (episodes.len(), serde_json::to_value(report)?)
        }
        Mode::Slate => {
            let slates: Vec<SlateRecord> = input::read_file(&cli.input)?;
            let report = suite::evaluate::<SlateSuite>(&slates, &config)?;
            (slates.len(), serde_json::to_value(report)?)
        }
    };

    info!(
        records,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Evaluation complete"
    );

    let report = Report {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        input: cli.input.display().to_string(),
        mode: cli.mode,
        records,
        alpha: config.alpha,
        shards: config.shards,
        results,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_config_file_must_exist() {
        let err = load_config(Some("/nonexistent/ope-eval.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ope-eval.toml"), "{err}");
    }

    #[test]
    fn test_named_config_file_is_applied() {
        let path = std::env::temp_dir().join(format!("ope-eval-{}.toml", std::process::id()));
        std::fs::write(&path, "alpha = 0.1\n[reward]\nrmax = 5.0\n").unwrap();

        let config = load_config(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.alpha, 0.1);
        assert_eq!(config.reward.rmax, 5.0);
    }

    #[test]
    fn test_malformed_config_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("ope-eval-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "alpha = [not toml").unwrap();

        let result = load_config(path.to_str());
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["ope-eval", "--input", "log.jsonl", "--mode", "ccb", "--shards", "2"]);
        assert_eq!(cli.mode, Mode::Ccb);
        assert_eq!(cli.shards, Some(2));
        assert_eq!(cli.input, PathBuf::from("log.jsonl"));
    }
}
