use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use nba_over::{DecisionOutcome, PlayerSummary, shared_engine};

#[derive(Debug, Serialize)]
struct LinePrediction {
    line: f64,
    #[serde(flatten)]
    outcome: DecisionOutcome,
    probability_fraction: f64,
}

#[derive(Debug, Serialize)]
struct Report {
    source: String,
    player_stats: PlayerSummary,
    predictions: Vec<LinePrediction>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some((path, rest)) = args.split_first() else {
        return Err(anyhow!("usage: nba_over <game_log.csv> <line> [<line> ...]"));
    };
    let lines = parse_lines(rest)?;
    if lines.is_empty() {
        return Err(anyhow!("at least one line is required"));
    }

    let path = PathBuf::from(path);
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;

    let engine = shared_engine();
    let records = engine
        .normalize(&raw)
        .with_context(|| format!("normalizing {}", path.display()))?;

    let predictions = engine
        .predict_many(&records, &lines)
        .into_iter()
        .zip(&lines)
        .map(|(outcome, line)| LinePrediction {
            line: *line,
            probability_fraction: outcome.probability_fraction(),
            outcome,
        })
        .collect();

    let report = Report {
        source: path.display().to_string(),
        player_stats: PlayerSummary::from_records(&records),
        predictions,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_lines(args: &[String]) -> Result<Vec<f64>> {
    args.iter()
        .map(|raw| {
            let v = raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid line {raw:?}"))?;
            if !v.is_finite() || v < 0.0 {
                return Err(anyhow!("line must be a non-negative number, got {raw}"));
            }
            Ok(v)
        })
        .collect()
}
