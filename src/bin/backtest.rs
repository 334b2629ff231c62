use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use nba_over::calibration::{self, CalibrationBin};
use nba_over::{EngineConfig, PredictOptions, PredictionEngine};

const DEFAULT_MIN_HISTORY: usize = 10;
const BINS: usize = 10;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let positional: Vec<&String> = positional_args(&args);
    let (Some(path), Some(line_raw)) = (positional.first(), positional.get(1)) else {
        return Err(anyhow!("usage: backtest <game_log.csv> <line> [--min-history N]"));
    };
    let line: f64 = line_raw
        .parse()
        .with_context(|| format!("invalid line {line_raw:?}"))?;
    let min_history = parse_usize_arg(&args, "--min-history")
        .unwrap_or(DEFAULT_MIN_HISTORY)
        .max(1);

    let path = PathBuf::from(path.as_str());
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let records = nba_over::normalize(&raw)?;
    if records.len() <= min_history {
        return Err(anyhow!(
            "{} games is not enough for a walk-forward run with {min_history} games of history",
            records.len()
        ));
    }

    let config = EngineConfig::from_env();
    let opts = PredictOptions {
        recent_games: config.recent_games,
        enforce_monotonicity: false,
    };
    let engine = PredictionEngine::new(config);
    let mut preds = Vec::new();
    let mut outcomes = Vec::new();
    for i in min_history..records.len() {
        let Some(actual) = records[i].points else {
            continue;
        };
        engine.reset_cache();
        let outcome = engine.predict_with(&records[..i], line, opts);
        preds.push(outcome.probability_fraction());
        outcomes.push(actual > line);
    }

    let metrics = calibration::evaluate_probs(&preds, &outcomes);
    println!("File: {}", path.display());
    println!("Line: {line}");
    println!("Samples: {}", metrics.samples);
    println!("Brier: {:.4}", metrics.brier);
    println!("LogLoss: {:.4}", metrics.log_loss);
    println!("Accuracy: {:.1}%", metrics.accuracy * 100.0);
    println!("Reliability:");
    for bin in calibration::calibration_bins(&preds, &outcomes, BINS) {
        print_bin(&bin);
    }
    Ok(())
}

fn print_bin(bin: &CalibrationBin) {
    if bin.count == 0 {
        return;
    }
    println!(
        "  {:>3.0}-{:<3.0}% n={:<4} pred={:>5.1}% actual={:>5.1}%",
        bin.bucket_start * 100.0,
        bin.bucket_end * 100.0,
        bin.count,
        bin.avg_pred * 100.0,
        bin.actual_rate * 100.0
    );
}

fn positional_args(args: &[String]) -> Vec<&String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with("--") {
            skip_next = !arg.contains('=');
            continue;
        }
        out.push(arg);
    }
    out
}

fn parse_usize_arg(args: &[String], name: &str) -> Option<usize> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<usize>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<usize>()
        {
            return Some(v);
        }
    }
    None
}
