use serde::Serialize;

use crate::game_log::GameRecord;

const TREND_GAMES: usize = 10;

/// Descriptive stats shown next to a prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSummary {
    pub total_games: usize,
    pub avg_last_10: Option<f64>,
    pub season_avg: Option<f64>,
    pub max_points: Option<f64>,
    pub min_points: Option<f64>,
    pub std_dev: Option<f64>,
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// `MM/DD`
    pub date: String,
    pub points: Option<f64>,
}

impl PlayerSummary {
    pub fn from_records(records: &[GameRecord]) -> Self {
        let all: Vec<f64> = records.iter().filter_map(|r| r.points).collect();
        let last = &records[records.len().saturating_sub(TREND_GAMES)..];
        let recent: Vec<f64> = last.iter().filter_map(|r| r.points).collect();

        Self {
            total_games: records.len(),
            avg_last_10: mean(&recent).map(round1),
            season_avg: mean(&all).map(round1),
            max_points: all.iter().copied().reduce(f64::max),
            min_points: all.iter().copied().reduce(f64::min),
            std_dev: sample_std(&all).map(round1),
            trend: last
                .iter()
                .map(|r| TrendPoint {
                    date: r.date.format("%m/%d").to_string(),
                    points: r.points,
                })
                .collect(),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn summarises_season_and_last_ten() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 30).unwrap();
        let records: Vec<GameRecord> = (0..12)
            .map(|i| {
                let date = start + chrono::Duration::days(i);
                GameRecord::with_points(i as u32 + 1, date, Some(10.0 + i as f64))
            })
            .collect();
        let s = PlayerSummary::from_records(&records);
        assert_eq!(s.total_games, 12);
        assert_eq!(s.season_avg, Some(15.5));
        assert_eq!(s.avg_last_10, Some(16.5));
        assert_eq!(s.max_points, Some(21.0));
        assert_eq!(s.min_points, Some(10.0));
        assert_eq!(s.trend.len(), 10);
        assert_eq!(s.trend[0].date, "02/01");
    }

    #[test]
    fn empty_log_has_no_stats() {
        let s = PlayerSummary::from_records(&[]);
        assert_eq!(s.total_games, 0);
        assert!(s.season_avg.is_none());
        assert!(s.std_dev.is_none());
        assert!(s.trend.is_empty());
    }
}
