use serde::Serialize;

use crate::game_log::GameRecord;

pub const FEATURE_COUNT: usize = 23;

const EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AvgPtsLast3,
    AvgPtsShort,
    AvgPtsMedium,
    StdPtsMedium,
    CvPts,
    TrendPts,
    MarginVsLine,
    AvgTrueShooting,
    AvgEffectiveFg,
    AvgPtsPerMin,
    AvgUsage,
    AvgFga,
    AvgFta,
    AvgGameScore,
    AvgPlusMinus,
    AvgAst,
    AvgFgPct,
    AvgThreePct,
    AvgFtPct,
    AvgMinutes,
    PctOverShort,
    PctOverMedium,
    Streak,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::AvgPtsLast3,
        Feature::AvgPtsShort,
        Feature::AvgPtsMedium,
        Feature::StdPtsMedium,
        Feature::CvPts,
        Feature::TrendPts,
        Feature::MarginVsLine,
        Feature::AvgTrueShooting,
        Feature::AvgEffectiveFg,
        Feature::AvgPtsPerMin,
        Feature::AvgUsage,
        Feature::AvgFga,
        Feature::AvgFta,
        Feature::AvgGameScore,
        Feature::AvgPlusMinus,
        Feature::AvgAst,
        Feature::AvgFgPct,
        Feature::AvgThreePct,
        Feature::AvgFtPct,
        Feature::AvgMinutes,
        Feature::PctOverShort,
        Feature::PctOverMedium,
        Feature::Streak,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::AvgPtsLast3 => "avg_pts_last3",
            Feature::AvgPtsShort => "avg_pts_short",
            Feature::AvgPtsMedium => "avg_pts_medium",
            Feature::StdPtsMedium => "std_pts_medium",
            Feature::CvPts => "cv_pts",
            Feature::TrendPts => "trend_pts",
            Feature::MarginVsLine => "margin_vs_line",
            Feature::AvgTrueShooting => "avg_ts",
            Feature::AvgEffectiveFg => "avg_efg",
            Feature::AvgPtsPerMin => "avg_pts_per_min",
            Feature::AvgUsage => "avg_usage",
            Feature::AvgFga => "avg_fga",
            Feature::AvgFta => "avg_fta",
            Feature::AvgGameScore => "avg_game_score",
            Feature::AvgPlusMinus => "avg_plus_minus",
            Feature::AvgAst => "avg_ast",
            Feature::AvgFgPct => "avg_fg_pct",
            Feature::AvgThreePct => "avg_3p_pct",
            Feature::AvgFtPct => "avg_ft_pct",
            Feature::AvgMinutes => "avg_minutes",
            Feature::PctOverShort => "pct_over_short",
            Feature::PctOverMedium => "pct_over_medium",
            Feature::Streak => "streak",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Windows {
    pub short: usize,
    pub medium: usize,
    /// Computed for reporting only; no feature reads it.
    pub long: usize,
}

impl Windows {
    pub fn for_len(n: usize) -> Self {
        Self {
            short: (n / 4).clamp(3, 5),
            medium: (n / 3).clamp(5, 10),
            long: (n / 2).clamp(8, 15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureVector {
    values: [Option<f64>; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, value: Option<f64>) {
        self.values[feature.index()] = value.filter(|v| v.is_finite());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub points: Option<f64>,
    pub features: FeatureVector,
}

impl FeatureRow {
    pub fn is_over(&self, line: f64) -> bool {
        self.points.is_some_and(|p| p > line)
    }

    pub fn is_complete(&self) -> bool {
        self.features.get(Feature::AvgPtsShort).is_some()
            && self.features.get(Feature::AvgPtsMedium).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub line: f64,
    pub windows: Windows,
    pub rows: Vec<FeatureRow>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_complete(mut self) -> Self {
        self.rows.retain(FeatureRow::is_complete);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    windows: Windows,
    points: Vec<Option<f64>>,
    base: Vec<FeatureVector>,
}

impl FeatureBuilder {
    pub fn new(records: &[GameRecord]) -> Self {
        let n = records.len();
        let w = Windows::for_len(n);
        let points: Vec<Option<f64>> = records.iter().map(|r| r.points).collect();
        let col = |f: fn(&GameRecord) -> Option<f64>| -> Vec<Option<f64>> {
            records.iter().map(f).collect()
        };

        let avg3 = rolling(&points, 3, 1, mean);
        let avg_short = rolling(&points, w.short, 2, mean);
        let avg_medium = rolling(&points, w.medium, 3, mean);
        let std_medium = rolling(&points, w.medium, 3, sample_std);
        let cv = zip_with(&std_medium, &avg_medium, |s, m| s / (m + EPS));
        let trend = zip_with(&avg_short, &avg_medium, |s, m| s - m);

        let true_shooting = col(|r| {
            let pts = r.points?;
            let fga = r.fga?;
            let fta = r.fta?;
            Some(pts / (2.0 * (fga + 0.44 * fta) + EPS))
        });
        let pts_per_min = col(|r| Some(r.points? / (r.minutes? + EPS)));
        let usage = col(|r| Some(r.fga? + 0.44 * r.fta? + r.tov?));

        let short = |values: &[Option<f64>]| rolling(values, w.short, 2, mean);
        let columns: [(Feature, Vec<Option<f64>>); 19] = [
            (Feature::AvgPtsLast3, avg3),
            (Feature::AvgPtsShort, avg_short),
            (Feature::AvgPtsMedium, avg_medium),
            (Feature::StdPtsMedium, std_medium),
            (Feature::CvPts, cv),
            (Feature::TrendPts, trend),
            (Feature::AvgTrueShooting, short(&true_shooting)),
            (Feature::AvgEffectiveFg, short(&col(|r| r.efg_pct))),
            (Feature::AvgPtsPerMin, short(&pts_per_min)),
            (Feature::AvgUsage, short(&usage)),
            (Feature::AvgFga, short(&col(|r| r.fga))),
            (Feature::AvgFta, short(&col(|r| r.fta))),
            (Feature::AvgGameScore, short(&col(|r| r.game_score))),
            (Feature::AvgPlusMinus, short(&col(|r| r.plus_minus))),
            (Feature::AvgAst, short(&col(|r| r.ast))),
            (Feature::AvgFgPct, short(&col(|r| r.fg_pct))),
            (Feature::AvgThreePct, short(&col(|r| r.three_pct))),
            (Feature::AvgFtPct, short(&col(|r| r.ft_pct))),
            (Feature::AvgMinutes, short(&col(|r| r.minutes))),
        ];

        let mut base = vec![FeatureVector::default(); n];
        for (feature, values) in columns {
            for (row, v) in base.iter_mut().zip(values) {
                row.set(feature, v);
            }
        }

        Self {
            windows: w,
            points,
            base,
        }
    }

    pub fn windows(&self) -> Windows {
        self.windows
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Fills in the line-dependent columns for `line`.
    pub fn frame(&self, line: f64) -> FeatureFrame {
        let w = self.windows;
        let over_frac = |obs: &[f64]| -> Option<f64> {
            let over = obs.iter().filter(|p| **p > line).count();
            Some(over as f64 / obs.len() as f64)
        };
        let pct_short = rolling(&self.points, w.short, w.short.saturating_sub(2).max(1), over_frac);
        let pct_medium =
            rolling(&self.points, w.medium, w.medium.saturating_sub(2).max(1), over_frac);
        let streak = streaks(&self.points, line);

        let rows = self
            .base
            .iter()
            .enumerate()
            .map(|(i, base)| {
                let mut features = *base;
                let margin = base.get(Feature::AvgPtsMedium).map(|m| m - line);
                features.set(Feature::MarginVsLine, margin);
                features.set(Feature::PctOverShort, pct_short[i]);
                features.set(Feature::PctOverMedium, pct_medium[i]);
                features.set(Feature::Streak, Some(streak[i] as f64));
                FeatureRow {
                    points: self.points[i],
                    features,
                }
            })
            .collect();

        FeatureFrame {
            line,
            windows: w,
            rows,
        }
    }
}

pub fn build_features(records: &[GameRecord], line: f64) -> FeatureFrame {
    FeatureBuilder::new(records).frame(line)
}

/// Signed run length of consecutive overs (positive) or unders (negative).
/// Absent points emit 0 and leave the running counter as it was.
pub fn streaks(points: &[Option<f64>], line: f64) -> Vec<i32> {
    let mut current = 0i32;
    points
        .iter()
        .map(|p| match p {
            None => 0,
            Some(v) if *v > line => {
                current = if current >= 0 { current + 1 } else { 1 };
                current
            }
            Some(_) => {
                current = if current <= 0 { current - 1 } else { -1 };
                current
            }
        })
        .collect()
}

fn rolling<F>(values: &[Option<f64>], window: usize, min_obs: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let window = window.max(1);
    let mut obs = Vec::with_capacity(window);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            obs.clear();
            obs.extend(values[start..=i].iter().flatten().copied());
            if obs.len() < min_obs.max(1) {
                None
            } else {
                f(&obs)
            }
        })
        .collect()
}

fn mean(obs: &[f64]) -> Option<f64> {
    if obs.is_empty() {
        return None;
    }
    Some(obs.iter().sum::<f64>() / obs.len() as f64)
}

fn sample_std(obs: &[f64]) -> Option<f64> {
    if obs.len() < 2 {
        return None;
    }
    let m = mean(obs)?;
    let var = obs.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (obs.len() - 1) as f64;
    Some(var.sqrt())
}

fn zip_with(
    a: &[Option<f64>],
    b: &[Option<f64>],
    f: impl Fn(f64, f64) -> f64,
) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(f(*x, *y)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(points: &[Option<f64>]) -> Vec<GameRecord> {
        let start = NaiveDate::from_ymd_opt(2023, 10, 24).unwrap();
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let date = start + chrono::Duration::days(2 * i as i64);
                GameRecord::with_points(i as u32 + 1, date, *p)
            })
            .collect()
    }

    #[test]
    fn windows_scale_with_series_length() {
        assert_eq!(
            Windows::for_len(35),
            Windows {
                short: 5,
                medium: 10,
                long: 15
            }
        );
        assert_eq!(
            Windows::for_len(10),
            Windows {
                short: 3,
                medium: 5,
                long: 8
            }
        );
    }

    #[test]
    fn streak_counts_runs_and_resets_on_flip() {
        let pts = [Some(30.0), Some(31.0), Some(10.0), Some(20.0), Some(40.0)];
        assert_eq!(streaks(&pts, 25.0), vec![1, 2, -1, -2, 1]);
    }

    #[test]
    fn absent_points_do_not_break_streak() {
        let pts = [Some(30.0), None, Some(31.0), None, Some(5.0)];
        assert_eq!(streaks(&pts, 25.0), vec![1, 0, 2, 0, -1]);
    }

    #[test]
    fn streak_never_jumps_across_zero() {
        let pts: Vec<Option<f64>> = [12.0, 30.0, 31.0, 33.0, 10.0, 8.0, 40.0, 2.0, 26.0, 27.0]
            .iter()
            .map(|p| Some(*p))
            .collect();
        let s = streaks(&pts, 25.0);
        for pair in s.windows(2) {
            if pair[0].signum() != pair[1].signum() {
                assert_eq!(pair[1].abs(), 1);
            }
        }
    }

    #[test]
    fn medium_average_needs_three_observations() {
        let recs = series(&[Some(20.0), Some(22.0), Some(18.0), Some(25.0)]);
        let frame = build_features(&recs, 21.5);
        assert!(frame.rows[0].features.get(Feature::AvgPtsMedium).is_none());
        assert!(frame.rows[1].features.get(Feature::AvgPtsMedium).is_none());
        assert_eq!(frame.rows[2].features.get(Feature::AvgPtsMedium), Some(20.0));
        assert_eq!(frame.rows[1].features.get(Feature::AvgPtsShort), Some(21.0));
        assert_eq!(frame.rows[0].features.get(Feature::AvgPtsLast3), Some(20.0));
        assert_eq!(frame.into_complete().len(), 2);
    }

    #[test]
    fn line_dependent_columns_follow_the_line() {
        let recs = series(&[Some(20.0), Some(22.0), Some(18.0), Some(25.0), Some(30.0)]);
        let builder = FeatureBuilder::new(&recs);
        let low = builder.frame(19.5);
        let high = builder.frame(26.5);
        let last_low = &low.rows[4].features;
        let last_high = &high.rows[4].features;
        assert_eq!(
            last_low.get(Feature::AvgPtsMedium),
            last_high.get(Feature::AvgPtsMedium)
        );
        assert_eq!(last_low.get(Feature::Streak), Some(2.0));
        assert_eq!(last_high.get(Feature::Streak), Some(1.0));
        assert!(last_low.get(Feature::MarginVsLine) > last_high.get(Feature::MarginVsLine));
        // short window = 3: [18, 25, 30]
        assert_eq!(last_high.get(Feature::PctOverShort), Some(1.0 / 3.0));
    }

    #[test]
    fn absent_values_are_skipped_in_rolling_means() {
        let recs = series(&[Some(20.0), None, Some(30.0)]);
        let frame = build_features(&recs, 25.0);
        assert_eq!(frame.rows[2].features.get(Feature::AvgPtsShort), Some(25.0));
        assert!(frame.rows[1].features.get(Feature::AvgPtsShort).is_none());
    }
}
