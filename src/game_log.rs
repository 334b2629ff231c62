use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

const COL_RANK: &str = "Rk";
const COL_DATE: &str = "Date";
const COL_GAME: &str = "G";
const COL_REASON: &str = "Reason";

const INACTIVE_MARKERS: [&str; 6] = [
    "inactive",
    "did not play",
    "did not dress",
    "not with team",
    "player suspended",
    "dnp",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub rank: u32,
    pub date: NaiveDate,
    pub minutes: Option<f64>,
    pub points: Option<f64>,
    pub fg: Option<f64>,
    pub fga: Option<f64>,
    pub fg_pct: Option<f64>,
    pub three_p: Option<f64>,
    pub three_pa: Option<f64>,
    pub three_pct: Option<f64>,
    pub two_p: Option<f64>,
    pub two_pa: Option<f64>,
    pub two_pct: Option<f64>,
    pub ft: Option<f64>,
    pub fta: Option<f64>,
    pub ft_pct: Option<f64>,
    pub orb: Option<f64>,
    pub drb: Option<f64>,
    pub trb: Option<f64>,
    pub ast: Option<f64>,
    pub stl: Option<f64>,
    pub blk: Option<f64>,
    pub tov: Option<f64>,
    pub pf: Option<f64>,
    pub game_score: Option<f64>,
    pub plus_minus: Option<f64>,
    pub efg_pct: Option<f64>,
}

impl GameRecord {
    /// A record carrying only a date and a points total.
    pub fn with_points(rank: u32, date: NaiveDate, points: Option<f64>) -> Self {
        Self {
            rank,
            date,
            minutes: None,
            points,
            fg: None,
            fga: None,
            fg_pct: None,
            three_p: None,
            three_pa: None,
            three_pct: None,
            two_p: None,
            two_pa: None,
            two_pct: None,
            ft: None,
            fta: None,
            ft_pct: None,
            orb: None,
            drb: None,
            trb: None,
            ast: None,
            stl: None,
            blk: None,
            tov: None,
            pf: None,
            game_score: None,
            plus_minus: None,
            efg_pct: None,
        }
    }

    pub fn is_over(&self, line: f64) -> bool {
        self.points.is_some_and(|p| p > line)
    }

    fn fill_derived(&mut self) {
        if self.fg_pct.is_none() {
            self.fg_pct = ratio(self.fg, self.fga);
        }
        if self.three_pct.is_none() {
            self.three_pct = ratio(self.three_p, self.three_pa);
        }
        if self.two_pct.is_none() {
            self.two_pct = ratio(self.two_p, self.two_pa);
        }
        if self.ft_pct.is_none() {
            self.ft_pct = ratio(self.ft, self.fta);
        }
        if self.trb.is_none()
            && let (Some(o), Some(d)) = (self.orb, self.drb)
        {
            self.trb = Some(o + d);
        }
        if self.efg_pct.is_none()
            && let (Some(fg), Some(fga)) = (self.fg, self.fga)
            && fga > 0.0
        {
            let threes = self.three_p.unwrap_or(0.0);
            self.efg_pct = Some((fg + 0.5 * threes) / fga);
        }
        if self.game_score.is_none() {
            self.game_score = self.composite_game_score();
        }
    }

    fn composite_game_score(&self) -> Option<f64> {
        let pts = self.points?;
        let fg = self.fg?;
        let fga = self.fga?;
        let ft = self.ft?;
        let fta = self.fta?;
        let orb = self.orb?;
        let drb = self.drb?;
        let stl = self.stl?;
        let ast = self.ast?;
        let blk = self.blk?;
        let pf = self.pf?;
        let tov = self.tov?;
        Some(
            pts + 0.4 * fg - 0.7 * fga - 0.4 * (fta - ft) + 0.7 * orb + 0.3 * drb + stl
                + 0.7 * ast
                + 0.7 * blk
                - 0.4 * pf
                - tov,
        )
    }
}

/// Parses a CSV game log into records sorted by date.
pub fn normalize(raw: &str) -> Result<Vec<GameRecord>> {
    let mut lines = raw
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return Err(EngineError::parse("input has no header row"));
    };
    let header = Header::parse(header_line)?;

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for line in lines {
        let cells = split_csv_line(line);
        match header.record(&cells) {
            Some(rec) => records.push(rec),
            None => dropped += 1,
        }
    }

    if records.is_empty() {
        return Err(EngineError::parse("no valid game rows"));
    }

    records.sort_by(|a, b| a.date.cmp(&b.date).then(a.rank.cmp(&b.rank)));
    debug!(games = records.len(), dropped, "normalized game log");
    Ok(records)
}

struct Header {
    rank: usize,
    date: usize,
    games: Option<usize>,
    reason: Option<usize>,
    minutes: Option<usize>,
    points: Option<usize>,
    columns: Vec<String>,
}

impl Header {
    fn parse(line: &str) -> Result<Self> {
        let columns: Vec<String> = split_csv_line(line)
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();
        let find = |name: &str| columns.iter().position(|c| c == name);

        let Some(rank) = find(COL_RANK) else {
            return Err(EngineError::parse(format!("missing required column {COL_RANK}")));
        };
        let Some(date) = find(COL_DATE) else {
            return Err(EngineError::parse(format!("missing required column {COL_DATE}")));
        };
        let games = find(COL_GAME);
        let reason = find(COL_REASON);
        let minutes = find("MP");
        let points = find("PTS");

        Ok(Self {
            rank,
            date,
            games,
            reason,
            minutes,
            points,
            columns,
        })
    }

    fn cell<'a>(&self, cells: &'a [String], name: &str) -> Option<&'a str> {
        let idx = self.columns.iter().position(|c| c == name)?;
        cells.get(idx).map(|s| s.as_str())
    }

    fn num(&self, cells: &[String], name: &str) -> Option<f64> {
        self.cell(cells, name).and_then(parse_stat_cell)
    }

    fn record(&self, cells: &[String]) -> Option<GameRecord> {
        let rank = cells.get(self.rank)?.trim().parse::<u32>().ok()?;
        let date = parse_date(cells.get(self.date)?)?;

        if let Some(idx) = self.reason
            && cells.get(idx).is_some_and(|c| !c.trim().is_empty())
        {
            return None;
        }
        // Exports put the marker in the first stat cell and blank the rest.
        if cells.iter().skip(self.date + 1).any(|c| is_inactive_marker(c)) {
            return None;
        }

        let minutes = self
            .minutes
            .and_then(|idx| cells.get(idx))
            .and_then(|c| parse_minutes(c));
        let points = self.num(cells, "PTS");
        let unnumbered = self
            .games
            .and_then(|idx| cells.get(idx))
            .is_some_and(|c| c.trim().is_empty());
        if minutes.is_none() && points.is_none() && unnumbered {
            return None;
        }

        let mut rec = GameRecord {
            rank,
            date,
            minutes,
            points,
            fg: self.num(cells, "FG"),
            fga: self.num(cells, "FGA"),
            fg_pct: self.num(cells, "FG%"),
            three_p: self.num(cells, "3P"),
            three_pa: self.num(cells, "3PA"),
            three_pct: self.num(cells, "3P%"),
            two_p: self.num(cells, "2P"),
            two_pa: self.num(cells, "2PA"),
            two_pct: self.num(cells, "2P%"),
            ft: self.num(cells, "FT"),
            fta: self.num(cells, "FTA"),
            ft_pct: self.num(cells, "FT%"),
            orb: self.num(cells, "ORB"),
            drb: self.num(cells, "DRB"),
            trb: self.num(cells, "TRB"),
            ast: self.num(cells, "AST"),
            stl: self.num(cells, "STL"),
            blk: self.num(cells, "BLK"),
            tov: self.num(cells, "TOV"),
            pf: self.num(cells, "PF"),
            game_score: self.num(cells, "GmSc"),
            plus_minus: self.num(cells, "+/-"),
            efg_pct: self.num(cells, "eFG%"),
        };
        rec.fill_derived();
        Some(rec)
    }
}

/// Splits one CSV line, honouring double-quoted fields and `""` escapes.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut cur)),
            _ => cur.push(ch),
        }
    }
    out.push(cur);
    out
}

/// `"34:30"` is 34.5 minutes; a bare number is taken as minutes.
pub fn parse_minutes(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some((m, sec)) = s.split_once(':') {
        let m = m.trim().parse::<u32>().ok()?;
        let sec = sec.trim().parse::<u32>().ok()?;
        return Some(m as f64 + sec as f64 / 60.0);
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    // Drop any time component.
    let day = s.split(['T', ' ']).next().unwrap_or(s);
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(day, fmt) {
            return Some(d);
        }
    }
    NaiveDate::parse_from_str(s, "%b %d, %Y").ok()
}

fn parse_stat_cell(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    let s = s.trim_end_matches('%').replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_inactive_marker(raw: &str) -> bool {
    let s = raw.trim().to_ascii_lowercase();
    INACTIVE_MARKERS.iter().any(|m| s == *m)
}

fn ratio(made: Option<f64>, attempted: Option<f64>) -> Option<f64> {
    match (made, attempted) {
        (Some(m), Some(a)) if a > 0.0 => Some(m / a),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minutes_accept_clock_and_plain_numbers() {
        assert_eq!(parse_minutes("34:30"), Some(34.5));
        assert_eq!(parse_minutes("12"), Some(12.0));
        assert_eq!(parse_minutes("28.25"), Some(28.25));
        assert!(parse_minutes("").is_none());
        assert!(parse_minutes("Inactive").is_none());
        assert!(parse_minutes("3x:10").is_none());
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let cells = split_csv_line(r#"1,"Oct 24, 2023",LAL,"say ""hi""""#);
        assert_eq!(cells, vec!["1", "Oct 24, 2023", "LAL", r#"say "hi""#]);
    }

    #[test]
    fn dates_parse_in_common_layouts() {
        let want = NaiveDate::from_ymd_opt(2023, 10, 24);
        assert_eq!(parse_date("2023-10-24"), want);
        assert_eq!(parse_date("2023-10-24 19:30:00"), want);
        assert_eq!(parse_date("10/24/2023"), want);
        assert_eq!(parse_date("Oct 24, 2023"), want);
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn marker_in_first_stat_cell_drops_the_row() {
        let raw = "Rk,G,Date,Opp,GS,MP,FG,PTS\n\
                   1,1,2024-01-02,LAL,1,34:00,8,20\n\
                   2,2,2024-01-04,GSW,1,33:00,9,24\n\
                   3,,2024-01-06,PHX,Inactive,,,\n\
                   4,3,2024-01-08,DEN,1,30:00,7,18\n\
                   5,,2024-01-10,SAC,Did Not Play,,,\n\
                   6,4,2024-01-12,POR,1,35:00,10,26\n";
        let recs = normalize(raw).unwrap();
        let ranks: Vec<u32> = recs.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 4, 6]);
        assert!(recs.iter().all(|r| r.points.is_some()));
    }

    #[test]
    fn blank_game_number_without_minutes_or_points_is_not_a_game() {
        let raw = "Rk,G,Date,MP,PTS,FGA\n\
                   1,1,2024-01-02,34:00,20,15\n\
                   2,,2024-01-04,,,\n\
                   3,2,2024-01-06,,,12\n";
        let recs = normalize(raw).unwrap();
        let ranks: Vec<u32> = recs.iter().map(|r| r.rank).collect();
        // A numbered game keeps its row even when both cells are empty.
        assert_eq!(ranks, vec![1, 3]);
    }

    #[test]
    fn unparseable_stats_are_absent_not_zero() {
        let raw = "Rk,Date,MP,PTS,FGA\n1,2023-10-24,30:00,abc,12\n";
        let recs = normalize(raw).unwrap();
        assert_eq!(recs.len(), 1);
        assert!(recs[0].points.is_none());
        assert_eq!(recs[0].fga, Some(12.0));
    }

    #[test]
    fn derived_columns_fill_missing_ratios() {
        let raw = "Rk,Date,PTS,FG,FGA,3P,3PA,FT,FTA\n1,2023-10-24,25,10,20,2,5,3,4\n";
        let rec = &normalize(raw).unwrap()[0];
        assert_eq!(rec.fg_pct, Some(0.5));
        assert_eq!(rec.three_pct, Some(0.4));
        assert_eq!(rec.ft_pct, Some(0.75));
        assert_eq!(rec.efg_pct, Some(0.55));
        // Not enough columns for the composite.
        assert!(rec.game_score.is_none());
    }

    #[test]
    fn plus_minus_keeps_sign() {
        let raw = "Rk,Date,PTS,+/-\n1,2023-10-24,20,+7\n2,2023-10-26,18,-4\n";
        let recs = normalize(raw).unwrap();
        assert_eq!(recs[0].plus_minus, Some(7.0));
        assert_eq!(recs[1].plus_minus, Some(-4.0));
    }
}
