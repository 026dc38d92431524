//! Assignment of ballots to non-overlapping periods, and the per-period slices.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::builder::BuiltMatrix;
use crate::config::*;
use crate::matrix::{FilterProvenance, FilteredMatrix};

/// How the end of a period is interpreted. One rule applies to a whole run.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BoundaryRule {
    /// start <= day <= end
    Closed,
    /// start <= day < end
    HalfOpen,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub id: String,
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub note: Option<String>,
}

impl PeriodDefinition {
    pub fn new(id: &str, label: &str, start: NaiveDate, end: NaiveDate) -> PeriodDefinition {
        PeriodDefinition {
            id: id.to_string(),
            label: label.to_string(),
            start,
            end,
            note: None,
        }
    }

    pub fn with_note(self, note: &str) -> PeriodDefinition {
        PeriodDefinition {
            note: Some(note.to_string()),
            ..self
        }
    }

    pub fn contains(&self, day: NaiveDate, rule: BoundaryRule) -> bool {
        match rule {
            BoundaryRule::Closed => self.start <= day && day <= self.end,
            BoundaryRule::HalfOpen => self.start <= day && day < self.end,
        }
    }

    /// Splits the period at the middle day. The first half ends on the
    /// middle day, the second half starts the day after.
    pub fn split_in_halves(&self) -> (PeriodDefinition, PeriodDefinition) {
        let days = (self.end - self.start).num_days();
        let mid = self.start + chrono::Duration::days(days / 2);
        let after_mid = mid.succ_opt().unwrap_or(mid);
        let first = PeriodDefinition {
            id: format!("{}a", self.id),
            label: format!("{} (first half)", self.label),
            start: self.start,
            end: mid,
            note: self.note.clone(),
        };
        let second = PeriodDefinition {
            id: format!("{}b", self.id),
            label: format!("{} (second half)", self.label),
            start: after_mid,
            end: self.end,
            note: self.note.clone(),
        };
        (first, second)
    }
}

/// Checks that every period is well formed and that no two overlap under `rule`.
pub fn validate_periods(
    periods: &[PeriodDefinition],
    rule: BoundaryRule,
) -> Result<(), PipelineError> {
    for p in periods.iter() {
        let inverted = match rule {
            BoundaryRule::Closed => p.end < p.start,
            BoundaryRule::HalfOpen => p.end <= p.start,
        };
        if inverted {
            return Err(PipelineError::InvalidPeriod {
                period: p.id.clone(),
            });
        }
    }
    let mut sorted: Vec<&PeriodDefinition> = periods.iter().collect();
    sorted.sort_by_key(|p| (p.start, p.end));
    // Sorted by start, two intervals can only overlap if two neighbours do.
    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let overlap = match rule {
            BoundaryRule::Closed => b.start <= a.end,
            BoundaryRule::HalfOpen => b.start < a.end,
        };
        if overlap {
            return Err(PipelineError::OverlappingPeriods {
                first: a.id.clone(),
                second: b.id.clone(),
            });
        }
    }
    Ok(())
}

/// The period containing `day`, if any.
pub fn assign_period(
    periods: &[PeriodDefinition],
    day: NaiveDate,
    rule: BoundaryRule,
) -> Option<&PeriodDefinition> {
    periods.iter().find(|p| p.contains(day, rule))
}

/// The bookkeeping of one partition.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct PartitionReport {
    /// Ballots whose timestamp could not be parsed. Never assigned.
    pub unparsable: Vec<BallotId>,
    /// Ballots outside every period.
    pub out_of_range: Vec<BallotId>,
    /// (period id, assigned ballots), in period order.
    pub ballots_per_period: Vec<(String, usize)>,
    /// Periods without any ballot. They produce no slice.
    pub dropped_periods: Vec<String>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Partition {
    pub slices: Vec<FilteredMatrix>,
    pub report: PartitionReport,
}

fn slice_period(
    built: &BuiltMatrix,
    period: &PeriodDefinition,
    ballot_ids: &[BallotId],
) -> Result<Option<FilteredMatrix>, PipelineError> {
    if ballot_ids.is_empty() {
        return Ok(None);
    }
    let matrix = built.matrix.select_columns(ballot_ids)?;
    Ok(Some(FilteredMatrix {
        period: period.clone(),
        matrix,
        provenance: FilterProvenance::default(),
    }))
}

/// Slices the matrix by period.
///
/// All rows are kept in every slice, even rows without any valid cast in
/// that period. Columns keep the order of the built matrix.
pub fn partition(
    built: &BuiltMatrix,
    periods: &[PeriodDefinition],
    rule: BoundaryRule,
) -> Result<Partition, PipelineError> {
    validate_periods(periods, rule)?;
    let mut report = PartitionReport::default();
    let mut assigned: HashMap<String, Vec<BallotId>> = HashMap::new();
    for b in built.ballots.iter() {
        match b.day() {
            None => {
                debug!(
                    "partition: ballot {} has an unparsable timestamp {:?}",
                    b.id, b.raw_timestamp
                );
                report.unparsable.push(b.id);
            }
            Some(day) => match assign_period(periods, day, rule) {
                Some(p) => assigned.entry(p.id.clone()).or_default().push(b.id),
                None => report.out_of_range.push(b.id),
            },
        }
    }
    if !report.unparsable.is_empty() {
        warn!(
            "partition: {} ballots excluded for unparsable timestamps",
            report.unparsable.len()
        );
    }
    if !report.out_of_range.is_empty() {
        info!(
            "partition: {} ballots outside every period",
            report.out_of_range.len()
        );
    }

    let mut slices: Vec<FilteredMatrix> = Vec::new();
    for p in periods.iter() {
        let ids = assigned.remove(&p.id).unwrap_or_default();
        report.ballots_per_period.push((p.id.clone(), ids.len()));
        match slice_period(built, p, &ids)? {
            Some(slice) => {
                info!(
                    "partition: {} ({}): {} legislators x {} ballots",
                    p.id,
                    p.label,
                    slice.matrix.shape().0,
                    slice.matrix.shape().1
                );
                slices.push(slice);
            }
            None => {
                warn!("partition: no ballots in period {}, dropping it", p.id);
                report.dropped_periods.push(p.id.clone());
            }
        }
    }
    Ok(Partition { slices, report })
}

/// Period sets used for the 2018-2022 legislature.
pub mod presets {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
    }

    pub const NAMES: [&str; 4] = ["yearly", "events", "political", "political-halves"];

    /// Calendar years, with 2020 split in semesters.
    pub fn yearly() -> (Vec<PeriodDefinition>, BoundaryRule) {
        (
            vec![
                PeriodDefinition::new("P1", "2018", day(2018, 1, 1), day(2018, 12, 31)),
                PeriodDefinition::new("P2", "2019", day(2019, 1, 1), day(2019, 12, 31)),
                PeriodDefinition::new("P3", "2020 H1", day(2020, 1, 1), day(2020, 6, 30)),
                PeriodDefinition::new("P4", "2020 H2", day(2020, 7, 1), day(2020, 12, 31)),
                PeriodDefinition::new("P5", "2021", day(2021, 1, 1), day(2021, 12, 31)),
            ],
            BoundaryRule::Closed,
        )
    }

    /// Five periods of roughly equal length around the main events.
    pub fn events() -> (Vec<PeriodDefinition>, BoundaryRule) {
        (
            vec![
                PeriodDefinition::new("P1", "Period 1", day(2018, 3, 11), day(2018, 11, 1))
                    .with_note("start of the legislature"),
                PeriodDefinition::new("P2", "Period 2", day(2018, 11, 1), day(2019, 6, 20))
                    .with_note("before the social unrest"),
                PeriodDefinition::new("P3", "Period 3", day(2019, 6, 20), day(2020, 2, 10))
                    .with_note("social unrest of October 2019"),
                PeriodDefinition::new("P4", "Period 4", day(2020, 2, 10), day(2020, 10, 1))
                    .with_note("pandemic and constitutional agreement"),
                PeriodDefinition::new("P5", "Period 5", day(2020, 10, 1), day(2022, 3, 10))
                    .with_note("after the 2020 plebiscite"),
            ],
            BoundaryRule::HalfOpen,
        )
    }

    /// The three political phases of the legislature.
    pub fn political() -> (Vec<PeriodDefinition>, BoundaryRule) {
        (
            vec![
                PeriodDefinition::new("P1", "Until the unrest", day(2018, 3, 11), day(2019, 10, 17)),
                PeriodDefinition::new(
                    "P2",
                    "Unrest to plebiscite",
                    day(2019, 10, 18),
                    day(2020, 10, 24),
                ),
                PeriodDefinition::new("P3", "After the plebiscite", day(2020, 10, 25), day(2022, 3, 10)),
            ],
            BoundaryRule::Closed,
        )
    }

    /// The political phases, each split in halves.
    pub fn political_halves() -> (Vec<PeriodDefinition>, BoundaryRule) {
        let (periods, rule) = political();
        let mut res = Vec::new();
        for p in periods.iter() {
            let (a, b) = p.split_in_halves();
            res.push(a);
            res.push(b);
        }
        (res, rule)
    }

    pub fn by_name(name: &str) -> Option<(Vec<PeriodDefinition>, BoundaryRule)> {
        match name {
            "yearly" => Some(yearly()),
            "events" => Some(events()),
            "political" => Some(political()),
            "political-halves" => Some(political_halves()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MatrixBuilder;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn built(ballots: &[(u64, &str)]) -> BuiltMatrix {
        let bs: Vec<Ballot> = ballots
            .iter()
            .map(|(id, ts)| Ballot::new(BallotId(*id), ts, ""))
            .collect();
        let mut b = MatrixBuilder::new(&CastCodeMap::default()).ballots(&bs);
        for (id, _) in ballots.iter() {
            let mut d = std::collections::HashMap::new();
            d.insert(LegislatorId(1), 1);
            if *id % 2 == 0 {
                d.insert(LegislatorId(2), 0);
            }
            b.add_detail(BallotId(*id), d).unwrap();
        }
        b.build().unwrap()
    }

    #[test]
    fn presets_are_valid() {
        for name in presets::NAMES {
            let (periods, rule) = presets::by_name(name).unwrap();
            assert_eq!(validate_periods(&periods, rule), Ok(()), "{}", name);
        }
        assert!(presets::by_name("decades").is_none());
    }

    #[test]
    fn overlap_depends_on_rule() {
        let (periods, _) = presets::events();
        assert_eq!(validate_periods(&periods, BoundaryRule::HalfOpen), Ok(()));
        assert!(matches!(
            validate_periods(&periods, BoundaryRule::Closed),
            Err(PipelineError::OverlappingPeriods { .. })
        ));
    }

    #[test]
    fn overlap_not_adjacent() {
        let periods = vec![
            PeriodDefinition::new("A", "", day(2018, 1, 1), day(2018, 12, 31)),
            PeriodDefinition::new("B", "", day(2018, 2, 1), day(2018, 2, 2)),
            PeriodDefinition::new("C", "", day(2018, 6, 1), day(2018, 6, 2)),
        ];
        assert!(validate_periods(&periods, BoundaryRule::Closed).is_err());
    }

    #[test]
    fn inverted_period() {
        let periods = vec![PeriodDefinition::new(
            "A",
            "",
            day(2018, 2, 1),
            day(2018, 1, 1),
        )];
        assert_eq!(
            validate_periods(&periods, BoundaryRule::Closed),
            Err(PipelineError::InvalidPeriod {
                period: "A".to_string()
            })
        );
        let single = vec![PeriodDefinition::new("S", "", day(2018, 1, 1), day(2018, 1, 1))];
        assert!(validate_periods(&single, BoundaryRule::Closed).is_ok());
        assert!(validate_periods(&single, BoundaryRule::HalfOpen).is_err());
    }

    #[test]
    fn boundary_days() {
        let p = PeriodDefinition::new("P", "", day(2018, 1, 1), day(2018, 1, 31));
        assert!(p.contains(day(2018, 1, 31), BoundaryRule::Closed));
        assert!(!p.contains(day(2018, 1, 31), BoundaryRule::HalfOpen));
        assert!(p.contains(day(2018, 1, 1), BoundaryRule::HalfOpen));
    }

    #[test]
    fn halves() {
        let p = PeriodDefinition::new("P1", "x", day(2018, 3, 11), day(2019, 10, 17));
        let (a, b) = p.split_in_halves();
        assert_eq!(a.id, "P1a");
        assert_eq!(b.id, "P1b");
        assert_eq!(a.start, p.start);
        assert_eq!(b.end, p.end);
        assert_eq!(a.end.succ_opt(), Some(b.start));
        assert!(validate_periods(&[a, b], BoundaryRule::Closed).is_ok());
    }

    #[test]
    fn partition_slices() {
        let b = built(&[
            (1, "2018-05-01"),
            (2, "2018-12-31 18:00:00"),
            (3, "2019-02-01"),
            (4, "garbage"),
            (5, "2025-01-01"),
        ]);
        let (periods, rule) = presets::yearly();
        let part = partition(&b, &periods, rule).unwrap();
        assert_eq!(part.slices.len(), 2);
        assert_eq!(part.slices[0].period.id, "P1");
        assert_eq!(part.slices[0].matrix.columns(), &[BallotId(1), BallotId(2)]);
        assert_eq!(part.slices[1].matrix.columns(), &[BallotId(3)]);
        // All rows are kept, even without casts in the period.
        assert_eq!(part.slices[1].matrix.shape().0, 2);
        assert_eq!(part.report.unparsable, vec![BallotId(4)]);
        assert_eq!(part.report.out_of_range, vec![BallotId(5)]);
        assert_eq!(
            part.report.dropped_periods,
            vec!["P3".to_string(), "P4".to_string(), "P5".to_string()]
        );
    }

    #[test]
    fn every_dated_ballot_in_at_most_one_period() {
        let (periods, rule) = presets::events();
        let mut d = day(2018, 1, 1);
        while d < day(2022, 6, 1) {
            let n = periods.iter().filter(|p| p.contains(d, rule)).count();
            assert!(n <= 1);
            let in_range = d >= day(2018, 3, 11) && d < day(2022, 3, 10);
            assert_eq!(n == 1, in_range, "{}", d);
            d = d.succ_opt().unwrap();
        }
    }
}
