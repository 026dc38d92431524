//! Reconciles the legislator set across periods.

use std::collections::BTreeSet;

use log::{info, warn};
use serde::Serialize;

use crate::config::*;
use crate::matrix::FilteredMatrix;

/// A period in which a legislator did not reach the bound.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct PeriodShortfall {
    pub period: String,
    pub valid_votes: usize,
    /// False when the legislator has no row in the period at all.
    pub present: bool,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct RemovedLegislator {
    pub legislator: LegislatorId,
    pub shortfalls: Vec<PeriodShortfall>,
}

impl RemovedLegislator {
    /// `period:count` pairs, as written in the logs.
    pub fn reason(&self) -> String {
        self.shortfalls
            .iter()
            .map(|s| {
                if s.present {
                    format!("{}:{}", s.period, s.valid_votes)
                } else {
                    format!("{}:absent", s.period)
                }
            })
            .collect::<Vec<String>>()
            .join(", ")
    }
}

/// A ballot that the row restriction left without dissent or below the
/// participation threshold. It is passed on to the estimator as is.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct DegenerateBallot {
    pub period: String,
    pub ballot: BallotId,
    pub yea: usize,
    pub nay: usize,
}

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Legislators present in at least one period.
    pub union_size: usize,
    pub removed: Vec<RemovedLegislator>,
    /// The common row set, ascending.
    pub retained: Vec<LegislatorId>,
    pub degenerate_ballots: Vec<DegenerateBallot>,
}

/// Restricts every period to the legislators that have a row in each of
/// them, with at least `min_valid_votes_per_period` valid casts in each.
///
/// The output keeps the period order of the input. Ballots that end up
/// unanimous, or with fewer than `min_participants` valid casts, are kept
/// and listed in the report.
pub fn enforce_consistency(
    slices: Vec<FilteredMatrix>,
    min_valid_votes_per_period: usize,
    min_participants: usize,
) -> Result<(Vec<FilteredMatrix>, ConsistencyReport), PipelineError> {
    if slices.is_empty() {
        return Err(PipelineError::NoPeriodsProduced);
    }
    let union: BTreeSet<LegislatorId> = slices
        .iter()
        .flat_map(|s| s.matrix.rows().iter().cloned())
        .collect();
    let union: Vec<LegislatorId> = union.into_iter().collect();
    let present: Vec<BTreeSet<LegislatorId>> = slices
        .iter()
        .map(|s| s.matrix.rows().iter().cloned().collect())
        .collect();

    let mut aligned: Vec<FilteredMatrix> = Vec::with_capacity(slices.len());
    for s in slices.into_iter() {
        let matrix = s.matrix.reindex(&union, CastValue::NotEligible)?;
        aligned.push(FilteredMatrix { matrix, ..s });
    }

    let mut report = ConsistencyReport {
        union_size: union.len(),
        ..ConsistencyReport::default()
    };
    // Rows are aligned on the union, so counts[p][idx] belongs to union[idx].
    let counts: Vec<Vec<usize>> = aligned.iter().map(|s| s.matrix.row_valid_counts()).collect();
    for (idx, lid) in union.iter().enumerate() {
        let mut shortfalls: Vec<PeriodShortfall> = Vec::new();
        for ((s, cs), rows) in aligned.iter().zip(counts.iter()).zip(present.iter()) {
            let n = cs[idx];
            let here = rows.contains(lid);
            if !here || n < min_valid_votes_per_period {
                shortfalls.push(PeriodShortfall {
                    period: s.period.id.clone(),
                    valid_votes: n,
                    present: here,
                });
            }
        }
        if shortfalls.is_empty() {
            report.retained.push(*lid);
        } else {
            let removed = RemovedLegislator {
                legislator: *lid,
                shortfalls,
            };
            info!(
                "consistency: removing legislator {} ({})",
                lid,
                removed.reason()
            );
            report.removed.push(removed);
        }
    }

    if report.retained.is_empty() {
        warn!(
            "consistency: none of {} legislators is active in all {} periods",
            union.len(),
            aligned.len()
        );
        return Err(PipelineError::EmptyLegislatorIntersection {
            periods: aligned.len(),
        });
    }

    let mut res: Vec<FilteredMatrix> = Vec::with_capacity(aligned.len());
    for s in aligned.into_iter() {
        let matrix = s.matrix.reindex(&report.retained, CastValue::NotEligible)?;
        for (b, t) in matrix.columns().iter().zip(matrix.column_tallies().iter()) {
            if t.is_unanimous() || t.valid() < min_participants {
                report.degenerate_ballots.push(DegenerateBallot {
                    period: s.period.id.clone(),
                    ballot: *b,
                    yea: t.yea,
                    nay: t.nay,
                });
            }
        }
        res.push(FilteredMatrix { matrix, ..s });
    }
    if !report.degenerate_ballots.is_empty() {
        warn!(
            "consistency: {} ballots are unanimous or below {} participants after the restriction",
            report.degenerate_ballots.len(),
            min_participants
        );
    }
    info!(
        "consistency: {} of {} legislators kept across {} periods",
        report.retained.len(),
        report.union_size,
        res.len()
    );
    Ok((res, report))
}
