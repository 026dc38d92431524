//! Participation and unanimity cuts applied to each period matrix.

use log::{debug, info};

use crate::config::*;
use crate::matrix::{FilterProvenance, FilteredMatrix, RollCallMatrix, Tally};

// One pass of the three cuts, in order: legislators, ballots, unanimity.
// Returns true if anything was removed.
fn filter_pass(
    matrix: &mut RollCallMatrix,
    thresholds: &QualityThresholds,
    provenance: &mut FilterProvenance,
) -> Result<bool, PipelineError> {
    let mut changed = false;

    // 1. Legislator cut.
    let counts = matrix.row_valid_counts();
    let (kept, removed): (Vec<_>, Vec<_>) = matrix
        .rows()
        .iter()
        .zip(counts.iter())
        .partition(|(_, n)| **n >= thresholds.min_votes_per_legislator);
    if !removed.is_empty() {
        let kept_ids: Vec<LegislatorId> = kept.iter().map(|(l, _)| **l).collect();
        for (l, n) in removed.iter() {
            debug!("filter: legislator {} has only {} valid votes", l, n);
            provenance.removed_legislators.push(**l);
        }
        *matrix = matrix.reindex(&kept_ids, CastValue::NotEligible)?;
        changed = true;
    }

    // 2. Ballot cut, counted on the legislators that survived.
    let tallies = matrix.column_tallies();
    let mut kept_cols: Vec<(BallotId, Tally)> = Vec::new();
    for (b, t) in matrix.columns().iter().zip(tallies.iter()) {
        if t.valid() >= thresholds.min_legislators_per_vote {
            kept_cols.push((*b, *t));
        } else {
            debug!("filter: ballot {} has only {} participants", b, t.valid());
            provenance.removed_ballots.push(*b);
        }
    }

    // 3. Unanimity and lopsided cuts, on the ballots that survived.
    if thresholds.drop_unanimous || thresholds.lopsided_threshold.is_some() {
        let mut informative: Vec<(BallotId, Tally)> = Vec::new();
        for (b, t) in kept_cols.into_iter() {
            if thresholds.drop_unanimous && t.is_unanimous() {
                debug!("filter: ballot {} is unanimous {:?}", b, t);
                provenance.removed_unanimous.push(b);
            } else if thresholds
                .lopsided_threshold
                .map(|lop| t.minority_share() < lop)
                .unwrap_or(false)
            {
                debug!("filter: ballot {} is lopsided {:?}", b, t);
                provenance.removed_lopsided.push(b);
            } else {
                informative.push((b, t));
            }
        }
        kept_cols = informative;
    }

    if kept_cols.len() != matrix.columns().len() {
        let ids: Vec<BallotId> = kept_cols.iter().map(|(b, _)| *b).collect();
        *matrix = matrix.select_columns(&ids)?;
        changed = true;
    }
    provenance.passes += 1;
    Ok(changed)
}

/// Applies the cuts to a matrix.
///
/// The legislator cut always precedes the ballot cut. With
/// `thresholds.converge`, the passes are repeated until none removes
/// anything, which makes the output a fixed point of the filter.
pub fn quality_filter(
    matrix: &RollCallMatrix,
    thresholds: &QualityThresholds,
) -> Result<(RollCallMatrix, FilterProvenance), PipelineError> {
    let mut res = matrix.clone();
    let mut provenance = FilterProvenance::default();
    loop {
        let changed = filter_pass(&mut res, thresholds, &mut provenance)?;
        if !changed || !thresholds.converge {
            break;
        }
    }
    Ok((res, provenance))
}

/// Filters one period slice and records what was removed.
pub fn filter_period(
    slice: FilteredMatrix,
    thresholds: &QualityThresholds,
) -> Result<FilteredMatrix, PipelineError> {
    let before = slice.matrix.shape();
    let (matrix, provenance) = quality_filter(&slice.matrix, thresholds)?;
    let after = matrix.shape();
    info!(
        "filter: {}: {} x {} -> {} x {} (removed legislators: {}, ballots: {}, unanimous: {}, lopsided: {}, passes: {})",
        slice.period.id,
        before.0,
        before.1,
        after.0,
        after.1,
        provenance.removed_legislators.len(),
        provenance.removed_ballots.len(),
        provenance.removed_unanimous.len(),
        provenance.removed_lopsided.len(),
        provenance.passes
    );
    Ok(FilteredMatrix {
        period: slice.period,
        matrix,
        provenance,
    })
}
