//! The dense legislator × ballot table shared by every stage.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::*;
use crate::periods::PeriodDefinition;

/// A legislator × ballot table of cast values.
///
/// Invariant: row identities are unique, column identities are unique.
/// Every change of rows or columns between stages goes through
/// [`RollCallMatrix::reindex_both`].
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RollCallMatrix {
    rows: Vec<LegislatorId>,
    cols: Vec<BallotId>,
    // Row-major.
    cells: Vec<CastValue>,
    row_pos: HashMap<LegislatorId, usize>,
    col_pos: HashMap<BallotId, usize>,
}

/// Counts of valid casts for one ballot.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct Tally {
    pub yea: usize,
    pub nay: usize,
}

impl Tally {
    pub fn valid(&self) -> usize {
        self.yea + self.nay
    }

    /// True when there is no dissent among valid casts (including no casts at all).
    pub fn is_unanimous(&self) -> bool {
        self.yea == 0 || self.nay == 0
    }

    /// The share of the smaller side. Zero when nobody voted.
    pub fn minority_share(&self) -> f64 {
        let total = self.valid();
        if total == 0 {
            0.0
        } else {
            self.yea.min(self.nay) as f64 / total as f64
        }
    }
}

fn positions<T: Copy + Eq + std::hash::Hash + Into<u64>>(
    ids: &[T],
    kind: &'static str,
) -> Result<HashMap<T, usize>, PipelineError> {
    let mut res: HashMap<T, usize> = HashMap::with_capacity(ids.len());
    for (idx, id) in ids.iter().enumerate() {
        if res.insert(*id, idx).is_some() {
            return Err(PipelineError::DuplicateIdentity {
                kind,
                id: (*id).into(),
            });
        }
    }
    Ok(res)
}

impl From<LegislatorId> for u64 {
    fn from(l: LegislatorId) -> u64 {
        l.0
    }
}

impl From<BallotId> for u64 {
    fn from(b: BallotId) -> u64 {
        b.0
    }
}

impl RollCallMatrix {
    /// A matrix with every cell set to `fill`.
    pub fn filled(
        rows: Vec<LegislatorId>,
        cols: Vec<BallotId>,
        fill: CastValue,
    ) -> Result<RollCallMatrix, PipelineError> {
        let row_pos = positions(&rows, "legislator")?;
        let col_pos = positions(&cols, "ballot")?;
        let cells = vec![fill; rows.len() * cols.len()];
        Ok(RollCallMatrix {
            rows,
            cols,
            cells,
            row_pos,
            col_pos,
        })
    }

    pub fn rows(&self) -> &[LegislatorId] {
        &self.rows
    }

    pub fn columns(&self) -> &[BallotId] {
        &self.cols
    }

    /// (legislators, ballots)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }

    pub fn contains_row(&self, id: LegislatorId) -> bool {
        self.row_pos.contains_key(&id)
    }

    pub fn get(&self, row: LegislatorId, col: BallotId) -> Option<CastValue> {
        let r = *self.row_pos.get(&row)?;
        let c = *self.col_pos.get(&col)?;
        Some(self.cells[r * self.cols.len() + c])
    }

    /// Sets a cell. Returns false if the row or the column is unknown.
    pub fn set(&mut self, row: LegislatorId, col: BallotId, value: CastValue) -> bool {
        match (self.row_pos.get(&row), self.col_pos.get(&col)) {
            (Some(r), Some(c)) => {
                let width = self.cols.len();
                self.cells[r * width + c] = value;
                true
            }
            _ => false,
        }
    }

    /// The casts of one legislator, in column order.
    pub fn row(&self, id: LegislatorId) -> Option<&[CastValue]> {
        let r = *self.row_pos.get(&id)?;
        let width = self.cols.len();
        Some(&self.cells[r * width..(r + 1) * width])
    }

    pub fn valid_votes(&self, id: LegislatorId) -> Option<usize> {
        self.row(id)
            .map(|cs| cs.iter().filter(|c| c.is_valid()).count())
    }

    /// Valid casts per row, in row order.
    pub fn row_valid_counts(&self) -> Vec<usize> {
        let width = self.cols.len();
        if width == 0 {
            return vec![0; self.rows.len()];
        }
        self.cells
            .chunks(width)
            .map(|cs| cs.iter().filter(|c| c.is_valid()).count())
            .collect()
    }

    /// Yea/Nay counts per column, in column order.
    pub fn column_tallies(&self) -> Vec<Tally> {
        let width = self.cols.len();
        let mut res = vec![Tally::default(); width];
        if width == 0 {
            return res;
        }
        for row in self.cells.chunks(width) {
            for (t, c) in res.iter_mut().zip(row.iter()) {
                match c {
                    CastValue::Yea => t.yea += 1,
                    CastValue::Nay => t.nay += 1,
                    CastValue::NotEligible => {}
                }
            }
        }
        res
    }

    /// Rebuilds the matrix on new row and column identities.
    ///
    /// Cells of identities present in `self` are carried over; new
    /// identities are filled with `fill`. Identities of `self` absent from
    /// the arguments are dropped. This is the single place where rows and
    /// columns are added, removed or reordered.
    pub fn reindex_both(
        &self,
        rows: &[LegislatorId],
        cols: &[BallotId],
        fill: CastValue,
    ) -> Result<RollCallMatrix, PipelineError> {
        let mut res = RollCallMatrix::filled(rows.to_vec(), cols.to_vec(), fill)?;
        let src_cols: Vec<Option<usize>> =
            cols.iter().map(|c| self.col_pos.get(c).cloned()).collect();
        let width = cols.len();
        let src_width = self.cols.len();
        for (r, row_id) in rows.iter().enumerate() {
            if let Some(src_r) = self.row_pos.get(row_id) {
                for (c, src_c) in src_cols.iter().enumerate() {
                    if let Some(sc) = src_c {
                        res.cells[r * width + c] = self.cells[src_r * src_width + sc];
                    }
                }
            }
        }
        Ok(res)
    }

    /// Reindexes the rows, keeping the columns.
    pub fn reindex(
        &self,
        rows: &[LegislatorId],
        fill: CastValue,
    ) -> Result<RollCallMatrix, PipelineError> {
        self.reindex_both(rows, &self.cols, fill)
    }

    /// Keeps the given columns, in the given order. Unknown columns are
    /// filled with `NotEligible`.
    pub fn select_columns(&self, cols: &[BallotId]) -> Result<RollCallMatrix, PipelineError> {
        self.reindex_both(&self.rows, cols, CastValue::NotEligible)
    }
}

/// What a filtering stage removed from a period matrix, and why.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct FilterProvenance {
    /// Below the minimum number of valid votes.
    pub removed_legislators: Vec<LegislatorId>,
    /// Below the minimum number of participants.
    pub removed_ballots: Vec<BallotId>,
    /// No dissent among valid casts.
    pub removed_unanimous: Vec<BallotId>,
    /// Minority share below the lopsided threshold.
    pub removed_lopsided: Vec<BallotId>,
    /// Number of passes over the three cuts.
    pub passes: usize,
}

impl FilterProvenance {
    pub fn removed_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.removed_legislators.len(),
            self.removed_ballots.len(),
            self.removed_unanimous.len(),
            self.removed_lopsided.len(),
        )
    }

    pub fn is_noop(&self) -> bool {
        self.removed_counts() == (0, 0, 0, 0)
    }
}

/// The matrix of one period, with what was removed from it.
#[derive(PartialEq, Debug, Clone)]
pub struct FilteredMatrix {
    pub period: PeriodDefinition,
    pub matrix: RollCallMatrix,
    pub provenance: FilterProvenance,
}
