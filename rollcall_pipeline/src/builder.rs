pub use crate::config::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};
use serde::Serialize;

use crate::matrix::RollCallMatrix;

/// A builder for roll-call matrices.
///
/// Ballots are registered first, then the per-ballot detail records
/// (legislator → raw code) are added one at a time.
///
/// ```
/// use std::collections::HashMap;
/// use rollcall_pipeline::builder::MatrixBuilder;
/// use rollcall_pipeline::*;
///
/// let mut builder = MatrixBuilder::new(&CastCodeMap::default())
///     .ballots(&[Ballot::new(BallotId(1), "2019-01-02", "first reading")]);
///
/// let mut casts = HashMap::new();
/// casts.insert(LegislatorId(10), 1);
/// casts.insert(LegislatorId(11), 0);
/// builder.add_detail(BallotId(1), casts)?;
///
/// let built = builder.build()?;
/// assert_eq!(built.matrix.shape(), (2, 1));
/// # Ok::<(), PipelineError>(())
/// ```
pub struct MatrixBuilder {
    pub(crate) _codes: CastCodeMap,
    pub(crate) _ballots: Vec<Ballot>,
    pub(crate) _details: HashMap<BallotId, HashMap<LegislatorId, i64>>,
    pub(crate) _roster: Vec<LegislatorId>,
    pub(crate) _order: ColumnOrder,
}

/// What the builder absorbed without failing.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub ballots: usize,
    pub legislators: usize,
    /// Casts with a code outside the table, counted as `NotEligible`.
    pub unmapped_casts: usize,
    pub unmapped_by_code: UnmappedCodes,
}

/// A built matrix, with the ballots in column order.
#[derive(PartialEq, Debug, Clone)]
pub struct BuiltMatrix {
    pub matrix: RollCallMatrix,
    pub ballots: Vec<Ballot>,
    pub report: BuildReport,
}

impl MatrixBuilder {
    pub fn new(codes: &CastCodeMap) -> MatrixBuilder {
        MatrixBuilder {
            _codes: codes.clone(),
            _ballots: Vec::new(),
            _details: HashMap::new(),
            _roster: Vec::new(),
            _order: ColumnOrder::Chronological,
        }
    }

    pub fn ballots(self, ballots: &[Ballot]) -> MatrixBuilder {
        MatrixBuilder {
            _ballots: ballots.to_vec(),
            ..self
        }
    }

    /// Legislators that get a row even if no ballot mentions them.
    pub fn roster(self, legislators: &[LegislatorId]) -> MatrixBuilder {
        MatrixBuilder {
            _roster: legislators.to_vec(),
            ..self
        }
    }

    pub fn column_order(self, order: ColumnOrder) -> MatrixBuilder {
        MatrixBuilder {
            _order: order,
            ..self
        }
    }

    /// Adds the detail record of one ballot.
    ///
    /// casts: raw codes by legislator. Legislators absent from the record are
    /// `NotEligible` for this ballot.
    pub fn add_detail(
        &mut self,
        ballot: BallotId,
        casts: HashMap<LegislatorId, i64>,
    ) -> Result<(), PipelineError> {
        if self._details.contains_key(&ballot) {
            return Err(PipelineError::DuplicateIdentity {
                kind: "ballot detail",
                id: ballot.0,
            });
        }
        self._details.insert(ballot, casts);
        Ok(())
    }

    fn ordered_ballots(&self) -> Vec<Ballot> {
        match self._order {
            ColumnOrder::AsGiven => self._ballots.clone(),
            ColumnOrder::Chronological => {
                let (mut dated, undated): (Vec<Ballot>, Vec<Ballot>) = self
                    ._ballots
                    .iter()
                    .cloned()
                    .partition(|b| b.recorded_at.is_some());
                dated.sort_by_key(|b| (b.recorded_at, b.id));
                dated.extend(undated);
                dated
            }
        }
    }

    pub fn build(&self) -> Result<BuiltMatrix, PipelineError> {
        let ballots = self.ordered_ballots();
        for b in ballots.iter() {
            if !self._details.contains_key(&b.id) {
                return Err(PipelineError::MissingBallotData { ballot: b.id });
            }
        }
        let known: BTreeSet<BallotId> = ballots.iter().map(|b| b.id).collect();
        for bid in self._details.keys() {
            if !known.contains(bid) {
                debug!("build: ignoring detail of unregistered ballot {}", bid);
            }
        }

        let mut legislators: BTreeSet<LegislatorId> = self._roster.iter().cloned().collect();
        for b in ballots.iter() {
            if let Some(d) = self._details.get(&b.id) {
                legislators.extend(d.keys().cloned());
            }
        }
        let rows: Vec<LegislatorId> = legislators.into_iter().collect();
        let cols: Vec<BallotId> = ballots.iter().map(|b| b.id).collect();
        let mut matrix = RollCallMatrix::filled(rows, cols, CastValue::NotEligible)?;

        let mut unmapped_by_code: BTreeMap<i64, usize> = BTreeMap::new();
        for b in ballots.iter() {
            if let Some(d) = self._details.get(&b.id) {
                for (lid, raw) in d.iter() {
                    let cast = self._codes.normalize(*raw);
                    if let RawCast::Unmapped(code) = cast {
                        *unmapped_by_code.entry(code).or_insert(0) += 1;
                    }
                    matrix.set(*lid, b.id, cast.value());
                }
            }
        }
        let unmapped_casts: usize = unmapped_by_code.values().sum();
        if unmapped_casts > 0 {
            warn!(
                "build: {} casts with unmapped codes treated as not eligible: {:?}",
                unmapped_casts, unmapped_by_code
            );
        }

        let (num_legislators, num_ballots) = matrix.shape();
        info!(
            "build: {} legislators x {} ballots",
            num_legislators, num_ballots
        );
        Ok(BuiltMatrix {
            matrix,
            ballots,
            report: BuildReport {
                ballots: num_ballots,
                legislators: num_legislators,
                unmapped_casts,
                unmapped_by_code,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(xs: &[(u64, i64)]) -> HashMap<LegislatorId, i64> {
        xs.iter().map(|(l, c)| (LegislatorId(*l), *c)).collect()
    }

    #[test]
    fn union_of_legislators_and_fill() {
        let mut b = MatrixBuilder::new(&CastCodeMap::default()).ballots(&[
            Ballot::new(BallotId(1), "2019-01-01", ""),
            Ballot::new(BallotId(2), "2019-01-02", ""),
        ]);
        b.add_detail(BallotId(1), detail(&[(1, 1), (2, 0)])).unwrap();
        b.add_detail(BallotId(2), detail(&[(3, 1)])).unwrap();
        let built = b.build().unwrap();
        let m = &built.matrix;
        assert_eq!(m.shape(), (3, 2));
        assert_eq!(m.get(LegislatorId(3), BallotId(1)), Some(CastValue::NotEligible));
        assert_eq!(m.get(LegislatorId(2), BallotId(1)), Some(CastValue::Nay));
        assert_eq!(m.get(LegislatorId(3), BallotId(2)), Some(CastValue::Yea));
        assert_eq!(built.report.unmapped_casts, 0);
    }

    #[test]
    fn unmapped_codes_are_counted() {
        let mut b = MatrixBuilder::new(&CastCodeMap::default())
            .ballots(&[Ballot::new(BallotId(1), "2019-01-01", "")]);
        b.add_detail(BallotId(1), detail(&[(1, 7), (2, 7), (3, -3), (4, 2)]))
            .unwrap();
        let built = b.build().unwrap();
        assert_eq!(built.report.unmapped_casts, 3);
        assert_eq!(built.report.unmapped_by_code.get(&7), Some(&2));
        assert_eq!(
            built.matrix.get(LegislatorId(1), BallotId(1)),
            Some(CastValue::NotEligible)
        );
    }

    #[test]
    fn missing_detail_fails() {
        let mut b = MatrixBuilder::new(&CastCodeMap::default()).ballots(&[
            Ballot::new(BallotId(1), "2019-01-01", ""),
            Ballot::new(BallotId(2), "2019-01-01", ""),
        ]);
        b.add_detail(BallotId(1), HashMap::new()).unwrap();
        assert_eq!(
            b.build(),
            Err(PipelineError::MissingBallotData {
                ballot: BallotId(2)
            })
        );
    }

    #[test]
    fn chronological_columns() {
        let mut b = MatrixBuilder::new(&CastCodeMap::default()).ballots(&[
            Ballot::new(BallotId(5), "not a date", ""),
            Ballot::new(BallotId(3), "2019-03-01", ""),
            Ballot::new(BallotId(9), "2018-03-01", ""),
            Ballot::new(BallotId(1), "2019-03-01", ""),
        ]);
        for id in [5, 3, 9, 1] {
            b.add_detail(BallotId(id), detail(&[(1, 1)])).unwrap();
        }
        let built = b.build().unwrap();
        let cols: Vec<u64> = built.matrix.columns().iter().map(|c| c.0).collect();
        assert_eq!(cols, vec![9, 1, 3, 5]);

        let built = b.column_order(ColumnOrder::AsGiven).build().unwrap();
        let cols: Vec<u64> = built.matrix.columns().iter().map(|c| c.0).collect();
        assert_eq!(cols, vec![5, 3, 9, 1]);
    }

    #[test]
    fn roster_rows() {
        let mut b = MatrixBuilder::new(&CastCodeMap::default())
            .roster(&[LegislatorId(50)])
            .ballots(&[Ballot::new(BallotId(1), "2019-01-01", "")]);
        b.add_detail(BallotId(1), detail(&[(1, 1)])).unwrap();
        let built = b.build().unwrap();
        assert_eq!(built.matrix.rows(), &[LegislatorId(1), LegislatorId(50)]);
        assert_eq!(built.matrix.valid_votes(LegislatorId(50)), Some(0));
    }

    #[test]
    fn duplicate_detail() {
        let mut b = MatrixBuilder::new(&CastCodeMap::default());
        b.add_detail(BallotId(1), HashMap::new()).unwrap();
        assert!(b.add_detail(BallotId(1), HashMap::new()).is_err());
    }
}
