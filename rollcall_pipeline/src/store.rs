//! Read access to the upstream vote records.

use std::collections::{BTreeSet, HashMap};

use log::{debug, info};

use crate::builder::{BuiltMatrix, MatrixBuilder};
use crate::config::*;

/// The three read operations the pipeline needs from the upstream store.
pub trait VoteRecordStore {
    fn ballots(&self) -> Result<Vec<Ballot>, PipelineError>;

    fn legislators(&self) -> Result<Vec<Legislator>, PipelineError>;

    /// Raw cast codes by legislator. None when the store has no detail
    /// record for the ballot at all.
    fn ballot_detail(
        &self,
        ballot: BallotId,
    ) -> Result<Option<HashMap<LegislatorId, i64>>, PipelineError>;
}

/// A store held in memory. The file readers of the command line load
/// into it.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    ballots: Vec<Ballot>,
    legislators: Vec<Legislator>,
    details: HashMap<BallotId, HashMap<LegislatorId, i64>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn add_ballot(&mut self, ballot: Ballot) -> Result<(), PipelineError> {
        if self.ballots.iter().any(|b| b.id == ballot.id) {
            return Err(PipelineError::DuplicateIdentity {
                kind: "ballot",
                id: ballot.id.0,
            });
        }
        self.ballots.push(ballot);
        Ok(())
    }

    pub fn add_legislator(&mut self, legislator: Legislator) -> Result<(), PipelineError> {
        if self.legislators.iter().any(|l| l.id == legislator.id) {
            return Err(PipelineError::DuplicateIdentity {
                kind: "legislator",
                id: legislator.id.0,
            });
        }
        self.legislators.push(legislator);
        Ok(())
    }

    /// Records one raw cast. The last code recorded for a pair wins.
    pub fn add_cast(&mut self, ballot: BallotId, legislator: LegislatorId, raw: i64) {
        self.details
            .entry(ballot)
            .or_default()
            .insert(legislator, raw);
    }

    /// Marks a ballot as having a detail record, possibly empty.
    pub fn ensure_detail(&mut self, ballot: BallotId) {
        self.details.entry(ballot).or_default();
    }

    pub fn num_casts(&self) -> usize {
        self.details.values().map(|d| d.len()).sum()
    }
}

impl VoteRecordStore for MemoryStore {
    fn ballots(&self) -> Result<Vec<Ballot>, PipelineError> {
        Ok(self.ballots.clone())
    }

    fn legislators(&self) -> Result<Vec<Legislator>, PipelineError> {
        Ok(self.legislators.clone())
    }

    fn ballot_detail(
        &self,
        ballot: BallotId,
    ) -> Result<Option<HashMap<LegislatorId, i64>>, PipelineError> {
        Ok(self.details.get(&ballot).cloned())
    }
}

/// Which ballots of the store to load.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum BallotSelection {
    All,
    /// An explicit list. Repeated ids are loaded once.
    Only(Vec<BallotId>),
}

/// Builds a matrix from the store.
///
/// builder: carries the code table, the column order and the roster. The
/// ballots and their details are added here.
pub fn load_matrix<S: VoteRecordStore + ?Sized>(
    store: &S,
    selection: &BallotSelection,
    builder: MatrixBuilder,
) -> Result<BuiltMatrix, PipelineError> {
    let all = store.ballots()?;
    let ballots: Vec<Ballot> = match selection {
        BallotSelection::All => all,
        BallotSelection::Only(ids) => {
            let by_id: HashMap<BallotId, &Ballot> = all.iter().map(|b| (b.id, b)).collect();
            let mut seen: BTreeSet<BallotId> = BTreeSet::new();
            let mut res = Vec::new();
            for id in ids.iter() {
                if !seen.insert(*id) {
                    continue;
                }
                match by_id.get(id) {
                    Some(b) => res.push((*b).clone()),
                    None => return Err(PipelineError::MissingBallotData { ballot: *id }),
                }
            }
            res
        }
    };
    info!("store: loading {} ballots", ballots.len());

    let mut builder = builder.ballots(&ballots);
    for b in ballots.iter() {
        match store.ballot_detail(b.id)? {
            Some(d) => builder.add_detail(b.id, d)?,
            None => debug!("store: no detail record for ballot {}", b.id),
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let mut s = MemoryStore::new();
        s.add_ballot(Ballot::new(BallotId(1), "2019-01-01", "a")).unwrap();
        s.add_ballot(Ballot::new(BallotId(2), "2019-01-02", "b")).unwrap();
        s.add_ballot(Ballot::new(BallotId(3), "2019-01-03", "c")).unwrap();
        s.add_legislator(Legislator::new(LegislatorId(10), "x", Some("PS")))
            .unwrap();
        s.add_cast(BallotId(1), LegislatorId(10), 1);
        s.add_cast(BallotId(1), LegislatorId(11), 0);
        s.add_cast(BallotId(2), LegislatorId(11), 1);
        s
    }

    #[test]
    fn selection_of_ballots() {
        let s = store();
        let built = load_matrix(
            &s,
            &BallotSelection::Only(vec![BallotId(2), BallotId(1), BallotId(2)]),
            MatrixBuilder::new(&CastCodeMap::default()),
        )
        .unwrap();
        assert_eq!(built.matrix.columns(), &[BallotId(1), BallotId(2)]);
        assert_eq!(built.matrix.rows(), &[LegislatorId(10), LegislatorId(11)]);
    }

    #[test]
    fn missing_details_fail() {
        let s = store();
        // Ballot 3 is registered without any detail.
        assert_eq!(
            load_matrix(
                &s,
                &BallotSelection::All,
                MatrixBuilder::new(&CastCodeMap::default())
            ),
            Err(PipelineError::MissingBallotData {
                ballot: BallotId(3)
            })
        );
        assert_eq!(
            load_matrix(
                &s,
                &BallotSelection::Only(vec![BallotId(42)]),
                MatrixBuilder::new(&CastCodeMap::default())
            ),
            Err(PipelineError::MissingBallotData {
                ballot: BallotId(42)
            })
        );

        let mut s = s;
        s.ensure_detail(BallotId(3));
        let built = load_matrix(
            &s,
            &BallotSelection::All,
            MatrixBuilder::new(&CastCodeMap::default()),
        )
        .unwrap();
        assert_eq!(built.matrix.shape(), (2, 3));
    }

    #[test]
    fn duplicates_rejected() {
        let mut s = store();
        assert!(s.add_ballot(Ballot::new(BallotId(1), "", "")).is_err());
        assert!(s
            .add_legislator(Legislator::new(LegislatorId(10), "y", None))
            .is_err());
        assert_eq!(s.num_casts(), 3);
    }
}
