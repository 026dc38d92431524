// ********* Input data structures ***********

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// The identifier of a ballot (a single roll call).
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BallotId(pub u64);

/// The identifier of a legislator, stable across periods.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegislatorId(pub u64);

impl Display for BallotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for LegislatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed domain of a cell in a roll-call matrix.
///
/// Abstentions, absences and excused votes are all collapsed into
/// `NotEligible`: the estimator treats them as missing data.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum CastValue {
    Yea,
    Nay,
    NotEligible,
}

impl CastValue {
    /// The numeric code written in persisted matrices.
    pub const fn code(self) -> u8 {
        match self {
            CastValue::Yea => 1,
            CastValue::Nay => 0,
            CastValue::NotEligible => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<CastValue> {
        match code {
            1 => Some(CastValue::Yea),
            0 => Some(CastValue::Nay),
            9 => Some(CastValue::NotEligible),
            _ => None,
        }
    }

    /// True for a Yea or a Nay.
    pub fn is_valid(self) -> bool {
        self != CastValue::NotEligible
    }
}

/// The outcome of normalizing one raw code from the upstream store.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum RawCast {
    Mapped(CastValue),
    /// A code that is not in the table. It still counts as `NotEligible`.
    Unmapped(i64),
}

impl RawCast {
    pub fn value(self) -> CastValue {
        match self {
            RawCast::Mapped(v) => v,
            RawCast::Unmapped(_) => CastValue::NotEligible,
        }
    }
}

/// The table from raw upstream codes to cast values.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CastCodeMap {
    pub yea: Vec<i64>,
    pub nay: Vec<i64>,
    /// Codes that are known to mean abstention, absence or not seated.
    pub not_eligible: Vec<i64>,
}

impl Default for CastCodeMap {
    fn default() -> Self {
        CastCodeMap {
            yea: vec![1],
            nay: vec![0],
            // 2 is what the upstream store reports for a legislator without an entry.
            not_eligible: vec![2, 9],
        }
    }
}

impl CastCodeMap {
    /// Total function from the open integer domain to the three cast values.
    pub fn normalize(&self, raw: i64) -> RawCast {
        if self.yea.contains(&raw) {
            RawCast::Mapped(CastValue::Yea)
        } else if self.nay.contains(&raw) {
            RawCast::Mapped(CastValue::Nay)
        } else if self.not_eligible.contains(&raw) {
            RawCast::Mapped(CastValue::NotEligible)
        } else {
            RawCast::Unmapped(raw)
        }
    }
}

/// The formats accepted for ballot timestamps, tried in order.
pub const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
];

/// Parses a timestamp in one of the accepted formats.
///
/// Date-only formats are placed at midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in TIMESTAMP_FORMATS.iter() {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// A recorded vote event.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub id: BallotId,
    /// The timestamp as found upstream.
    pub raw_timestamp: String,
    /// `None` when `raw_timestamp` could not be parsed.
    pub recorded_at: Option<NaiveDateTime>,
    pub description: String,
}

impl Ballot {
    pub fn new(id: BallotId, raw_timestamp: &str, description: &str) -> Ballot {
        Ballot {
            id,
            raw_timestamp: raw_timestamp.to_string(),
            recorded_at: parse_timestamp(raw_timestamp),
            description: description.to_string(),
        }
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.recorded_at.map(|dt| dt.date())
    }
}

/// A party label held over a range of days. Open ends are unbounded.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Affiliation {
    pub party: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Legislator {
    pub id: LegislatorId,
    pub name: String,
    /// The current party label.
    pub party: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    /// Party history, when the upstream store provides one.
    pub affiliations: Vec<Affiliation>,
}

impl Legislator {
    pub fn new(id: LegislatorId, name: &str, party: Option<&str>) -> Legislator {
        Legislator {
            id,
            name: name.to_string(),
            party: party.map(|p| p.to_string()),
            region: None,
            district: None,
            affiliations: Vec::new(),
        }
    }

    /// The party label in force on the given day, falling back to the
    /// current label.
    pub fn party_on(&self, day: Option<NaiveDate>) -> Option<&str> {
        if let Some(d) = day {
            let found = self.affiliations.iter().find(|a| {
                a.from.map(|f| f <= d).unwrap_or(true) && a.to.map(|t| d <= t).unwrap_or(true)
            });
            if let Some(a) = found {
                return Some(a.party.as_str());
            }
        }
        self.party
            .as_deref()
            .or_else(|| self.affiliations.first().map(|a| a.party.as_str()))
    }
}

// ********* Configuration **********

/// How the columns of a built matrix are ordered.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ColumnOrder {
    /// By timestamp, then by id. Undated ballots come last, in given order.
    Chronological,
    AsGiven,
}

/// The participation cuts of the quality filter.
///
/// The source material used 5, 10 and 20 for the minimum number of votes
/// depending on the length of the periods, so none of them is hard-coded.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub min_votes_per_legislator: usize,
    pub min_legislators_per_vote: usize,
    /// Drops ballots without dissent among valid casts.
    pub drop_unanimous: bool,
    /// Drops ballots whose minority share is below this fraction.
    pub lopsided_threshold: Option<f64>,
    /// Repeats the cuts until nothing more is removed.
    pub converge: bool,
}

impl QualityThresholds {
    pub const DEFAULT: QualityThresholds = QualityThresholds {
        min_votes_per_legislator: 10,
        min_legislators_per_vote: 10,
        drop_unanimous: true,
        lopsided_threshold: None,
        converge: true,
    };

    /// The key/value pairs hashed into the fingerprint, next to the
    /// estimation parameters. Every cut that shapes the matrix is covered.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let lopsided = match self.lopsided_threshold {
            Some(x) => x.to_string(),
            None => "none".to_string(),
        };
        vec![
            (
                "filter.min_votes".to_string(),
                self.min_votes_per_legislator.to_string(),
            ),
            (
                "filter.min_legislators".to_string(),
                self.min_legislators_per_vote.to_string(),
            ),
            (
                "filter.drop_unanimous".to_string(),
                self.drop_unanimous.to_string(),
            ),
            ("filter.lopsided".to_string(), lopsided),
            ("filter.converge".to_string(), self.converge.to_string()),
        ]
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds::DEFAULT
    }
}

// ******** Errors *********

/// Errors that stop a run. Per-record problems (unmapped codes, unparsable
/// timestamps) are counted in the reports instead.
#[derive(PartialEq, Debug, Clone)]
pub enum PipelineError {
    /// A ballot was requested but the store has no detail record for it.
    MissingBallotData { ballot: BallotId },
    /// No period kept any ballot.
    NoPeriodsProduced,
    /// No legislator meets the bar in every period.
    EmptyLegislatorIntersection { periods: usize },
    /// A cache entry already exists for this fingerprint. Look it up instead.
    DuplicateFingerprint { fingerprint: String },
    /// The same row or column identity was given twice.
    DuplicateIdentity { kind: &'static str, id: u64 },
    OverlappingPeriods { first: String, second: String },
    InvalidPeriod { period: String },
    /// The estimator produced a position outside the unit ball.
    CoordinateOutOfBounds { legislator: LegislatorId, norm: f64 },
    Store { message: String },
    Estimator { message: String },
}

impl Error for PipelineError {}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::MissingBallotData { ballot } => {
                write!(f, "no detail record for ballot {}", ballot)
            }
            PipelineError::NoPeriodsProduced => {
                write!(f, "no period has any eligible ballot")
            }
            PipelineError::EmptyLegislatorIntersection { periods } => write!(
                f,
                "no legislator has enough valid votes in all {} periods",
                periods
            ),
            PipelineError::DuplicateFingerprint { fingerprint } => {
                write!(f, "a result is already stored for {}", fingerprint)
            }
            PipelineError::DuplicateIdentity { kind, id } => {
                write!(f, "duplicate {} {}", kind, id)
            }
            PipelineError::OverlappingPeriods { first, second } => {
                write!(f, "periods {} and {} overlap", first, second)
            }
            PipelineError::InvalidPeriod { period } => {
                write!(f, "period {} ends before it starts", period)
            }
            PipelineError::CoordinateOutOfBounds { legislator, norm } => write!(
                f,
                "legislator {} placed at distance {} from the origin",
                legislator, norm
            ),
            PipelineError::Store { message } => write!(f, "store error: {}", message),
            PipelineError::Estimator { message } => write!(f, "estimator error: {}", message),
        }
    }
}

/// Count of occurrences per unmapped raw code.
pub type UnmappedCodes = BTreeMap<i64, usize>;
