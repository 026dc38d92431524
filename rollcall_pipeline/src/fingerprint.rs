use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::config::BallotId;

/// The cache key of one computation: a hex SHA-256 digest of the ballots
/// and the estimation parameters that went into it.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts a previously computed digest, for example a file name in a
    /// cache directory. Returns None unless it is 64 lowercase hex digits.
    pub fn from_hex(hex: &str) -> Option<Fingerprint> {
        let ok = hex.len() == 64
            && hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if ok {
            Some(Fingerprint(hex.to_string()))
        } else {
            None
        }
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Percent-encodes the separators of the canonical form, so that distinct
// parameter sets never join to the same string.
fn escape(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => res.push_str("%25"),
            ',' => res.push_str("%2C"),
            ':' => res.push_str("%3A"),
            '|' => res.push_str("%7C"),
            _ => res.push(c),
        }
    }
    res
}

/// The string that gets hashed.
///
/// The ballot ids are sorted and joined with commas. If there are
/// parameters, they are sorted by key and appended as `|k:v,k:v`, with
/// `%`, `,`, `:` and `|` percent-encoded in keys and values.
/// Repeated ids are kept: the input is a multiset.
pub fn canonical_input(ballots: &[BallotId], params: &[(String, String)]) -> String {
    let mut ids: Vec<u64> = ballots.iter().map(|b| b.0).collect();
    ids.sort_unstable();
    let mut res = ids
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<String>>()
        .join(",");
    if !params.is_empty() {
        let mut ps: Vec<&(String, String)> = params.iter().collect();
        ps.sort();
        let joined = ps
            .iter()
            .map(|(k, v)| format!("{}:{}", escape(k), escape(v)))
            .collect::<Vec<String>>()
            .join(",");
        res.push('|');
        res.push_str(&joined);
    }
    res
}

/// Pure function of the ballot multiset and the parameter set. The order
/// in which either is given does not matter.
pub fn fingerprint(ballots: &[BallotId], params: &[(String, String)]) -> Fingerprint {
    Fingerprint(sha256::digest(canonical_input(ballots, params)))
}
