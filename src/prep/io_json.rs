use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use rollcall_pipeline::store::MemoryStore;
use rollcall_pipeline::*;

use crate::prep::*;

pub const RECORDS_FILE: &str = "records.json";

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct VoteEntry {
    id: u64,
    date: String,
    #[serde(default)]
    description: String,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct LegislatorEntry {
    id: u64,
    name: String,
    party: Option<String>,
    region: Option<String>,
    district: Option<String>,
    #[serde(default)]
    affiliations: Vec<Affiliation>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct DetailEntry {
    #[serde(rename = "voteId")]
    vote_id: u64,
    /// Raw code by legislator id.
    casts: BTreeMap<u64, i64>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
struct RecordsDoc {
    votes: Vec<VoteEntry>,
    legislators: Vec<LegislatorEntry>,
    details: Vec<DetailEntry>,
}

/// Reads a records document. `path` is either the document or a directory
/// containing records.json.
pub fn read_json_store(path: &Path) -> BPrepResult<MemoryStore> {
    let file = if path.is_dir() {
        path.join(RECORDS_FILE)
    } else {
        path.to_path_buf()
    };
    let p = file.display().to_string();
    let contents = fs::read_to_string(&file).context(OpeningFileSnafu { path: p.clone() })?;
    let doc: RecordsDoc =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path: p })?;
    debug!(
        "read_json_store: {} votes, {} legislators, {} details",
        doc.votes.len(),
        doc.legislators.len(),
        doc.details.len()
    );

    let mut store = MemoryStore::new();
    for v in doc.votes.iter() {
        store
            .add_ballot(Ballot::new(BallotId(v.id), &v.date, &v.description))
            .context(PipelineSnafu {})?;
    }
    for l in doc.legislators.into_iter() {
        let mut leg = Legislator::new(LegislatorId(l.id), &l.name, l.party.as_deref());
        leg.region = l.region;
        leg.district = l.district;
        leg.affiliations = l.affiliations;
        store.add_legislator(leg).context(PipelineSnafu {})?;
    }
    for d in doc.details.iter() {
        // An entry without casts still counts as a detail record.
        store.ensure_detail(BallotId(d.vote_id));
        for (leg, code) in d.casts.iter() {
            store.add_cast(BallotId(d.vote_id), LegislatorId(*leg), *code);
        }
    }
    info!(
        "read_json_store: {} votes, {} casts",
        doc.votes.len(),
        store.num_casts()
    );
    Ok(store)
}

/// Writes a value as pretty-printed JSON. Returns the file name.
pub fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> BPrepResult<String> {
    let js = serde_json::to_string_pretty(value).context(WritingJsonSnafu {
        what: name.to_string(),
    })?;
    let path = dir.join(name);
    fs::write(&path, js).context(WritingFileSnafu {
        path: path.display().to_string(),
    })?;
    Ok(name.to_string())
}
