// Reading the CSV layout of the vote records and writing the matrices.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::{Reader, Writer};
use log::{debug, info, warn};
use serde::Deserialize;
use snafu::prelude::*;

use rollcall_pipeline::estimator::EstimateOutput;
use rollcall_pipeline::matrix::FilteredMatrix;
use rollcall_pipeline::store::{MemoryStore, VoteRecordStore};
use rollcall_pipeline::*;

use crate::prep::io_common::artifact_name;
use crate::prep::*;

pub const VOTES_FILE: &str = "votes.csv";
pub const LEGISLATORS_FILE: &str = "legislators.csv";
pub const DETAILS_FILE: &str = "vote_details.csv";

#[derive(Debug, Deserialize)]
struct VoteRow {
    vote_id: u64,
    date: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct LegislatorRow {
    legislator_id: u64,
    name: String,
    party: Option<String>,
    region: Option<String>,
    district: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailRow {
    vote_id: u64,
    legislator_id: u64,
    vote: i64,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|x| !x.trim().is_empty())
}

fn open(path: &Path) -> BPrepResult<Reader<File>> {
    let rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .context(CsvOpenSnafu {
            path: path.display().to_string(),
        })?;
    Ok(rdr)
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> BPrepResult<Vec<T>> {
    let mut rdr = open(path)?;
    let mut res = Vec::new();
    for (idx, rec) in rdr.deserialize().enumerate() {
        // The header is line 1.
        let lineno = idx + 2;
        let row: T = rec.context(CsvLineParseSnafu {
            path: path.display().to_string(),
            lineno,
        })?;
        res.push(row);
    }
    debug!("read_rows: {} rows in {}", res.len(), path.display());
    Ok(res)
}

/// Reads votes.csv, legislators.csv and vote_details.csv from a directory.
pub fn read_csv_store(dir: &Path) -> BPrepResult<MemoryStore> {
    let mut store = MemoryStore::new();

    let votes: Vec<VoteRow> = read_rows(&dir.join(VOTES_FILE))?;
    for v in votes.iter() {
        let ballot = Ballot::new(BallotId(v.vote_id), &v.date, &v.description);
        if ballot.recorded_at.is_none() {
            warn!("read_csv_store: vote {} has an unparsable date {:?}", v.vote_id, v.date);
        }
        store.add_ballot(ballot).context(PipelineSnafu {})?;
    }

    let legislators: Vec<LegislatorRow> = read_rows(&dir.join(LEGISLATORS_FILE))?;
    for l in legislators.into_iter() {
        let party = non_empty(l.party);
        let mut leg = Legislator::new(LegislatorId(l.legislator_id), &l.name, party.as_deref());
        leg.region = non_empty(l.region);
        leg.district = non_empty(l.district);
        store.add_legislator(leg).context(PipelineSnafu {})?;
    }

    let details: Vec<DetailRow> = read_rows(&dir.join(DETAILS_FILE))?;
    for d in details.iter() {
        store.add_cast(BallotId(d.vote_id), LegislatorId(d.legislator_id), d.vote);
    }
    info!(
        "read_csv_store: {} votes, {} legislators, {} casts",
        votes.len(),
        store.legislators().map(|ls| ls.len()).unwrap_or(0),
        store.num_casts()
    );
    Ok(store)
}

fn create(path: &Path) -> BPrepResult<Writer<File>> {
    let w = Writer::from_path(path).context(CsvWriteSnafu {
        path: path.display().to_string(),
    })?;
    Ok(w)
}

fn write_row(w: &mut Writer<File>, path: &Path, row: &[String]) -> BPrepResult<()> {
    w.write_record(row).context(CsvWriteSnafu {
        path: path.display().to_string(),
    })?;
    Ok(())
}

fn finish(mut w: Writer<File>, path: &Path) -> BPrepResult<()> {
    w.flush().context(WritingFileSnafu {
        path: path.display().to_string(),
    })?;
    Ok(())
}

fn ballot_date(b: &Ballot) -> String {
    match b.day() {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => b.raw_timestamp.clone(),
    }
}

fn write_matrix(dir: &Path, slice: &FilteredMatrix) -> BPrepResult<String> {
    let name = artifact_name("votes_matrix", Some(&slice.period.id), "csv");
    let path = dir.join(&name);
    let mut w = create(&path)?;
    let mut header = vec!["legislator_id".to_string()];
    header.extend(slice.matrix.columns().iter().map(|b| b.to_string()));
    write_row(&mut w, &path, &header)?;
    for id in slice.matrix.rows().iter() {
        let mut line = vec![id.to_string()];
        if let Some(cells) = slice.matrix.row(*id) {
            line.extend(cells.iter().map(|c| c.code().to_string()));
        }
        write_row(&mut w, &path, &line)?;
    }
    finish(w, &path)?;
    Ok(name)
}

fn write_vote_metadata(
    dir: &Path,
    name: String,
    rows: &[(&Ballot, &str)],
) -> BPrepResult<String> {
    let path = dir.join(&name);
    let mut w = create(&path)?;
    write_row(
        &mut w,
        &path,
        &[
            "vote_id".to_string(),
            "date".to_string(),
            "description".to_string(),
            "period".to_string(),
        ],
    )?;
    for (b, period) in rows.iter() {
        write_row(
            &mut w,
            &path,
            &[
                b.id.to_string(),
                ballot_date(b),
                b.description.clone(),
                period.to_string(),
            ],
        )?;
    }
    finish(w, &path)?;
    Ok(name)
}

fn write_legislator_metadata(dir: &Path, prepared: &PreparedRun) -> BPrepResult<String> {
    let name = artifact_name("legislator_metadata", None, "csv");
    let path = dir.join(&name);
    let by_id: HashMap<LegislatorId, &Legislator> =
        prepared.legislators.iter().map(|l| (l.id, l)).collect();
    let mut w = create(&path)?;
    write_row(
        &mut w,
        &path,
        &[
            "legislator_id".to_string(),
            "name".to_string(),
            "party".to_string(),
            "region".to_string(),
            "district".to_string(),
        ],
    )?;
    for id in prepared.report.consistency.retained.iter() {
        let line = match by_id.get(id) {
            Some(l) => vec![
                id.to_string(),
                l.name.clone(),
                l.party.clone().unwrap_or_default(),
                l.region.clone().unwrap_or_default(),
                l.district.clone().unwrap_or_default(),
            ],
            None => {
                warn!("write_artifacts: no legislator record for {}", id);
                vec![
                    id.to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ]
            }
        };
        write_row(&mut w, &path, &line)?;
    }
    finish(w, &path)?;
    Ok(name)
}

/// Writes the matrices and the metadata of a prepared run. Returns the
/// names of the files written, relative to `dir`.
pub fn write_artifacts(dir: &Path, prepared: &PreparedRun) -> BPrepResult<Vec<String>> {
    let by_id: HashMap<BallotId, &Ballot> = prepared.ballots.iter().map(|b| (b.id, b)).collect();
    let mut written = Vec::new();
    let mut all_rows: Vec<(&Ballot, &str)> = Vec::new();
    for slice in prepared.slices.iter() {
        written.push(write_matrix(dir, slice)?);
        let mut rows: Vec<(&Ballot, &str)> = Vec::new();
        for col in slice.matrix.columns().iter() {
            match by_id.get(col) {
                Some(b) => rows.push((*b, slice.period.id.as_str())),
                None => warn!("write_artifacts: no metadata for ballot {}", col),
            }
        }
        written.push(write_vote_metadata(
            dir,
            artifact_name("vote_metadata", Some(&slice.period.id), "csv"),
            &rows,
        )?);
        all_rows.extend(rows);
    }
    written.push(write_vote_metadata(
        dir,
        artifact_name("vote_metadata", None, "csv"),
        &all_rows,
    )?);
    written.push(write_legislator_metadata(dir, prepared)?);
    info!("write_artifacts: {} files in {}", written.len(), dir.display());
    Ok(written)
}

/// Writes the coordinates of an estimate, one row per legislator.
pub fn write_coordinates(
    dir: &Path,
    period: &str,
    output: &EstimateOutput,
) -> BPrepResult<String> {
    let name = artifact_name("coordinates", Some(period), "csv");
    let path = dir.join(&name);
    let dims = output.coordinates.values().map(|c| c.len()).max().unwrap_or(0);
    let mut w = create(&path)?;
    let mut header = vec!["legislator_id".to_string()];
    header.extend((1..=dims).map(|d| format!("dim{}", d)));
    write_row(&mut w, &path, &header)?;
    for (id, coords) in output.coordinates.iter() {
        let mut line = vec![id.to_string()];
        line.extend(coords.iter().map(|x| x.to_string()));
        write_row(&mut w, &path, &line)?;
    }
    finish(w, &path)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_pipeline::estimator::{FitStatistics, SpatialWeights};
    use std::collections::BTreeMap;
    use std::fs;

    fn write_inputs(dir: &Path, details: &str) {
        fs::write(
            dir.join(VOTES_FILE),
            "vote_id,date,description\n1,2019-03-01,First\n2,2019-03-02 10:00:00,\"Second, amended\"\n",
        )
        .unwrap();
        fs::write(
            dir.join(LEGISLATORS_FILE),
            "legislator_id,name,party,region,district\n7,Ana,PS,RM,8\n8,Bruno,,,\n",
        )
        .unwrap();
        fs::write(dir.join(DETAILS_FILE), details).unwrap();
    }

    #[test]
    fn reads_the_three_files() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(
            dir.path(),
            "vote_id,legislator_id,vote\n1,7,1\n1,8,0\n2,7,2\n2,8,5\n",
        );
        let store = read_csv_store(dir.path()).unwrap();
        let ballots = store.ballots().unwrap();
        assert_eq!(ballots.len(), 2);
        assert_eq!(ballots[1].description, "Second, amended");
        assert!(ballots[1].recorded_at.is_some());
        let legislators = store.legislators().unwrap();
        assert_eq!(legislators[0].party.as_deref(), Some("PS"));
        assert_eq!(legislators[1].party, None);
        assert_eq!(legislators[1].district, None);
        assert_eq!(store.num_casts(), 4);
        let d = store.ballot_detail(BallotId(2)).unwrap().unwrap();
        assert_eq!(d.get(&LegislatorId(8)), Some(&5));
    }

    #[test]
    fn bad_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(
            dir.path(),
            "vote_id,legislator_id,vote\n1,7,1\n1,eight,0\n",
        );
        match read_csv_store(dir.path()).map_err(|e| *e) {
            Err(PrepError::CsvLineParse { lineno, .. }) => assert_eq!(lineno, 3),
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_csv_store(dir.path()).map_err(|e| *e),
            Err(PrepError::CsvOpen { .. })
        ));
    }

    #[test]
    fn coordinates_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinates = BTreeMap::new();
        coordinates.insert(LegislatorId(8), vec![0.25, -0.5]);
        coordinates.insert(LegislatorId(7), vec![-0.75, 0.0]);
        let output = EstimateOutput {
            coordinates,
            item_params: BTreeMap::new(),
            weights: SpatialWeights::DEFAULT,
            fit: FitStatistics::default(),
        };
        let name = write_coordinates(dir.path(), "P1", &output).unwrap();
        assert_eq!(name, "coordinates_P1.csv");
        let contents = fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(contents, "legislator_id,dim1,dim2\n7,-0.75,0\n8,0.25,-0.5\n");
    }
}
