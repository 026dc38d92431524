use log::{debug, info, warn};

use rollcall_pipeline::cache::{CacheStore, FingerprintCache};
use rollcall_pipeline::fingerprint::{fingerprint, Fingerprint};
use rollcall_pipeline::store::MemoryStore;
use rollcall_pipeline::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::args::Args;
use crate::prep::cache_store::DirCacheStore;
use crate::prep::config_reader::*;

pub mod cache_store;
pub mod config_reader;
pub mod io_common;
pub mod io_csv;
pub mod io_json;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PrepError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading line {lineno} of {path}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("Error writing CSV file {path}"))]
    CsvWrite { source: csv::Error, path: String },
    #[snafu(display("Error parsing JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing {what}"))]
    WritingJson {
        source: serde_json::Error,
        what: String,
    },
    #[snafu(display("Pipeline error: {source}"))]
    Pipeline { source: PipelineError },
    #[snafu(display("Unknown period preset {name}, expected one of {expected}"))]
    UnknownPreset { name: String, expected: String },
    #[snafu(display("Unknown input type {name}, expected csv or json"))]
    UnknownInputType { name: String },
    #[snafu(display("Invalid date {value} in period {period}"))]
    InvalidDate { value: String, period: String },
    #[snafu(display("No input given (use --input or the input section of the configuration)"))]
    MissingInput {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type BPrepResult<T> = Result<T, Box<PrepError>>;

/// A free-form failure for the functions that return boxed errors.
pub fn fail<T>(message: String) -> BPrepResult<T> {
    Err(Box::new(PrepError::Whatever {
        message,
        source: None,
    }))
}

/// The status of one period with respect to the cache.
#[derive(Debug, Clone, Serialize)]
struct PeriodCacheStatus {
    period: String,
    fingerprint: Fingerprint,
    cached: bool,
    #[serde(rename = "coordinatesFile")]
    coordinates_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct RunSummary<'a> {
    report: &'a RunReport,
    periods: Vec<PeriodCacheStatus>,
    #[serde(rename = "evictedEntries")]
    evicted_entries: Option<usize>,
}

fn read_store(provider: &str, path: &Path) -> BPrepResult<MemoryStore> {
    info!("Reading {} records from {}", provider, path.display());
    match provider {
        "csv" => io_csv::read_csv_store(path),
        "json" => io_json::read_json_store(path),
        x => Err(Box::new(PrepError::UnknownInputType {
            name: x.to_string(),
        })),
    }
}

// Looks up every period in the cache. Cached coordinates are written next to
// the matrices.
fn check_cache<S: CacheStore>(
    cache: &FingerprintCache<S>,
    prepared: &PreparedRun,
    config: &PrepConfig,
    out_dir: &Path,
) -> BPrepResult<Vec<PeriodCacheStatus>> {
    let pairs = prepared.cache_pairs(&config.estimation_params());
    let mut res = Vec::new();
    for slice in prepared.slices.iter() {
        let fp = fingerprint(slice.matrix.columns(), &pairs);
        let found = cache.lookup(&fp).context(PipelineSnafu {})?;
        let coordinates_file = match found {
            Some(entry) => {
                info!("Period {}: cached result {}", slice.period.id, fp);
                Some(io_csv::write_coordinates(
                    out_dir,
                    &slice.period.id,
                    &entry.result,
                )?)
            }
            None => {
                info!("Period {}: no cached result for {}", slice.period.id, fp);
                None
            }
        };
        res.push(PeriodCacheStatus {
            period: slice.period.id.clone(),
            fingerprint: fp,
            cached: coordinates_file.is_some(),
            coordinates_file,
        });
    }
    Ok(res)
}

/// Runs the preparation described by the command line and the optional
/// configuration file.
pub fn run_prep(args: &Args) -> BPrepResult<()> {
    let config = match &args.config {
        Some(path) => read_config(path)?,
        None => PrepConfig::default(),
    };
    let config = config.with_overrides(args);
    debug!("Effective configuration: {:?}", config);

    let cache = config
        .cache_directory
        .as_ref()
        .map(|d| FingerprintCache::new(DirCacheStore::new(Path::new(d))));

    let mut evicted_entries = None;
    if let Some(days) = args.evict_days {
        match &cache {
            Some(c) => {
                let n = c.evict_older_than(days).context(PipelineSnafu {})?;
                info!("Evicted {} cache entries", n);
                evicted_entries = Some(n);
            }
            None => return fail("--evict-days needs a cache directory".to_string()),
        }
    }

    let input = match (&config.input, evicted_entries) {
        (Some(i), _) => i.clone(),
        // Eviction only.
        (None, Some(_)) => return Ok(()),
        (None, None) => return Err(Box::new(PrepError::MissingInput {})),
    };
    let store = read_store(&input.provider, Path::new(&input.path))?;
    let pipeline_config = config.pipeline_config()?;
    let prepared = prepare_periods(&store, &pipeline_config).context(PipelineSnafu {})?;

    let out_dir: PathBuf = PathBuf::from(
        config
            .output_directory
            .clone()
            .unwrap_or_else(|| ".".to_string()),
    );
    fs::create_dir_all(&out_dir).context(WritingFileSnafu {
        path: out_dir.display().to_string(),
    })?;
    let mut written = io_csv::write_artifacts(&out_dir, &prepared)?;

    let periods = match &cache {
        Some(c) => check_cache(c, &prepared, &config, &out_dir)?,
        None => Vec::new(),
    };
    written.extend(periods.iter().filter_map(|p| p.coordinates_file.clone()));

    let summary = RunSummary {
        report: &prepared.report,
        periods,
        evicted_entries,
    };
    io_json::write_json(&out_dir, "run_report.json", &summary)?;
    info!(
        "Wrote {} files to {} ({} periods, {} legislators)",
        written.len() + 1,
        out_dir.display(),
        prepared.slices.len(),
        prepared.report.consistency.retained.len()
    );

    if let Some(reference) = &args.reference {
        let differing = io_common::compare_with_reference(&out_dir, Path::new(reference), &written)?;
        if differing > 0 {
            warn!("Found differences with the reference directory");
            return fail(format!(
                "{} of {} files differ from the reference in {}",
                differing,
                written.len(),
                reference
            ));
        }
        info!("All {} files match the reference", written.len());
    }
    Ok(())
}
