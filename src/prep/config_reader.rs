use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use rollcall_pipeline::estimator::EstimationParams;
use rollcall_pipeline::periods::{presets, BoundaryRule, PeriodDefinition};
use rollcall_pipeline::*;

use crate::args::Args;
use crate::prep::*;

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct InputSource {
    /// csv or json
    pub provider: String,
    pub path: String,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub id: String,
    pub label: Option<String>,
    /// YYYY-MM-DD
    pub start: String,
    pub end: String,
    pub note: Option<String>,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(rename = "minVotesPerLegislator")]
    pub min_votes_per_legislator: Option<usize>,
    #[serde(rename = "minLegislatorsPerVote")]
    pub min_legislators_per_vote: Option<usize>,
    #[serde(rename = "dropUnanimous")]
    pub drop_unanimous: Option<bool>,
    #[serde(rename = "lopsidedThreshold")]
    pub lopsided_threshold: Option<f64>,
    pub converge: Option<bool>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct CastCodesConfig {
    pub yea: Vec<i64>,
    pub nay: Vec<i64>,
    #[serde(rename = "notEligible")]
    pub not_eligible: Vec<i64>,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimationConfig {
    pub dims: Option<usize>,
    pub maxiter: Option<u32>,
    pub xtol: Option<f64>,
    pub seed: Option<u64>,
    pub extra: Option<BTreeMap<String, String>>,
}

/// The JSON description of a run. Every field is optional.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepConfig {
    pub input: Option<InputSource>,
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
    /// Explicit periods. They take precedence over the preset.
    pub periods: Option<Vec<PeriodConfig>>,
    #[serde(rename = "periodPreset")]
    pub period_preset: Option<String>,
    /// closed or halfOpen
    #[serde(rename = "boundaryRule")]
    pub boundary_rule: Option<String>,
    pub thresholds: Option<ThresholdsConfig>,
    #[serde(rename = "minValidVotesPerPeriod")]
    pub min_valid_votes_per_period: Option<usize>,
    #[serde(rename = "castCodes")]
    pub cast_codes: Option<CastCodesConfig>,
    /// chronological or asGiven
    #[serde(rename = "columnOrder")]
    pub column_order: Option<String>,
    #[serde(rename = "fullRoster")]
    pub full_roster: Option<bool>,
    #[serde(rename = "cacheDirectory")]
    pub cache_directory: Option<String>,
    pub estimation: Option<EstimationConfig>,
}

fn parse_day(value: &str, period: &str) -> BPrepResult<NaiveDate> {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(d) => Ok(d),
        Err(_) => Err(Box::new(PrepError::InvalidDate {
            value: value.to_string(),
            period: period.to_string(),
        })),
    }
}

fn parse_boundary_rule(s: &str) -> BPrepResult<BoundaryRule> {
    match s {
        "closed" => Ok(BoundaryRule::Closed),
        "halfOpen" => Ok(BoundaryRule::HalfOpen),
        x => fail(format!(
            "unknown boundary rule {:?}, expected closed or halfOpen",
            x
        )),
    }
}

fn parse_column_order(s: &str) -> BPrepResult<ColumnOrder> {
    match s {
        "chronological" => Ok(ColumnOrder::Chronological),
        "asGiven" => Ok(ColumnOrder::AsGiven),
        x => fail(format!(
            "unknown column order {:?}, expected chronological or asGiven",
            x
        )),
    }
}

// Relative paths of a configuration file are relative to its directory.
fn resolve(root: &Path, p: &str) -> String {
    let path = Path::new(p);
    if path.is_absolute() {
        p.to_string()
    } else {
        root.join(path).display().to_string()
    }
}

pub fn parse_config(contents: &str, path: &str) -> BPrepResult<PrepConfig> {
    let config: PrepConfig = serde_json::from_str(contents).context(ParsingJsonSnafu {
        path: path.to_string(),
    })?;
    Ok(config)
}

pub fn read_config(path: &str) -> BPrepResult<PrepConfig> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu {
        path: path.to_string(),
    })?;
    let mut config = parse_config(&contents, path)?;
    debug!("read_config: {:?}", config);
    let root = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
    if let Some(input) = config.input.as_mut() {
        input.path = resolve(root, &input.path);
    }
    config.output_directory = config.output_directory.map(|d| resolve(root, &d));
    config.cache_directory = config.cache_directory.map(|d| resolve(root, &d));
    Ok(config)
}

impl PrepConfig {
    /// The command line wins over the file.
    pub fn with_overrides(self, args: &Args) -> PrepConfig {
        let mut res = self;
        if let Some(path) = &args.input {
            let provider = args
                .input_type
                .clone()
                .or_else(|| res.input.as_ref().map(|i| i.provider.clone()))
                .unwrap_or_else(|| "csv".to_string());
            res.input = Some(InputSource {
                provider,
                path: path.clone(),
            });
        } else if let (Some(t), Some(existing)) = (&args.input_type, res.input.as_mut()) {
            existing.provider = t.clone();
        }
        if args.out.is_some() {
            res.output_directory = args.out.clone();
        }
        if args.cache_dir.is_some() {
            res.cache_directory = args.cache_dir.clone();
        }
        if let Some(name) = &args.periods {
            res.period_preset = Some(name.clone());
            res.periods = None;
        }
        if args.min_votes.is_some() || args.min_legislators.is_some() {
            let t = res.thresholds.get_or_insert_with(ThresholdsConfig::default);
            if args.min_votes.is_some() {
                t.min_votes_per_legislator = args.min_votes;
            }
            if args.min_legislators.is_some() {
                t.min_legislators_per_vote = args.min_legislators;
            }
        }
        res
    }

    fn period_definitions(&self) -> BPrepResult<(Vec<PeriodDefinition>, BoundaryRule)> {
        let rule = match &self.boundary_rule {
            Some(s) => Some(parse_boundary_rule(s)?),
            None => None,
        };
        if let Some(periods) = &self.periods {
            let mut res = Vec::new();
            for p in periods.iter() {
                let start = parse_day(&p.start, &p.id)?;
                let end = parse_day(&p.end, &p.id)?;
                let label = p.label.clone().unwrap_or_else(|| p.id.clone());
                let mut def = PeriodDefinition::new(&p.id, &label, start, end);
                if let Some(n) = &p.note {
                    def = def.with_note(n);
                }
                res.push(def);
            }
            return Ok((res, rule.unwrap_or(BoundaryRule::Closed)));
        }
        let name = self
            .period_preset
            .clone()
            .unwrap_or_else(|| "yearly".to_string());
        match presets::by_name(&name) {
            Some((periods, preset_rule)) => Ok((periods, rule.unwrap_or(preset_rule))),
            None => Err(Box::new(PrepError::UnknownPreset {
                name,
                expected: presets::NAMES.join(", "),
            })),
        }
    }

    pub fn pipeline_config(&self) -> BPrepResult<PipelineConfig> {
        let (periods, boundary) = self.period_definitions()?;
        let mut thresholds = QualityThresholds::DEFAULT;
        if let Some(t) = &self.thresholds {
            if let Some(x) = t.min_votes_per_legislator {
                thresholds.min_votes_per_legislator = x;
            }
            if let Some(x) = t.min_legislators_per_vote {
                thresholds.min_legislators_per_vote = x;
            }
            if let Some(x) = t.drop_unanimous {
                thresholds.drop_unanimous = x;
            }
            if t.lopsided_threshold.is_some() {
                thresholds.lopsided_threshold = t.lopsided_threshold;
            }
            if let Some(x) = t.converge {
                thresholds.converge = x;
            }
        }
        let defaults = PipelineConfig::default();
        let column_order = match &self.column_order {
            Some(s) => parse_column_order(s)?,
            None => defaults.column_order,
        };
        let codes = match &self.cast_codes {
            Some(c) => CastCodeMap {
                yea: c.yea.clone(),
                nay: c.nay.clone(),
                not_eligible: c.not_eligible.clone(),
            },
            None => defaults.codes,
        };
        Ok(PipelineConfig {
            codes,
            column_order,
            full_roster: self.full_roster.unwrap_or(defaults.full_roster),
            periods,
            boundary,
            thresholds,
            min_valid_votes_per_period: self
                .min_valid_votes_per_period
                .unwrap_or(defaults.min_valid_votes_per_period),
        })
    }

    pub fn estimation_params(&self) -> EstimationParams {
        let mut res = EstimationParams::default();
        if let Some(e) = &self.estimation {
            res.dims = e.dims.unwrap_or(res.dims);
            res.maxiter = e.maxiter.unwrap_or(res.maxiter);
            res.xtol = e.xtol.unwrap_or(res.xtol);
            res.seed = e.seed.unwrap_or(res.seed);
            if let Some(extra) = &e.extra {
                res.extra = extra.clone();
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "input": {"provider": "json", "path": "data/records.json"},
        "outputDirectory": "out",
        "periods": [
            {"id": "A", "start": "2019-01-01", "end": "2019-06-30"},
            {"id": "B", "label": "Second half", "start": "2019-07-01", "end": "2019-12-31", "note": "recess in August"}
        ],
        "boundaryRule": "closed",
        "thresholds": {"minVotesPerLegislator": 5, "lopsidedThreshold": 0.025},
        "minValidVotesPerPeriod": 3,
        "castCodes": {"yea": [1], "nay": [0, -1], "notEligible": [2]},
        "columnOrder": "asGiven",
        "estimation": {"dims": 1, "seed": 42}
    }"#;

    fn no_args() -> Args {
        Args {
            config: None,
            input: None,
            input_type: None,
            out: None,
            reference: None,
            cache_dir: None,
            evict_days: None,
            periods: None,
            min_votes: None,
            min_legislators: None,
            verbose: false,
        }
    }

    #[test]
    fn full_configuration() {
        let config = parse_config(SAMPLE, "sample").unwrap();
        let pc = config.pipeline_config().unwrap();
        assert_eq!(pc.periods.len(), 2);
        assert_eq!(pc.periods[0].label, "A");
        assert_eq!(pc.periods[1].note.as_deref(), Some("recess in August"));
        assert_eq!(pc.boundary, BoundaryRule::Closed);
        assert_eq!(pc.thresholds.min_votes_per_legislator, 5);
        assert_eq!(pc.thresholds.min_legislators_per_vote, 10);
        assert_eq!(pc.thresholds.lopsided_threshold, Some(0.025));
        assert_eq!(pc.min_valid_votes_per_period, 3);
        assert_eq!(pc.codes.nay, vec![0, -1]);
        assert_eq!(pc.column_order, ColumnOrder::AsGiven);

        let params = config.estimation_params();
        assert_eq!(params.dims, 1);
        assert_eq!(params.seed, 42);
        assert_eq!(params.maxiter, 30);
    }

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = parse_config("{}", "empty").unwrap();
        let pc = config.pipeline_config().unwrap();
        assert_eq!(pc, PipelineConfig::default());
        assert_eq!(config.estimation_params(), EstimationParams::default());
    }

    #[test]
    fn command_line_overrides() {
        let config = parse_config(SAMPLE, "sample").unwrap();
        let args = Args {
            input: Some("elsewhere".to_string()),
            periods: Some("events".to_string()),
            min_legislators: Some(4),
            ..no_args()
        };
        let config = config.with_overrides(&args);
        let input = config.input.clone().unwrap();
        // The provider of the file is kept.
        assert_eq!(input.provider, "json");
        assert_eq!(input.path, "elsewhere");
        let pc = config.pipeline_config().unwrap();
        assert_eq!(pc.periods.len(), 5);
        // The explicit rule of the file still applies.
        assert_eq!(pc.boundary, BoundaryRule::Closed);
        assert_eq!(pc.thresholds.min_votes_per_legislator, 5);
        assert_eq!(pc.thresholds.min_legislators_per_vote, 4);

        let config = PrepConfig::default().with_overrides(&Args {
            input: Some("dir".to_string()),
            ..no_args()
        });
        assert_eq!(config.input.unwrap().provider, "csv");
    }

    #[test]
    fn invalid_values() {
        let bad_date = r#"{"periods": [{"id": "A", "start": "2019-13-01", "end": "2019-12-31"}]}"#;
        let config = parse_config(bad_date, "bad").unwrap();
        assert!(matches!(
            config.pipeline_config().map_err(|e| *e),
            Err(PrepError::InvalidDate { .. })
        ));

        let config = parse_config(r#"{"periodPreset": "monthly"}"#, "bad").unwrap();
        assert!(matches!(
            config.pipeline_config().map_err(|e| *e),
            Err(PrepError::UnknownPreset { .. })
        ));

        let config = parse_config(r#"{"boundaryRule": "open"}"#, "bad").unwrap();
        assert!(config.pipeline_config().is_err());

        assert!(parse_config("{\"thresholds\": 3}", "bad").is_err());
    }

    #[test]
    fn paths_relative_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, SAMPLE).unwrap();
        let config = read_config(&path.display().to_string()).unwrap();
        assert_eq!(
            config.input.unwrap().path,
            dir.path().join("data/records.json").display().to_string()
        );
        assert_eq!(
            config.output_directory.unwrap(),
            dir.path().join("out").display().to_string()
        );
    }
}
