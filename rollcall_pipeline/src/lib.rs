mod config;

pub mod builder;
pub mod cache;
pub mod consistency;
pub mod estimator;
pub mod filter;
pub mod fingerprint;
pub mod manual;
pub mod matrix;
pub mod periods;
pub mod polarity;
pub mod store;

use log::{info, warn};
use serde::Serialize;

pub use crate::config::*;

use crate::builder::{BuildReport, MatrixBuilder};
use crate::cache::{CacheOutcome, CacheStore, CachedResult, Clock, FingerprintCache};
use crate::consistency::{enforce_consistency, ConsistencyReport};
use crate::estimator::{
    check_bounds, prepare_input, EstimateOutput, EstimationParams, PositionEstimator,
};
use crate::filter::{filter_period, quality_filter};
use crate::fingerprint::Fingerprint;
use crate::matrix::{FilterProvenance, FilteredMatrix, RollCallMatrix};
use crate::periods::{partition, presets, BoundaryRule, PartitionReport, PeriodDefinition};
use crate::polarity::{normalize_polarity, PolarityConfig, PolarityReport, ReferenceBlocs};
use crate::store::{load_matrix, BallotSelection, VoteRecordStore};

/// Everything that decides how the period matrices are prepared.
#[derive(PartialEq, Debug, Clone)]
pub struct PipelineConfig {
    pub codes: CastCodeMap,
    pub column_order: ColumnOrder,
    /// Gives a row to every legislator of the store, not only to those
    /// referenced by a ballot.
    pub full_roster: bool,
    pub periods: Vec<PeriodDefinition>,
    pub boundary: BoundaryRule,
    pub thresholds: QualityThresholds,
    /// Minimum number of valid votes of a legislator in every period.
    pub min_valid_votes_per_period: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let (periods, boundary) = presets::yearly();
        PipelineConfig {
            codes: CastCodeMap::default(),
            column_order: ColumnOrder::Chronological,
            full_roster: false,
            periods,
            boundary,
            thresholds: QualityThresholds::DEFAULT,
            min_valid_votes_per_period: 1,
        }
    }
}

/// The removal counts of one period.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct PeriodFilterReport {
    pub period: String,
    /// (legislators, ballots) before the cuts.
    pub before: (usize, usize),
    pub after: (usize, usize),
    pub provenance: FilterProvenance,
}

/// The audit trail of one preparation run.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct RunReport {
    pub build: BuildReport,
    pub partition: PartitionReport,
    pub filters: Vec<PeriodFilterReport>,
    /// Periods left without any ballot by the quality filter.
    pub emptied_periods: Vec<String>,
    pub consistency: ConsistencyReport,
}

/// Consistent period matrices, ready for the estimator.
#[derive(PartialEq, Debug, Clone)]
pub struct PreparedRun {
    /// In period order. All share the same rows.
    pub slices: Vec<FilteredMatrix>,
    /// All the ballots of the built matrix, in column order.
    pub ballots: Vec<Ballot>,
    pub legislators: Vec<Legislator>,
    pub report: RunReport,
    /// The cuts and the consistency bound the slices were prepared with,
    /// as fingerprint pairs.
    pub filter_params: Vec<(String, String)>,
}

impl PreparedRun {
    /// The pairs a period fingerprint is taken with: the estimation
    /// parameters followed by `filter_params`.
    pub fn cache_pairs(&self, params: &EstimationParams) -> Vec<(String, String)> {
        let mut res = params.to_pairs();
        res.extend(self.filter_params.iter().cloned());
        res
    }
}

fn period_filter_params(config: &PipelineConfig) -> Vec<(String, String)> {
    let mut res = config.thresholds.to_pairs();
    res.push((
        "consistency.min_valid_votes".to_string(),
        config.min_valid_votes_per_period.to_string(),
    ));
    res
}

/// Runs store → builder → partition → quality filter → consistency.
///
/// Fails with `NoPeriodsProduced` when no period keeps any ballot, and with
/// `EmptyLegislatorIntersection` when no legislator is active in all of them.
pub fn prepare_periods<S: VoteRecordStore + ?Sized>(
    store: &S,
    config: &PipelineConfig,
) -> Result<PreparedRun, PipelineError> {
    info!(
        "prepare_periods: {} periods, thresholds: {:?}",
        config.periods.len(),
        config.thresholds
    );
    let legislators = store.legislators()?;
    let mut builder = MatrixBuilder::new(&config.codes).column_order(config.column_order);
    if config.full_roster {
        let ids: Vec<LegislatorId> = legislators.iter().map(|l| l.id).collect();
        builder = builder.roster(&ids);
    }
    let built = load_matrix(store, &BallotSelection::All, builder)?;
    let part = partition(&built, &config.periods, config.boundary)?;
    if part.slices.is_empty() {
        return Err(PipelineError::NoPeriodsProduced);
    }

    let mut filters: Vec<PeriodFilterReport> = Vec::new();
    let mut emptied_periods: Vec<String> = Vec::new();
    let mut filtered: Vec<FilteredMatrix> = Vec::new();
    for slice in part.slices.into_iter() {
        let before = slice.matrix.shape();
        let f = filter_period(slice, &config.thresholds)?;
        filters.push(PeriodFilterReport {
            period: f.period.id.clone(),
            before,
            after: f.matrix.shape(),
            provenance: f.provenance.clone(),
        });
        if f.matrix.is_empty() {
            warn!(
                "prepare_periods: period {} has no ballot or legislator left after filtering, dropping it",
                f.period.id
            );
            emptied_periods.push(f.period.id.clone());
        } else {
            filtered.push(f);
        }
    }
    if filtered.is_empty() {
        return Err(PipelineError::NoPeriodsProduced);
    }

    let (slices, consistency) = enforce_consistency(
        filtered,
        config.min_valid_votes_per_period,
        config.thresholds.min_legislators_per_vote,
    )?;
    Ok(PreparedRun {
        slices,
        ballots: built.ballots,
        legislators,
        report: RunReport {
            build: built.report,
            partition: part.report,
            filters,
            emptied_periods,
            consistency,
        },
        filter_params: period_filter_params(config),
    })
}

/// What an estimation step needs besides the matrix.
pub struct Estimation<'a, E: PositionEstimator, S: CacheStore, C: Clock> {
    pub estimator: &'a E,
    pub cache: &'a FingerprintCache<S, C>,
    pub params: &'a EstimationParams,
    pub blocs: &'a ReferenceBlocs,
    pub polarity: &'a PolarityConfig,
}

/// The estimate of one matrix.
#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct Estimate {
    /// The period id, or the fingerprint for an explicit ballot set.
    pub label: String,
    pub fingerprint: Fingerprint,
    pub outcome: CacheOutcome,
    pub output: EstimateOutput,
    pub access_count: u64,
    /// Only present when the estimate was computed in this call.
    pub polarity: Option<PolarityReport>,
    /// Only present for explicit ballot sets.
    pub filter: Option<FilterProvenance>,
}

fn run_estimator<E: PositionEstimator, S: CacheStore, C: Clock>(
    matrix: &RollCallMatrix,
    ctx: &Estimation<'_, E, S, C>,
) -> Result<(EstimateOutput, PolarityReport), PipelineError> {
    let anchors = ctx.blocs.anchors(matrix.rows());
    let input = prepare_input(matrix, ctx.params, &anchors);
    let output = ctx.estimator.estimate(&input)?;
    check_bounds(&output)?;
    Ok(normalize_polarity(output, ctx.blocs, ctx.polarity))
}

fn to_estimate(
    label: String,
    entry: CachedResult,
    outcome: CacheOutcome,
    polarity: Option<PolarityReport>,
    filter: Option<FilterProvenance>,
) -> Estimate {
    info!(
        "estimate: {}: {:?} {} ({} ballots)",
        label, outcome, entry.fingerprint, entry.ballot_count
    );
    Estimate {
        label,
        fingerprint: entry.fingerprint,
        outcome,
        output: entry.result,
        access_count: entry.access_count,
        polarity,
        filter,
    }
}

/// Estimates every prepared period, in period order.
///
/// Each period goes through fingerprint → cache lookup → estimator →
/// bound check → polarity normalization → cache store.
pub fn estimate_periods<E: PositionEstimator, S: CacheStore, C: Clock>(
    prepared: &PreparedRun,
    ctx: &Estimation<'_, E, S, C>,
) -> Result<Vec<Estimate>, PipelineError> {
    let pairs = prepared.cache_pairs(ctx.params);
    let mut res = Vec::with_capacity(prepared.slices.len());
    for slice in prepared.slices.iter() {
        let mut polarity: Option<PolarityReport> = None;
        let (entry, outcome) = ctx.cache.get_or_compute(slice.matrix.columns(), &pairs, || {
            let (output, report) = run_estimator(&slice.matrix, ctx)?;
            polarity = Some(report);
            Ok(output)
        })?;
        res.push(to_estimate(
            slice.period.id.clone(),
            entry,
            outcome,
            polarity,
            None,
        ));
    }
    Ok(res)
}

/// Scales an explicit set of ballots as one matrix.
///
/// The ballots are read and filtered first. The fingerprint is taken on the
/// ballots that survive the cuts, together with the cut thresholds, so the
/// store is read even when the answer is cached.
pub fn scale_ballot_set<V, E, S, C>(
    store: &V,
    ballots: &[BallotId],
    config: &PipelineConfig,
    ctx: &Estimation<'_, E, S, C>,
) -> Result<Estimate, PipelineError>
where
    V: VoteRecordStore + ?Sized,
    E: PositionEstimator,
    S: CacheStore,
    C: Clock,
{
    let mut ids = ballots.to_vec();
    ids.sort();
    ids.dedup();
    let builder = MatrixBuilder::new(&config.codes).column_order(config.column_order);
    let built = load_matrix(store, &BallotSelection::Only(ids), builder)?;
    let (matrix, provenance) = quality_filter(&built.matrix, &config.thresholds)?;
    if matrix.is_empty() {
        return Err(PipelineError::NoPeriodsProduced);
    }

    let mut pairs = ctx.params.to_pairs();
    pairs.extend(config.thresholds.to_pairs());
    let mut polarity: Option<PolarityReport> = None;
    let (entry, outcome) = ctx.cache.get_or_compute(matrix.columns(), &pairs, || {
        let (output, report) = run_estimator(&matrix, ctx)?;
        polarity = Some(report);
        Ok(output)
    })?;
    Ok(to_estimate(
        entry.fingerprint.to_string(),
        entry,
        outcome,
        polarity,
        Some(provenance),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::estimator::EstimatorInput;
    use crate::store::MemoryStore;
    use chrono::{Duration, NaiveDate};
    use std::cell::Cell;
    use std::collections::BTreeMap;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    // Legislators 1-4 are PS, 5-8 are RN, 9-12 independent. Ballots 1-15 are
    // in 2018 and 16-30 in 2019. Legislator 12 only votes in 2018.
    fn test_store() -> MemoryStore {
        let mut s = MemoryStore::new();
        for l in 1..=12u64 {
            let party = match l {
                1..=4 => Some("PS"),
                5..=8 => Some("RN"),
                _ => None,
            };
            s.add_legislator(Legislator::new(LegislatorId(l), &format!("L{}", l), party))
                .unwrap();
        }
        for b in 1..=30u64 {
            let start = if b <= 15 {
                NaiveDate::from_ymd_opt(2018, 3, 1).unwrap()
            } else {
                NaiveDate::from_ymd_opt(2019, 3, 1).unwrap()
            };
            let day = start + Duration::days(b as i64);
            s.add_ballot(Ballot::new(
                BallotId(b),
                &day.format("%Y-%m-%d").to_string(),
                "",
            ))
            .unwrap();
            for l in 1..=12u64 {
                if l == 12 && b > 15 {
                    continue;
                }
                let code = if (l + b) % 3 == 0 { 0 } else { 1 };
                s.add_cast(BallotId(b), LegislatorId(l), code);
            }
        }
        s
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            periods: vec![
                PeriodDefinition::new("P1", "2018", day(2018, 1, 1), day(2018, 12, 31)),
                PeriodDefinition::new("P2", "2019", day(2019, 1, 1), day(2019, 12, 31)),
            ],
            boundary: BoundaryRule::Closed,
            ..PipelineConfig::default()
        }
    }

    // Places PS on the right and RN on the left, the wrong way round.
    struct FakeEstimator {
        calls: Cell<usize>,
        scale: f64,
    }

    impl FakeEstimator {
        fn new(scale: f64) -> FakeEstimator {
            FakeEstimator {
                calls: Cell::new(0),
                scale,
            }
        }
    }

    impl PositionEstimator for FakeEstimator {
        fn estimate(&self, input: &EstimatorInput<'_>) -> Result<EstimateOutput, PipelineError> {
            self.calls.set(self.calls.get() + 1);
            let mut coordinates = BTreeMap::new();
            for l in input.matrix.rows().iter() {
                let x = match l.0 {
                    1..=4 => 0.5,
                    5..=8 => -0.5,
                    _ => 0.0,
                };
                coordinates.insert(*l, vec![x * self.scale, 0.1]);
            }
            Ok(EstimateOutput {
                coordinates,
                item_params: input.item_params.clone(),
                weights: input.weights,
                fit: Default::default(),
            })
        }
    }

    #[test]
    fn prepared_periods_share_rows() {
        init();
        let prepared = prepare_periods(&test_store(), &config()).unwrap();
        assert_eq!(prepared.slices.len(), 2);
        let expected: Vec<LegislatorId> = (1..=11).map(LegislatorId).collect();
        for s in prepared.slices.iter() {
            assert_eq!(s.matrix.rows(), expected.as_slice());
            assert_eq!(s.matrix.shape().1, 15);
        }
        let report = &prepared.report;
        assert_eq!(report.build.ballots, 30);
        assert_eq!(report.filters[1].provenance.removed_legislators, vec![LegislatorId(12)]);
        assert_eq!(report.consistency.removed.len(), 1);
        assert_eq!(report.consistency.removed[0].legislator, LegislatorId(12));
        assert_eq!(report.consistency.removed[0].reason(), "P2:absent");
        assert!(report.consistency.degenerate_ballots.is_empty());
    }

    #[test]
    fn no_period_produced() {
        init();
        let c = PipelineConfig {
            periods: vec![PeriodDefinition::new("X", "", day(2030, 1, 1), day(2030, 2, 1))],
            ..config()
        };
        assert_eq!(
            prepare_periods(&test_store(), &c),
            Err(PipelineError::NoPeriodsProduced)
        );

        // Thresholds no ballot can meet.
        let c = PipelineConfig {
            thresholds: QualityThresholds {
                min_legislators_per_vote: 50,
                ..QualityThresholds::DEFAULT
            },
            ..config()
        };
        assert_eq!(
            prepare_periods(&test_store(), &c),
            Err(PipelineError::NoPeriodsProduced)
        );
    }

    #[test]
    fn periods_are_estimated_once() {
        init();
        let store = test_store();
        let prepared = prepare_periods(&store, &config()).unwrap();
        let estimator = FakeEstimator::new(1.0);
        let cache = FingerprintCache::new(MemoryCacheStore::new());
        let params = EstimationParams::default();
        let blocs = ReferenceBlocs::with_default_parties(&prepared.legislators, None);
        let polarity = PolarityConfig::default();
        let ctx = Estimation {
            estimator: &estimator,
            cache: &cache,
            params: &params,
            blocs: &blocs,
            polarity: &polarity,
        };

        let first = estimate_periods(&prepared, &ctx).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(estimator.calls.get(), 2);
        for e in first.iter() {
            assert_eq!(e.outcome, CacheOutcome::Computed);
            assert_eq!(e.polarity.as_ref().map(|p| p.flipped_axes()), Some(vec![0]));
            // PS is now on the negative side.
            assert_eq!(e.output.coordinates[&LegislatorId(1)], vec![-0.5, 0.1]);
        }
        assert_eq!(first[0].label, "P1");

        let second = estimate_periods(&prepared, &ctx).unwrap();
        assert_eq!(estimator.calls.get(), 2);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(b.outcome, CacheOutcome::Hit);
            assert_eq!(a.fingerprint, b.fingerprint);
            assert_eq!(a.output, b.output);
            assert_eq!(b.access_count, 2);
        }
        assert_ne!(first[0].fingerprint, first[1].fingerprint);
    }

    #[test]
    fn out_of_bounds_is_not_cached() {
        init();
        let prepared = prepare_periods(&test_store(), &config()).unwrap();
        let estimator = FakeEstimator::new(3.0);
        let cache = FingerprintCache::new(MemoryCacheStore::new());
        let params = EstimationParams::default();
        let blocs = ReferenceBlocs::default();
        let polarity = PolarityConfig::default();
        let ctx = Estimation {
            estimator: &estimator,
            cache: &cache,
            params: &params,
            blocs: &blocs,
            polarity: &polarity,
        };
        assert!(matches!(
            estimate_periods(&prepared, &ctx),
            Err(PipelineError::CoordinateOutOfBounds {
                legislator: LegislatorId(1),
                ..
            })
        ));
        assert!(cache.backend().is_empty());
    }

    #[test]
    fn ballot_set_cached_on_filtered_ballots() {
        init();
        let estimator = FakeEstimator::new(1.0);
        let cache = FingerprintCache::new(MemoryCacheStore::new());
        let params = EstimationParams::default();
        let store = test_store();
        let legislators = store.legislators().unwrap();
        let blocs = ReferenceBlocs::with_default_parties(&legislators, None);
        let polarity = PolarityConfig::default();
        let ctx = Estimation {
            estimator: &estimator,
            cache: &cache,
            params: &params,
            blocs: &blocs,
            polarity: &polarity,
        };
        let ids: Vec<BallotId> = (1..=15).rev().map(BallotId).collect();
        let first = scale_ballot_set(&store, &ids, &config(), &ctx).unwrap();
        assert_eq!(first.outcome, CacheOutcome::Computed);
        assert!(first.filter.as_ref().map(|f| f.is_noop()).unwrap_or(false));
        assert_eq!(first.output.coordinates.len(), 12);

        let second = scale_ballot_set(&store, &ids[..], &config(), &ctx).unwrap();
        assert_eq!(second.outcome, CacheOutcome::Hit);
        assert_eq!(second.output, first.output);
        assert_eq!(estimator.calls.get(), 1);

        let missing = scale_ballot_set(&MemoryStore::new(), &[BallotId(99)], &config(), &ctx);
        assert_eq!(
            missing.map(|e| e.outcome),
            Err(PipelineError::MissingBallotData {
                ballot: BallotId(99)
            })
        );
    }

    #[test]
    fn ballot_set_thresholds_are_part_of_the_key() {
        init();
        let estimator = FakeEstimator::new(1.0);
        let cache = FingerprintCache::new(MemoryCacheStore::new());
        let params = EstimationParams::default();
        let store = test_store();
        let blocs = ReferenceBlocs::default();
        let polarity = PolarityConfig::default();
        let ctx = Estimation {
            estimator: &estimator,
            cache: &cache,
            params: &params,
            blocs: &blocs,
            polarity: &polarity,
        };
        let ids: Vec<BallotId> = (1..=30).map(BallotId).collect();
        // Legislator 12 has 15 valid votes.
        let loose = scale_ballot_set(&store, &ids, &config(), &ctx).unwrap();
        assert_eq!(loose.outcome, CacheOutcome::Computed);
        assert!(loose.output.coordinates.contains_key(&LegislatorId(12)));

        let strict_config = PipelineConfig {
            thresholds: QualityThresholds {
                min_votes_per_legislator: 20,
                ..QualityThresholds::DEFAULT
            },
            ..config()
        };
        let strict = scale_ballot_set(&store, &ids, &strict_config, &ctx).unwrap();
        assert_eq!(strict.outcome, CacheOutcome::Computed);
        assert_ne!(strict.fingerprint, loose.fingerprint);
        assert!(!strict.output.coordinates.contains_key(&LegislatorId(12)));
        assert_eq!(
            strict.filter.map(|f| f.removed_legislators),
            Some(vec![LegislatorId(12)])
        );
        assert_eq!(estimator.calls.get(), 2);

        let entry = cache.lookup(&strict.fingerprint).unwrap().unwrap();
        assert_eq!(entry.ballot_ids, ids);
    }

    #[test]
    fn period_key_covers_the_consistency_bound() {
        init();
        let store = test_store();
        let estimator = FakeEstimator::new(1.0);
        let cache = FingerprintCache::new(MemoryCacheStore::new());
        let params = EstimationParams::default();
        let blocs = ReferenceBlocs::default();
        let polarity = PolarityConfig::default();
        let ctx = Estimation {
            estimator: &estimator,
            cache: &cache,
            params: &params,
            blocs: &blocs,
            polarity: &polarity,
        };
        let prepared = prepare_periods(&store, &config()).unwrap();
        let bounded = PipelineConfig {
            min_valid_votes_per_period: 5,
            ..config()
        };
        let other = prepare_periods(&store, &bounded).unwrap();
        // Same matrices, different preparation.
        assert_eq!(prepared.slices, other.slices);

        let first = estimate_periods(&prepared, &ctx).unwrap();
        let second = estimate_periods(&other, &ctx).unwrap();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(b.outcome, CacheOutcome::Computed);
            assert_ne!(a.fingerprint, b.fingerprint);
        }
        assert_eq!(estimator.calls.get(), 4);
    }
}
