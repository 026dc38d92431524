//! The contract with the external spatial-scaling estimator, and the
//! inputs the pipeline prepares for it.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::matrix::RollCallMatrix;

/// The utility weights of the estimator.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpatialWeights {
    pub beta: f64,
    pub w: f64,
}

impl SpatialWeights {
    pub const DEFAULT: SpatialWeights = SpatialWeights {
        beta: 8.8633,
        w: 0.4619,
    };
}

impl Default for SpatialWeights {
    fn default() -> Self {
        SpatialWeights::DEFAULT
    }
}

/// Parameters of one estimation. All of them except `cores` are part of
/// the fingerprint.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EstimationParams {
    pub dims: usize,
    pub maxiter: u32,
    pub cores: u32,
    pub xtol: f64,
    /// Seed of the initial coordinates.
    pub seed: u64,
    /// Estimator-specific settings, passed through untouched.
    pub extra: BTreeMap<String, String>,
}

impl Default for EstimationParams {
    fn default() -> Self {
        EstimationParams {
            dims: 2,
            maxiter: 30,
            cores: 1,
            xtol: 1e-4,
            seed: 0,
            extra: BTreeMap::new(),
        }
    }
}

impl EstimationParams {
    /// The key/value pairs hashed into the fingerprint.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut res = vec![
            ("dims".to_string(), self.dims.to_string()),
            ("maxiter".to_string(), self.maxiter.to_string()),
            ("xtol".to_string(), self.xtol.to_string()),
            ("seed".to_string(), self.seed.to_string()),
        ];
        for (k, v) in self.extra.iter() {
            res.push((k.clone(), v.clone()));
        }
        res
    }
}

/// Fit quality, when the estimator reports it.
#[derive(PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FitStatistics {
    /// Percentage of casts on the predicted side of the cutting line.
    pub correct_classification: Option<f64>,
    /// Aggregate proportional reduction in error.
    pub apre: Option<f64>,
}

/// Everything the estimator receives for one matrix.
#[derive(PartialEq, Debug, Clone)]
pub struct EstimatorInput<'a> {
    pub matrix: &'a RollCallMatrix,
    pub initial: BTreeMap<LegislatorId, Vec<f64>>,
    /// Midpoints then spreads, `2 * dims` values per ballot.
    pub item_params: BTreeMap<BallotId, Vec<f64>>,
    pub weights: SpatialWeights,
    /// Legislators whose coordinates must not move.
    pub fixed: BTreeSet<LegislatorId>,
    pub params: &'a EstimationParams,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EstimateOutput {
    pub coordinates: BTreeMap<LegislatorId, Vec<f64>>,
    pub item_params: BTreeMap<BallotId, Vec<f64>>,
    pub weights: SpatialWeights,
    pub fit: FitStatistics,
}

/// The external scaling algorithm. Calls are blocking and must be
/// deterministic for identical inputs.
pub trait PositionEstimator {
    fn estimate(&self, input: &EstimatorInput<'_>) -> Result<EstimateOutput, PipelineError>;
}

// Two numbers in [0, 1) from the digest of (seed, legislator).
fn unit_pair(seed: u64, legislator: LegislatorId) -> (f64, f64) {
    let h = sha256::digest(format!("{:020}{:020}", seed, legislator.0));
    let a = u64::from_str_radix(&h[0..16], 16).unwrap_or(0);
    let b = u64::from_str_radix(&h[16..32], 16).unwrap_or(0);
    let scale = 2f64.powi(64);
    (a as f64 / scale, b as f64 / scale)
}

/// Starting coordinates in the annulus of radius [0.1, 0.5].
///
/// The point of a legislator only depends on the seed and its id, so the
/// same seed gives the same start whatever the other rows are. Dimensions
/// beyond the second start at zero.
pub fn initial_coordinates(
    rows: &[LegislatorId],
    dims: usize,
    seed: u64,
) -> BTreeMap<LegislatorId, Vec<f64>> {
    let mut res = BTreeMap::new();
    for lid in rows.iter() {
        let (u, v) = unit_pair(seed, *lid);
        let radius = 0.1 + 0.4 * v;
        let mut coords = vec![0.0; dims];
        match dims {
            0 => {}
            1 => coords[0] = if u < 0.5 { -radius } else { radius },
            _ => {
                let angle = 2.0 * std::f64::consts::PI * u;
                coords[0] = radius * angle.cos();
                coords[1] = radius * angle.sin();
            }
        }
        res.insert(*lid, coords);
    }
    res
}

pub fn default_item_params(cols: &[BallotId], dims: usize) -> BTreeMap<BallotId, Vec<f64>> {
    let mut params = vec![0.0; dims];
    params.extend(std::iter::repeat(0.1).take(dims));
    cols.iter().map(|b| (*b, params.clone())).collect()
}

/// The value at which the polarity anchors are pinned on the first axis.
pub const ANCHOR_POSITION: f64 = 0.8;

/// Builds the estimator input of a matrix.
///
/// anchors: (legislator, sign) pairs. A legislator present in the matrix
/// is placed at `sign * ANCHOR_POSITION` on the first axis, zero
/// elsewhere, and marked as fixed.
pub fn prepare_input<'a>(
    matrix: &'a RollCallMatrix,
    params: &'a EstimationParams,
    anchors: &[(LegislatorId, f64)],
) -> EstimatorInput<'a> {
    let mut initial = initial_coordinates(matrix.rows(), params.dims, params.seed);
    let mut fixed = BTreeSet::new();
    for (lid, sign) in anchors.iter() {
        if let Some(coords) = initial.get_mut(lid) {
            for c in coords.iter_mut() {
                *c = 0.0;
            }
            if let Some(first) = coords.first_mut() {
                *first = sign.signum() * ANCHOR_POSITION;
            }
            debug!("estimator: anchoring legislator {} at {:?}", lid, coords);
            fixed.insert(*lid);
        }
    }
    EstimatorInput {
        matrix,
        initial,
        item_params: default_item_params(matrix.columns(), params.dims),
        weights: SpatialWeights::DEFAULT,
        fixed,
        params,
    }
}

/// Fails on the first legislator placed outside the unit ball.
pub fn check_bounds(output: &EstimateOutput) -> Result<(), PipelineError> {
    for (lid, coords) in output.coordinates.iter() {
        let norm = coords.iter().map(|x| x * x).sum::<f64>().sqrt();
        if !(norm <= 1.0 + 1e-9) {
            return Err(PipelineError::CoordinateOutOfBounds {
                legislator: *lid,
                norm,
            });
        }
    }
    Ok(())
}
