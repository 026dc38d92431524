//! Orientation of the estimated axes with reference blocs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::estimator::EstimateOutput;

pub const DEFAULT_NEGATIVE_PARTIES: [&str; 7] = ["PC", "PS", "PPD", "RD", "PH", "COM", "PEV"];
pub const DEFAULT_POSITIVE_PARTIES: [&str; 3] = ["UDI", "RN", "EVOP"];

/// Two groups of legislators expected at opposite ends of an axis.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceBlocs {
    pub negative: BTreeSet<LegislatorId>,
    pub positive: BTreeSet<LegislatorId>,
    /// The party each member was selected by. Members without an entry
    /// count as a party of their own.
    #[serde(default)]
    pub parties: BTreeMap<LegislatorId, String>,
}

impl ReferenceBlocs {
    /// Blocs from the party labels in force on `day` (the current label when
    /// `day` is None).
    pub fn from_parties<S: AsRef<str>>(
        roster: &[Legislator],
        negative: &[S],
        positive: &[S],
        day: Option<NaiveDate>,
    ) -> ReferenceBlocs {
        let mut res = ReferenceBlocs::default();
        for l in roster.iter() {
            if let Some(party) = l.party_on(day) {
                if negative.iter().any(|p| p.as_ref() == party) {
                    res.negative.insert(l.id);
                } else if positive.iter().any(|p| p.as_ref() == party) {
                    res.positive.insert(l.id);
                } else {
                    continue;
                }
                res.parties.insert(l.id, party.to_string());
            }
        }
        res
    }

    pub fn with_default_parties(roster: &[Legislator], day: Option<NaiveDate>) -> ReferenceBlocs {
        ReferenceBlocs::from_parties(
            roster,
            &DEFAULT_NEGATIVE_PARTIES,
            &DEFAULT_POSITIVE_PARTIES,
            day,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.negative.is_empty() && self.positive.is_empty()
    }

    /// The first member of each bloc among `rows`, with the sign of its bloc.
    pub fn anchors(&self, rows: &[LegislatorId]) -> Vec<(LegislatorId, f64)> {
        let present: BTreeSet<LegislatorId> = rows.iter().cloned().collect();
        let mut res = Vec::new();
        if let Some(l) = self.negative.intersection(&present).next() {
            res.push((*l, -1.0));
        }
        if let Some(l) = self.positive.intersection(&present).next() {
            res.push((*l, 1.0));
        }
        res
    }
}

/// How the item parameters are laid out in the estimator output.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ItemParamLayout {
    /// `dims` midpoints followed by `dims` spreads. Both are negated on a
    /// flipped axis.
    MidpointSpread,
    /// Item parameters are not tied to the axes and are left alone.
    Untouched,
}

/// How the position of a bloc is summarized on an axis.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BlocAveraging {
    /// The mean of the party means. Each party weighs the same whatever
    /// its size.
    PerParty,
    /// The mean over all members.
    PerMember,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PolarityConfig {
    /// Axes to orient, zero-based.
    pub axes: Vec<usize>,
    /// An axis is flipped only if the negative bloc mean exceeds the positive
    /// one by more than this.
    pub tolerance: f64,
    pub item_layout: ItemParamLayout,
    pub averaging: BlocAveraging,
}

impl Default for PolarityConfig {
    fn default() -> Self {
        PolarityConfig {
            axes: vec![0],
            tolerance: 0.0,
            item_layout: ItemParamLayout::MidpointSpread,
            averaging: BlocAveraging::PerParty,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct AxisDecision {
    pub axis: usize,
    pub negative_mean: Option<f64>,
    pub positive_mean: Option<f64>,
    pub flipped: bool,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize)]
pub struct PolarityReport {
    /// No member of either bloc was estimated.
    pub skipped: bool,
    pub negative_present: usize,
    pub positive_present: usize,
    pub axes: Vec<AxisDecision>,
}

impl PolarityReport {
    pub fn flipped_axes(&self) -> Vec<usize> {
        self.axes
            .iter()
            .filter(|d| d.flipped)
            .map(|d| d.axis)
            .collect()
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Group<'a> {
    Party(&'a str),
    Alone(LegislatorId),
}

// Only estimated members count, and a party without any is left out.
fn bloc_mean(
    output: &EstimateOutput,
    blocs: &ReferenceBlocs,
    bloc: &BTreeSet<LegislatorId>,
    axis: usize,
    averaging: BlocAveraging,
) -> Option<f64> {
    let mut groups: BTreeMap<Group<'_>, Vec<f64>> = BTreeMap::new();
    for l in bloc.iter() {
        let x = match output.coordinates.get(l).and_then(|c| c.get(axis)) {
            Some(x) => *x,
            None => continue,
        };
        let group = match (averaging, blocs.parties.get(l)) {
            (BlocAveraging::PerParty, Some(p)) => Group::Party(p.as_str()),
            _ => Group::Alone(*l),
        };
        groups.entry(group).or_insert_with(Vec::new).push(x);
    }
    let means: Vec<f64> = groups.values().filter_map(|v| mean(v)).collect();
    mean(&means)
}

fn flip_axis(output: &mut EstimateOutput, axis: usize, layout: ItemParamLayout) {
    for coords in output.coordinates.values_mut() {
        if let Some(x) = coords.get_mut(axis) {
            *x = -*x;
        }
    }
    if layout == ItemParamLayout::MidpointSpread {
        for params in output.item_params.values_mut() {
            let dims = params.len() / 2;
            if axis < dims {
                params[axis] = -params[axis];
                params[dims + axis] = -params[dims + axis];
            }
        }
    }
}

/// Flips each configured axis on which the negative bloc sits to the right
/// of the positive bloc.
///
/// Axes are decided independently, at most one flip each. An axis where
/// one of the blocs is absent, or where the means are within the
/// tolerance, is left alone. If neither bloc has an estimated member the
/// output is returned unchanged.
pub fn normalize_polarity(
    output: EstimateOutput,
    blocs: &ReferenceBlocs,
    config: &PolarityConfig,
) -> (EstimateOutput, PolarityReport) {
    let negative_present = blocs
        .negative
        .iter()
        .filter(|l| output.coordinates.contains_key(l))
        .count();
    let positive_present = blocs
        .positive
        .iter()
        .filter(|l| output.coordinates.contains_key(l))
        .count();
    let mut report = PolarityReport {
        skipped: false,
        negative_present,
        positive_present,
        axes: Vec::new(),
    };
    if negative_present == 0 && positive_present == 0 {
        warn!("polarity: no reference legislator was estimated, skipping");
        report.skipped = true;
        return (output, report);
    }

    let mut res = output;
    let axes: BTreeSet<usize> = config.axes.iter().cloned().collect();
    for axis in axes.into_iter() {
        let negative_mean = bloc_mean(&res, blocs, &blocs.negative, axis, config.averaging);
        let positive_mean = bloc_mean(&res, blocs, &blocs.positive, axis, config.averaging);
        let flipped = match (negative_mean, positive_mean) {
            (Some(n), Some(p)) => n - p > config.tolerance,
            _ => false,
        };
        debug!(
            "polarity: axis {}: negative {:?} positive {:?}",
            axis, negative_mean, positive_mean
        );
        if flipped {
            info!("polarity: flipping axis {}", axis);
            flip_axis(&mut res, axis, config.item_layout);
        }
        report.axes.push(AxisDecision {
            axis,
            negative_mean,
            positive_mean,
            flipped,
        });
    }
    (res, report)
}
