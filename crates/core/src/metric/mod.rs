//! Hierarchical metric structures.
//!
//! A [`MetricGroup`] is either a leaf holding bars and the tempo curve that
//! spans them, or a composite of child groups played one after another.

use std::path::Path;

use crate::{
    config::GroupConfig, generate::generate_from_config, MetricScoreError, Result, TempoEnvelope,
};

/// Slack allowed between a leaf's bar total and its clipped curve, relative to
/// the total. Integer bar sums clip exactly.
const DURATION_TOLERANCE: f64 = 1e-9;

/// Bars with a tempo curve clipped to exactly their total duration.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafGroup {
    bar_durations: Vec<u32>,
    tempo_curve: TempoEnvelope,
}

impl LeafGroup {
    /// Extends or truncates `tempo_curve` so it lasts as long as the bars.
    pub fn new(bar_durations: Vec<u32>, tempo_curve: &TempoEnvelope) -> Result<Self> {
        if bar_durations.is_empty() {
            return Err(MetricScoreError::config(
                "bar_lengths",
                "a leaf group needs at least one bar",
            ));
        }
        if bar_durations.contains(&0) {
            return Err(MetricScoreError::config(
                "bar_lengths",
                "bar durations must be positive",
            ));
        }

        let total = sum_durations(&bar_durations);
        let clipped = tempo_curve.extend_to(total).truncate_at(total);
        let actual = clipped.total_duration();
        if (actual - total).abs() > DURATION_TOLERANCE * total.max(1.0) {
            return Err(MetricScoreError::StructuralInvariant {
                expected: total,
                actual,
            });
        }

        Ok(Self {
            bar_durations,
            tempo_curve: clipped,
        })
    }

    pub fn bar_durations(&self) -> &[u32] {
        &self.bar_durations
    }

    pub fn tempo_curve(&self) -> &TempoEnvelope {
        &self.tempo_curve
    }
}

/// Child groups in playing order. The first child is held apart so a
/// composite can never be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeGroup {
    first: Box<MetricGroup>,
    rest: Vec<MetricGroup>,
}

impl CompositeGroup {
    pub fn children(&self) -> impl Iterator<Item = &MetricGroup> {
        std::iter::once(self.first.as_ref()).chain(&self.rest)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricGroup {
    Leaf(LeafGroup),
    Composite(CompositeGroup),
}

impl MetricGroup {
    pub fn leaf(bar_durations: Vec<u32>, tempo_curve: &TempoEnvelope) -> Result<Self> {
        Ok(Self::Leaf(LeafGroup::new(bar_durations, tempo_curve)?))
    }

    pub fn composite(children: Vec<MetricGroup>) -> Result<Self> {
        let mut children = children.into_iter();
        let Some(first) = children.next() else {
            return Err(MetricScoreError::config(
                "subgroups",
                "a composite group needs at least one subgroup",
            ));
        };
        Ok(Self::Composite(CompositeGroup {
            first: Box::new(first),
            rest: children.collect(),
        }))
    }

    /// Bar durations of every leaf, in playing order.
    pub fn bar_durations(&self) -> Vec<u32> {
        match self {
            Self::Leaf(leaf) => leaf.bar_durations.clone(),
            Self::Composite(group) => group
                .children()
                .flat_map(MetricGroup::bar_durations)
                .collect(),
        }
    }

    /// The children's curves laid end to end, without gaps or overlap.
    pub fn tempo_curve(&self) -> TempoEnvelope {
        match self {
            Self::Leaf(leaf) => leaf.tempo_curve.duplicate(),
            Self::Composite(group) => {
                let mut aggregate = group.first.tempo_curve();
                for child in &group.rest {
                    aggregate.append_envelope(&child.tempo_curve());
                }
                aggregate
            }
        }
    }

    pub fn total_beats(&self) -> f64 {
        sum_durations(&self.bar_durations())
    }

    /// Running sum of bar durations starting at zero; one more entry than
    /// there are bars.
    pub fn bar_boundaries(&self) -> Vec<f64> {
        let mut position = 0.0;
        let mut boundaries = vec![position];
        for duration in self.bar_durations() {
            position += f64::from(duration);
            boundaries.push(position);
        }
        boundaries
    }

    /// Seconds each bar lasts under the aggregated tempo curve.
    pub fn bar_times(&self) -> Vec<f64> {
        let curve = self.tempo_curve();
        self.bar_boundaries()
            .windows(2)
            .map(|pair| curve.time_at_beat(pair[1]) - curve.time_at_beat(pair[0]))
            .collect()
    }

    /// Builds the tree described by `config`, recursing into `subgroups`.
    pub fn from_config(config: &GroupConfig) -> Result<Self> {
        if let Some(subgroups) = &config.subgroups {
            let children = subgroups
                .iter()
                .map(Self::from_config)
                .collect::<Result<Vec<_>>>()?;
            return Self::composite(children);
        }

        let bar_durations = match (&config.bar_lengths, &config.bar_generator) {
            (Some(bars), None) => bars.clone(),
            (None, Some(generator)) => generate_from_config(generator)?,
            (Some(_), Some(_)) => {
                return Err(MetricScoreError::config(
                    "bar_lengths",
                    "specify either `bar_lengths` or `bar_generator`, not both",
                ))
            }
            (None, None) => {
                return Err(MetricScoreError::config(
                    "bar_lengths",
                    "a leaf group needs `bar_lengths` or `bar_generator`",
                ))
            }
        };

        let curve = parse_tempo_envelope(config, sum_durations(&bar_durations))?;
        Self::leaf(bar_durations, &curve)
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let config = GroupConfig::load_from_json(path)?;
        Self::from_config(&config)
    }
}

/// An explicit `tempo_envelope` wins over the `tempo`/`end_tempo` shorthand,
/// which ramps across the whole leaf.
fn parse_tempo_envelope(config: &GroupConfig, total: f64) -> Result<TempoEnvelope> {
    if let Some(envelope) = &config.tempo_envelope {
        return TempoEnvelope::new(
            &envelope.levels,
            &envelope.durations,
            envelope.curve_shapes.as_deref(),
        )
        .map_err(|err| MetricScoreError::config("tempo_envelope", err.to_string()));
    }

    let start = config.tempo.ok_or_else(|| {
        MetricScoreError::config("tempo", "a leaf group needs `tempo` or `tempo_envelope`")
    })?;
    let end = config.end_tempo.unwrap_or(start);
    let curvature = config.tempo_curvature.unwrap_or(0.0);
    TempoEnvelope::new(&[start, end], &[total], Some(&[curvature]))
        .map_err(|err| MetricScoreError::config("tempo", err.to_string()))
}

fn sum_durations(durations: &[u32]) -> f64 {
    durations.iter().map(|&d| f64::from(d)).sum()
}
