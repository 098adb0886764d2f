use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{
    annotation::{AnnotationEvent, AnnotationPayload, TempoLabel, TempoSpanner},
    MetricScoreError, Result,
};

/// Fixed-length slot that annotations are anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderUnit {
    pub index: usize,
    pub start: f64,
}

/// A referenced beat and the unit it falls into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatResolution {
    pub beat: f64,
    pub unit: usize,
}

/// Contiguous placeholder units from beat zero past the last annotated beat,
/// with every annotated beat resolved to a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderTimeline {
    unit_duration: f64,
    units: Vec<PlaceholderUnit>,
    /// Sorted by beat, one entry per distinct beat.
    resolutions: Vec<BeatResolution>,
}

impl PlaceholderTimeline {
    /// Builds units of `unit_duration` beats covering every beat referenced by
    /// `events`. Without events the timeline is empty.
    pub fn build(events: &[AnnotationEvent], unit_duration: f64) -> Result<Self> {
        if !unit_duration.is_finite() || unit_duration <= 0.0 {
            return Err(MetricScoreError::config(
                "annotation.placeholder_duration",
                format!("must be a positive number, got {unit_duration}"),
            ));
        }

        let mut beats: Vec<f64> = events
            .iter()
            .flat_map(|event| std::iter::once(event.start_beat).chain(event.end_beat))
            .collect();
        beats.sort_by(f64::total_cmp);
        beats.dedup();

        let (Some(&min_beat), Some(&max_beat)) = (beats.first(), beats.last()) else {
            return Ok(Self {
                unit_duration,
                units: Vec::new(),
                resolutions: Vec::new(),
            });
        };
        if !min_beat.is_finite() || !max_beat.is_finite() || min_beat < 0.0 {
            return Err(MetricScoreError::msg(format!(
                "annotation beats must lie in [0, inf), got {min_beat}..{max_beat}"
            )));
        }

        // The last unit starts at or before `max_beat`, so it contains it.
        let mut units = Vec::new();
        loop {
            let start = units.len() as f64 * unit_duration;
            if start > max_beat {
                break;
            }
            units.push(PlaceholderUnit {
                index: units.len(),
                start,
            });
        }

        let resolutions = beats
            .iter()
            .map(|&beat| BeatResolution {
                beat,
                unit: units.partition_point(|unit| unit.start <= beat) - 1,
            })
            .collect();

        tracing::debug!(
            units = units.len(),
            beats = beats.len(),
            unit_duration,
            "built placeholder timeline"
        );

        Ok(Self {
            unit_duration,
            units,
            resolutions,
        })
    }

    pub fn unit_duration(&self) -> f64 {
        self.unit_duration
    }

    pub fn units(&self) -> &[PlaceholderUnit] {
        &self.units
    }

    pub fn resolutions(&self) -> &[BeatResolution] {
        &self.resolutions
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.units.len() as f64 * self.unit_duration
    }

    /// Unit holding a beat referenced by the events the timeline was built
    /// from. Other beats are not resolved.
    pub fn unit_for(&self, beat: f64) -> Option<usize> {
        self.resolutions
            .binary_search_by(|resolution| {
                resolution
                    .beat
                    .partial_cmp(&beat)
                    .unwrap_or(Ordering::Equal)
            })
            .ok()
            .map(|index| self.resolutions[index].unit)
    }

    fn resolve(&self, beat: f64) -> Result<usize> {
        self.unit_for(beat).ok_or_else(|| {
            MetricScoreError::msg(format!("beat {beat} is not anchored in the placeholder timeline"))
        })
    }
}

/// Receives annotations anchored to placeholder units, typically a renderer.
pub trait AnnotationTarget {
    fn attach_label(&mut self, unit: usize, label: &TempoLabel);
    fn attach_spanner(&mut self, start_unit: usize, end_unit: usize, spanner: &TempoSpanner);
}

/// Hands every event to `target` in order, resolved to placeholder units.
pub fn attach_events<T: AnnotationTarget + ?Sized>(
    events: &[AnnotationEvent],
    timeline: &PlaceholderTimeline,
    target: &mut T,
) -> Result<()> {
    for event in events {
        let start_unit = timeline.resolve(event.start_beat)?;
        match (event.end_beat, &event.payload) {
            (None, AnnotationPayload::Point(label)) => target.attach_label(start_unit, label),
            (Some(end_beat), AnnotationPayload::Span(spanner)) => {
                let end_unit = timeline.resolve(end_beat)?;
                target.attach_spanner(start_unit, end_unit, spanner);
            }
            _ => {
                return Err(MetricScoreError::msg(format!(
                    "annotation at beat {} mixes point and span data",
                    event.start_beat
                )))
            }
        }
    }
    Ok(())
}
