//! Piecewise tempo curves over a beat axis.
//!
//! A [`TempoEnvelope`] is an ordered list of segments, each with a duration in
//! beats, a start and end tempo in beats per minute and a curvature. A segment
//! with zero duration encodes a subito change: the tempo jumps without taking
//! any time. Envelopes are values; every transforming operation except
//! [`TempoEnvelope::append_envelope`] returns a new envelope.

use serde::{Deserialize, Serialize};

use crate::{MetricScoreError, Result};

const CURVATURE_EPSILON: f64 = 1e-9;
/// Past this magnitude `exp(curvature)` overflows and the shape turns to NaN.
const MAX_CURVATURE: f64 = 700.0;
const SIMPSON_STEPS: usize = 64;

/// One piece of a [`TempoEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeSegment {
    pub duration: f64,
    pub start_tempo: f64,
    pub end_tempo: f64,
    /// Zero is a linear ramp. Positive values hold the start tempo longer
    /// before moving, negative values move early and settle late.
    #[serde(default)]
    pub curvature: f64,
}

impl EnvelopeSegment {
    pub fn new(duration: f64, start_tempo: f64, end_tempo: f64, curvature: f64) -> Self {
        Self {
            duration,
            start_tempo,
            end_tempo,
            curvature,
        }
    }

    pub fn constant(duration: f64, tempo: f64) -> Self {
        Self::new(duration, tempo, tempo, 0.0)
    }

    pub fn is_constant(&self) -> bool {
        self.start_tempo == self.end_tempo
    }

    /// Tempo at `fraction` of the way through the segment.
    pub fn tempo_at_fraction(&self, fraction: f64) -> f64 {
        let x = fraction.clamp(0.0, 1.0);
        self.start_tempo + (self.end_tempo - self.start_tempo) * shape_progress(self.curvature, x)
    }

    /// Seconds needed to traverse the first `beats` beats of the segment.
    fn elapsed_seconds(&self, beats: f64) -> f64 {
        let beats = beats.clamp(0.0, self.duration);
        if beats <= 0.0 {
            return 0.0;
        }

        if self.is_constant() {
            return 60.0 * beats / self.start_tempo;
        }

        if self.curvature.abs() < CURVATURE_EPSILON {
            let slope = (self.end_tempo - self.start_tempo) / self.duration;
            let tempo_here = self.start_tempo + slope * beats;
            return 60.0 / slope * (tempo_here / self.start_tempo).ln();
        }

        let step = beats / SIMPSON_STEPS as f64;
        let mut sum = self.beat_period(0.0) + self.beat_period(beats);
        for i in 1..SIMPSON_STEPS {
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * self.beat_period(i as f64 * step);
        }
        sum * step / 3.0
    }

    fn beat_period(&self, beat: f64) -> f64 {
        60.0 / self.tempo_at_fraction(beat / self.duration)
    }

    /// Keeps the first `beats` beats. The curvature is rescaled so the kept
    /// part traces exactly the same tempo values as before the cut.
    fn head(&self, beats: f64) -> Self {
        if self.duration <= 0.0 {
            return *self;
        }
        let fraction = (beats / self.duration).clamp(0.0, 1.0);
        Self {
            duration: beats,
            start_tempo: self.start_tempo,
            end_tempo: self.tempo_at_fraction(fraction),
            curvature: self.curvature * fraction,
        }
    }
}

fn shape_progress(curvature: f64, x: f64) -> f64 {
    if curvature.abs() < CURVATURE_EPSILON {
        x
    } else {
        (curvature * x).exp_m1() / curvature.exp_m1()
    }
}

/// Piecewise tempo function from beats to beats per minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoEnvelope {
    initial_tempo: f64,
    segments: Vec<EnvelopeSegment>,
}

impl TempoEnvelope {
    /// An envelope without duration that holds `tempo` wherever it is
    /// evaluated. Extend it to give it a length.
    pub fn constant(tempo: f64) -> Result<Self> {
        validate_tempo(tempo)?;
        Ok(Self {
            initial_tempo: tempo,
            segments: Vec::new(),
        })
    }

    /// Builds an envelope passing through `levels`, with `durations[i]` beats
    /// between `levels[i]` and `levels[i + 1]`.
    pub fn new(levels: &[f64], durations: &[f64], curve_shapes: Option<&[f64]>) -> Result<Self> {
        let Some(&first) = levels.first() else {
            return Err(MetricScoreError::invalid_curve("at least one level is required"));
        };
        if durations.len() + 1 != levels.len() {
            return Err(MetricScoreError::invalid_curve(format!(
                "{} levels need {} durations, got {}",
                levels.len(),
                levels.len() - 1,
                durations.len()
            )));
        }
        if let Some(shapes) = curve_shapes {
            if shapes.len() != durations.len() {
                return Err(MetricScoreError::invalid_curve(format!(
                    "expected {} curve shapes, got {}",
                    durations.len(),
                    shapes.len()
                )));
            }
        }

        let segments = levels
            .windows(2)
            .zip(durations)
            .enumerate()
            .map(|(i, (pair, &duration))| {
                let curvature = curve_shapes.map(|shapes| shapes[i]).unwrap_or(0.0);
                EnvelopeSegment::new(duration, pair[0], pair[1], curvature)
            })
            .collect();

        let envelope = Self {
            initial_tempo: first,
            segments,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn from_segments(segments: Vec<EnvelopeSegment>) -> Result<Self> {
        let Some(first) = segments.first() else {
            return Err(MetricScoreError::invalid_curve("at least one segment is required"));
        };
        let envelope = Self {
            initial_tempo: first.start_tempo,
            segments,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> Result<()> {
        validate_tempo(self.initial_tempo)?;
        for segment in &self.segments {
            validate_tempo(segment.start_tempo)?;
            validate_tempo(segment.end_tempo)?;
            if !segment.duration.is_finite() || segment.duration < 0.0 {
                return Err(MetricScoreError::invalid_curve(format!(
                    "segment duration must be a non-negative number, got {}",
                    segment.duration
                )));
            }
            if !segment.curvature.is_finite() || segment.curvature.abs() > MAX_CURVATURE {
                return Err(MetricScoreError::invalid_curve(format!(
                    "curvature must be finite and at most {MAX_CURVATURE} in magnitude, got {}",
                    segment.curvature
                )));
            }
        }
        Ok(())
    }

    pub fn segments(&self) -> &[EnvelopeSegment] {
        &self.segments
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|segment| segment.duration).sum()
    }

    pub fn start_tempo(&self) -> f64 {
        self.segments
            .first()
            .map(|segment| segment.start_tempo)
            .unwrap_or(self.initial_tempo)
    }

    pub fn end_tempo(&self) -> f64 {
        self.segments
            .last()
            .map(|segment| segment.end_tempo)
            .unwrap_or(self.initial_tempo)
    }

    /// Tempo at `beat`. On a segment boundary the segment starting there is
    /// used, unless `from_left` asks for the value the curve approaches from
    /// the left, which differs across a subito change.
    pub fn tempo_at(&self, beat: f64, from_left: bool) -> f64 {
        let mut start = 0.0;
        for segment in &self.segments {
            let end = start + segment.duration;
            if segment.duration > 0.0 {
                let inside = if from_left {
                    beat > start && beat <= end
                } else {
                    beat >= start && beat < end
                };
                if inside {
                    return segment.tempo_at_fraction((beat - start) / segment.duration);
                }
            }
            start = end;
        }

        if beat <= 0.0 {
            self.start_tempo()
        } else {
            self.end_tempo()
        }
    }

    /// Seconds elapsed between beat 0 and `beat`. Past the end of the
    /// envelope the end tempo is held.
    pub fn time_at_beat(&self, beat: f64) -> f64 {
        if beat <= 0.0 {
            return 0.0;
        }

        let mut elapsed = 0.0;
        let mut start = 0.0;
        for segment in &self.segments {
            let end = start + segment.duration;
            if beat <= end {
                return elapsed + segment.elapsed_seconds(beat - start);
            }
            elapsed += segment.elapsed_seconds(segment.duration);
            start = end;
        }
        elapsed + 60.0 * (beat - start) / self.end_tempo()
    }

    /// Copy that lasts at least `duration` beats, holding the end tempo over
    /// the added stretch.
    pub fn extend_to(&self, duration: f64) -> Self {
        let mut extended = self.clone();
        let total = self.total_duration();
        if total < duration {
            extended
                .segments
                .push(EnvelopeSegment::constant(duration - total, self.end_tempo()));
        }
        extended
    }

    /// Copy that lasts at most `duration` beats.
    pub fn truncate_at(&self, duration: f64) -> Self {
        let mut kept = Vec::with_capacity(self.segments.len());
        let mut start = 0.0;
        for segment in &self.segments {
            if start >= duration && !kept.is_empty() {
                break;
            }
            let end = start + segment.duration;
            if end <= duration {
                kept.push(*segment);
            } else {
                kept.push(segment.head(duration - start));
            }
            start = end;
        }
        Self {
            initial_tempo: self.initial_tempo,
            segments: kept,
        }
    }

    /// Appends `other` so that it starts where this envelope ends. A tempo
    /// mismatch at the seam is kept as a subito change.
    pub fn append_envelope(&mut self, other: &TempoEnvelope) {
        if self.segments.is_empty() {
            *self = other.clone();
            return;
        }
        self.segments.extend_from_slice(&other.segments);
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Copy with every duration multiplied by `factor`.
    pub fn scale_horizontal(&self, factor: f64) -> Self {
        Self {
            initial_tempo: self.initial_tempo,
            segments: self
                .segments
                .iter()
                .map(|segment| EnvelopeSegment {
                    duration: segment.duration * factor,
                    ..*segment
                })
                .collect(),
        }
    }
}

fn validate_tempo(tempo: f64) -> Result<()> {
    if tempo.is_finite() && tempo > 0.0 {
        Ok(())
    } else {
        Err(MetricScoreError::invalid_curve(format!(
            "tempo must be a positive number, got {tempo}"
        )))
    }
}
