//! Compiles a continuous tempo curve into a short list of tempo markings.
//!
//! The curve is sampled at every segment boundary. Held tempos become point
//! labels, with runs of the same tempo collapsed into one. Ramps become
//! accelerando/ritardando spanners. A spanner only shows its arrival tempo
//! when nothing after it will: at the end of the curve, or before a subito
//! change. Labels that restate a tempo the reader has just seen are
//! parenthesized.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AnnotationSettings, TempoEnvelope};

/// Tempos closer than this are the same tempo.
const TEMPO_TOLERANCE: f64 = 1e-9;

/// A `(beat, tempo)` sample taken at a segment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub beat: f64,
    pub tempo: f64,
}

impl KeyPoint {
    pub fn new(beat: f64, tempo: f64) -> Self {
        Self { beat, tempo }
    }
}

/// Samples the start and end of every segment that has a duration. End
/// samples are left limits, so the value just before a subito change is kept.
pub fn extract_key_points(curve: &TempoEnvelope) -> Vec<KeyPoint> {
    let mut points = Vec::with_capacity(curve.segments().len() * 2);
    let mut beat = 0.0;
    for segment in curve.segments() {
        let end = beat + segment.duration;
        if segment.duration > 0.0 {
            points.push(KeyPoint::new(beat, curve.tempo_at(beat, false)));
            points.push(KeyPoint::new(end, curve.tempo_at(end, true)));
        }
        beat = end;
    }
    points
}

/// A rounded tempo value as printed in the score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoLabel {
    pub tempo: f64,
    pub parenthesized: bool,
    /// Extra space kept free to the right of the label.
    pub right_padding: f64,
}

impl TempoLabel {
    pub fn new(tempo: f64, decimals: u32) -> Self {
        Self {
            tempo: round_tempo(tempo, decimals),
            parenthesized: false,
            right_padding: 0.0,
        }
    }

    pub fn parenthesized(self, parenthesized: bool) -> Self {
        Self {
            parenthesized,
            ..self
        }
    }

    pub fn with_right_padding(self, right_padding: f64) -> Self {
        Self {
            right_padding,
            ..self
        }
    }
}

impl fmt::Display for TempoLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parenthesized {
            write!(f, "({})", self.tempo)
        } else {
            write!(f, "{}", self.tempo)
        }
    }
}

fn round_tempo(tempo: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(9) as i32);
    (tempo * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoDirection {
    Accelerando,
    Ritardando,
}

impl fmt::Display for TempoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerando => f.write_str("accel."),
            Self::Ritardando => f.write_str("rit."),
        }
    }
}

/// A tempo trend drawn between two beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoSpanner {
    pub direction: TempoDirection,
    pub left: TempoLabel,
    /// Present only when the arrival tempo is not announced by what follows.
    pub right: Option<TempoLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotationPayload {
    Point(TempoLabel),
    Span(TempoSpanner),
}

/// A marking anchored at `start_beat`; spanners also carry `end_beat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEvent {
    pub start_beat: f64,
    pub end_beat: Option<f64>,
    pub payload: AnnotationPayload,
}

impl AnnotationEvent {
    pub fn point(beat: f64, label: TempoLabel) -> Self {
        Self {
            start_beat: beat,
            end_beat: None,
            payload: AnnotationPayload::Point(label),
        }
    }

    pub fn span(start_beat: f64, end_beat: f64, spanner: TempoSpanner) -> Self {
        Self {
            start_beat,
            end_beat: Some(end_beat),
            payload: AnnotationPayload::Span(spanner),
        }
    }

    pub fn is_point(&self) -> bool {
        self.end_beat.is_none()
    }

    pub fn label(&self) -> Option<&TempoLabel> {
        match &self.payload {
            AnnotationPayload::Point(label) => Some(label),
            AnnotationPayload::Span(_) => None,
        }
    }

    pub fn spanner(&self) -> Option<&TempoSpanner> {
        match &self.payload {
            AnnotationPayload::Point(_) => None,
            AnnotationPayload::Span(spanner) => Some(spanner),
        }
    }
}

/// One curve segment as a pair of key points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSample {
    pub start: KeyPoint,
    pub end: KeyPoint,
}

impl SegmentSample {
    pub fn is_constant(&self) -> bool {
        same_tempo(self.start.tempo, self.end.tempo)
    }
}

/// What the synthesizer remembers between segments.
///
/// `last_emitted_end_tempo` is updated after every segment, including a held
/// tempo whose label was deduplicated away. Such a segment ends at the tempo
/// already stored, so the update never changes what a later label compares
/// against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SynthesisState {
    pub last_emitted_end_tempo: Option<f64>,
    pub previous_was_constant: bool,
}

impl SynthesisState {
    /// Consumes one segment. `next_start_tempo` is the start tempo of the
    /// segment after it, `None` for the last one.
    pub fn step(
        self,
        segment: &SegmentSample,
        next_start_tempo: Option<f64>,
        settings: &AnnotationSettings,
    ) -> (Self, Option<AnnotationEvent>) {
        let SegmentSample { start, end } = *segment;
        let decimals = settings.tempo_decimals;
        let restates_last = self
            .last_emitted_end_tempo
            .is_some_and(|last| same_tempo(last, start.tempo));

        let (previous_was_constant, event) = if segment.is_constant() {
            let event = if self.previous_was_constant && restates_last {
                tracing::trace!(beat = start.beat, tempo = start.tempo, "held tempo continues");
                None
            } else {
                Some(AnnotationEvent::point(
                    start.beat,
                    TempoLabel::new(start.tempo, decimals),
                ))
            };
            (true, event)
        } else {
            let direction = if end.tempo > start.tempo {
                TempoDirection::Accelerando
            } else {
                TempoDirection::Ritardando
            };
            let left = TempoLabel::new(start.tempo, decimals).parenthesized(restates_last);
            let handed_off = next_start_tempo.is_some_and(|next| same_tempo(end.tempo, next));

            let event = if handed_off {
                AnnotationEvent::span(
                    start.beat,
                    end.beat,
                    TempoSpanner {
                        direction,
                        left,
                        right: None,
                    },
                )
            } else {
                let right = TempoLabel::new(end.tempo, decimals)
                    .parenthesized(true)
                    .with_right_padding(settings.right_label_padding);
                let end_beat = (end.beat - settings.parenthesization_offset).max(start.beat);
                AnnotationEvent::span(
                    start.beat,
                    end_beat,
                    TempoSpanner {
                        direction,
                        left,
                        right: Some(right),
                    },
                )
            };
            (false, Some(event))
        };

        let state = Self {
            last_emitted_end_tempo: Some(end.tempo),
            previous_was_constant,
        };
        (state, event)
    }
}

/// Pairs up key points as produced by [`extract_key_points`]. A trailing
/// unpaired point is ignored.
pub fn segment_samples(points: &[KeyPoint]) -> Vec<SegmentSample> {
    points
        .chunks_exact(2)
        .map(|pair| SegmentSample {
            start: pair[0],
            end: pair[1],
        })
        .collect()
}

/// Runs the synthesis rules over consecutive key-point pairs. Events come out
/// in non-decreasing `start_beat` order.
pub fn synthesize_events(points: &[KeyPoint], settings: &AnnotationSettings) -> Vec<AnnotationEvent> {
    let segments = segment_samples(points);
    let (_, events) = segments.iter().enumerate().fold(
        (SynthesisState::default(), Vec::new()),
        |(state, mut events), (index, segment)| {
            let next_start_tempo = segments.get(index + 1).map(|next| next.start.tempo);
            let (state, event) = state.step(segment, next_start_tempo, settings);
            events.extend(event);
            (state, events)
        },
    );
    events
}

/// Key-point extraction followed by event synthesis.
pub fn synthesize(curve: &TempoEnvelope, settings: &AnnotationSettings) -> Vec<AnnotationEvent> {
    let points = extract_key_points(curve);
    let events = synthesize_events(&points, settings);
    tracing::debug!(
        segments = points.len() / 2,
        events = events.len(),
        "compiled tempo curve into annotations"
    );
    events
}

fn same_tempo(a: f64, b: f64) -> bool {
    (a - b).abs() <= TEMPO_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AnnotationSettings {
        AnnotationSettings::default()
    }

    fn curve(levels: &[f64], durations: &[f64]) -> TempoEnvelope {
        TempoEnvelope::new(levels, durations, None).unwrap()
    }

    fn points(segments: &[(f64, f64, f64, f64)]) -> Vec<KeyPoint> {
        segments
            .iter()
            .flat_map(|&(b0, t0, b1, t1)| [KeyPoint::new(b0, t0), KeyPoint::new(b1, t1)])
            .collect()
    }

    #[test]
    fn key_points_skip_zero_length_segments() {
        let envelope = curve(&[60.0, 60.0, 120.0, 90.0], &[4.0, 0.0, 4.0]);
        let points = extract_key_points(&envelope);
        assert_eq!(
            points,
            vec![
                KeyPoint::new(0.0, 60.0),
                KeyPoint::new(4.0, 60.0),
                KeyPoint::new(4.0, 120.0),
                KeyPoint::new(8.0, 90.0),
            ]
        );
    }

    #[test]
    fn held_tempo_is_labelled_once() {
        let envelope = curve(&[72.0, 72.0, 72.0, 72.0], &[4.0, 3.0, 5.0]);
        let events = synthesize(&envelope, &settings());
        assert_eq!(events, vec![AnnotationEvent::point(0.0, TempoLabel::new(72.0, 0))]);
    }

    #[test]
    fn ramp_after_held_tempo_parenthesizes_its_start() {
        let envelope = curve(&[60.0, 60.0, 120.0, 120.0], &[8.0, 8.0, 8.0]);
        let events = synthesize(&envelope, &settings());

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], AnnotationEvent::point(0.0, TempoLabel::new(60.0, 0)));

        let spanner = events[1].spanner().unwrap();
        assert_eq!(events[1].start_beat, 8.0);
        assert_eq!(events[1].end_beat, Some(16.0));
        assert!(spanner.left.parenthesized);
        assert_eq!(spanner.left.to_string(), "(60)");
        assert!(spanner.right.is_none());
        assert_eq!(spanner.direction, TempoDirection::Accelerando);

        let arrival = events[2].label().unwrap();
        assert_eq!(events[2].start_beat, 16.0);
        assert!(!arrival.parenthesized);
        assert_eq!(arrival.to_string(), "120");
    }

    #[test]
    fn continuous_hand_off_omits_right_label() {
        let envelope = curve(&[60.0, 90.0, 150.0], &[4.0, 4.0]);
        let events = synthesize(&envelope, &settings());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].end_beat, Some(4.0));
        let first = events[0].spanner().unwrap();
        assert!(!first.left.parenthesized);
        assert!(first.right.is_none());

        assert_eq!(events[1].end_beat, Some(7.75));
        let second = events[1].spanner().unwrap();
        assert!(second.left.parenthesized);
        let right = second.right.unwrap();
        assert!(right.parenthesized);
        assert_eq!(right.tempo, 150.0);
        assert_eq!(right.right_padding, settings().right_label_padding);
    }

    #[test]
    fn subito_change_needs_terminal_label() {
        let envelope = curve(&[60.0, 90.0, 120.0, 80.0], &[4.0, 0.0, 4.0]);
        let events = synthesize(&envelope, &settings());

        assert_eq!(events.len(), 2);
        let before_jump = events[0].spanner().unwrap();
        assert_eq!(events[0].end_beat, Some(3.75));
        assert_eq!(before_jump.right.unwrap().tempo, 90.0);

        let after_jump = events[1].spanner().unwrap();
        assert_eq!(events[1].start_beat, 4.0);
        assert!(!after_jump.left.parenthesized);
        assert_eq!(after_jump.direction, TempoDirection::Ritardando);
    }

    #[test]
    fn held_tempo_after_subito_change_is_labelled() {
        let envelope = curve(&[60.0, 60.0, 80.0, 80.0], &[4.0, 0.0, 4.0]);
        let events = synthesize(&envelope, &settings());
        let starts: Vec<_> = events.iter().map(|e| e.start_beat).collect();
        assert_eq!(starts, vec![0.0, 4.0]);
        assert!(events.iter().all(AnnotationEvent::is_point));
    }

    #[test]
    fn suppressed_label_still_counts_as_shown() {
        // 60 | 60 (deduplicated) | 60 -> 90
        let suppressed = points(&[
            (0.0, 60.0, 4.0, 60.0),
            (4.0, 60.0, 8.0, 60.0),
            (8.0, 60.0, 12.0, 90.0),
        ]);
        let events = synthesize_events(&suppressed, &settings());
        assert_eq!(events.len(), 2);
        assert!(events[1].spanner().unwrap().left.parenthesized);

        // 60 | 60 -> 90, with the held label actually printed
        let emitted = points(&[(0.0, 60.0, 4.0, 60.0), (4.0, 60.0, 8.0, 90.0)]);
        let events = synthesize_events(&emitted, &settings());
        assert_eq!(events.len(), 2);
        assert!(events[1].spanner().unwrap().left.parenthesized);
    }

    #[test]
    fn same_tempo_after_ramp_is_not_deduplicated() {
        // 60 -> 90 handed off to a held 90: the held label is the arrival
        let envelope = curve(&[60.0, 90.0, 90.0, 90.0], &[4.0, 4.0, 4.0]);
        let events = synthesize(&envelope, &settings());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], AnnotationEvent::point(4.0, TempoLabel::new(90.0, 0)));
    }

    #[test]
    fn short_terminal_ramp_does_not_end_before_it_starts() {
        let envelope = curve(&[60.0, 61.0], &[0.125]);
        let events = synthesize(&envelope, &settings());
        assert_eq!(events[0].start_beat, 0.0);
        assert_eq!(events[0].end_beat, Some(0.0));
    }

    #[test]
    fn labels_are_rounded_to_configured_precision() {
        assert_eq!(TempoLabel::new(71.6, 0).to_string(), "72");
        assert_eq!(TempoLabel::new(71.64, 1).to_string(), "71.6");
        assert_eq!(TempoLabel::new(60.0, 2).parenthesized(true).to_string(), "(60)");
    }

    #[test]
    fn empty_curve_produces_no_events() {
        let envelope = TempoEnvelope::constant(60.0).unwrap();
        assert!(synthesize(&envelope, &settings()).is_empty());
    }
}
