//! Core library for metric structures and tempo annotation.
//!
//! A [`MetricGroup`] tree describes bars and the tempo curve running over
//! them. The annotation pipeline compiles that curve into a compact list of
//! tempo markings and anchors each marking on a quantised placeholder
//! timeline, ready to be handed to a renderer.

pub mod annotation;
pub mod config;
pub mod curve;
pub mod error;
pub mod generate;
pub mod metric;
pub mod render;
pub mod timeline;

use serde::{Deserialize, Serialize};

pub use annotation::{
    AnnotationEvent, AnnotationPayload, KeyPoint, TempoDirection, TempoLabel, TempoSpanner,
};
pub use config::{AnnotationSettings, GroupConfig, ScoreConfig};
pub use curve::{EnvelopeSegment, TempoEnvelope};
pub use error::{MetricScoreError, Result};
pub use generate::{BarLimit, MarkovBarGenerator};
pub use metric::MetricGroup;
pub use render::{BarLayout, LilyPondOptions, TempoVoice};
pub use timeline::{AnnotationTarget, PlaceholderTimeline};

/// Synthesized annotations together with the timeline that anchors them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoAnnotation {
    pub events: Vec<AnnotationEvent>,
    pub timeline: PlaceholderTimeline,
}

impl TempoAnnotation {
    /// Passes every event, resolved to its placeholder units, to `target`.
    pub fn attach_to<T: AnnotationTarget + ?Sized>(&self, target: &mut T) -> Result<()> {
        timeline::attach_events(&self.events, &self.timeline, target)
    }
}

/// Compiles `curve` into tempo annotations anchored on a placeholder timeline.
pub fn annotate_curve(curve: &TempoEnvelope, settings: &AnnotationSettings) -> Result<TempoAnnotation> {
    settings.validate()?;
    let scaled = curve.scale_horizontal(settings.horizontal_scale);
    let events = annotation::synthesize(&scaled, settings);
    let timeline = PlaceholderTimeline::build(&events, settings.placeholder_duration)?;
    tracing::info!(
        events = events.len(),
        units = timeline.len(),
        "synthesized tempo annotations"
    );
    Ok(TempoAnnotation { events, timeline })
}

/// Annotates the aggregated tempo curve of `group`.
pub fn annotate_group(group: &MetricGroup, settings: &AnnotationSettings) -> Result<TempoAnnotation> {
    annotate_curve(&group.tempo_curve(), settings)
}
