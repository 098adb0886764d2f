//! Engraver input: bar layouts with clock times, a tempo voice that collects
//! anchored annotations, and LilyPond source built from both.

use std::{collections::BTreeMap, fmt::Write};

use serde::{Deserialize, Serialize};

use crate::{
    annotation::{TempoLabel, TempoSpanner},
    timeline::{AnnotationTarget, PlaceholderTimeline},
    MetricGroup, MetricScoreError, Result,
};

const LILYPOND_VERSION: &str = "2.24.0";
/// Largest denominator tried when writing a skip length as a fraction.
const MAX_SKIP_DENOMINATOR: u64 = 1024;

/// Time signature for a bar of `duration` sixteenths: eighths when the bar
/// divides evenly, sixteenths otherwise.
pub fn time_signature_for(duration: u32) -> (u32, u32) {
    if duration % 2 == 0 {
        (duration / 2, 8)
    } else {
        (duration, 16)
    }
}

/// Everything the engraver needs to know about one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarLayout {
    pub duration: u32,
    pub time_signature: (u32, u32),
    pub start_seconds: f64,
    pub seconds: f64,
}

impl BarLayout {
    /// Clock time at the start of the bar as `mm:ss`.
    pub fn timestamp(&self) -> String {
        let whole = self.start_seconds.max(0.0).floor() as u64;
        format!("{:02}:{:02}", whole / 60, whole % 60)
    }

    pub fn seconds_per_unit(&self) -> f64 {
        self.seconds / f64::from(self.duration)
    }
}

pub fn layout_bars(group: &MetricGroup) -> Vec<BarLayout> {
    let mut start_seconds = 0.0;
    group
        .bar_durations()
        .into_iter()
        .zip(group.bar_times())
        .map(|(duration, seconds)| {
            let layout = BarLayout {
                duration,
                time_signature: time_signature_for(duration),
                start_seconds,
                seconds,
            };
            start_seconds += seconds;
            layout
        })
        .collect()
}

/// Marks collected on a single placeholder unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitMarks {
    pub labels: Vec<TempoLabel>,
    pub spanner_starts: Vec<TempoSpanner>,
    pub spanner_stops: usize,
}

/// Annotation target that records marks per placeholder unit.
#[derive(Debug, Default)]
pub struct TempoVoice {
    marks: BTreeMap<usize, UnitMarks>,
}

impl TempoVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marks_at(&self, unit: usize) -> Option<&UnitMarks> {
        self.marks.get(&unit)
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Units needed to hold every mark, which can be one more than the
    /// timeline when a spanner closes just past its last unit.
    pub fn unit_count(&self) -> usize {
        self.marks.keys().next_back().map_or(0, |last| last + 1)
    }
}

impl AnnotationTarget for TempoVoice {
    fn attach_label(&mut self, unit: usize, label: &TempoLabel) {
        self.marks.entry(unit).or_default().labels.push(*label);
    }

    /// A spanner that would start and stop on the same unit is closed on the
    /// following one, since a stop written there would precede its start.
    fn attach_spanner(&mut self, start_unit: usize, end_unit: usize, spanner: &TempoSpanner) {
        let end_unit = end_unit.max(start_unit + 1);
        self.marks
            .entry(start_unit)
            .or_default()
            .spanner_starts
            .push(*spanner);
        self.marks.entry(end_unit).or_default().spanner_stops += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LilyPondOptions {
    /// `proportionalNotationDuration` as numerator/denominator.
    pub proportional_duration: (u32, u32),
    /// Paper width and height in inches.
    pub page_size_in: (f64, f64),
    /// Horizontal scale that was applied to the curve before annotating.
    pub horizontal_scale: f64,
}

impl Default for LilyPondOptions {
    fn default() -> Self {
        Self {
            proportional_duration: (1, 20),
            page_size_in: (17.0, 11.0),
            horizontal_scale: 1.0,
        }
    }
}

/// LilyPond source for blank bars with clock timestamps and a tempo voice
/// carrying the anchored annotations.
pub fn render_lilypond(
    bars: &[BarLayout],
    voice: &TempoVoice,
    timeline: &PlaceholderTimeline,
    options: &LilyPondOptions,
) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "\\version \"{LILYPOND_VERSION}\"")?;
    writeln!(out)?;

    let (numerator, denominator) = options.proportional_duration;
    writeln!(out, "\\layout {{")?;
    writeln!(out, "  \\context {{")?;
    writeln!(out, "    \\Score")?;
    writeln!(
        out,
        "    proportionalNotationDuration = #(ly:make-moment {numerator}/{denominator})"
    )?;
    writeln!(out, "  }}")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    let (width, height) = options.page_size_in;
    writeln!(out, "\\paper {{")?;
    writeln!(out, "  #(set-paper-size '(cons (* {width} in) (* {height} in)))")?;
    writeln!(out, "  ragged-right = ##t")?;
    writeln!(out, "  indent = #0")?;
    writeln!(out, "}}")?;
    writeln!(out)?;

    writeln!(out, "\\score {{")?;
    writeln!(out, "  \\new Staff <<")?;
    writeln!(out, "    \\new Voice {{")?;
    for bar in bars {
        let (beats, unit) = bar.time_signature;
        writeln!(out, "      \\newSpacingSection")?;
        writeln!(
            out,
            "      \\override Score.SpacingSpanner.spacing-increment = #{:.4}",
            bar.seconds_per_unit() * 4.0
        )?;
        writeln!(
            out,
            "      \\time {beats}/{unit} s16*{}^\\markup {{ \"{}\" }}",
            bar.duration,
            bar.timestamp()
        )?;
    }
    writeln!(out, "    }}")?;

    let unit_count = timeline.len().max(voice.unit_count());
    if unit_count > 0 {
        let unit_sixteenths = timeline.unit_duration() / options.horizontal_scale;
        let skip = skip_duration(unit_sixteenths)?;
        writeln!(out, "    \\new Voice {{")?;
        for unit in 0..unit_count {
            write_unit(&mut out, &skip, voice.marks_at(unit))?;
        }
        writeln!(out, "    }}")?;
    }

    writeln!(out, "  >>")?;
    writeln!(out, "}}")?;
    Ok(out)
}

fn write_unit(out: &mut String, skip: &str, marks: Option<&UnitMarks>) -> Result<()> {
    let Some(marks) = marks else {
        writeln!(out, "      {skip}")?;
        return Ok(());
    };

    for spanner in &marks.spanner_starts {
        writeln!(
            out,
            "      \\once \\override TextSpanner.bound-details.left.text = \\markup {{ \"{} ♩ = {}\" }}",
            spanner.direction, spanner.left
        )?;
        if let Some(right) = &spanner.right {
            writeln!(
                out,
                "      \\once \\override TextSpanner.bound-details.right.text = \\markup {{ \"♩ = {right}\" }}"
            )?;
            writeln!(
                out,
                "      \\once \\override TextSpanner.bound-details.right.padding = #{}",
                right.right_padding
            )?;
        }
    }

    write!(out, "      {skip}")?;
    for _ in 0..marks.spanner_stops {
        write!(out, " \\stopTextSpan")?;
    }
    for label in &marks.labels {
        write!(out, " ^\\markup {{ \"♩ = {label}\" }}")?;
    }
    for _ in &marks.spanner_starts {
        write!(out, " \\startTextSpan")?;
    }
    writeln!(out)?;
    Ok(())
}

/// Spacer rest lasting `sixteenths` sixteenth notes, e.g. `s16*1/4`.
fn skip_duration(sixteenths: f64) -> Result<String> {
    (1..=MAX_SKIP_DENOMINATOR)
        .find_map(|denominator| {
            let numerator = sixteenths * denominator as f64;
            let rounded = numerator.round();
            ((numerator - rounded).abs() < 1e-9 && rounded >= 1.0)
                .then(|| match denominator {
                    1 => format!("s16*{}", rounded as u64),
                    _ => format!("s16*{}/{denominator}", rounded as u64),
                })
        })
        .ok_or_else(|| {
            MetricScoreError::msg(format!(
                "placeholder length of {sixteenths} sixteenths cannot be engraved"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{annotate_group, AnnotationSettings, TempoEnvelope};

    fn ramp_group() -> MetricGroup {
        let held = MetricGroup::leaf(vec![8], &TempoEnvelope::constant(60.0).unwrap()).unwrap();
        let ramp = TempoEnvelope::new(&[60.0, 120.0], &[8.0], None).unwrap();
        let accel = MetricGroup::leaf(vec![4, 4], &ramp).unwrap();
        MetricGroup::composite(vec![held, accel]).unwrap()
    }

    #[test]
    fn picks_eighths_for_even_bars() {
        assert_eq!(time_signature_for(6), (3, 8));
        assert_eq!(time_signature_for(7), (7, 16));
    }

    #[test]
    fn lays_out_bars_with_running_clock() {
        let group = MetricGroup::leaf(vec![60, 60], &TempoEnvelope::constant(60.0).unwrap()).unwrap();
        let bars = layout_bars(&group);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp(), "00:00");
        assert_eq!(bars[1].start_seconds, 60.0);
        assert_eq!(bars[1].timestamp(), "01:00");
        assert_eq!(bars[1].seconds_per_unit(), 1.0);
    }

    #[test]
    fn voice_records_marks_per_unit() {
        let group = ramp_group();
        let annotation = annotate_group(&group, &AnnotationSettings::default()).unwrap();
        let mut voice = TempoVoice::new();
        annotation.attach_to(&mut voice).unwrap();

        let first = voice.marks_at(0).unwrap();
        assert_eq!(first.labels.len(), 1);
        let accel = voice.marks_at(32).unwrap();
        assert_eq!(accel.spanner_starts.len(), 1);
        // the terminal spanner ends a quarter unit early
        let stop = voice.marks_at(63).unwrap();
        assert_eq!(stop.spanner_stops, 1);
    }

    #[test]
    fn renders_bars_and_tempo_voice() {
        let group = ramp_group();
        let annotation = annotate_group(&group, &AnnotationSettings::default()).unwrap();
        let mut voice = TempoVoice::new();
        annotation.attach_to(&mut voice).unwrap();

        let source = render_lilypond(
            &layout_bars(&group),
            &voice,
            &annotation.timeline,
            &LilyPondOptions::default(),
        )
        .unwrap();

        assert!(source.contains("\\time 4/8 s16*8"));
        assert!(source.contains("\\time 2/8 s16*4"));
        assert!(source.contains("s16*1/4 ^\\markup { \"♩ = 60\" }"));
        assert!(source.contains("accel. ♩ = (60)"));
        assert!(source.contains("\"♩ = (120)\""));
        assert!(source.contains("\\stopTextSpan"));
        assert!(source.contains("ly:make-moment 1/20"));
        assert_eq!(source.matches("\\newSpacingSection").count(), 3);
        // 8 sixteenths in 8 seconds at a held 60
        assert!(source.contains("spacing-increment = #4.0000"));
    }

    #[test]
    fn spanner_within_one_unit_closes_on_the_next() {
        let curve = TempoEnvelope::new(&[60.0, 60.0, 90.0], &[3.9, 0.1], None).unwrap();
        let group = MetricGroup::leaf(vec![4], &curve).unwrap();
        let annotation = annotate_group(&group, &AnnotationSettings::default()).unwrap();
        assert_eq!(annotation.events[1].start_beat, 3.9);
        assert_eq!(annotation.events[1].end_beat, Some(3.9));

        let mut voice = TempoVoice::new();
        annotation.attach_to(&mut voice).unwrap();
        let last_unit = annotation.timeline.len() - 1;
        assert_eq!(voice.marks_at(last_unit).unwrap().spanner_stops, 0);
        assert_eq!(voice.marks_at(last_unit + 1).unwrap().spanner_stops, 1);

        let source = render_lilypond(
            &layout_bars(&group),
            &voice,
            &annotation.timeline,
            &LilyPondOptions::default(),
        )
        .unwrap();
        assert!(!source.contains("\\stopTextSpan \\startTextSpan"));
        assert!(source.contains("s16*1/4 \\startTextSpan\n      s16*1/4 \\stopTextSpan\n"));
    }

    #[test]
    fn skips_are_written_as_fractions() {
        assert_eq!(skip_duration(0.25).unwrap(), "s16*1/4");
        assert_eq!(skip_duration(2.0).unwrap(), "s16*2");
        assert!(skip_duration(std::f64::consts::PI).is_err());
    }
}
