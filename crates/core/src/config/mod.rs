use std::{collections::BTreeMap, fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{MetricScoreError, Result};

/// One node of a metric-structure file, exactly as it appears on disk.
///
/// Every key is optional here so that [`crate::MetricGroup::from_config`] can
/// report which one is missing. JSON is read field by field through
/// [`GroupConfig::from_value`], so a value of the wrong type or out of range
/// is reported against its field path too. A node with `subgroups` is a
/// composite, anything else is a leaf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroups: Option<Vec<GroupConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_lengths: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_generator: Option<BarGeneratorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_tempo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_curvature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_envelope: Option<EnvelopeConfig>,
}

impl GroupConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value, "")
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reads one node. `path` prefixes field names in errors, e.g.
    /// `subgroups[1].tempo`; pass `""` for the root.
    pub fn from_value(value: &Value, path: &str) -> Result<Self> {
        let Some(node) = value.as_object() else {
            let field = if path.is_empty() { "<root>" } else { path };
            return Err(MetricScoreError::config(field, "expected an object"));
        };

        let subgroups = match node.get("subgroups") {
            None => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        Self::from_value(item, &field_path(path, &format!("subgroups[{i}]")))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(_) => {
                return Err(MetricScoreError::config(
                    field_path(path, "subgroups"),
                    "expected a list of groups",
                ))
            }
        };

        let bar_lengths = match node.get("bar_lengths") {
            None => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .filter(|&d| d > 0)
                            .and_then(|d| u32::try_from(d).ok())
                            .ok_or_else(|| {
                                MetricScoreError::config(
                                    field_path(path, "bar_lengths"),
                                    format!("bar durations must be positive integers, got {item}"),
                                )
                            })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(_) => {
                return Err(MetricScoreError::config(
                    field_path(path, "bar_lengths"),
                    "expected a list of bar durations",
                ))
            }
        };

        Ok(Self {
            subgroups,
            bar_lengths,
            bar_generator: typed_field(node, path, "bar_generator")?,
            tempo: number_field(node, path, "tempo", true)?,
            end_tempo: number_field(node, path, "end_tempo", true)?,
            tempo_curvature: number_field(node, path, "tempo_curvature", false)?,
            tempo_envelope: typed_field(node, path, "tempo_envelope")?,
        })
    }

    /// Leaf node with explicit bars and a `tempo`/`end_tempo` ramp.
    pub fn leaf(bar_lengths: Vec<u32>, tempo: f64, end_tempo: Option<f64>) -> Self {
        Self {
            bar_lengths: Some(bar_lengths),
            tempo: Some(tempo),
            end_tempo,
            ..Default::default()
        }
    }

    pub fn composite(subgroups: Vec<GroupConfig>) -> Self {
        Self {
            subgroups: Some(subgroups),
            ..Default::default()
        }
    }
}

/// Explicit tempo curve: `levels.len() == durations.len() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    pub levels: Vec<f64>,
    pub durations: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve_shapes: Option<Vec<f64>>,
}

/// Markov chain over bar durations used in place of `bar_lengths`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarGeneratorConfig {
    /// Bar duration to the durations that may follow it.
    pub transitions: BTreeMap<u32, Vec<u32>>,
    pub start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_bars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_beats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Knobs for tempo annotation synthesis and placeholder quantisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationSettings {
    /// Factor applied to the beat axis before annotating.
    pub horizontal_scale: f64,
    /// Length in beats of one placeholder unit.
    pub placeholder_duration: f64,
    /// How far a terminal spanner end is pulled left of its boundary.
    pub parenthesization_offset: f64,
    /// Extra space to the right of a terminal spanner's arrival label.
    pub right_label_padding: f64,
    /// Decimal places kept when labels are rounded.
    pub tempo_decimals: u32,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            horizontal_scale: 1.0,
            placeholder_duration: 0.25,
            parenthesization_offset: 0.25,
            right_label_padding: 1.5,
            tempo_decimals: 0,
        }
    }
}

impl AnnotationSettings {
    pub fn validate(&self) -> Result<()> {
        positive("annotation.horizontal_scale", self.horizontal_scale)?;
        positive("annotation.placeholder_duration", self.placeholder_duration)?;
        non_negative("annotation.parenthesization_offset", self.parenthesization_offset)?;
        non_negative("annotation.right_label_padding", self.right_label_padding)?;
        Ok(())
    }
}

/// Top-level configuration file: the structure plus annotation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub structure: GroupConfig,
    #[serde(default)]
    pub annotation: AnnotationSettings,
}

impl ScoreConfig {
    /// Accepts either `{ "structure": ..., "annotation": ... }` or a bare
    /// group node, which then gets default annotation settings.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        match value.get("structure") {
            Some(structure) => {
                let annotation = match value.get("annotation") {
                    Some(annotation) => AnnotationSettings::deserialize(annotation)
                        .map_err(|err| MetricScoreError::config("annotation", err.to_string()))?,
                    None => AnnotationSettings::default(),
                };
                Ok(Self {
                    structure: GroupConfig::from_value(structure, "structure")?,
                    annotation,
                })
            }
            None => Ok(Self {
                structure: GroupConfig::from_value(&value, "")?,
                annotation: AnnotationSettings::default(),
            }),
        }
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

fn field_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

/// Optional finite number; `positive` additionally requires it above zero.
fn number_field(
    node: &Map<String, Value>,
    path: &str,
    name: &str,
    positive: bool,
) -> Result<Option<f64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    match value.as_f64() {
        Some(number) if number.is_finite() && (!positive || number > 0.0) => Ok(Some(number)),
        _ => {
            let expected = if positive { "a positive number" } else { "a number" };
            Err(MetricScoreError::config(
                field_path(path, name),
                format!("expected {expected}, got {value}"),
            ))
        }
    }
}

fn typed_field<T: DeserializeOwned>(
    node: &Map<String, Value>,
    path: &str,
    name: &str,
) -> Result<Option<T>> {
    node.get(name)
        .map(|value| {
            T::deserialize(value)
                .map_err(|err| MetricScoreError::config(field_path(path, name), err.to_string()))
        })
        .transpose()
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MetricScoreError::config(
            field,
            format!("must be a positive number, got {value}"),
        ))
    }
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MetricScoreError::config(
            field,
            format!("must be a non-negative number, got {value}"),
        ))
    }
}
