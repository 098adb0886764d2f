//! Derived bar-duration sequences: Markov chains over bar lengths and simple
//! transformations of existing sequences.

use std::collections::BTreeMap;

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::{config::BarGeneratorConfig, MetricScoreError, Result};

/// When a generator stops adding bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarLimit {
    Count(usize),
    /// Stop once the bars add up to at least this many duration units.
    TotalBeats(u32),
}

impl BarLimit {
    /// Exactly one of the two options must be given.
    pub fn from_options(num_bars: Option<usize>, total_beats: Option<u32>) -> Result<Self> {
        match (num_bars, total_beats) {
            (Some(0), None) => Err(MetricScoreError::config(
                "bar_generator.num_bars",
                "must be at least 1",
            )),
            (None, Some(0)) => Err(MetricScoreError::config(
                "bar_generator.total_beats",
                "must be at least 1",
            )),
            (Some(count), None) => Ok(Self::Count(count)),
            (None, Some(total)) => Ok(Self::TotalBeats(total)),
            _ => Err(MetricScoreError::config(
                "bar_generator",
                "exactly one of `num_bars` or `total_beats` must be specified",
            )),
        }
    }
}

/// Random walk over bar durations: each bar is followed by one of the
/// durations listed for it in the transition table.
#[derive(Debug, Clone)]
pub struct MarkovBarGenerator {
    transitions: BTreeMap<u32, Vec<u32>>,
    start: u32,
}

impl MarkovBarGenerator {
    pub fn new(transitions: BTreeMap<u32, Vec<u32>>, start: u32) -> Result<Self> {
        if start == 0 {
            return Err(MetricScoreError::config(
                "bar_generator.start",
                "bar durations must be positive",
            ));
        }
        let has_zero = transitions
            .iter()
            .any(|(from, options)| *from == 0 || options.contains(&0));
        if has_zero {
            return Err(MetricScoreError::config(
                "bar_generator.transitions",
                "bar durations must be positive",
            ));
        }
        Ok(Self { transitions, start })
    }

    pub fn generate<R: Rng + ?Sized>(&self, limit: BarLimit, rng: &mut R) -> Result<Vec<u32>> {
        let mut bars = vec![self.start];
        let mut total = u64::from(self.start);

        loop {
            let done = match limit {
                BarLimit::Count(count) => bars.len() >= count,
                BarLimit::TotalBeats(beats) => total >= u64::from(beats),
            };
            if done {
                break;
            }

            let last = bars[bars.len() - 1];
            let next = self
                .transitions
                .get(&last)
                .and_then(|options| options.choose(rng))
                .copied()
                .ok_or_else(|| {
                    MetricScoreError::config(
                        "bar_generator.transitions",
                        format!("no transition leaves a bar of length {last}"),
                    )
                })?;
            bars.push(next);
            total += u64::from(next);
        }

        tracing::debug!(bars = bars.len(), total, "generated bar durations");
        Ok(bars)
    }

    /// Generates with a seeded RNG when `seed` is given, from entropy
    /// otherwise.
    pub fn generate_seeded(&self, limit: BarLimit, seed: Option<u64>) -> Result<Vec<u32>> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.generate(limit, &mut rng)
    }
}

/// Builds the bar durations described by a `bar_generator` config entry.
pub fn generate_from_config(config: &BarGeneratorConfig) -> Result<Vec<u32>> {
    let limit = BarLimit::from_options(config.num_bars, config.total_beats)?;
    MarkovBarGenerator::new(config.transitions.clone(), config.start)?
        .generate_seeded(limit, config.seed)
}

/// Rotates left by `steps`; negative steps rotate right.
pub fn rotate_bar_durations(durations: &[u32], steps: isize) -> Vec<u32> {
    let mut rotated = durations.to_vec();
    if rotated.is_empty() {
        return rotated;
    }
    let shift = steps.rem_euclid(rotated.len() as isize) as usize;
    rotated.rotate_left(shift);
    rotated
}

/// Adds `add` to, or multiplies by `mul`, every duration. Results are rounded
/// and never drop below one unit.
pub fn rescale_bar_durations(
    durations: &[u32],
    add: Option<i64>,
    mul: Option<f64>,
) -> Result<Vec<u32>> {
    let rescale: Box<dyn Fn(u32) -> f64> = match (add, mul) {
        (Some(add), None) => Box::new(move |d| (i64::from(d) + add) as f64),
        (None, Some(mul)) if mul.is_finite() && mul > 0.0 => {
            Box::new(move |d| (f64::from(d) * mul).round())
        }
        (None, Some(mul)) => {
            return Err(MetricScoreError::config(
                "mul",
                format!("must be a positive number, got {mul}"),
            ))
        }
        _ => {
            return Err(MetricScoreError::config(
                "rescale",
                "exactly one of `add` or `mul` must be specified",
            ))
        }
    };

    Ok(durations
        .iter()
        .map(|&d| rescale(d).clamp(1.0, f64::from(u32::MAX)) as u32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<u32, Vec<u32>> {
        BTreeMap::from([
            (4, vec![4, 6]),
            (6, vec![4, 8, 10]),
            (8, vec![4, 6, 12]),
            (10, vec![4]),
            (12, vec![8, 10, 12, 14]),
            (14, vec![14, 10]),
        ])
    }

    #[test]
    fn limit_requires_exactly_one_option() {
        assert!(BarLimit::from_options(None, None).is_err());
        assert!(BarLimit::from_options(Some(3), Some(12)).is_err());
        assert!(BarLimit::from_options(Some(0), None).is_err());
        assert_eq!(BarLimit::from_options(Some(3), None).unwrap(), BarLimit::Count(3));
        assert_eq!(
            BarLimit::from_options(None, Some(40)).unwrap(),
            BarLimit::TotalBeats(40)
        );
    }

    #[test]
    fn generated_chain_follows_transitions() {
        let table = table();
        let generator = MarkovBarGenerator::new(table.clone(), 4).unwrap();
        let bars = generator.generate_seeded(BarLimit::Count(20), Some(7)).unwrap();

        assert_eq!(bars.len(), 20);
        assert_eq!(bars[0], 4);
        for pair in bars.windows(2) {
            assert!(table[&pair[0]].contains(&pair[1]));
        }
    }

    #[test]
    fn total_beats_limit_stops_once_reached() {
        let generator = MarkovBarGenerator::new(table(), 6).unwrap();
        let bars = generator.generate_seeded(BarLimit::TotalBeats(50), Some(1)).unwrap();
        let total: u32 = bars.iter().sum();
        let without_last: u32 = bars[..bars.len() - 1].iter().sum();

        assert!(total >= 50);
        assert!(without_last < 50);
    }

    #[test]
    fn seeded_generation_is_repeatable() {
        let generator = MarkovBarGenerator::new(table(), 4).unwrap();
        let first = generator.generate_seeded(BarLimit::Count(12), Some(42)).unwrap();
        let second = generator.generate_seeded(BarLimit::Count(12), Some(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn dead_end_is_a_config_error() {
        let generator = MarkovBarGenerator::new(BTreeMap::from([(4, vec![5])]), 4).unwrap();
        let err = generator.generate_seeded(BarLimit::Count(3), Some(0)).unwrap_err();
        assert!(format!("{err}").contains("length 5"));
    }

    #[test]
    fn rotates_both_directions() {
        assert_eq!(rotate_bar_durations(&[1, 2, 3, 4], 1), vec![2, 3, 4, 1]);
        assert_eq!(rotate_bar_durations(&[1, 2, 3, 4], -1), vec![4, 1, 2, 3]);
        assert_eq!(rotate_bar_durations(&[1, 2, 3, 4], 6), vec![3, 4, 1, 2]);
        assert!(rotate_bar_durations(&[], 3).is_empty());
    }

    #[test]
    fn rescales_by_exactly_one_rule() {
        assert_eq!(rescale_bar_durations(&[4, 6], Some(-5), None).unwrap(), vec![1, 1]);
        assert_eq!(rescale_bar_durations(&[4, 6], Some(2), None).unwrap(), vec![6, 8]);
        assert_eq!(rescale_bar_durations(&[4, 5], None, Some(1.5)).unwrap(), vec![6, 8]);
        assert!(rescale_bar_durations(&[4], Some(1), Some(2.0)).is_err());
        assert!(rescale_bar_durations(&[4], None, None).is_err());
    }
}
