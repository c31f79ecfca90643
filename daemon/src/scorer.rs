//! Simulated diagnostic scoring
//!
//! Produces a benign/malignant/suspicious probability triple for an input and
//! picks the label by arg-max. Nothing about the input's content is read; the
//! result is a pure function of the injected random source.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::clock;
use crate::config::ScoringConfig;
use crate::intake::InputFile;

/// Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    Benign,
    Malignant,
    Suspicious,
}

impl Prediction {
    pub const ALL: [Prediction; 3] = [Prediction::Benign, Prediction::Malignant, Prediction::Suspicious];

    pub fn as_str(&self) -> &'static str {
        match self {
            Prediction::Benign => "benign",
            Prediction::Malignant => "malignant",
            Prediction::Suspicious => "suspicious",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Prediction::Benign => "Benign",
            Prediction::Malignant => "Malignant",
            Prediction::Suspicious => "Suspicious",
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Class probabilities on the percent scale.
///
/// `suspicious` is derived as the remainder and goes negative whenever the
/// benign and malignant draws sum above one. It is reported as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub benign: f64,
    pub malignant: f64,
    pub suspicious: f64,
}

impl Probabilities {
    pub fn as_array(&self) -> [f64; 3] {
        [self.benign, self.malignant, self.suspicious]
    }

    pub fn sum(&self) -> f64 {
        self.benign + self.malignant + self.suspicious
    }

    pub fn get(&self, class: Prediction) -> f64 {
        match class {
            Prediction::Benign => self.benign,
            Prediction::Malignant => self.malignant,
            Prediction::Suspicious => self.suspicious,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub filename: String,
    pub prediction: Prediction,
    /// Winning probability, percent.
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub timestamp: String,
    /// Simulated regions of interest; empty for benign results.
    #[serde(default)]
    pub areas: Vec<SuspiciousArea>,
}

impl ClassificationResult {
    /// False when the remainder class came out negative.
    pub fn is_distribution_valid(&self) -> bool {
        self.probabilities.as_array().iter().all(|p| (0.0..=100.0).contains(p))
    }
}

/// A simulated region of interest, positioned in percent of the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    #[serde(rename = "type")]
    pub kind: Prediction,
}

const AREA_ORIGIN: std::ops::Range<f64> = 10.0..70.0;
const AREA_EXTENT: std::ops::Range<f64> = 10.0..25.0;
const AREA_CONFIDENCE: std::ops::Range<f64> = 60.0..100.0;

/// Regions to highlight for a prediction: 2-4 for malignant, 1-2 for
/// suspicious, none for benign. Each region carries the prediction as its type.
pub fn suspicious_areas<R: Rng>(prediction: Prediction, rng: &mut R) -> Vec<SuspiciousArea> {
    let count = match prediction {
        Prediction::Benign => 0,
        Prediction::Malignant => rng.random_range(2..=4),
        Prediction::Suspicious => rng.random_range(1..=2),
    };
    (0..count)
        .map(|_| SuspiciousArea {
            x: rng.random_range(AREA_ORIGIN),
            y: rng.random_range(AREA_ORIGIN),
            width: rng.random_range(AREA_EXTENT),
            height: rng.random_range(AREA_EXTENT),
            confidence: rng.random_range(AREA_CONFIDENCE),
            kind: prediction,
        })
        .collect()
}

/// Arg-max over the three fractions. Strict `>` keeps the earlier class on ties.
pub fn select_prediction(benign: f64, malignant: f64, suspicious: f64) -> (Prediction, f64) {
    let mut best = (Prediction::Benign, benign);
    for (class, value) in [(Prediction::Malignant, malignant), (Prediction::Suspicious, suspicious)] {
        if value > best.1 {
            best = (class, value);
        }
    }
    best
}

/// Seam between an analysis run and whatever produces its per-item result.
pub trait Scorer: Send {
    fn score(&mut self, input: &InputFile) -> ClassificationResult;
}

#[derive(Debug, Clone, Default)]
pub struct ScoreSimulator {
    ranges: ScoringConfig,
}

impl ScoreSimulator {
    pub fn new(ranges: ScoringConfig) -> Self {
        Self { ranges }
    }

    pub fn classify<R: Rng>(&self, input: &InputFile, rng: &mut R) -> ClassificationResult {
        let benign = rng.random_range(self.ranges.benign_min..self.ranges.benign_max);
        let malignant = rng.random_range(self.ranges.malignant_min..self.ranges.malignant_max);
        let suspicious = 1.0 - benign - malignant;

        let (prediction, top) = select_prediction(benign, malignant, suspicious);
        if suspicious < 0.0 {
            debug!(file = %input.name, benign, malignant, suspicious, "remainder class is negative");
        }

        ClassificationResult {
            filename: input.name.clone(),
            prediction,
            confidence: top * 100.0,
            probabilities: Probabilities {
                benign: benign * 100.0,
                malignant: malignant * 100.0,
                suspicious: suspicious * 100.0,
            },
            timestamp: clock::local_timestamp(),
            areas: suspicious_areas(prediction, rng),
        }
    }

    /// Binds this simulator to a random source.
    pub fn with_rng<R: Rng + Send>(self, rng: R) -> SeededScorer<R> {
        SeededScorer { simulator: self, rng }
    }
}

pub struct SeededScorer<R> {
    simulator: ScoreSimulator,
    rng: R,
}

impl<R: Rng + Send> Scorer for SeededScorer<R> {
    fn score(&mut self, input: &InputFile) -> ClassificationResult {
        self.simulator.classify(input, &mut self.rng)
    }
}
