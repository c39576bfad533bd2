use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::types::Dimension;

/// Fixed composite weights, one per [`Dimension`].
pub const DIMENSION_WEIGHTS: DimensionWeights = DimensionWeights {
    style_emotion: 0.40,
    communication_psychology: 0.30,
    purpose_story: 0.20,
    companion: 0.10,
};

#[derive(Debug, Clone, Copy)]
pub struct DimensionWeights {
    pub style_emotion: f64,
    pub communication_psychology: f64,
    pub purpose_story: f64,
    pub companion: f64,
}

impl DimensionWeights {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::StyleEmotion => self.style_emotion,
            Dimension::CommunicationPsychology => self.communication_psychology,
            Dimension::PurposeStory => self.purpose_story,
            Dimension::Companion => self.companion,
        }
    }

    pub fn sum(&self) -> f64 {
        self.style_emotion + self.communication_psychology + self.purpose_story + self.companion
    }
}

/// What the composite does with a dimension that is missing on either side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightingPolicy {
    /// Leave the weight out; the composite is not rescaled.
    #[default]
    Skip,
    /// Divide by the sum of the weights that were present.
    Renormalize,
}

impl WeightingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Renormalize => "renormalize",
        }
    }
}

impl std::str::FromStr for WeightingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "renormalize" => Ok(Self::Renormalize),
            _ => Err(format!("unknown weighting policy: {s}")),
        }
    }
}

/// Per-dimension scores on the 0–100 scale, indexed by [`Dimension::index`].
pub type DimensionScores = [Option<f64>; 4];

/// One ranked photographer in a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    pub photographer_id: String,
    pub style_emotion_score: Option<f64>,
    pub communication_psychology_score: Option<f64>,
    pub purpose_story_score: Option<f64>,
    pub companion_score: Option<f64>,
    pub total_score: f64,
    /// 1-based, no gaps.
    pub rank_position: u32,
}

impl MatchingResult {
    pub fn new(photographer_id: String, scores: DimensionScores, total_score: f64) -> Self {
        let [style_emotion_score, communication_psychology_score, purpose_story_score, companion_score] =
            scores;
        Self {
            photographer_id,
            style_emotion_score,
            communication_psychology_score,
            purpose_story_score,
            companion_score,
            total_score,
            rank_position: 0,
        }
    }

    pub fn score(&self, dimension: Dimension) -> Option<f64> {
        match dimension {
            Dimension::StyleEmotion => self.style_emotion_score,
            Dimension::CommunicationPsychology => self.communication_psychology_score,
            Dimension::PurposeStory => self.purpose_story_score,
            Dimension::Companion => self.companion_score,
        }
    }
}

/// Optional narrowing of the candidate set. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateFilter {
    #[serde(default)]
    pub photographer_ids: Option<Vec<String>>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub companion_type: Option<String>,
}

impl CandidateFilter {
    pub fn is_empty(&self) -> bool {
        self.photographer_ids.is_none()
            && self.region.is_none()
            && self.budget.is_none()
            && self.companion_type.is_none()
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("quiz session not found: {0}")]
    SessionNotFound(String),

    #[error("{pending} selected answers are still waiting for embeddings")]
    EmbeddingsPending { pending: usize },

    #[error("session has no usable signal in any dimension")]
    NoUsableSignal { missing: Vec<Dimension> },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
