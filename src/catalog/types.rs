//! Catalogue record definitions.
//!
//! Defines [`Dimension`] (the four weighted matching categories),
//! [`ContentKind`] (what an embeddable unit is), and the records the matching
//! engine consumes: [`SurveyQuestion`], [`ContentUnit`],
//! [`PhotographerProfile`] and [`QuizSession`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The four matching dimensions. Declaration order is the canonical order
/// used for scores, reports and storage columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    StyleEmotion,
    CommunicationPsychology,
    PurposeStory,
    Companion,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Self::StyleEmotion,
        Self::CommunicationPsychology,
        Self::PurposeStory,
        Self::Companion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StyleEmotion => "style_emotion",
            Self::CommunicationPsychology => "communication_psychology",
            Self::PurposeStory => "purpose_story",
            Self::Companion => "companion",
        }
    }

    /// Position in [`Dimension::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Self::StyleEmotion => 0,
            Self::CommunicationPsychology => 1,
            Self::PurposeStory => 2,
            Self::Companion => 3,
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "style_emotion" => Ok(Self::StyleEmotion),
            "communication_psychology" => Ok(Self::CommunicationPsychology),
            "purpose_story" => Ok(Self::PurposeStory),
            "companion" => Ok(Self::Companion),
            _ => Err(format!("unknown dimension: {s}")),
        }
    }
}

/// Kind of embeddable content. Doubles as the embedding job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// A survey choice; embedded with the text model.
    Choice,
    /// A survey image reference; embedded with the image model.
    Image,
    /// One of a photographer's four dimension descriptions; text model.
    ProfileDimension,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Choice => "choice",
            Self::Image => "image",
            Self::ProfileDimension => "profile_dimension",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "choice" => Ok(Self::Choice),
            "image" => Ok(Self::Image),
            "profile_dimension" => Ok(Self::ProfileDimension),
            _ => Err(format!("unknown content kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultiChoice,
    ImageChoice,
    Freeform,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleChoice => "single_choice",
            Self::MultiChoice => "multi_choice",
            Self::ImageChoice => "image_choice",
            Self::Freeform => "freeform",
        }
    }

    /// The content kind a question's options are stored as, if any.
    pub fn option_kind(&self) -> Option<ContentKind> {
        match self {
            Self::SingleChoice | Self::MultiChoice => Some(ContentKind::Choice),
            Self::ImageChoice => Some(ContentKind::Image),
            Self::Freeform => None,
        }
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_choice" => Ok(Self::SingleChoice),
            "multi_choice" => Ok(Self::MultiChoice),
            "image_choice" => Ok(Self::ImageChoice),
            "freeform" => Ok(Self::Freeform),
            _ => Err(format!("unknown question type: {s}")),
        }
    }
}

/// A survey question, matching the `survey_questions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub question_key: String,
    pub question_text: String,
    pub question_type: QuestionType,
    /// The dimension this question's answers feed.
    pub weight_category: Dimension,
    /// Kept for the admin UI; scoring weights are fixed per dimension.
    #[serde(default = "default_base_weight")]
    pub base_weight: f64,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_base_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// A row of `content_units`.
#[derive(Debug, Clone, Serialize)]
pub struct ContentUnit {
    pub id: String,
    pub kind: ContentKind,
    /// Question key for choices/images, photographer id for profile dimensions.
    pub owner_id: String,
    pub dimension: Option<Dimension>,
    /// Choice text, image reference or description text.
    pub source: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    /// `None` until a completed job wrote the vector; reset on every source change.
    pub embedding_generated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentUnit {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some() && self.embedding_generated_at.is_some()
    }
}

/// Editable photographer attributes plus the four dimension descriptions.
///
/// A `None` description leaves the existing unit (if any) untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotographerProfile {
    pub photographer_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub service_regions: Vec<String>,
    #[serde(default)]
    pub price_min: Option<i64>,
    #[serde(default)]
    pub price_max: Option<i64>,
    #[serde(default)]
    pub companion_types: Vec<String>,
    #[serde(default)]
    pub profile_completed: bool,
    #[serde(default)]
    pub style_emotion_description: Option<String>,
    #[serde(default)]
    pub communication_psychology_description: Option<String>,
    #[serde(default)]
    pub purpose_story_description: Option<String>,
    #[serde(default)]
    pub companion_description: Option<String>,
}

impl PhotographerProfile {
    pub fn description(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::StyleEmotion => self.style_emotion_description.as_deref(),
            Dimension::CommunicationPsychology => {
                self.communication_psychology_description.as_deref()
            }
            Dimension::PurposeStory => self.purpose_story_description.as_deref(),
            Dimension::Companion => self.companion_description.as_deref(),
        }
    }
}

/// One answer in a quiz session: a selected id, several selected ids, or
/// free text (which the vectorizer ignores).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    One(String),
    Many(Vec<String>),
}

impl Answer {
    pub fn selected(&self) -> Vec<&str> {
        match self {
            Self::One(id) => vec![id.as_str()],
            Self::Many(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// A respondent's completed quiz attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub id: String,
    pub responses: BTreeMap<String, Answer>,
    pub created_at: String,
    /// Set once a result set has been computed; responses are frozen from then on.
    pub matched_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_round_trips_through_str() {
        for d in Dimension::ALL {
            assert_eq!(d.as_str().parse::<Dimension>().unwrap(), d);
            assert_eq!(Dimension::ALL[d.index()], d);
        }
        assert!("style".parse::<Dimension>().is_err());
    }

    #[test]
    fn answer_accepts_string_or_array() {
        let one: Answer = serde_json::from_str(r#""choice-a""#).unwrap();
        assert_eq!(one.selected(), vec!["choice-a"]);

        let many: Answer = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(many.selected(), vec!["a", "b"]);
    }

    #[test]
    fn freeform_questions_have_no_option_kind() {
        assert_eq!(QuestionType::Freeform.option_kind(), None);
        assert_eq!(
            QuestionType::ImageChoice.option_kind(),
            Some(ContentKind::Image)
        );
    }
}
