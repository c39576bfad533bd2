//! Quiz answers → one vector per dimension.
//!
//! Selected options are resolved against the answered question's own units;
//! a multi-select answer is the plain mean of its available vectors, and a
//! dimension vector is the mean of its question vectors. Units without a
//! current embedding are counted as pending and left out. A dimension with
//! nothing usable stays `None`, as does one whose text vectors come from more
//! than one embedding model.

use std::collections::{BTreeSet, HashMap};

use super::similarity::mean;
use crate::catalog::types::{ContentUnit, Dimension, QuizSession, SurveyQuestion};

/// Derived per-session vectors; never persisted.
#[derive(Debug, Clone, Default)]
pub struct SessionVectors {
    /// Indexed by [`Dimension::index`].
    pub dimensions: [Option<Vec<f32>>; 4],
    /// Embedding model of the text units behind each dimension vector.
    /// `None` when only image units contributed.
    pub models: [Option<String>; 4],
    /// Selected units that exist but have no current embedding yet.
    pub pending_units: usize,
}

impl SessionVectors {
    pub fn get(&self, dimension: Dimension) -> Option<&[f32]> {
        self.dimensions[dimension.index()].as_deref()
    }

    pub fn model(&self, dimension: Dimension) -> Option<&str> {
        self.models[dimension.index()].as_deref()
    }

    /// Dimensions this session carries no signal for.
    pub fn missing(&self) -> Vec<Dimension> {
        Dimension::ALL
            .into_iter()
            .filter(|d| self.get(*d).is_none())
            .collect()
    }

    pub fn has_signal(&self) -> bool {
        self.dimensions.iter().any(Option::is_some)
    }
}

/// Vectorize a session.
///
/// `questions` is keyed by question key, `options` by unit id.
pub fn vectorize(
    session: &QuizSession,
    questions: &HashMap<String, SurveyQuestion>,
    options: &HashMap<String, ContentUnit>,
) -> SessionVectors {
    let mut per_dimension: [Vec<Vec<f32>>; 4] = Default::default();
    let mut text_models: [BTreeSet<String>; 4] = Default::default();
    let mut pending_units = 0;

    for (question_key, answer) in &session.responses {
        let Some(question) = questions.get(question_key) else {
            tracing::debug!(session = %session.id, question = %question_key, "answer to unknown question ignored");
            continue;
        };
        let Some(kind) = question.question_type.option_kind() else {
            continue;
        };

        let mut selected: Vec<&[f32]> = Vec::new();
        for option_id in answer.selected() {
            let Some(unit) = options
                .get(option_id)
                .filter(|u| u.owner_id == *question_key && u.kind == kind)
            else {
                tracing::debug!(session = %session.id, question = %question_key, option = option_id, "unknown option ignored");
                continue;
            };
            match unit.embedding.as_deref() {
                Some(v) if unit.has_embedding() => {
                    selected.push(v);
                    if let (false, Some(model)) = (unit.kind.is_image(), &unit.embedding_model) {
                        text_models[question.weight_category.index()].insert(model.clone());
                    }
                }
                _ => {
                    tracing::debug!(unit = %unit.id, "stale embedding excluded");
                    pending_units += 1;
                }
            }
        }

        if let Some(question_vector) = mean(&selected) {
            per_dimension[question.weight_category.index()].push(question_vector);
        }
    }

    let mut vectors = SessionVectors {
        pending_units,
        ..Default::default()
    };
    for dimension in Dimension::ALL {
        let i = dimension.index();
        let models = &text_models[i];
        if models.len() > 1 {
            tracing::warn!(
                session = %session.id,
                dimension = %dimension,
                models = ?models,
                "answers embedded by different models, dimension ignored (run `lensmatch reembed`)"
            );
            continue;
        }
        let refs: Vec<&[f32]> = per_dimension[i].iter().map(Vec::as_slice).collect();
        vectors.dimensions[i] = mean(&refs);
        vectors.models[i] = models.first().cloned();
    }
    vectors
}
