//! Intent Classifier: text → `{schedule, knowledge}` multi-label prediction.
//!
//! Modeled as a one-operation capability trait chosen at construction time,
//! the same pattern the teacher applies to [`crate::embedding::EmbeddingProvider`]
//! (`create_provider`/`DisabledProvider`/`OpenAIProvider`), generalized here
//! to a synchronous, non-suspending trait since intent classification is
//! CPU-bound. The keyword rule set's "compiled-once `Vec` of rules,
//! scored, reduced to a label" shape is grounded on
//! `peter-hollis-orkastrate-engram/crates/engram-action/src/intent/patterns.rs`'s
//! `PatternSet`.

use std::collections::HashMap;
use std::path::Path;

use crate::models::{IntentPrediction, IntentVector};

const CONFIDENCE_THRESHOLD: f32 = 0.3;

pub trait IntentModel: Send + Sync {
    /// Label/confidence pairs for `text`. An empty result means "no
    /// opinion" (e.g. the keyword model found neither keyword set).
    fn predict(&self, text: &str) -> Vec<IntentPrediction>;
}

/// Reduce raw predictions to the two-label [`IntentVector`] using the
/// threshold/top-1-fallback rule: a label is set when its
/// confidence crosses 0.3; if predictions exist but none crosses
/// threshold, the single highest-confidence label is forced true. No
/// predictions at all (the keyword model's "neither set matched" case)
/// yields both labels false — forcing a fallback here would contradict
/// the keyword rule's explicit `knowledge = ... AND NOT schedule` shape.
pub fn classify(predictions: &[IntentPrediction]) -> IntentVector {
    if predictions.is_empty() {
        return IntentVector::default();
    }

    let mut result = IntentVector::default();
    for p in predictions {
        if p.confidence >= CONFIDENCE_THRESHOLD {
            set_label(&mut result, &p.label);
        }
    }

    if !result.schedule && !result.knowledge {
        if let Some(top) = predictions
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
        {
            set_label(&mut result, &top.label);
        }
    }

    result
}

fn set_label(vector: &mut IntentVector, label: &str) {
    match label {
        "schedule" => vector.schedule = true,
        "knowledge" => vector.knowledge = true,
        _ => {}
    }
}

// ============ Keyword fallback model ============

const SCHEDULE_KEYWORDS: &[&str] = &[
    "book",
    "schedule",
    "appointment",
    "reschedule",
    "change",
    "move",
    "make it",
    "change to",
    "rebook",
    "slot",
];

const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "what",
    "where",
    "how",
    "when",
    "why",
    "tell me",
    "policy",
    "parking",
    "hours",
    "insurance",
    "prepare",
    "bring",
    "access",
    "grace",
    "late",
    "cancellation",
    "location",
    "office",
];

/// Always-available fallback: `schedule = any(schedule set)`,
/// `knowledge = any(knowledge set) AND NOT schedule`.
pub struct KeywordIntentModel;

impl IntentModel for KeywordIntentModel {
    fn predict(&self, text: &str) -> Vec<IntentPrediction> {
        let lower = text.to_lowercase();
        let schedule_match = SCHEDULE_KEYWORDS.iter().any(|kw| lower.contains(kw));
        let knowledge_match = !schedule_match && KNOWLEDGE_KEYWORDS.iter().any(|kw| lower.contains(kw));

        let mut predictions = Vec::new();
        if schedule_match {
            predictions.push(IntentPrediction {
                label: "schedule".to_string(),
                confidence: 1.0,
            });
        }
        if knowledge_match {
            predictions.push(IntentPrediction {
                label: "knowledge".to_string(),
                confidence: 1.0,
            });
        }
        predictions
    }
}

// ============ N-gram model ============

/// Per-label logit contribution for a single unigram/bigram token:
/// `[schedule_weight, knowledge_weight]`.
type NgramWeights = HashMap<String, [f32; 2]>;

/// Shallow word n-gram classifier: sums per-token logit contributions over
/// the message's unigrams and bigrams, then softmax-normalizes into two
/// confidences. Weight table is a build artifact (`models/intent_ngrams.json`)
/// produced offline; training is out of scope here (Non-goals).
pub struct NgramIntentModel {
    weights: NgramWeights,
}

impl NgramIntentModel {
    /// Load a serialized weight table. Returns `None` if the file is
    /// absent or malformed, signaling the caller to fall back to
    /// [`KeywordIntentModel`] instead.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let weights: NgramWeights = serde_json::from_str(&content).ok()?;
        Some(Self { weights })
    }

    pub fn from_weights(weights: NgramWeights) -> Self {
        Self { weights }
    }

    fn tokens(text: &str) -> Vec<String> {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();

        let mut tokens = words.clone();
        for pair in words.windows(2) {
            tokens.push(format!("{} {}", pair[0], pair[1]));
        }
        tokens
    }
}

impl IntentModel for NgramIntentModel {
    fn predict(&self, text: &str) -> Vec<IntentPrediction> {
        let mut logits = [0.0f32, 0.0f32];
        for token in Self::tokens(text) {
            if let Some(weights) = self.weights.get(&token) {
                logits[0] += weights[0];
                logits[1] += weights[1];
            }
        }

        let max_logit = logits[0].max(logits[1]);
        let exp_schedule = (logits[0] - max_logit).exp();
        let exp_knowledge = (logits[1] - max_logit).exp();
        let denom = exp_schedule + exp_knowledge;

        let mut predictions = vec![
            IntentPrediction {
                label: "schedule".to_string(),
                confidence: exp_schedule / denom,
            },
            IntentPrediction {
                label: "knowledge".to_string(),
                confidence: exp_knowledge / denom,
            },
        ];
        predictions.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        predictions
    }
}
