//! Dictionary and pattern based entity recognizer.

use crate::collaborators::{RecognitionError, Recognizer};
use crate::document::{Entity, EntityCategory};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

const TERM_CONFIDENCE: f32 = 0.85;
const PATTERN_CONFIDENCE: f32 = 0.8;

const DEFAULT_TERMS: &[(&str, EntityCategory)] = &[
    ("acetaminophen", EntityCategory::Medication),
    ("amoxicillin", EntityCategory::Medication),
    ("aspirin", EntityCategory::Medication),
    ("atorvastatin", EntityCategory::Medication),
    ("ibuprofen", EntityCategory::Medication),
    ("insulin", EntityCategory::Medication),
    ("lisinopril", EntityCategory::Medication),
    ("metformin", EntityCategory::Medication),
    ("paracetamol", EntityCategory::Medication),
    ("warfarin", EntityCategory::Medication),
    ("asthma", EntityCategory::Diagnosis),
    ("diabetes", EntityCategory::Diagnosis),
    ("type 2 diabetes", EntityCategory::Diagnosis),
    ("fever", EntityCategory::Diagnosis),
    ("fracture", EntityCategory::Diagnosis),
    ("hypertension", EntityCategory::Diagnosis),
    ("infection", EntityCategory::Diagnosis),
    ("migraine", EntityCategory::Diagnosis),
    ("pneumonia", EntityCategory::Diagnosis),
    ("biopsy", EntityCategory::Procedure),
    ("blood test", EntityCategory::Procedure),
    ("ct scan", EntityCategory::Procedure),
    ("ecg", EntityCategory::Procedure),
    ("mri", EntityCategory::Procedure),
    ("surgery", EntityCategory::Procedure),
    ("vaccination", EntityCategory::Procedure),
    ("x-ray", EntityCategory::Procedure),
    ("abdomen", EntityCategory::BodyPart),
    ("brain", EntityCategory::BodyPart),
    ("chest", EntityCategory::BodyPart),
    ("heart", EntityCategory::BodyPart),
    ("kidney", EntityCategory::BodyPart),
    ("knee", EntityCategory::BodyPart),
    ("liver", EntityCategory::BodyPart),
    ("lung", EntityCategory::BodyPart),
    ("clinic", EntityCategory::Organization),
    ("hospital", EntityCategory::Organization),
];

const DEFAULT_PATTERNS: &[(&str, EntityCategory)] = &[
    (r"\b\d{4}-\d{2}-\d{2}\b", EntityCategory::Date),
    (r"\b\d{1,2}/\d{1,2}/\d{2,4}\b", EntityCategory::Date),
    (
        r"\b\d+(?:\.\d+)?\s?(?:mg|mcg|ml|g|units?)\b",
        EntityCategory::Quantity,
    ),
    (r"\$\d+(?:,\d{3})*(?:\.\d{2})?", EntityCategory::Money),
    (r"\b(?:Dr|Doctor|Nurse)\.?\s+[A-Z][a-z]+", EntityCategory::Person),
];

/// Recognizes entities by whole-word, case-insensitive vocabulary matches and a small set
/// of patterns for dates, quantities, money, and titled names.
pub struct LexiconRecognizer {
    terms: Option<Regex>,
    categories: HashMap<String, EntityCategory>,
    patterns: Vec<(Regex, EntityCategory)>,
}

impl LexiconRecognizer {
    /// Build a recognizer over `terms` and `patterns`.
    pub fn new(
        terms: &[(&str, EntityCategory)],
        patterns: &[(&str, EntityCategory)],
    ) -> Result<Self, regex::Error> {
        let categories: HashMap<String, EntityCategory> = terms
            .iter()
            .map(|(term, category)| (term.to_lowercase(), *category))
            .collect();

        let mut ordered: Vec<&String> = categories.keys().collect();
        // Longest first so multi-word terms win over their prefixes.
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let terms = if ordered.is_empty() {
            None
        } else {
            let alternation = ordered
                .iter()
                .map(|term| regex::escape(term))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
                    .case_insensitive(true)
                    .build()?,
            )
        };

        let patterns = patterns
            .iter()
            .map(|(pattern, category)| Regex::new(pattern).map(|regex| (regex, *category)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            terms,
            categories,
            patterns,
        })
    }

    fn candidates(&self, text: &str) -> Vec<Entity> {
        let mut found = Vec::new();
        if let Some(terms) = &self.terms {
            for matched in terms.find_iter(text) {
                if let Some(category) = self.categories.get(&matched.as_str().to_lowercase()) {
                    found.push(Entity {
                        text: matched.as_str().to_string(),
                        category: *category,
                        start: matched.start(),
                        end: matched.end(),
                        confidence: TERM_CONFIDENCE,
                    });
                }
            }
        }
        for (pattern, category) in &self.patterns {
            for matched in pattern.find_iter(text) {
                found.push(Entity {
                    text: matched.as_str().to_string(),
                    category: *category,
                    start: matched.start(),
                    end: matched.end(),
                    confidence: PATTERN_CONFIDENCE,
                });
            }
        }
        found
    }
}

impl Default for LexiconRecognizer {
    fn default() -> Self {
        Self::new(DEFAULT_TERMS, DEFAULT_PATTERNS).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Built-in lexicon failed to compile");
            Self {
                terms: None,
                categories: HashMap::new(),
                patterns: Vec::new(),
            }
        })
    }
}

#[async_trait]
impl Recognizer for LexiconRecognizer {
    async fn recognize(&self, text: &str) -> Result<Vec<Entity>, RecognitionError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut candidates = self.candidates(text);
        candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut entities: Vec<Entity> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let overlaps = entities
                .last()
                .is_some_and(|previous| candidate.start < previous.end);
            if !overlaps {
                entities.push(candidate);
            }
        }
        tracing::debug!(entities = entities.len(), "Recognized entities");
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matches_terms_case_insensitively_on_word_boundaries() {
        let recognizer = LexiconRecognizer::default();
        let entities = recognizer
            .recognize("Patient with Type 2 Diabetes takes Metformin; heartbeat normal.")
            .await
            .expect("recognize");

        let texts: Vec<&str> = entities.iter().map(|entity| entity.text.as_str()).collect();
        assert_eq!(texts, vec!["Type 2 Diabetes", "Metformin"]);
        assert_eq!(entities[0].category, EntityCategory::Diagnosis);
        assert_eq!(entities[1].category, EntityCategory::Medication);
        assert!(entities.iter().all(Entity::is_well_formed));
    }

    #[tokio::test]
    async fn finds_patterns_without_overlap() {
        let recognizer = LexiconRecognizer::default();
        let text = "Seen by Dr. Adams on 2024-03-01: aspirin 81 mg, copay $20.00";
        let entities = recognizer.recognize(text).await.expect("recognize");

        let categories: Vec<EntityCategory> = entities.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![
                EntityCategory::Person,
                EntityCategory::Date,
                EntityCategory::Medication,
                EntityCategory::Quantity,
                EntityCategory::Money,
            ]
        );
        for entity in &entities {
            assert_eq!(&text[entity.start..entity.end], entity.text);
        }
    }

    #[tokio::test]
    async fn empty_text_yields_no_entities() {
        let recognizer = LexiconRecognizer::default();
        assert!(recognizer.recognize("   ").await.expect("recognize").is_empty());
    }

    #[test]
    fn invalid_patterns_are_reported() {
        assert!(LexiconRecognizer::new(&[], &[("(unclosed", EntityCategory::Date)]).is_err());
    }
}
