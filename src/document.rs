//! Work item records and the values derived from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Free-form metadata attached to a submission.
pub type Metadata = Map<String, Value>;

/// Lifecycle of a work item: `Pending -> Processing -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Accepted, not yet started.
    Pending,
    /// Stages are running.
    Processing,
    /// Every stage succeeded.
    Completed,
    /// A stage failed terminally.
    Failed,
}

impl DocumentStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Rejected lifecycle change.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Status the item was in.
    pub from: DocumentStatus,
    /// Status that was requested.
    pub to: DocumentStatus,
}

/// Entity categories recognized in medical and general text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityCategory {
    /// Drugs and other administered substances.
    Medication,
    /// Procedures, treatments, and devices.
    Procedure,
    /// Diseases, conditions, and symptoms.
    Diagnosis,
    /// Anatomical sites.
    BodyPart,
    /// Hospitals, clinics, and other organizations.
    Organization,
    /// Patients, clinicians, and other people.
    Person,
    /// Calendar dates.
    Date,
    /// Monetary amounts.
    Money,
    /// Places.
    Location,
    /// Measured amounts and doses.
    Quantity,
}

/// Span of source text tagged with a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Matched text.
    pub text: String,
    /// Assigned category.
    pub category: EntityCategory,
    /// Byte offset of the first character in the extracted text.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    /// Recognizer confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Entity {
    /// Non-empty text, `end > start`, and a confidence inside `[0, 1]`.
    pub fn is_well_formed(&self) -> bool {
        !self.text.trim().is_empty()
            && self.end > self.start
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Raw document handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Original file name, used for type detection.
    pub filename: String,
    /// Optional MIME type declared by the uploader.
    pub content_type: Option<String>,
    /// Document bytes.
    pub content: Vec<u8>,
}

impl SourceDocument {
    /// Build a source from a file name and its bytes.
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            content: content.into(),
        }
    }

    /// Attach a declared MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Lowercase extension including the leading dot, or an empty string.
    pub fn extension(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default()
    }

    /// Declared size in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// A submitted document and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque identifier, fixed at creation.
    pub id: String,
    /// Source file name.
    pub filename: String,
    /// Lowercase extension of the source file.
    pub file_type: String,
    /// Declared size of the source in bytes.
    pub file_size: u64,
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last modification time, never earlier than `created_at`.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Text produced by the extraction stage.
    pub extracted_text: Option<String>,
    /// Extraction confidence in `[0, 1]`.
    pub extraction_confidence: Option<f32>,
    /// Entities ordered by start offset.
    pub entities: Vec<Entity>,
    /// Always `entities.len()`.
    pub entity_count: usize,
    /// Reference returned by the indexing stage.
    pub index_ref: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Option<Metadata>,
    /// Seconds spent processing, recorded on completion or failure.
    pub processing_time: Option<f64>,
    /// Failure description, present exactly when `status` is `Failed`.
    pub error_message: Option<String>,
}

impl WorkItem {
    /// Create a pending item describing `source`.
    pub fn pending(
        id: String,
        source: &SourceDocument,
        metadata: Option<Metadata>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            filename: source.filename.clone(),
            file_type: source.extension(),
            file_size: source.size(),
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
            extracted_text: None,
            extraction_confidence: None,
            entities: Vec::new(),
            entity_count: 0,
            index_ref: None,
            metadata,
            processing_time: None,
            error_message: None,
        }
    }

    /// Move to `Processing`.
    pub fn begin_processing(&mut self, now: OffsetDateTime) -> Result<(), InvalidTransition> {
        self.transition(DocumentStatus::Processing, now)
    }

    /// Store the extraction stage's output.
    pub fn record_extraction(&mut self, text: String, confidence: f32, now: OffsetDateTime) {
        self.extracted_text = Some(text);
        self.extraction_confidence = Some(confidence.clamp(0.0, 1.0));
        self.touch(now);
    }

    /// Store recognized entities, keeping `entity_count` in step.
    pub fn record_entities(&mut self, mut entities: Vec<Entity>, now: OffsetDateTime) {
        entities.sort_by_key(|entity| (entity.start, entity.end));
        self.entity_count = entities.len();
        self.entities = entities;
        self.touch(now);
    }

    /// Move to `Completed` with the index reference and elapsed time.
    pub fn complete(
        &mut self,
        index_ref: String,
        elapsed: Duration,
        now: OffsetDateTime,
    ) -> Result<(), InvalidTransition> {
        let has_text = self
            .extracted_text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        if !has_text {
            return Err(InvalidTransition {
                from: self.status,
                to: DocumentStatus::Completed,
            });
        }
        self.transition(DocumentStatus::Completed, now)?;
        self.index_ref = Some(index_ref);
        self.processing_time = Some(elapsed.as_secs_f64());
        Ok(())
    }

    /// Move to `Failed`, recording the failure verbatim and the time spent so far.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        elapsed: Duration,
        now: OffsetDateTime,
    ) -> Result<(), InvalidTransition> {
        self.transition(DocumentStatus::Failed, now)?;
        let message = error.into();
        self.error_message = Some(if message.trim().is_empty() {
            "processing failed".to_string()
        } else {
            message
        });
        self.processing_time = Some(elapsed.as_secs_f64());
        Ok(())
    }

    /// Text fed to the indexer: extracted text followed by entity labels.
    pub fn index_text(&self) -> String {
        let mut text = self.extracted_text.clone().unwrap_or_default();
        for entity in &self.entities {
            text.push('\n');
            text.push_str(&entity.text);
        }
        text
    }

    fn transition(
        &mut self,
        next: DocumentStatus,
        now: OffsetDateTime,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now.max(self.created_at);
    }
}

/// Document paired with a similarity score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Matching item.
    pub document: WorkItem,
    /// Similarity score, higher is closer.
    pub score: f32,
}

/// Aggregates computed from the live document store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    /// Items in the store.
    pub total: usize,
    /// Items in `Completed`.
    pub completed: usize,
    /// Items in `Failed`.
    pub failed: usize,
    /// Sum of entity counts.
    pub total_entities: usize,
    /// Entities per category.
    pub entity_types: BTreeMap<EntityCategory, usize>,
    /// Mean processing time in seconds over every item that recorded one, failed items
    /// included. Zero when no item has recorded a time.
    pub average_processing_time: f64,
}

impl Statistics {
    /// Aggregate over `items`.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        let mut stats = Self::default();
        let mut timed = 0usize;
        let mut total_time = 0.0;
        for item in items {
            stats.total += 1;
            match item.status {
                DocumentStatus::Completed => stats.completed += 1,
                DocumentStatus::Failed => stats.failed += 1,
                _ => {}
            }
            stats.total_entities += item.entity_count;
            for entity in &item.entities {
                *stats.entity_types.entry(entity.category).or_default() += 1;
            }
            if let Some(seconds) = item.processing_time {
                timed += 1;
                total_time += seconds;
            }
        }
        if stats.completed > 0 && timed > 0 {
            stats.average_processing_time = total_time / timed as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItem {
        let source = SourceDocument::new("Note.TXT", b"patient note".to_vec());
        WorkItem::pending("doc-1".into(), &source, None, OffsetDateTime::UNIX_EPOCH)
    }

    fn entity(category: EntityCategory, start: usize) -> Entity {
        Entity {
            text: "aspirin".into(),
            category,
            start,
            end: start + 7,
            confidence: 0.9,
        }
    }

    #[test]
    fn pending_item_describes_source() {
        let item = item();
        assert_eq!(item.file_type, ".txt");
        assert_eq!(item.file_size, 12);
        assert_eq!(item.status, DocumentStatus::Pending);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut item = item();
        let now = OffsetDateTime::UNIX_EPOCH;
        item.begin_processing(now).expect("pending -> processing");
        item.record_extraction("patient note".into(), 0.9, now);
        item.complete("vec-1".into(), Duration::from_millis(5), now)
            .expect("processing -> completed");

        assert_eq!(
            item.fail("late", Duration::ZERO, now),
            Err(InvalidTransition {
                from: DocumentStatus::Completed,
                to: DocumentStatus::Failed,
            })
        );
        assert!(item.begin_processing(now).is_err());
        assert_eq!(item.status, DocumentStatus::Completed);
    }

    #[test]
    fn completion_requires_extracted_text() {
        let mut item = item();
        let now = OffsetDateTime::UNIX_EPOCH;
        item.begin_processing(now).expect("start");
        item.record_extraction("   ".into(), 0.4, now);
        assert!(item.complete("vec".into(), Duration::ZERO, now).is_err());
        assert_eq!(item.status, DocumentStatus::Processing);
    }

    #[test]
    fn failure_always_carries_a_message() {
        let mut item = item();
        let now = OffsetDateTime::UNIX_EPOCH;
        item.fail("", Duration::ZERO, now).expect("pending -> failed");
        assert_eq!(item.error_message.as_deref(), Some("processing failed"));
    }

    #[test]
    fn entity_count_tracks_entities() {
        let mut item = item();
        item.record_entities(
            vec![
                entity(EntityCategory::Medication, 10),
                entity(EntityCategory::Diagnosis, 0),
            ],
            OffsetDateTime::UNIX_EPOCH,
        );
        assert_eq!(item.entity_count, 2);
        assert_eq!(item.entities[0].start, 0);
    }

    #[test]
    fn updated_never_precedes_created() {
        let mut item = item();
        item.begin_processing(OffsetDateTime::UNIX_EPOCH - Duration::from_secs(5))
            .expect("start");
        assert!(item.updated_at >= item.created_at);
    }

    #[test]
    fn statistics_aggregate_entities_and_times() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut done = item();
        done.begin_processing(now).expect("start");
        done.record_extraction("text".into(), 1.0, now);
        done.record_entities(
            vec![
                entity(EntityCategory::Medication, 0),
                entity(EntityCategory::Medication, 20),
            ],
            now,
        );
        done.complete("v".into(), Duration::from_secs(2), now).expect("complete");

        let mut failed = item();
        failed.fail("boom", Duration::from_secs(4), now).expect("fail");

        let stats = Statistics::from_items([&done, &failed]);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_entities, 2);
        assert_eq!(stats.entity_types.get(&EntityCategory::Medication), Some(&2));
        assert!((stats.average_processing_time - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_entities_are_detected() {
        let mut bad = entity(EntityCategory::Date, 4);
        bad.end = 4;
        assert!(!bad.is_well_formed());
        assert!(entity(EntityCategory::Date, 4).is_well_formed());
    }
}
