use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};
use uuid::Uuid;

use crate::{
    error::StoreError,
    knowledge::KnowledgeCard,
    types::{
        AnalysisOutput, Concept, FlashCard, ImportantMoment, KeyPoint, QuizQuestion, Summary,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub language: String,
    pub transcript: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Video metadata known before the workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysis {
    pub filename: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub source_url: Option<String>,

    pub transcript: String,
    pub topic: String,
    pub learning_objective: String,
    pub important_moments: Vec<ImportantMoment>,
    pub summary: Summary,
    pub key_points: Vec<KeyPoint>,
    pub quiz: Vec<QuizQuestion>,
    pub flash_cards: Vec<FlashCard>,
    pub concepts: Vec<Concept>,
    pub popular_knowledge_cards: Vec<KnowledgeCard>,

    pub translations: Vec<Translation>,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    fn new(id: Uuid, meta: NewAnalysis) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: meta.filename,
            original_name: meta.original_name,
            size_bytes: meta.size_bytes,
            mime_type: meta.mime_type,
            source_url: meta.source_url,
            transcript: String::new(),
            topic: String::new(),
            learning_objective: String::new(),
            important_moments: Vec::new(),
            summary: Summary::default(),
            key_points: Vec::new(),
            quiz: Vec::new(),
            flash_cards: Vec::new(),
            concepts: Vec::new(),
            popular_knowledge_cards: Vec::new(),
            translations: Vec::new(),
            processing_status: ProcessingStatus::Processing,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, update: AnalysisUpdate) {
        match update {
            AnalysisUpdate::Status(status) => self.processing_status = status,
            AnalysisUpdate::Completed(output) => {
                let AnalysisOutput {
                    transcript,
                    topic,
                    learning_objective,
                    important_moments,
                    summary,
                    key_points,
                    quiz,
                    flash_cards,
                    concepts,
                    popular_knowledge_cards,
                } = *output;
                self.transcript = transcript;
                self.topic = topic;
                self.learning_objective = learning_objective;
                self.important_moments = important_moments;
                self.summary = summary;
                self.key_points = key_points;
                self.quiz = quiz;
                self.flash_cards = flash_cards;
                self.concepts = concepts;
                self.popular_knowledge_cards = popular_knowledge_cards;
                self.processing_status = ProcessingStatus::Completed;
                self.error_message = None;
            }
            AnalysisUpdate::Failed { message } => {
                self.processing_status = ProcessingStatus::Failed;
                self.error_message = Some(message);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Existing translation for `language`, compared case-insensitively
    /// (Unicode lowercase, so "Español" and "ESPAÑOL" are one language).
    pub fn translation(&self, language: &str) -> Option<&Translation> {
        let wanted = language.trim().to_lowercase();
        self.translations
            .iter()
            .find(|t| t.language.trim().to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisUpdate {
    Status(ProcessingStatus),
    Completed(Box<AnalysisOutput>),
    Failed { message: String },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, meta: NewAnalysis) -> Result<AnalysisRecord, StoreError>;
    async fn update(&self, id: Uuid, update: AnalysisUpdate)
    -> Result<AnalysisRecord, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn list(&self) -> Result<Vec<AnalysisRecord>, StoreError>;

    /// Append unless a translation for the same language (any case) exists,
    /// in which case the existing entry is returned untouched.
    async fn append_translation(
        &self,
        id: Uuid,
        translation: Translation,
    ) -> Result<Translation, StoreError>;
}

/// Filter/sort/limit for popular cards: `frequency >= min_frequency`, ordered
/// by importance score, then frequency, both descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardQuery {
    pub min_frequency: u32,
    pub limit: usize,
}

pub type CardMutator<'a> = &'a (dyn Fn(Option<KnowledgeCard>) -> KnowledgeCard + Send + Sync);

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn find(&self, query: &CardQuery) -> Result<Vec<KnowledgeCard>, StoreError>;
    async fn get(&self, concept: &str) -> Result<Option<KnowledgeCard>, StoreError>;

    /// Atomic read-modify-write of a single card.
    async fn upsert(
        &self,
        concept: &str,
        mutate: CardMutator<'_>,
    ) -> Result<KnowledgeCard, StoreError>;
}

/// In-memory store with optional write-through JSON persistence.
///
/// Layout under the data directory: `analyses/<id>.json` and `knowledge.json`.
pub struct JsonStore {
    root: Option<PathBuf>,
    records: Mutex<HashMap<Uuid, AnalysisRecord>>,
    cards: Mutex<HashMap<String, KnowledgeCard>>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            records: Mutex::new(HashMap::new()),
            cards: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or create) a store rooted at `dir`, loading whatever is there.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = dir.as_ref().to_path_buf();
        let analyses_dir = root.join("analyses");
        fs::create_dir_all(&analyses_dir).await?;

        let mut records = HashMap::new();
        let mut entries = fs::read_dir(&analyses_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: AnalysisRecord = serde_json::from_str(&fs::read_to_string(&path).await?)?;
            records.insert(record.id, record);
        }

        let knowledge_path = root.join("knowledge.json");
        let cards = if fs::try_exists(&knowledge_path).await? {
            let list: Vec<KnowledgeCard> =
                serde_json::from_str(&fs::read_to_string(&knowledge_path).await?)?;
            list.into_iter().map(|c| (c.concept.clone(), c)).collect()
        } else {
            HashMap::new()
        };

        tracing::debug!(
            dir = %root.display(),
            analyses = records.len(),
            cards = cards.len(),
            "Opened store"
        );

        Ok(Self {
            root: Some(root),
            records: Mutex::new(records),
            cards: Mutex::new(cards),
        })
    }

    fn record_path(&self, id: Uuid) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|r| r.join("analyses").join(format!("{id}.json")))
    }

    async fn persist_record(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        if let Some(path) = self.record_path(record.id) {
            write_atomic(&path, &serde_json::to_vec_pretty(record)?).await?;
        }
        Ok(())
    }

    async fn persist_cards(&self, cards: &HashMap<String, KnowledgeCard>) -> Result<(), StoreError> {
        if let Some(root) = &self.root {
            let mut list: Vec<&KnowledgeCard> = cards.values().collect();
            list.sort_by(|a, b| a.concept.cmp(&b.concept));
            write_atomic(&root.join("knowledge.json"), &serde_json::to_vec_pretty(&list)?).await?;
        }
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl RecordStore for JsonStore {
    async fn create(&self, meta: NewAnalysis) -> Result<AnalysisRecord, StoreError> {
        let record = AnalysisRecord::new(Uuid::new_v4(), meta);
        let mut records = self.records.lock().await;
        self.persist_record(&record).await?;
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        id: Uuid,
        update: AnalysisUpdate,
    ) -> Result<AnalysisRecord, StoreError> {
        let mut records = self.records.lock().await;
        let mut record = records.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        record.apply(update);
        self.persist_record(&record).await?;
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if records.remove(&id).is_none() {
            return Ok(false);
        }
        if let Some(path) = self.record_path(id) {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut list: Vec<AnalysisRecord> = self.records.lock().await.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn append_translation(
        &self,
        id: Uuid,
        translation: Translation,
    ) -> Result<Translation, StoreError> {
        let mut records = self.records.lock().await;
        let mut record = records.get(&id).cloned().ok_or(StoreError::NotFound(id))?;

        if let Some(existing) = record.translation(&translation.language) {
            return Ok(existing.clone());
        }

        record.translations.push(translation.clone());
        record.updated_at = Utc::now();
        self.persist_record(&record).await?;
        records.insert(id, record);
        Ok(translation)
    }
}

#[async_trait]
impl KnowledgeStore for JsonStore {
    async fn find(&self, query: &CardQuery) -> Result<Vec<KnowledgeCard>, StoreError> {
        let cards = self.cards.lock().await;
        let mut matching: Vec<KnowledgeCard> = cards
            .values()
            .filter(|c| c.frequency >= query.min_frequency)
            .cloned()
            .collect();
        drop(cards);

        matching.sort_by(|a, b| {
            b.importance_score
                .cmp(&a.importance_score)
                .then(b.frequency.cmp(&a.frequency))
                .then_with(|| a.concept.cmp(&b.concept))
        });
        matching.truncate(query.limit);
        Ok(matching)
    }

    async fn get(&self, concept: &str) -> Result<Option<KnowledgeCard>, StoreError> {
        Ok(self.cards.lock().await.get(concept).cloned())
    }

    async fn upsert(
        &self,
        concept: &str,
        mutate: CardMutator<'_>,
    ) -> Result<KnowledgeCard, StoreError> {
        // one lock for the whole collection serialises read-modify-write per key
        let mut cards = self.cards.lock().await;
        let previous = cards.get(concept).cloned();
        let updated = mutate(previous.clone());
        cards.insert(concept.to_string(), updated.clone());

        if let Err(e) = self.persist_cards(&cards).await {
            // keep memory and disk in step: undo the in-memory write
            match previous {
                Some(card) => cards.insert(concept.to_string(), card),
                None => cards.remove(concept),
            };
            return Err(e);
        }
        Ok(updated)
    }
}
