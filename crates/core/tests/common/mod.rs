#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use vidlearn_core::{
    CardQuery, EngineConfig, JsonStore, KnowledgeCard, KnowledgeStore, RetryPolicy,
    error::{ProviderError, StoreError},
    provider::{AiProvider, FileState, Part, ProviderFile},
    source::{FetchError, SourceFetcher},
    store::CardMutator,
};

pub const UNDERSTAND: &str = "understand";
pub const SUMMARIZE: &str = "summarize";
pub const KEY_POINTS: &str = "key_points";
pub const QUIZ: &str = "quiz";
pub const FLASH_CARDS: &str = "flash_cards";
pub const CONCEPTS: &str = "concepts";

#[derive(Clone)]
pub enum Reply {
    Json(String),
    Fail { status: u16, message: &'static str },
    Hang,
}

/// Provider fake that answers each prompt kind from a script.
pub struct ScriptedProvider {
    pub replies: Mutex<HashMap<&'static str, Reply>>,
    pub processing_polls: usize,
    pub register_error: Option<&'static str>,
    pub probe_error: bool,
    pub registrations: AtomicUsize,
    pub status_checks: AtomicUsize,
    pub probes: AtomicUsize,
    pub generations: Mutex<Vec<&'static str>>,
}

impl ScriptedProvider {
    pub fn lesson() -> Self {
        let replies = HashMap::from([
            (UNDERSTAND, Reply::Json(understanding_json())),
            (
                SUMMARIZE,
                Reply::Json(
                    r#"{"summary": "Recursion solves a problem through smaller copies of itself.", "tldr": "Functions that call themselves."}"#
                        .to_string(),
                ),
            ),
            (
                KEY_POINTS,
                Reply::Json(
                    r#"[{"point": "Base case", "explanation": "Stops the recursion", "timestamp": "01:10", "importance": 9},
                        {"point": "Call stack", "explanation": "Each call gets a frame", "timestamp": null, "importance": 3}]"#
                        .to_string(),
                ),
            ),
            (
                QUIZ,
                Reply::Json(
                    r#"[{"question": "What stops recursion?", "options": ["Base case", "Loop", "Stack", "Heap"], "correct_answer": 0, "explanation": "The base case returns directly", "timestamp": "01:10"}]"#
                        .to_string(),
                ),
            ),
            (
                FLASH_CARDS,
                Reply::Json(
                    r#"[{"front": "Recursion", "back": "A function calling itself", "category": "definition"}]"#
                        .to_string(),
                ),
            ),
            (
                CONCEPTS,
                Reply::Json(
                    r#"[{"name": "Recursion", "frequency": 6, "context": "Main technique"},
                        {"name": "Call Stack", "frequency": 2, "context": "Where frames live"}]"#
                        .to_string(),
                ),
            ),
        ]);

        Self {
            replies: Mutex::new(replies),
            processing_polls: 0,
            register_error: None,
            probe_error: false,
            registrations: AtomicUsize::new(0),
            status_checks: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            generations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, kind: &'static str, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(kind, reply);
        self
    }

    pub fn generated(&self, kind: &str) -> usize {
        self.generations
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == kind)
            .count()
    }
}

pub fn understanding_json() -> String {
    r#"{
        "transcript": "Today we learn recursion. A recursive function calls itself until it reaches a base case.",
        "topic": "Recursion",
        "learning_objective": "Write a recursive function with a base case",
        "important_moments": [
            {"timestamp": "01:10", "description": "Base case explained", "type": "definition"}
        ]
    }"#
    .to_string()
}

fn prompt_kind(parts: &[Part]) -> &'static str {
    if parts.iter().any(|p| matches!(p, Part::File { .. })) {
        return UNDERSTAND;
    }
    let text = parts
        .iter()
        .filter_map(|p| match p {
            Part::Text(t) => Some(t.as_str()),
            Part::File { .. } => None,
        })
        .collect::<String>();

    if text.contains("You are summarizing") {
        SUMMARIZE
    } else if text.contains("key learning points") {
        KEY_POINTS
    } else if text.contains("multiple-choice quiz") {
        QUIZ
    } else if text.contains("flash cards") {
        FLASH_CARDS
    } else if text.contains("recurring concepts") {
        CONCEPTS
    } else {
        "other"
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn register_asset(
        &self,
        path: &Path,
        mime_type: &str,
        _display_name: &str,
    ) -> Result<ProviderFile, ProviderError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.register_error {
            return Err(ProviderError::Api {
                status: 400,
                message: message.to_string(),
            });
        }
        Ok(ProviderFile {
            name: "files/test-video".to_string(),
            uri: format!("https://files.test/{}", path.display()),
            mime_type: mime_type.to_string(),
        })
    }

    async fn file_status(&self, _file: &ProviderFile) -> Result<FileState, ProviderError> {
        let checks = self.status_checks.fetch_add(1, Ordering::SeqCst);
        if checks < self.processing_polls {
            Ok(FileState::Processing)
        } else {
            Ok(FileState::Active)
        }
    }

    async fn generate(&self, _model: &str, parts: &[Part]) -> Result<String, ProviderError> {
        let kind = prompt_kind(parts);
        self.generations.lock().unwrap().push(kind);
        let reply = self.replies.lock().unwrap().get(kind).cloned();

        match reply {
            Some(Reply::Json(json)) => Ok(json),
            Some(Reply::Fail { status, message }) => Err(ProviderError::Api {
                status,
                message: message.to_string(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            None => Err(ProviderError::InvalidResponse {
                reason: format!("no scripted reply for {kind}"),
            }),
        }
    }

    async fn probe(&self, model: &str) -> Result<(), ProviderError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_error {
            return Err(ProviderError::Api {
                status: 404,
                message: format!("{model} is not available"),
            });
        }
        Ok(())
    }
}

/// Fetcher fake that writes a small file instead of downloading.
#[derive(Default)]
pub struct FakeFetcher {
    pub fail: bool,
    pub downloads: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        if self.fail {
            return Err(FetchError::DownloadFailed {
                url: url.to_string(),
                reason: "host unreachable".to_string(),
            });
        }
        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(format!("download-{}.mp4", self.downloads.lock().unwrap().len()));
        std::fs::write(&path, b"fake video bytes")?;
        self.downloads.lock().unwrap().push(path.clone());
        Ok(path)
    }
}

pub fn test_config(work_dir: &Path) -> EngineConfig {
    EngineConfig {
        model_candidates: vec!["model-a".to_string(), "model-b".to_string()],
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
        },
        poll_interval: Duration::from_millis(1),
        max_polls: 5,
        work_dir: work_dir.to_path_buf(),
        ..EngineConfig::default()
    }
}

/// A throwaway video file inside `dir`.
pub fn video_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"fake video bytes").unwrap();
    path
}

/// Knowledge store that counts calls and can refuse popular-card queries.
pub struct CountingCards {
    pub inner: JsonStore,
    pub fail_find: bool,
    pub finds: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl CountingCards {
    pub fn new() -> Self {
        Self {
            inner: JsonStore::in_memory(),
            fail_find: false,
            finds: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn failing_find() -> Self {
        Self {
            fail_find: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl KnowledgeStore for CountingCards {
    async fn find(&self, query: &CardQuery) -> Result<Vec<KnowledgeCard>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.fail_find {
            return Err(StoreError::Io(std::io::Error::other("cards file is corrupt")));
        }
        self.inner.find(query).await
    }

    async fn get(&self, concept: &str) -> Result<Option<KnowledgeCard>, StoreError> {
        self.inner.get(concept).await
    }

    async fn upsert(
        &self,
        concept: &str,
        mutate: CardMutator<'_>,
    ) -> Result<KnowledgeCard, StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(concept, mutate).await
    }
}
