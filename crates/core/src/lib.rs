pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod knowledge;
pub mod model;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod service;
pub mod source;
pub mod stages;
pub mod state;
pub mod store;
pub mod translate;
pub mod types;

pub use config::{EngineConfig, ProviderConfig, default_data_dir, default_work_dir};
pub use engine::WorkflowEngine;
pub use error::{Error, Result, TranslationError, WorkflowError, WorkflowFailure};
pub use format::format_analysis_readable;
pub use knowledge::{Category, KnowledgeAggregator, KnowledgeCard};
pub use model::ModelSelector;
pub use provider::{AiProvider, GeminiClient};
pub use retry::RetryPolicy;
pub use service::{AnalysisRequest, AnalysisService};
pub use source::{HttpSourceFetcher, SourceFetcher};
pub use state::WorkflowInput;
pub use store::{
    AnalysisRecord, CardQuery, JsonStore, KnowledgeStore, ProcessingStatus, RecordStore,
    Translation,
};
pub use translate::Translator;
pub use types::{AnalysisOutput, Stage};
