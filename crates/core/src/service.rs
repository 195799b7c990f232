use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use uuid::Uuid;

use crate::{
    config::EngineConfig,
    engine::WorkflowEngine,
    error::{Error, Result, TranslationError},
    model::ModelSelector,
    provider::AiProvider,
    source::{SourceFetcher, TempVideo},
    state::WorkflowInput,
    store::{AnalysisRecord, AnalysisUpdate, KnowledgeStore, NewAnalysis, RecordStore, Translation},
    translate::Translator,
};

const FALLBACK_MIME_TYPE: &str = "video/mp4";
const FALLBACK_URL_NAME: &str = "video";

/// A request to analyse one video: exactly one of `file_path` and `url`.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub file_path: Option<PathBuf>,
    pub url: Option<String>,
    pub display_name: Option<String>,
}

impl AnalysisRequest {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Owns the record lifecycle around the workflow engine.
pub struct AnalysisService {
    engine: Arc<WorkflowEngine>,
    translator: Translator,
    records: Arc<dyn RecordStore>,
}

impl AnalysisService {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        fetcher: Arc<dyn SourceFetcher>,
        records: Arc<dyn RecordStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        config: EngineConfig,
    ) -> Self {
        let models = Arc::new(ModelSelector::new(
            Arc::clone(&provider),
            config.model_candidates.clone(),
        ));
        let translator = Translator::new(
            Arc::clone(&provider),
            Arc::clone(&models),
            Arc::clone(&records),
            config.retry,
            config.transcript_char_limit,
        );
        let engine = WorkflowEngine::with_models(provider, models, fetcher, knowledge, config);

        Self {
            engine: Arc::new(engine),
            translator,
            records,
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Create the record, run the workflow and store whatever it produced.
    ///
    /// A failed workflow is not an `Err`: the returned record carries
    /// `failed` and the message. `Err` means the record itself could not be
    /// written or the request names no source at all.
    ///
    /// A local file belongs to the submission from the start, so it is
    /// removed even when the record cannot be created.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<AnalysisRecord> {
        let staged = request.file_path.clone().map(TempVideo::adopt);
        let meta = describe(&request).await?;
        let record = self.records.create(meta).await?;
        let display_name = request
            .display_name
            .clone()
            .unwrap_or_else(|| record.original_name.clone());

        let input = WorkflowInput {
            source_file_path: request.file_path,
            source_url: request.url,
            display_name,
            analysis_id: record.id,
        };

        // the engine owns it from here
        if let Some(staged) = staged {
            staged.keep();
        }

        let update = match self.engine.run(input).await {
            Ok(output) => AnalysisUpdate::Completed(Box::new(output)),
            Err(failure) => AnalysisUpdate::Failed {
                message: failure.to_string(),
            },
        };

        let record = self.records.update(record.id, update).await?;
        tracing::info!(
            analysis_id = %record.id,
            status = %record.processing_status,
            "Analysis stored"
        );
        Ok(record)
    }

    pub async fn translate(
        &self,
        analysis_id: Uuid,
        target_language: &str,
    ) -> std::result::Result<Translation, TranslationError> {
        self.translator.translate(analysis_id, target_language).await
    }
}

/// Metadata recorded before the workflow runs. A missing file is left for
/// input validation to report on the record itself.
async fn describe(request: &AnalysisRequest) -> Result<NewAnalysis> {
    match (&request.file_path, &request.url) {
        (Some(path), _) => {
            let filename = file_name(path).unwrap_or_else(|| path.display().to_string());
            let size_bytes = tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            Ok(NewAnalysis {
                original_name: request
                    .display_name
                    .clone()
                    .unwrap_or_else(|| filename.clone()),
                mime_type: guess_mime(path),
                filename,
                size_bytes,
                source_url: request.url.clone(),
            })
        }
        (None, Some(url)) => {
            let filename = reqwest::Url::parse(url)
                .ok()
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|mut segments| segments.next_back().map(str::to_string))
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_URL_NAME.to_string());
            Ok(NewAnalysis {
                original_name: request.display_name.clone().unwrap_or_else(|| url.clone()),
                mime_type: guess_mime(Path::new(&filename)),
                filename,
                size_bytes: 0,
                source_url: Some(url.clone()),
            })
        }
        (None, None) => Err(Error::InvalidRequest(
            "neither a file path nor a URL was provided".to_string(),
        )),
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}
