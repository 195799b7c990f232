//! The stage functions of the analysis workflow.
//!
//! Each stage reads the current [`WorkflowState`] and returns a [`Step`]: what
//! it produced and which stage runs next. Stages never mutate the state
//! themselves; the engine folds outputs in.

use std::{ops::RangeInclusive, sync::Arc};

use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    config::EngineConfig,
    error::{ModelError, ProviderError, WorkflowError},
    format::{parse_json_response, truncate_chars},
    knowledge::{KnowledgeAggregator, KnowledgeCard},
    model::ModelSelector,
    prompts,
    provider::{AiProvider, FileState, Part, ProviderFile},
    retry::retry,
    source::{SourceFetcher, TempVideo},
    state::WorkflowState,
    types::{
        Concept, FlashCard, KeyPoint, QuizQuestion, Stage, Summary, Understanding,
    },
};

const QUIZ_OPTIONS: usize = 4;
const QUIZ_QUESTIONS: RangeInclusive<usize> = 5..=5;
const KEY_POINTS: RangeInclusive<usize> = 5..=10;
const FLASH_CARDS: RangeInclusive<usize> = 8..=12;
const FALLBACK_MIME_TYPE: &str = "video/mp4";

#[derive(Debug)]
pub enum StageOutput {
    Validated,
    Acquired(TempVideo),
    Registered(ProviderFile),
    Understood(Understanding),
    Summarized(Summary),
    KeyPoints(Vec<KeyPoint>),
    Quiz(Vec<QuizQuestion>),
    FlashCards(Vec<FlashCard>),
    Concepts(Vec<Concept>),
    Aggregated(Vec<KnowledgeCard>),
}

impl StageOutput {
    /// Empty result standing in for a non-fatal stage that failed.
    pub fn degraded(stage: Stage) -> Option<Self> {
        match stage {
            Stage::ExtractKeyPoints => Some(StageOutput::KeyPoints(Vec::new())),
            Stage::GenerateQuiz => Some(StageOutput::Quiz(Vec::new())),
            Stage::GenerateFlashCards => Some(StageOutput::FlashCards(Vec::new())),
            Stage::ExtractConcepts => Some(StageOutput::Concepts(Vec::new())),
            Stage::AggregateKnowledge => Some(StageOutput::Aggregated(Vec::new())),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Step {
    pub output: StageOutput,
    pub next: Stage,
}

impl Step {
    fn then(output: StageOutput, next: Stage) -> Self {
        Self { output, next }
    }
}

/// Why a JSON-returning provider call failed.
enum CallError {
    Model(ModelError),
    Provider(ProviderError),
    Parse(serde_json::Error),
    Invalid(String),
}

impl CallError {
    /// No usable model is always fatal; everything else becomes the stage's own error.
    fn into_stage_error(self, wrap: impl FnOnce(String) -> WorkflowError) -> WorkflowError {
        match self {
            CallError::Model(e) => WorkflowError::ProviderExhausted(e),
            CallError::Provider(e) => wrap(e.to_string()),
            CallError::Parse(e) => wrap(format!("unparsable response: {e}")),
            CallError::Invalid(reason) => wrap(reason),
        }
    }
}

fn enrichment(stage: Stage) -> impl FnOnce(String) -> WorkflowError {
    move |reason| WorkflowError::Enrichment { stage, reason }
}

pub struct Stages {
    provider: Arc<dyn AiProvider>,
    models: Arc<ModelSelector>,
    fetcher: Arc<dyn SourceFetcher>,
    aggregator: KnowledgeAggregator,
    config: EngineConfig,
}

impl Stages {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        models: Arc<ModelSelector>,
        fetcher: Arc<dyn SourceFetcher>,
        aggregator: KnowledgeAggregator,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            models,
            fetcher,
            aggregator,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Branch: URLs are downloaded first, local files go straight to registration.
    pub async fn validate_input(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        match (&state.source_file_path, &state.source_url) {
            (Some(_), Some(_)) => Err(WorkflowError::Validation(
                "provide either a file path or a URL, not both".to_string(),
            )),
            (None, None) => Err(WorkflowError::Validation(
                "neither a file path nor a URL was provided".to_string(),
            )),
            (None, Some(url)) => {
                if url.trim().is_empty() {
                    return Err(WorkflowError::Validation("the URL is empty".to_string()));
                }
                Ok(Step::then(StageOutput::Validated, Stage::AcquireSource))
            }
            (Some(path), None) => {
                let is_file = tokio::fs::metadata(path)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if !is_file {
                    return Err(WorkflowError::Validation(format!(
                        "{} is not a readable file",
                        path.display()
                    )));
                }
                Ok(Step::then(StageOutput::Validated, Stage::Register))
            }
        }
    }

    pub async fn acquire_source(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let url = state
            .source_url
            .as_deref()
            .ok_or_else(|| WorkflowError::Acquisition("no URL to download".to_string()))?;

        let path = self
            .fetcher
            .download(url, &self.config.work_dir)
            .await
            .map_err(|e| WorkflowError::Acquisition(e.to_string()))?;

        tracing::info!(path = %path.display(), "Video downloaded");
        Ok(Step::then(
            StageOutput::Acquired(TempVideo::adopt(path)),
            Stage::AcquireSource.following(),
        ))
    }

    /// Upload the local video and wait until the provider has processed it.
    pub async fn register(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let video = state
            .local_video
            .as_ref()
            .ok_or_else(|| WorkflowError::Acquisition("no local video to register".to_string()))?;
        let path = video.path();
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());
        let policy = self.config.retry;

        let file = retry("register_asset", policy, || {
            self.provider
                .register_asset(path, &mime_type, &state.display_name)
        })
        .await
        .map_err(|e| WorkflowError::Acquisition(format!("registration failed: {e}")))?;

        let mut polls = 0u32;
        loop {
            let status = retry("file_status", policy, || self.provider.file_status(&file))
                .await
                .map_err(|e| WorkflowError::Acquisition(format!("status check failed: {e}")))?;

            match status {
                FileState::Active => break,
                FileState::Failed(reason) => {
                    return Err(WorkflowError::Acquisition(format!(
                        "provider could not process the video: {reason}"
                    )));
                }
                FileState::Processing => {
                    polls += 1;
                    if polls >= self.config.max_polls {
                        return Err(WorkflowError::Acquisition(format!(
                            "video still processing after {polls} status checks"
                        )));
                    }
                    tracing::debug!(file = %file.name, polls, "Video still processing");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        tracing::info!(file = %file.name, "Video registered");
        Ok(Step::then(
            StageOutput::Registered(file),
            Stage::Register.following(),
        ))
    }

    pub async fn understand(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let file = state.provider_file.as_ref().ok_or_else(|| {
            WorkflowError::Understanding("the video was never registered".to_string())
        })?;

        let parts = [Part::file(file), Part::text(prompts::UNDERSTAND_PROMPT)];
        let understanding: Understanding = self
            .ask("understand", &parts)
            .await
            .map_err(|e| e.into_stage_error(WorkflowError::Understanding))?;

        if understanding.transcript.trim().is_empty() {
            return Err(WorkflowError::Understanding(
                "the provider returned an empty transcript".to_string(),
            ));
        }

        Ok(Step::then(
            StageOutput::Understood(understanding),
            Stage::Understand.following(),
        ))
    }

    pub async fn summarize(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        #[derive(Deserialize)]
        struct Response {
            summary: String,
            tldr: String,
        }

        let prompt = prompts::summarize_prompt(
            &state.topic,
            &state.learning_objective,
            self.transcript(state),
        );
        let response: Response = self
            .ask("summarize", &[Part::Text(prompt)])
            .await
            .map_err(|e| e.into_stage_error(WorkflowError::Understanding))?;

        Ok(Step::then(
            StageOutput::Summarized(Summary {
                full: response.summary,
                tldr: response.tldr,
            }),
            Stage::Summarize.following(),
        ))
    }

    pub async fn extract_key_points(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let stage = Stage::ExtractKeyPoints;
        let prompt = prompts::key_points_prompt(&state.topic, self.transcript(state));
        let mut points: Vec<KeyPoint> = self
            .ask(stage.name(), &[Part::Text(prompt)])
            .await
            .map_err(|e| e.into_stage_error(enrichment(stage)))?;

        for point in &mut points {
            point.importance = point.importance.clamp(1, 5);
        }

        let points = fit_count(stage, points, KEY_POINTS);
        Ok(Step::then(StageOutput::KeyPoints(points), stage.following()))
    }

    pub async fn generate_quiz(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let stage = Stage::GenerateQuiz;
        let prompt = prompts::quiz_prompt(&state.topic, self.transcript(state));
        let quiz: Vec<QuizQuestion> = self
            .ask(stage.name(), &[Part::Text(prompt)])
            .await
            .and_then(|quiz: Vec<QuizQuestion>| {
                match quiz
                    .iter()
                    .find(|q| q.options.len() != QUIZ_OPTIONS || q.correct_answer >= QUIZ_OPTIONS)
                {
                    Some(bad) => Err(CallError::Invalid(format!(
                        "malformed question {:?}: {} options, answer index {}",
                        bad.question,
                        bad.options.len(),
                        bad.correct_answer
                    ))),
                    None => Ok(quiz),
                }
            })
            .map_err(|e| e.into_stage_error(enrichment(stage)))?;

        let quiz = fit_count(stage, quiz, QUIZ_QUESTIONS);
        Ok(Step::then(StageOutput::Quiz(quiz), stage.following()))
    }

    pub async fn generate_flash_cards(
        &self,
        state: &WorkflowState,
    ) -> Result<Step, WorkflowError> {
        let stage = Stage::GenerateFlashCards;
        let prompt = prompts::flash_cards_prompt(&state.topic, self.transcript(state));
        let cards: Vec<FlashCard> = self
            .ask(stage.name(), &[Part::Text(prompt)])
            .await
            .map_err(|e| e.into_stage_error(enrichment(stage)))?;

        let cards = fit_count(stage, cards, FLASH_CARDS);
        Ok(Step::then(StageOutput::FlashCards(cards), stage.following()))
    }

    pub async fn extract_concepts(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let stage = Stage::ExtractConcepts;
        let prompt = prompts::concepts_prompt(&state.topic, self.transcript(state));
        let concepts: Vec<Concept> = self
            .ask(stage.name(), &[Part::Text(prompt)])
            .await
            .map_err(|e| e.into_stage_error(enrichment(stage)))?;

        Ok(Step::then(StageOutput::Concepts(concepts), stage.following()))
    }

    pub async fn aggregate_knowledge(&self, state: &WorkflowState) -> Result<Step, WorkflowError> {
        let popular = self
            .aggregator
            .aggregate(state.analysis_id, &state.concepts)
            .await?;

        Ok(Step::then(
            StageOutput::Aggregated(popular),
            Stage::AggregateKnowledge.following(),
        ))
    }

    fn transcript<'a>(&self, state: &'a WorkflowState) -> &'a str {
        truncate_chars(&state.transcript, self.config.transcript_char_limit)
    }

    /// One retried generation call whose reply must be JSON of type `T`.
    async fn ask<T: DeserializeOwned>(
        &self,
        operation: &str,
        parts: &[Part],
    ) -> Result<T, CallError> {
        let model = self.models.get_model().await.map_err(CallError::Model)?;
        let raw = retry(operation, self.config.retry, || {
            self.provider.generate(model, parts)
        })
        .await
        .map_err(CallError::Provider)?;

        parse_json_response(&raw).map_err(CallError::Parse)
    }
}

/// Short lists are kept as they are; long ones are cut to the upper bound.
fn fit_count<T>(stage: Stage, mut items: Vec<T>, wanted: RangeInclusive<usize>) -> Vec<T> {
    if !wanted.contains(&items.len()) {
        tracing::warn!(
            stage = stage.name(),
            got = items.len(),
            min = wanted.start(),
            max = wanted.end(),
            "Model returned an unexpected number of items"
        );
    }
    items.truncate(*wanted.end());
    items
}
