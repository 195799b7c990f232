use std::sync::Arc;

use tracing::{Instrument, debug_span, info_span};

use crate::{
    config::EngineConfig,
    error::{WorkflowError, WorkflowFailure},
    knowledge::KnowledgeAggregator,
    model::ModelSelector,
    provider::AiProvider,
    source::SourceFetcher,
    stages::{StageOutput, Stages, Step},
    state::{WorkflowInput, WorkflowState},
    store::KnowledgeStore,
    types::{AnalysisOutput, Stage},
};

/// Runs one analysis at a time per call; share it behind an `Arc` to serve many.
pub struct WorkflowEngine {
    stages: Stages,
    models: Arc<ModelSelector>,
}

impl WorkflowEngine {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        fetcher: Arc<dyn SourceFetcher>,
        knowledge: Arc<dyn KnowledgeStore>,
        config: EngineConfig,
    ) -> Self {
        let models = Arc::new(ModelSelector::new(
            Arc::clone(&provider),
            config.model_candidates.clone(),
        ));
        Self::with_models(provider, models, fetcher, knowledge, config)
    }

    /// Use an existing model selector so its cached choice is shared.
    pub fn with_models(
        provider: Arc<dyn AiProvider>,
        models: Arc<ModelSelector>,
        fetcher: Arc<dyn SourceFetcher>,
        knowledge: Arc<dyn KnowledgeStore>,
        config: EngineConfig,
    ) -> Self {
        let aggregator = KnowledgeAggregator::new(
            knowledge,
            config.popular_min_frequency,
            config.popular_limit,
        );
        let stages = Stages::new(provider, Arc::clone(&models), fetcher, aggregator, config);
        Self { stages, models }
    }

    pub fn models(&self) -> &Arc<ModelSelector> {
        &self.models
    }

    /// Drive one analysis to `Completed` or `Failed`.
    ///
    /// The local video (uploaded or downloaded) is removed before this returns,
    /// whichever way the run ends, including when the deadline cuts it short.
    pub async fn run(&self, input: WorkflowInput) -> Result<AnalysisOutput, WorkflowFailure> {
        let span = info_span!(
            "analysis",
            analysis_id = %input.analysis_id,
            display_name = %input.display_name,
        );

        async move {
            let deadline = self.stages.config().analysis_deadline;
            let mut reached = Stage::ValidateInput;

            let outcome =
                tokio::time::timeout(deadline, self.drive(WorkflowState::new(input), &mut reached))
                    .await;

            match outcome {
                Ok(result) => result,
                Err(_) => {
                    let error = WorkflowError::DeadlineExceeded(deadline);
                    tracing::error!(stage = %reached, error = %error, "Analysis timed out");
                    Err(WorkflowFailure {
                        stage: reached,
                        message: error.to_string(),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        mut state: WorkflowState,
        reached: &mut Stage,
    ) -> Result<AnalysisOutput, WorkflowFailure> {
        let mut stage = Stage::ValidateInput;

        while !stage.is_terminal() {
            *reached = stage;
            state.current_stage = stage;

            let step = self
                .execute(stage, &state)
                .instrument(debug_span!("stage", stage = %stage))
                .await;

            match step {
                Ok(Step { output, next }) => {
                    tracing::debug!(stage = %stage, next = %next, "Stage finished");
                    state = state.apply(output);
                    stage = next;
                }
                Err(error) => {
                    let degraded = if stage.is_fatal() || error.is_fatal() {
                        None
                    } else {
                        StageOutput::degraded(stage)
                    };

                    match degraded {
                        Some(empty) => {
                            tracing::warn!(stage = %stage, error = %error, "Stage failed, continuing without its output");
                            state = state.apply(empty);
                            stage = stage.following();
                        }
                        None => {
                            tracing::error!(stage = %stage, error = %error, "Analysis failed");
                            state.error = Some(error.to_string());
                            state.current_stage = Stage::Failed;
                            return Err(WorkflowFailure {
                                stage,
                                message: error.to_string(),
                            });
                        }
                    }
                }
            }
        }

        state.current_stage = Stage::Completed;
        tracing::info!(
            key_points = state.key_points.len(),
            quiz = state.quiz.len(),
            flash_cards = state.flash_cards.len(),
            concepts = state.concepts.len(),
            "Analysis completed"
        );
        Ok(state.into_output())
    }

    async fn execute(&self, stage: Stage, state: &WorkflowState) -> Result<Step, WorkflowError> {
        match stage {
            Stage::ValidateInput => self.stages.validate_input(state).await,
            Stage::AcquireSource => self.stages.acquire_source(state).await,
            Stage::Register => self.stages.register(state).await,
            Stage::Understand => self.stages.understand(state).await,
            Stage::Summarize => self.stages.summarize(state).await,
            Stage::ExtractKeyPoints => self.stages.extract_key_points(state).await,
            Stage::GenerateQuiz => self.stages.generate_quiz(state).await,
            Stage::GenerateFlashCards => self.stages.generate_flash_cards(state).await,
            Stage::ExtractConcepts => self.stages.extract_concepts(state).await,
            Stage::AggregateKnowledge => self.stages.aggregate_knowledge(state).await,
            Stage::Completed | Stage::Failed => unreachable!("terminal stage {stage} has no work"),
        }
    }
}
