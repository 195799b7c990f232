use std::path::PathBuf;

use uuid::Uuid;

use crate::{
    knowledge::KnowledgeCard,
    provider::ProviderFile,
    source::TempVideo,
    stages::StageOutput,
    types::{
        AnalysisOutput, Concept, FlashCard, ImportantMoment, KeyPoint, QuizQuestion, Stage,
        Summary,
    },
};

/// What a caller hands the engine: a local file XOR a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInput {
    pub source_file_path: Option<PathBuf>,
    pub source_url: Option<String>,
    pub display_name: String,
    pub analysis_id: Uuid,
}

impl WorkflowInput {
    pub fn from_file(path: impl Into<PathBuf>, display_name: &str, analysis_id: Uuid) -> Self {
        Self {
            source_file_path: Some(path.into()),
            source_url: None,
            display_name: display_name.to_string(),
            analysis_id,
        }
    }

    pub fn from_url(url: &str, display_name: &str, analysis_id: Uuid) -> Self {
        Self {
            source_file_path: None,
            source_url: Some(url.to_string()),
            display_name: display_name.to_string(),
            analysis_id,
        }
    }
}

/// State of one run. Owned by that run only; each stage's output is folded in
/// with [`WorkflowState::apply`].
#[derive(Debug)]
pub struct WorkflowState {
    pub source_file_path: Option<PathBuf>,
    pub source_url: Option<String>,
    pub display_name: String,
    pub analysis_id: Uuid,

    /// The video on local disk; deleted when the state is dropped.
    pub local_video: Option<TempVideo>,
    pub provider_file: Option<ProviderFile>,

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

    pub error: Option<String>,
    pub current_stage: Stage,
}

impl WorkflowState {
    /// A supplied local file is owned by the run from here on.
    pub fn new(input: WorkflowInput) -> Self {
        Self {
            local_video: input.source_file_path.clone().map(TempVideo::adopt),
            source_file_path: input.source_file_path,
            source_url: input.source_url,
            display_name: input.display_name,
            analysis_id: input.analysis_id,
            provider_file: None,
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
            error: None,
            current_stage: Stage::ValidateInput,
        }
    }

    pub fn is_url(&self) -> bool {
        self.source_url.is_some()
    }

    pub fn apply(mut self, output: StageOutput) -> Self {
        match output {
            StageOutput::Validated => {}
            StageOutput::Acquired(video) => self.local_video = Some(video),
            StageOutput::Registered(file) => self.provider_file = Some(file),
            StageOutput::Understood(understanding) => {
                self.transcript = understanding.transcript;
                self.topic = understanding.topic;
                self.learning_objective = understanding.learning_objective;
                self.important_moments = understanding.important_moments;
            }
            StageOutput::Summarized(summary) => self.summary = summary,
            StageOutput::KeyPoints(points) => self.key_points = points,
            StageOutput::Quiz(quiz) => self.quiz = quiz,
            StageOutput::FlashCards(cards) => self.flash_cards = cards,
            StageOutput::Concepts(concepts) => self.concepts = concepts,
            StageOutput::Aggregated(cards) => self.popular_knowledge_cards = cards,
        }
        self
    }

    /// Consume the finished state; the local video goes with it.
    pub fn into_output(self) -> AnalysisOutput {
        AnalysisOutput {
            transcript: self.transcript,
            topic: self.topic,
            learning_objective: self.learning_objective,
            important_moments: self.important_moments,
            summary: self.summary,
            key_points: self.key_points,
            quiz: self.quiz,
            flash_cards: self.flash_cards,
            concepts: self.concepts,
            popular_knowledge_cards: self.popular_knowledge_cards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Understanding;

    #[test]
    fn test_apply_folds_stage_outputs() {
        let state = WorkflowState::new(WorkflowInput::from_url(
            "https://example.com/v.mp4",
            "Lecture",
            Uuid::new_v4(),
        ));
        assert!(state.is_url());
        assert!(state.local_video.is_none());

        let state = state
            .apply(StageOutput::Understood(Understanding {
                transcript: "words".into(),
                topic: "Topic".into(),
                learning_objective: "Learn".into(),
                important_moments: vec![],
            }))
            .apply(StageOutput::Summarized(Summary {
                full: "long".into(),
                tldr: "short".into(),
            }));

        let output = state.into_output();
        assert_eq!(output.transcript, "words");
        assert_eq!(output.summary.tldr, "short");
        assert!(output.quiz.is_empty());
    }

    #[test]
    fn test_dropping_state_removes_adopted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.mp4");
        std::fs::write(&path, b"video").unwrap();

        let state = WorkflowState::new(WorkflowInput::from_file(&path, "Upload", Uuid::new_v4()));
        assert!(path.exists());
        drop(state);
        assert!(!path.exists());
    }
}
