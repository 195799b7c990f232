use std::fmt;

use serde::{Deserialize, Serialize};

use crate::knowledge::KnowledgeCard;

/// Workflow stages in execution order, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ValidateInput,
    AcquireSource,
    Register,
    Understand,
    Summarize,
    ExtractKeyPoints,
    GenerateQuiz,
    GenerateFlashCards,
    ExtractConcepts,
    AggregateKnowledge,
    Completed,
    Failed,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ValidateInput => "validate_input",
            Stage::AcquireSource => "acquire_source",
            Stage::Register => "register",
            Stage::Understand => "understand",
            Stage::Summarize => "summarize",
            Stage::ExtractKeyPoints => "extract_key_points",
            Stage::GenerateQuiz => "generate_quiz",
            Stage::GenerateFlashCards => "generate_flash_cards",
            Stage::ExtractConcepts => "extract_concepts",
            Stage::AggregateKnowledge => "aggregate_knowledge",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// A failure here halts the run. Enrichment and aggregation degrade instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Stage::ExtractKeyPoints
                | Stage::GenerateQuiz
                | Stage::GenerateFlashCards
                | Stage::ExtractConcepts
                | Stage::AggregateKnowledge
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Unconditional successor. `ValidateInput` branches and decides for itself.
    pub fn following(&self) -> Stage {
        match self {
            Stage::ValidateInput => Stage::Register,
            Stage::AcquireSource => Stage::Register,
            Stage::Register => Stage::Understand,
            Stage::Understand => Stage::Summarize,
            Stage::Summarize => Stage::ExtractKeyPoints,
            Stage::ExtractKeyPoints => Stage::GenerateQuiz,
            Stage::GenerateQuiz => Stage::GenerateFlashCards,
            Stage::GenerateFlashCards => Stage::ExtractConcepts,
            Stage::ExtractConcepts => Stage::AggregateKnowledge,
            Stage::AggregateKnowledge => Stage::Completed,
            Stage::Completed => Stage::Completed,
            Stage::Failed => Stage::Failed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportantMoment {
    pub timestamp: String,
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Result of the single multimodal understanding call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Understanding {
    pub transcript: String,
    pub topic: String,
    #[serde(alias = "learningObjective")]
    pub learning_objective: String,
    #[serde(default, alias = "importantMoments")]
    pub important_moments: Vec<ImportantMoment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(alias = "summary")]
    pub full: String,
    pub tldr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub point: String,
    pub explanation: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub importance: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    pub correct_answer: usize,
    pub explanation: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashCard {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub category: String,
}

/// Recurring terminology reported by the concept extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub context: String,
}

/// Everything a completed analysis produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_linear_after_register() {
        let mut stage = Stage::Register;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.following();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Register,
                Stage::Understand,
                Stage::Summarize,
                Stage::ExtractKeyPoints,
                Stage::GenerateQuiz,
                Stage::GenerateFlashCards,
                Stage::ExtractConcepts,
                Stage::AggregateKnowledge,
                Stage::Completed,
            ]
        );
    }

    #[test]
    fn test_fatal_split() {
        assert!(Stage::ValidateInput.is_fatal());
        assert!(Stage::AcquireSource.is_fatal());
        assert!(Stage::Register.is_fatal());
        assert!(Stage::Understand.is_fatal());
        assert!(Stage::Summarize.is_fatal());
        assert!(!Stage::GenerateQuiz.is_fatal());
        assert!(!Stage::AggregateKnowledge.is_fatal());
    }

    #[test]
    fn test_understanding_accepts_camel_case_keys() {
        let json = r#"{
            "transcript": "hello",
            "topic": "Greetings",
            "learningObjective": "Say hi",
            "importantMoments": [{"timestamp": "00:01", "description": "hi", "type": "intro"}]
        }"#;
        let u: Understanding = serde_json::from_str(json).unwrap();
        assert_eq!(u.learning_objective, "Say hi");
        assert_eq!(u.important_moments[0].kind, "intro");
    }
}
