use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::TranslationError,
    format::{parse_json_response, truncate_chars},
    model::ModelSelector,
    prompts,
    provider::{AiProvider, Part},
    retry::{RetryPolicy, retry},
    store::{ProcessingStatus, RecordStore, Translation},
};

#[derive(Deserialize)]
struct TranslationResponse {
    transcript: String,
    summary: String,
}

/// On-demand localisation of a completed analysis.
///
/// A language already present on the record (compared case-insensitively) is
/// returned as stored, without a provider call.
pub struct Translator {
    provider: Arc<dyn AiProvider>,
    models: Arc<ModelSelector>,
    records: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    transcript_char_limit: usize,
}

impl Translator {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        models: Arc<ModelSelector>,
        records: Arc<dyn RecordStore>,
        retry: RetryPolicy,
        transcript_char_limit: usize,
    ) -> Self {
        Self {
            provider,
            models,
            records,
            retry,
            transcript_char_limit,
        }
    }

    pub async fn translate(
        &self,
        analysis_id: Uuid,
        target_language: &str,
    ) -> Result<Translation, TranslationError> {
        let language = target_language.trim();
        if language.is_empty() {
            return Err(TranslationError::EmptyLanguage);
        }

        let record = self
            .records
            .find_by_id(analysis_id)
            .await?
            .ok_or(TranslationError::NotFound(analysis_id))?;

        if let Some(existing) = record.translation(language) {
            tracing::debug!(%analysis_id, language, "Translation already stored");
            return Ok(existing.clone());
        }

        if record.processing_status != ProcessingStatus::Completed || record.transcript.is_empty() {
            return Err(TranslationError::NotReady(analysis_id));
        }

        let prompt = prompts::translate_prompt(
            language,
            truncate_chars(&record.transcript, self.transcript_char_limit),
            &record.summary.full,
        );
        let parts = [Part::Text(prompt)];

        let model = self.models.get_model().await?;
        let raw = retry("translate", self.retry, || {
            self.provider.generate(model, &parts)
        })
        .await?;
        let response: TranslationResponse = parse_json_response(&raw)?;

        let translation = Translation {
            language: language.to_string(),
            transcript: response.transcript,
            summary: response.summary,
            timestamp: Utc::now(),
        };

        // a concurrent translator may have stored the same language first; keep theirs
        let stored = self
            .records
            .append_translation(analysis_id, translation)
            .await?;
        tracing::info!(%analysis_id, language = %stored.language, "Translation stored");
        Ok(stored)
    }
}
