use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::{error::ModelError, provider::AiProvider};

/// Picks the first candidate model that answers and remembers it for the
/// life of the process.
///
/// Probing is single-flight: concurrent first callers wait on the same probe
/// sequence. A failed sequence leaves the cell empty; a success is never reset.
pub struct ModelSelector {
    provider: Arc<dyn AiProvider>,
    candidates: Vec<String>,
    selected: OnceCell<String>,
}

impl ModelSelector {
    pub fn new(provider: Arc<dyn AiProvider>, candidates: Vec<String>) -> Self {
        Self {
            provider,
            candidates,
            selected: OnceCell::new(),
        }
    }

    pub async fn get_model(&self) -> Result<&str, ModelError> {
        self.selected
            .get_or_try_init(|| self.probe_candidates())
            .await
            .map(String::as_str)
    }

    /// The cached model, if probing already succeeded.
    pub fn selected(&self) -> Option<&str> {
        self.selected.get().map(String::as_str)
    }

    async fn probe_candidates(&self) -> Result<String, ModelError> {
        for model in &self.candidates {
            match self.provider.probe(model).await {
                Ok(()) => {
                    tracing::info!(model = %model, "Selected model");
                    return Ok(model.clone());
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Model probe failed");
                }
            }
        }

        Err(ModelError::NoUsableModel {
            tried: self.candidates.clone(),
        })
    }
}
