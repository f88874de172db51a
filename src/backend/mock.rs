use tracing::{debug, info};

use crate::backend::{GenerationBackend, SamplingParams};
use crate::error::Result;

pub const MOCK_RESPONSE_PREFIX: &str = "Mocked response to: ";

/// Echoes the head of each prompt; used for smoke runs without a model server.
pub struct MockBackend {
    model: String,
}

impl MockBackend {
    pub fn new(model: &str) -> Self {
        info!("MockBackend serving model {model}");
        Self {
            model: model.to_string(),
        }
    }
}

impl GenerationBackend for MockBackend {
    fn generate_batch(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>> {
        debug!("{} answering {} prompts", self.model, prompts.len());
        Ok(prompts
            .iter()
            .map(|prompt| {
                let head: String = prompt.chars().take(params.max_tokens).collect();
                format!("{MOCK_RESPONSE_PREFIX}{head}...")
            })
            .collect())
    }
}
