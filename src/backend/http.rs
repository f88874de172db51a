//! Client for OpenAI-compatible `/completions` servers such as `vllm serve`.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{BackendOptions, GenerationBackend, SamplingParams};
use crate::error::{ExperimentError, Result};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a [String],
    temperature: f64,
    top_p: f64,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    index: usize,
    text: String,
}

pub struct HttpBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(options: BackendOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| ExperimentError::Backend(e.to_string()))?;
        let endpoint = format!("{}/completions", options.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: options.model,
            api_key: options.api_key,
        })
    }
}

impl GenerationBackend for HttpBackend {
    fn generate_batch(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let body = CompletionRequest {
            model: &self.model,
            prompt: prompts,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
        };
        debug!("POST {} with {} prompts", self.endpoint, prompts.len());

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .map_err(|e| ExperimentError::Backend(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().unwrap_or_default();
            return Err(ExperimentError::Backend(format!("HTTP {status}: {body_text}")));
        }

        let parsed: CompletionResponse = resp
            .json()
            .map_err(|e| ExperimentError::Backend(format!("deserialization failed: {e}")))?;
        order_choices(parsed.choices, prompts.len())
    }
}

/// Places each choice at its prompt index; every prompt needs exactly one.
fn order_choices(choices: Vec<Choice>, expected: usize) -> Result<Vec<String>> {
    let mut slots: Vec<Option<String>> = vec![None; expected];
    for choice in choices {
        let Some(slot) = slots.get_mut(choice.index) else {
            return Err(ExperimentError::Backend(format!(
                "completion index {} out of range for {expected} prompts",
                choice.index
            )));
        };
        if slot.is_some() {
            return Err(ExperimentError::Backend(format!(
                "duplicate completion for prompt {}",
                choice.index
            )));
        }
        *slot = Some(choice.text);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.ok_or_else(|| ExperimentError::Backend(format!("missing completion for prompt {idx}")))
        })
        .collect()
}
