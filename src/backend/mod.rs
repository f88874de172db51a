use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};

pub mod http;
pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
}

/// A model that completes prompts. Answers come back in prompt order.
pub trait GenerationBackend {
    fn generate_batch(&self, prompts: &[String], params: &SamplingParams) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Http,
    Mock,
}

impl FromStr for BackendKind {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(BackendKind::Http),
            "mock" => Ok(BackendKind::Mock),
            other => Err(ExperimentError::Configuration(format!(
                "Unknown backend: {other}"
            ))),
        }
    }
}

pub struct BackendOptions {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub fn build_backend(kind: BackendKind, options: BackendOptions) -> Result<Box<dyn GenerationBackend>> {
    match kind {
        BackendKind::Http => Ok(Box::new(http::HttpBackend::new(options)?)),
        BackendKind::Mock => Ok(Box::new(mock::MockBackend::new(&options.model))),
    }
}
