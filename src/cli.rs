use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::backend::{BackendKind, SamplingParams};
use crate::consts::{
    DATA_DST_DIR, DATA_SRC_DIR, DEFAULT_BACKEND_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE, DEFAULT_TOP_P, HF_TOKEN_ENV, RESULTS_DIR, SUPPORTED_GOLD_IDXS,
    SUPPORTED_NUM_DOCS,
};
use crate::error::{ExperimentError, Result};
use crate::model::{ExperimentKind, PromptingMode};
use crate::tokenizer::ChatTemplate;

#[derive(Parser, Debug, Clone, Serialize)]
#[command(
    name = "litm-run",
    version,
    about = "Run lost-in-the-middle QA experiments against a language model"
)]
pub struct Cli {
    /// Experiment to run: gold-idx-change or num-docs-change
    #[arg(long)]
    pub experiment: String,

    /// Prompting mode: closedbook, openbook or openbook-random
    #[arg(long, default_value = "openbook")]
    pub prompting_mode: String,

    /// Documents per example (gold-idx-change)
    #[arg(long)]
    pub num_docs: Option<usize>,

    /// Position of the gold document (num-docs-change)
    #[arg(long)]
    pub gold_idx: Option<usize>,

    /// Model id on the Hugging Face hub
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Hugging Face access token
    #[arg(long, env = HF_TOKEN_ENV, hide_env_values = true)]
    #[serde(skip)]
    pub hf_token: Option<String>,

    /// Generation backend: http or mock
    #[arg(long, default_value = "http")]
    pub backend: String,

    /// Base URL of an OpenAI-compatible completions server
    #[arg(long, default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Bearer token for the completions server
    #[arg(long, env = "LITM_API_KEY", hide_env_values = true)]
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Timeout of a single backend request (e.g. 90s, 30m)
    #[arg(long, default_value = "30m")]
    #[serde(serialize_with = "serialize_duration")]
    pub request_timeout: humantime::Duration,

    /// Local tokenizer.json instead of fetching it from the hub
    #[arg(long)]
    pub tokenizer_file: Option<PathBuf>,

    /// Chat template: auto, llama3, falcon3 or none
    #[arg(long, default_value = "auto")]
    pub chat_template: String,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f64,

    #[arg(long, default_value_t = DEFAULT_TOP_P)]
    pub top_p: f64,

    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: usize,

    /// Seed for the distractor shuffle of openbook-random
    #[arg(long)]
    pub seed: Option<u64>,

    /// qa_data folder of a lost-in-the-middle checkout
    #[arg(long, default_value = DATA_SRC_DIR)]
    pub data_src: PathBuf,

    /// Where decompressed data is staged
    #[arg(long, default_value = DATA_DST_DIR)]
    pub data_dir: PathBuf,

    #[arg(long, default_value = RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Only run the first few examples of every configuration
    #[arg(long)]
    pub test_mode: bool,

    /// Write closed-book results without the fixed-axis directory
    #[arg(long)]
    pub flat_closedbook_results: bool,

    /// Summary format: text or json
    #[arg(long, default_value = "text")]
    pub output: String,
}

fn serialize_duration<S: serde::Serializer>(
    duration: &humantime::Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(duration)
}

impl Cli {
    pub fn validate(&self) -> Result<()> {
        let kind = self.experiment_kind()?;
        self.prompting_mode()?;
        self.backend_kind()?;
        ChatTemplate::resolve(&self.chat_template, &self.model)?;

        match kind {
            ExperimentKind::GoldIdxChange => {
                let num_docs = self.num_docs.ok_or_else(|| {
                    ExperimentError::Configuration(format!("{kind} requires --num-docs"))
                })?;
                if !SUPPORTED_NUM_DOCS.contains(&num_docs) {
                    return Err(ExperimentError::Configuration(format!(
                        "--num-docs must be one of {SUPPORTED_NUM_DOCS:?}, got {num_docs}"
                    )));
                }
            }
            ExperimentKind::NumDocsChange => {
                let gold_idx = self.gold_idx.ok_or_else(|| {
                    ExperimentError::Configuration(format!("{kind} requires --gold-idx"))
                })?;
                if !SUPPORTED_GOLD_IDXS.contains(&gold_idx) {
                    return Err(ExperimentError::Configuration(format!(
                        "--gold-idx must be one of {SUPPORTED_GOLD_IDXS:?}, got {gold_idx}"
                    )));
                }
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ExperimentError::Configuration(
                "--temperature must be within 0..=2".to_string(),
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ExperimentError::Configuration(
                "--top-p must be within (0, 1]".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ExperimentError::Configuration(
                "--max-tokens must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.as_secs() == 0 {
            return Err(ExperimentError::Configuration(
                "--request-timeout must be at least one second".to_string(),
            ));
        }
        if !matches!(self.output.as_str(), "text" | "json") {
            return Err(ExperimentError::Configuration(format!(
                "Unknown output format: {}",
                self.output
            )));
        }
        Ok(())
    }

    pub fn experiment_kind(&self) -> Result<ExperimentKind> {
        self.experiment.parse()
    }

    pub fn prompting_mode(&self) -> Result<PromptingMode> {
        self.prompting_mode.parse()
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.backend.parse()
    }

    /// The Hugging Face token, rejecting an empty value.
    pub fn hf_token(&self) -> Result<&str> {
        match self.hf_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ExperimentError::MissingCredential(format!(
                "{HF_TOKEN_ENV} environment variable is not set"
            ))),
        }
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}
