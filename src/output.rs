use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::SamplingParams;
use crate::error::{ExperimentError, Result};
use crate::metrics::METRIC_NAME;
use crate::model::{ExperimentKind, FixedAxis, PromptingMode};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigResults {
    pub model_answers: Vec<String>,
    pub scores: Vec<f64>,
    pub num_prompt_tokens: Vec<usize>,
}

impl ConfigResults {
    pub fn accuracy(&self) -> Option<f64> {
        if self.scores.is_empty() {
            None
        } else {
            Some(self.scores.iter().sum::<f64>() / self.scores.len() as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsRecord {
    pub model: String,
    pub experiment_type: ExperimentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_documents: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_index: Option<usize>,
    pub prompting_mode: PromptingMode,
    pub metric: String,
    pub sampling: SamplingParams,
    pub execution_date: String,
    pub experiments: BTreeMap<String, ConfigResults>,
}

impl ResultsRecord {
    /// Empty record with one entry per configuration key.
    pub fn new<I>(
        model: &str,
        kind: ExperimentKind,
        axis: FixedAxis,
        prompting_mode: PromptingMode,
        sampling: SamplingParams,
        keys: I,
        executed_at: DateTime<Utc>,
    ) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let (num_documents, gold_index) = match axis {
            FixedAxis::NumDocs(num_docs) => (Some(num_docs), None),
            FixedAxis::GoldIdx(gold_idx) => (None, Some(gold_idx)),
        };
        Self {
            model: model.to_string(),
            experiment_type: kind,
            num_documents,
            gold_index,
            prompting_mode,
            metric: METRIC_NAME.to_string(),
            sampling,
            execution_date: executed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            experiments: keys
                .into_iter()
                .map(|key| (key, ConfigResults::default()))
                .collect(),
        }
    }

    pub fn fixed_axis(&self) -> Option<FixedAxis> {
        match (self.num_documents, self.gold_index) {
            (Some(num_docs), _) => Some(FixedAxis::NumDocs(num_docs)),
            (None, Some(gold_idx)) => Some(FixedAxis::GoldIdx(gold_idx)),
            (None, None) => None,
        }
    }

    pub fn append(
        &mut self,
        key: &str,
        model_answers: Vec<String>,
        scores: Vec<f64>,
        num_prompt_tokens: Vec<usize>,
    ) -> Result<()> {
        if model_answers.len() != scores.len() || scores.len() != num_prompt_tokens.len() {
            return Err(ExperimentError::InvariantViolation(format!(
                "results for '{key}' have mismatched lengths"
            )));
        }
        let entry = self.experiments.get_mut(key).ok_or_else(|| {
            ExperimentError::InvariantViolation(format!("unknown configuration key '{key}'"))
        })?;
        entry.model_answers.extend(model_answers);
        entry.scores.extend(scores);
        entry.num_prompt_tokens.extend(num_prompt_tokens);
        Ok(())
    }
}

/// Where results files go:
/// `<root>/<model>/<kind>_experiment/<mode>_prompting_mode/<axis>/<timestamp>.json`
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    pub root: PathBuf,
    /// Closed-book runs skip the `<axis>` directory.
    pub flat_closedbook: bool,
}

impl ResultsLayout {
    pub fn dir_for(&self, record: &ResultsRecord) -> PathBuf {
        // tiiuae/Falcon3-Mamba-7B-Instruct -> Falcon3-Mamba-7B-Instruct
        let model_short = record.model.rsplit('/').next().unwrap_or(&record.model);
        let mut dir = self
            .root
            .join(model_short)
            .join(format!("{}_experiment", record.experiment_type.path_segment()))
            .join(format!(
                "{}_prompting_mode",
                record.prompting_mode.path_segment()
            ));

        let flat = self.flat_closedbook && record.prompting_mode == PromptingMode::ClosedBook;
        if let (false, Some(axis)) = (flat, record.fixed_axis()) {
            dir.push(axis.path_segment());
        }
        dir
    }

    pub fn write(&self, record: &ResultsRecord, timestamp: i64) -> Result<PathBuf> {
        let dir = self.dir_for(record);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{timestamp}.json"));
        let mut json = serde_json::to_string_pretty(record)?;
        json.push('\n');
        fs::write(&path, json)?;

        info!("Results saved to {}", path.display());
        Ok(path)
    }
}

pub fn print_summary(format: &str, results_path: &Path, record: &ResultsRecord) -> Result<()> {
    match format {
        "text" => print_text(results_path, record),
        "json" => print_json(results_path, record),
        other => Err(ExperimentError::Configuration(format!(
            "Unknown output format: {other}"
        ))),
    }
}

fn print_text(results_path: &Path, record: &ResultsRecord) -> Result<()> {
    let mut out = io::stdout();
    writeln!(out, "Model: {}", record.model)?;
    writeln!(out, "Experiment: {}", record.experiment_type)?;
    writeln!(out, "Prompting mode: {}", record.prompting_mode)?;
    writeln!(out, "Results: {}", results_path.display())?;
    writeln!(out)?;

    for (key, results) in &record.experiments {
        match results.accuracy() {
            Some(acc) => writeln!(
                out,
                "{key:<24} {}: {acc:.3} (n={})",
                record.metric,
                results.scores.len()
            )?,
            None => writeln!(out, "{key:<24} no examples")?,
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    results_path: &'a Path,
    model: &'a str,
    experiment_type: ExperimentKind,
    prompting_mode: PromptingMode,
    metric: &'a str,
    accuracy: BTreeMap<&'a str, Option<f64>>,
}

fn print_json(results_path: &Path, record: &ResultsRecord) -> Result<()> {
    let summary = JsonSummary {
        results_path,
        model: &record.model,
        experiment_type: record.experiment_type,
        prompting_mode: record.prompting_mode,
        metric: &record.metric,
        accuracy: record
            .experiments
            .iter()
            .map(|(key, results)| (key.as_str(), results.accuracy()))
            .collect(),
    };
    let out = serde_json::to_string_pretty(&summary)?;
    println!("{out}");
    Ok(())
}
