//! Experiment variants and the run loop they share.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use crate::backend::{GenerationBackend, SamplingParams};
use crate::consts::TEST_NUM_EXAMPLES;
use crate::corpus::{CorpusLoader, truncate_corpus};
use crate::download::{stage_by_gold_idx, stage_by_num_docs};
use crate::error::{ExperimentError, Result};
use crate::metrics::best_subspan_em;
use crate::model::{Corpus, ExperimentKind, FixedAxis, PromptingMode};
use crate::output::{ResultsLayout, ResultsRecord};
use crate::prompt::PromptBuilder;
use crate::tokenizer::TokenCounter;

pub struct ExperimentSettings {
    pub model: String,
    pub prompting_mode: PromptingMode,
    pub sampling: SamplingParams,
    /// `qa_data` folder of a lost-in-the-middle checkout.
    pub data_src: PathBuf,
    pub data_dir: PathBuf,
    pub layout: ResultsLayout,
    /// Truncate every configuration to `TEST_NUM_EXAMPLES`.
    pub test_mode: bool,
}

pub trait Experiment {
    fn kind(&self) -> ExperimentKind;
    fn fixed_axis(&self) -> FixedAxis;
    fn load_data(&self, settings: &ExperimentSettings, loader: &mut CorpusLoader) -> Result<Corpus>;
}

/// Document count fixed, gold position varies.
pub struct GoldIdxChange {
    pub num_docs: usize,
}

impl Experiment for GoldIdxChange {
    fn kind(&self) -> ExperimentKind {
        ExperimentKind::GoldIdxChange
    }

    fn fixed_axis(&self) -> FixedAxis {
        FixedAxis::NumDocs(self.num_docs)
    }

    fn load_data(&self, settings: &ExperimentSettings, loader: &mut CorpusLoader) -> Result<Corpus> {
        let report = stage_by_num_docs(&settings.data_src, &settings.data_dir, self.num_docs)?;
        let folder = report
            .folders
            .first()
            .ok_or_else(|| ExperimentError::NotFound(settings.data_dir.clone()))?;
        loader.load_directory(folder)
    }
}

/// Gold position fixed, document count varies.
pub struct NumDocsChange {
    pub gold_idx: usize,
}

impl Experiment for NumDocsChange {
    fn kind(&self) -> ExperimentKind {
        ExperimentKind::NumDocsChange
    }

    fn fixed_axis(&self) -> FixedAxis {
        FixedAxis::GoldIdx(self.gold_idx)
    }

    fn load_data(&self, settings: &ExperimentSettings, loader: &mut CorpusLoader) -> Result<Corpus> {
        let report = stage_by_gold_idx(&settings.data_src, &settings.data_dir, self.gold_idx)?;
        loader.load_by_gold_idx(&report.folders, self.gold_idx)
    }
}

pub fn experiment_for(
    kind: ExperimentKind,
    num_docs: Option<usize>,
    gold_idx: Option<usize>,
) -> Result<Box<dyn Experiment>> {
    let missing = |arg: &str| {
        ExperimentError::Configuration(format!("{kind} experiment requires --{arg}"))
    };
    match kind {
        ExperimentKind::GoldIdxChange => {
            let num_docs = num_docs.ok_or_else(|| missing("num-docs"))?;
            Ok(Box::new(GoldIdxChange { num_docs }))
        }
        ExperimentKind::NumDocsChange => {
            let gold_idx = gold_idx.ok_or_else(|| missing("gold-idx"))?;
            Ok(Box::new(NumDocsChange { gold_idx }))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Initialized,
    DataLoaded,
    Running(String),
    Finalized(PathBuf),
    Failed(String),
}

/// What the run loop talks to besides the corpus.
pub struct Collaborators<'a> {
    pub backend: &'a dyn GenerationBackend,
    pub builder: &'a PromptBuilder<'a>,
    pub counter: &'a dyn TokenCounter,
}

pub struct ExperimentRun<'a> {
    experiment: &'a dyn Experiment,
    settings: &'a ExperimentSettings,
    status: RunStatus,
    corpus: Corpus,
    results: Option<ResultsRecord>,
}

impl<'a> ExperimentRun<'a> {
    pub fn new(experiment: &'a dyn Experiment, settings: &'a ExperimentSettings) -> Self {
        Self {
            experiment,
            settings,
            status: RunStatus::Initialized,
            corpus: Corpus::new(),
            results: None,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn results(&self) -> Option<&ResultsRecord> {
        self.results.as_ref()
    }

    pub fn load_data(&mut self, loader: &mut CorpusLoader) -> Result<()> {
        if self.status != RunStatus::Initialized {
            return Err(self.out_of_order("load data"));
        }

        let mut corpus = self.experiment.load_data(self.settings, loader)?;
        if self.settings.test_mode {
            info!("Test mode: truncating data to {TEST_NUM_EXAMPLES} examples per configuration");
            truncate_corpus(&mut corpus, TEST_NUM_EXAMPLES);
        }

        self.results = Some(ResultsRecord::new(
            &self.settings.model,
            self.experiment.kind(),
            self.experiment.fixed_axis(),
            self.settings.prompting_mode,
            self.settings.sampling,
            corpus.keys().cloned(),
            Utc::now(),
        ));
        self.corpus = corpus;
        self.status = RunStatus::DataLoaded;
        Ok(())
    }

    /// One batched generation call per configuration key.
    pub fn run(&mut self, collab: &Collaborators<'_>) -> Result<()> {
        if self.status != RunStatus::DataLoaded {
            return Err(self.out_of_order("run"));
        }

        let keys: Vec<String> = self.corpus.keys().cloned().collect();
        for key in keys {
            self.status = RunStatus::Running(key.clone());
            self.run_key(&key, collab)?;
        }
        Ok(())
    }

    fn run_key(&mut self, key: &str, collab: &Collaborators<'_>) -> Result<()> {
        info!("Starting process '{key}'...");
        let examples = self.corpus.get(key).map(Vec::as_slice).unwrap_or_default();

        let prompts = examples
            .iter()
            .map(|example| collab.builder.build(&example.question, &example.documents))
            .collect::<Result<Vec<_>>>()?;
        let answers = collab
            .backend
            .generate_batch(&prompts, &self.settings.sampling)?;
        if answers.len() != prompts.len() {
            return Err(ExperimentError::Backend(format!(
                "expected {} answers for '{key}', got {}",
                prompts.len(),
                answers.len()
            )));
        }

        let scores: Vec<f64> = answers
            .iter()
            .zip(examples)
            .map(|(answer, example)| best_subspan_em(answer, &example.answers))
            .collect();
        let num_prompt_tokens = prompts
            .iter()
            .map(|prompt| collab.counter.count_tokens(prompt))
            .collect::<Result<Vec<_>>>()?;

        let results = self
            .results
            .as_mut()
            .ok_or_else(|| ExperimentError::InvariantViolation("results not allocated".into()))?;
        results.append(key, answers, scores, num_prompt_tokens)?;
        if let Some(acc) = results.experiments.get(key).and_then(|r| r.accuracy()) {
            info!("Finished '{key}': {} = {acc:.3} over {} examples", results.metric, examples.len());
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<PathBuf> {
        if !matches!(self.status, RunStatus::DataLoaded | RunStatus::Running(_)) {
            return Err(self.out_of_order("finalize"));
        }
        let results = self
            .results
            .as_ref()
            .ok_or_else(|| ExperimentError::InvariantViolation("results not allocated".into()))?;

        info!("Logging experiment results.");
        let path = self
            .settings
            .layout
            .write(results, Utc::now().timestamp())?;
        self.status = RunStatus::Finalized(path.clone());
        Ok(path)
    }

    fn fail(&mut self, err: &ExperimentError) {
        debug!("Run failed while {:?}", self.status);
        self.status = RunStatus::Failed(err.to_string());
    }

    fn out_of_order(&self, step: &str) -> ExperimentError {
        ExperimentError::InvariantViolation(format!("cannot {step} while {:?}", self.status))
    }
}

/// Loads, runs and finalizes `run`. On error the run is left in `RunStatus::Failed`.
pub fn run_experiment(
    run: &mut ExperimentRun<'_>,
    loader: &mut CorpusLoader,
    collab: &Collaborators<'_>,
) -> Result<PathBuf> {
    info!(
        "Running a {} experiment ({:?})...",
        run.experiment.kind(),
        run.experiment.fixed_axis()
    );
    match drive(run, loader, collab) {
        Ok(path) => {
            info!("Experiment is done!");
            Ok(path)
        }
        Err(err) => {
            run.fail(&err);
            Err(err)
        }
    }
}

fn drive(
    run: &mut ExperimentRun<'_>,
    loader: &mut CorpusLoader,
    collab: &Collaborators<'_>,
) -> Result<PathBuf> {
    if loader.mode() != collab.builder.mode() {
        return Err(ExperimentError::Configuration(format!(
            "corpus loaded for {} but prompts built for {}",
            loader.mode(),
            collab.builder.mode()
        )));
    }
    run.load_data(loader)?;
    run.run(collab)?;
    run.finalize()
}
