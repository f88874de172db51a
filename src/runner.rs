use std::error::Error;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::backend::{BackendKind, BackendOptions, build_backend};
use crate::cli::Cli;
use crate::corpus::CorpusLoader;
use crate::error::{ExperimentError, Result};
use crate::experiment::{
    Collaborators, ExperimentRun, ExperimentSettings, RunStatus, experiment_for, run_experiment,
};
use crate::output::{ResultsLayout, ResultsRecord};
use crate::prompt::PromptBuilder;
use crate::tokenizer::{ChatFormatter, ChatTemplate, HfTokenizer, TokenCounter, WhitespaceCounter};

pub struct RunOutcome {
    pub results_path: PathBuf,
    pub record: ResultsRecord,
}

pub fn run_experiment_command(cli: &Cli) -> Result<RunOutcome> {
    cli.validate()?;
    let hf_token = cli.hf_token()?;
    let kind = cli.experiment_kind()?;
    let mode = cli.prompting_mode()?;
    let backend_kind = cli.backend_kind()?;
    let experiment = experiment_for(kind, cli.num_docs, cli.gold_idx)?;

    let args = serde_json::to_string_pretty(cli)?;
    info!("Running with arguments:\n{args}");

    let template = ChatTemplate::resolve(&cli.chat_template, &cli.model)?;
    let tokenizer = match (&cli.tokenizer_file, backend_kind) {
        (Some(path), _) => Some(HfTokenizer::from_file(&cli.model, path, template)?),
        (None, BackendKind::Http) => Some(HfTokenizer::from_pretrained(
            &cli.model, hf_token, template,
        )?),
        (None, BackendKind::Mock) => {
            warn!("No tokenizer file given: prompt token counts are approximate word counts");
            None
        }
    };

    if let Some(tokenizer) = &tokenizer {
        info!(
            "Tokenizer for {} loaded, chat template: {:?}",
            tokenizer.model(),
            tokenizer.template()
        );
    }

    let formatter: Option<&dyn ChatFormatter> = match (&tokenizer, &template) {
        (Some(tokenizer), Some(_)) => Some(tokenizer as &dyn ChatFormatter),
        (None, Some(template)) => Some(template as &dyn ChatFormatter),
        (_, None) => None,
    };
    let counter: &dyn TokenCounter = match &tokenizer {
        Some(tokenizer) => tokenizer,
        None => &WhitespaceCounter,
    };

    let backend = build_backend(
        backend_kind,
        BackendOptions {
            model: cli.model.clone(),
            base_url: cli.backend_url.clone(),
            api_key: cli.api_key.clone(),
            timeout: cli.request_timeout.into(),
        },
    )?;
    let builder = PromptBuilder::new(mode, formatter);
    let collab = Collaborators {
        backend: backend.as_ref(),
        builder: &builder,
        counter,
    };

    let settings = ExperimentSettings {
        model: cli.model.clone(),
        prompting_mode: mode,
        sampling: cli.sampling(),
        data_src: cli.data_src.clone(),
        data_dir: cli.data_dir.clone(),
        layout: ResultsLayout {
            root: cli.results_dir.clone(),
            flat_closedbook: cli.flat_closedbook_results,
        },
        test_mode: cli.test_mode,
    };
    let mut loader = CorpusLoader::new(mode, cli.seed);
    let mut run = ExperimentRun::new(experiment.as_ref(), &settings);

    match run_experiment(&mut run, &mut loader, &collab) {
        Ok(results_path) => {
            let record = run.results().cloned().ok_or_else(|| {
                ExperimentError::InvariantViolation("finalized run has no results".to_string())
            })?;
            Ok(RunOutcome {
                results_path,
                record,
            })
        }
        Err(err) => {
            if let RunStatus::Failed(reason) = run.status() {
                warn!("{} experiment failed: {reason}", experiment.kind());
            }
            if err.is_data_integrity() {
                warn!("Corpus under {} is inconsistent", cli.data_dir.display());
            }
            Err(err)
        }
    }
}

/// Source chain of an error, outermost first.
pub fn error_chain(err: &ExperimentError) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[test]
    fn missing_token_fails_before_touching_files() {
        let work = tempdir().unwrap();
        let data_dir = work.path().join("qa_data");
        let mut cli = Cli::try_parse_from([
            "litm-run",
            "--experiment",
            "gold-idx-change",
            "--num-docs",
            "10",
            "--backend",
            "mock",
        ])
        .unwrap();
        cli.hf_token = None;
        cli.data_dir = data_dir.clone();

        let err = run_experiment_command(&cli).err().unwrap();
        assert!(matches!(err, ExperimentError::MissingCredential(_)));
        assert!(!data_dir.exists());
    }

    #[test]
    fn chains_error_sources() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ExperimentError::Parse {
            path: PathBuf::from("a.jsonl"),
            line: 3,
            source,
        };
        let chain = error_chain(&err);
        assert_eq!(chain.len(), 2);
        assert!(chain[0].starts_with("Failed to parse a.jsonl:3"));
    }
}
