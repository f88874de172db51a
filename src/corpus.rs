//! Loads NQ-open example files into per-configuration example collections.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consts::{CORPUS_FILE_PREFIX, DOCUMENTS_MARKER, GOLD_MARKER};
use crate::error::{ExperimentError, Result};
use crate::model::{Corpus, Document, Example, PromptingMode};

#[derive(Deserialize)]
struct RawExample {
    question: String,
    answers: Vec<String>,
    #[serde(default)]
    ctxs: Option<serde_json::Value>,
}

/// `nq-open-10_total_documents_gold_at_0` -> `gold_at_0`
pub fn gold_position_key(stem: &str) -> String {
    stem.rsplit(DOCUMENTS_MARKER)
        .next()
        .unwrap_or(stem)
        .to_string()
}

/// `nq-open-10_total_documents_gold_at_0` -> `10_total_documents`
pub fn num_docs_key(stem: &str) -> String {
    stem.split(GOLD_MARKER)
        .next()
        .unwrap_or(stem)
        .replace(CORPUS_FILE_PREFIX, "")
}

/// Shortens every collection of the corpus to at most `n` examples.
pub fn truncate_corpus(corpus: &mut Corpus, n: usize) {
    for examples in corpus.values_mut() {
        examples.truncate(n);
    }
}

/// Shuffles the distractors of a context window while the gold document
/// keeps its index.
pub fn reorder_distractors<R: Rng + ?Sized>(
    documents: Vec<Document>,
    rng: &mut R,
) -> Result<Vec<Document>> {
    let gold_positions: Vec<usize> = documents
        .iter()
        .enumerate()
        .filter(|(_, doc)| doc.is_gold())
        .map(|(idx, _)| idx)
        .collect();
    let [gold_idx] = gold_positions[..] else {
        return Err(ExperimentError::InvariantViolation(format!(
            "expected exactly one gold document, found {}",
            gold_positions.len()
        )));
    };

    let mut distractors = documents;
    let gold = distractors.remove(gold_idx);
    distractors.shuffle(rng);
    distractors.insert(gold_idx, gold);
    Ok(distractors)
}

pub struct CorpusLoader {
    mode: PromptingMode,
    rng: StdRng,
}

impl CorpusLoader {
    /// Without a seed the distractor order of `openbook-random` differs between runs.
    pub fn new(mode: PromptingMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => {
                info!("Shuffling distractors with seed {seed}");
                StdRng::seed_from_u64(seed)
            }
            None => {
                info!("Shuffling distractors with an entropy seed, order is not reproducible");
                StdRng::from_entropy()
            }
        };
        Self { mode, rng }
    }

    pub fn mode(&self) -> PromptingMode {
        self.mode
    }

    /// Loads every `*.jsonl` file of `dir`, keyed by gold position.
    pub fn load_directory(&mut self, dir: &Path) -> Result<Corpus> {
        if !dir.is_dir() {
            return Err(ExperimentError::NotFound(dir.to_path_buf()));
        }

        let files = jsonl_files(dir)?;
        if files.is_empty() {
            warn!("No .jsonl files found in {}", dir.display());
        }

        let mut corpus = Corpus::new();
        let mut sources = BTreeMap::new();
        for path in files {
            let key = gold_position_key(&file_stem(&path));
            claim_key(&mut sources, &key, &path)?;
            let examples = self.load_file(&path)?;
            corpus.insert(key, examples);
        }
        Ok(corpus)
    }

    /// Loads the `gold_at_<gold_idx>` file of each folder, keyed by document count.
    pub fn load_by_gold_idx(&mut self, folders: &[PathBuf], gold_idx: usize) -> Result<Corpus> {
        let suffix = format!("{GOLD_MARKER}{gold_idx}");
        let mut corpus = Corpus::new();
        let mut sources = BTreeMap::new();

        for folder in folders {
            if !folder.is_dir() {
                return Err(ExperimentError::NotFound(folder.clone()));
            }

            let matching = jsonl_files(folder)?
                .into_iter()
                .find(|path| file_stem(path).ends_with(&suffix));
            let Some(path) = matching else {
                warn!(
                    "No file for gold index {gold_idx} in {}, skipping",
                    folder.display()
                );
                continue;
            };

            let key = num_docs_key(&file_stem(&path));
            claim_key(&mut sources, &key, &path)?;
            let examples = self.load_file(&path)?;
            corpus.insert(key, examples);
        }
        Ok(corpus)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Vec<Example>> {
        let reader = BufReader::new(File::open(path)?);
        let mut examples = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawExample =
                serde_json::from_str(&line).map_err(|source| ExperimentError::Parse {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    source,
                })?;
            examples.push(self.build_example(raw)?);
        }

        info!("Loaded {} examples from {}", examples.len(), path.display());
        Ok(examples)
    }

    fn build_example(&mut self, raw: RawExample) -> Result<Example> {
        if !self.mode.uses_documents() {
            return Ok(Example {
                question: raw.question,
                answers: raw.answers,
                documents: Vec::new(),
            });
        }

        let records = raw
            .ctxs
            .as_ref()
            .and_then(|ctxs| ctxs.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut documents = records
            .iter()
            .map(Document::from_record)
            .collect::<Result<Vec<_>>>()?;
        if documents.is_empty() {
            return Err(ExperimentError::MissingData(format!(
                "did not find any documents for question: {:?}",
                raw.question
            )));
        }

        if self.mode == PromptingMode::OpenBookRandom {
            documents = reorder_distractors(documents, &mut self.rng)?;
            debug!("Reordered {} documents", documents.len());
        }

        Ok(Example {
            question: raw.question,
            answers: raw.answers,
            documents,
        })
    }
}

/// Each configuration key comes from exactly one file.
fn claim_key(sources: &mut BTreeMap<String, PathBuf>, key: &str, path: &Path) -> Result<()> {
    if let Some(first) = sources.get(key) {
        return Err(ExperimentError::InvariantViolation(format!(
            "configuration key '{key}' found in both {} and {}",
            first.display(),
            path.display()
        )));
    }
    sources.insert(key.to_string(), path.to_path_buf());
    Ok(())
}

fn jsonl_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
