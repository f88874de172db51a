//! Stages the gzipped NQ-open corpus of a lost-in-the-middle checkout into a
//! working data directory. Existing destination files are never overwritten.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;
use walkdir::{DirEntry, WalkDir};

use crate::consts::{CORPUS_FILE_PREFIX, GOLD_MARKER, NUM_DOCS_FOLDER_SUFFIX};
use crate::error::{ExperimentError, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Destination folders holding the staged files, sorted.
    pub folders: Vec<PathBuf>,
    pub copied: usize,
    pub skipped: usize,
}

impl StageReport {
    fn record(&mut self, copied: bool) {
        if copied {
            self.copied += 1;
        } else {
            self.skipped += 1;
        }
    }
}

pub fn num_docs_folder(num_docs: usize) -> String {
    format!("{num_docs}{NUM_DOCS_FOLDER_SUFFIX}")
}

pub fn corpus_file_name(num_docs: usize, gold_idx: usize) -> String {
    format!("{CORPUS_FILE_PREFIX}{num_docs}{NUM_DOCS_FOLDER_SUFFIX}{GOLD_MARKER}{gold_idx}.jsonl")
}

/// Stages every file of `<src>/<num_docs>_total_documents`.
pub fn stage_by_num_docs(src_dir: &Path, dst_dir: &Path, num_docs: usize) -> Result<StageReport> {
    info!("Staging NQ data with {num_docs} documents per example...");
    let folder = num_docs_folder(num_docs);
    let src_folder = src_dir.join(&folder);
    if !src_folder.is_dir() {
        return Err(ExperimentError::NotFound(src_folder));
    }

    let dst_folder = dst_dir.join(&folder);
    fs::create_dir_all(&dst_folder)?;

    let mut report = StageReport::default();
    for entry in list_dir(&src_folder)? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "gz") {
            report.record(decompress_if_missing(path, &dst_folder)?);
        }
    }
    report.folders.push(dst_folder);
    Ok(report)
}

/// Stages the `gold_at_<gold_idx>` file of every document-count folder that has one.
pub fn stage_by_gold_idx(src_dir: &Path, dst_dir: &Path, gold_idx: usize) -> Result<StageReport> {
    info!("Staging NQ data with the gold document at index {gold_idx}...");
    if !src_dir.is_dir() {
        return Err(ExperimentError::NotFound(src_dir.to_path_buf()));
    }

    let mut report = StageReport::default();
    for entry in list_dir(src_dir)? {
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(num_docs) = parse_num_docs_folder(entry.file_name().to_string_lossy().as_ref())
        else {
            continue;
        };

        let src_file = entry
            .path()
            .join(format!("{}.gz", corpus_file_name(num_docs, gold_idx)));
        if !src_file.is_file() {
            info!(
                "Skipping folder {}: no file for gold index {gold_idx}",
                entry.path().display()
            );
            continue;
        }

        let dst_folder = dst_dir.join(num_docs_folder(num_docs));
        fs::create_dir_all(&dst_folder)?;
        report.record(decompress_if_missing(&src_file, &dst_folder)?);
        report.folders.push(dst_folder);
    }

    report.folders.sort();
    Ok(report)
}

fn parse_num_docs_folder(name: &str) -> Option<usize> {
    name.strip_suffix(NUM_DOCS_FOLDER_SUFFIX)?.parse().ok()
}

fn list_dir(dir: &Path) -> Result<Vec<DirEntry>> {
    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Returns `false` when the destination already exists.
fn decompress_if_missing(src_file: &Path, dst_folder: &Path) -> Result<bool> {
    let Some(stem) = src_file.file_stem() else {
        return Err(ExperimentError::NotFound(src_file.to_path_buf()));
    };
    let dst_file = dst_folder.join(stem);
    if dst_file.exists() {
        info!("Skipping existing file: {}", src_file.display());
        return Ok(false);
    }

    info!(
        "Decompressing file: {} to: {}",
        src_file.display(),
        dst_file.display()
    );
    // Write next to the target and rename, so an interrupted copy is never
    // mistaken for a staged file on the next run.
    let partial = dst_folder.join(format!("{}.partial", stem.to_string_lossy()));
    {
        let mut reader = GzDecoder::new(BufReader::new(File::open(src_file)?));
        let mut writer = BufWriter::new(File::create(&partial)?);
        io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
    }
    fs::rename(&partial, &dst_file)?;
    Ok(true)
}
