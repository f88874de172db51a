use assert_cmd::Command;
use flate2::Compression;
use flate2::write::GzEncoder;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::{TempDir, tempdir};

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("litm-run");
    let mut cmd = Command::new(path);
    cmd.env_remove("LITM_API_KEY").env("RUST_LOG", "info");
    cmd
}

fn write_corpus(path: &Path, num_docs: usize, gold_idx: usize) {
    let file = File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    for i in 0..7 {
        let ctxs: Vec<_> = (0..num_docs)
            .map(|d| {
                json!({
                    "title": format!("Title {d}"),
                    "text": format!("Passage {d} of question {i}"),
                    "id": d,
                    "score": 0.5,
                    "hasanswer": d == gold_idx,
                    "isgold": d == gold_idx
                })
            })
            .collect();
        let record = json!({
            "question": format!("who wrote book {i}"),
            "answers": ["Someone Else"],
            "ctxs": ctxs
        });
        writeln!(encoder, "{record}").unwrap();
    }
    encoder.finish().unwrap();
}

fn source_tree() -> TempDir {
    let src = tempdir().unwrap();
    for num_docs in [10, 20] {
        let folder = src.path().join(format!("{num_docs}_total_documents"));
        fs::create_dir_all(&folder).unwrap();
        for gold_idx in [0, 4, 9] {
            let name = format!("nq-open-{num_docs}_total_documents_gold_at_{gold_idx}.jsonl.gz");
            write_corpus(&folder.join(name), num_docs, gold_idx);
        }
    }
    src
}

fn run_args<'a>(src: &'a Path, work: &'a Path, experiment: &'a [&'a str]) -> Vec<String> {
    let mut args: Vec<String> = experiment.iter().map(|s| s.to_string()).collect();
    args.extend(
        [
            "--backend",
            "mock",
            "--test-mode",
            "--seed",
            "7",
            "--output",
            "json",
        ]
        .map(String::from),
    );
    args.push("--data-src".into());
    args.push(src.display().to_string());
    args.push("--data-dir".into());
    args.push(work.join("qa_data").display().to_string());
    args.push("--results-dir".into());
    args.push(work.join("results").display().to_string());
    args
}

#[test]
fn runs_gold_idx_change_with_mock_backend() {
    let src = source_tree();
    let work = tempdir().unwrap();
    let args = run_args(
        src.path(),
        work.path(),
        &[
            "--experiment",
            "gold-idx-change",
            "--num-docs",
            "10",
            "--prompting-mode",
            "openbook-random",
        ],
    );

    let assert = bin()
        .env("HF_TOKEN", "hf_test")
        .args(&args)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"accuracy\""));

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let summary: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(summary["experiment_type"], "gold-idx-change");
    assert_eq!(summary["accuracy"]["gold_at_4"], 0.0);

    let results_path = Path::new(summary["results_path"].as_str().unwrap());
    assert!(results_path.starts_with(work.path().join(
        "results/Llama-3.1-8B-Instruct/gold_idx_change_experiment/openbook_random_prompting_mode/10_docs"
    )));

    let results: Value = serde_json::from_str(&fs::read_to_string(results_path).unwrap()).unwrap();
    assert_eq!(results["model"], "meta-llama/Llama-3.1-8B-Instruct");
    assert_eq!(results["num_documents"], 10);
    assert_eq!(results["metric"], "best_subspan_em");
    let experiments = results["experiments"].as_object().unwrap();
    assert_eq!(
        experiments.keys().collect::<Vec<_>>(),
        vec!["gold_at_0", "gold_at_4", "gold_at_9"]
    );
    for entry in experiments.values() {
        let answers = entry["model_answers"].as_array().unwrap();
        assert_eq!(answers.len(), 5);
        assert!(
            answers[0]
                .as_str()
                .unwrap()
                .starts_with("Mocked response to: <|begin_of_text|>")
        );
        assert_eq!(entry["scores"].as_array().unwrap().len(), 5);
        assert_eq!(entry["num_prompt_tokens"].as_array().unwrap().len(), 5);
    }
}

#[test]
fn runs_num_docs_change_and_skips_staged_files_on_rerun() {
    let src = source_tree();
    let work = tempdir().unwrap();
    let args = run_args(
        src.path(),
        work.path(),
        &[
            "--experiment",
            "num-docs-change",
            "--gold-idx",
            "9",
            "--prompting-mode",
            "closedbook",
        ],
    );

    bin()
        .env("HF_TOKEN", "hf_test")
        .args(&args)
        .assert()
        .success()
        .stderr(predicate::str::contains("Decompressing file"));

    let assert = bin()
        .env("HF_TOKEN", "hf_test")
        .args(&args)
        .assert()
        .success()
        .stderr(predicate::str::contains("Skipping existing file"));

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let summary: Value = serde_json::from_str(&output).unwrap();
    let accuracy = summary["accuracy"].as_object().unwrap();
    assert_eq!(
        accuracy.keys().collect::<Vec<_>>(),
        vec!["10_total_documents", "20_total_documents"]
    );
    let results_path = Path::new(summary["results_path"].as_str().unwrap());
    assert!(results_path.parent().unwrap().ends_with("closedbook_prompting_mode/gold_idx_9"));
}

#[test]
fn missing_hf_token_fails_before_staging() {
    let src = source_tree();
    let work = tempdir().unwrap();
    let args = run_args(
        src.path(),
        work.path(),
        &["--experiment", "gold-idx-change", "--num-docs", "10"],
    );

    bin()
        .env_remove("HF_TOKEN")
        .args(&args)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Missing credential"));

    assert!(!work.path().join("qa_data").exists());
    assert!(!work.path().join("results").exists());
}

#[test]
fn unknown_experiment_fails() {
    let src = source_tree();
    let work = tempdir().unwrap();
    let args = run_args(src.path(), work.path(), &["--experiment", "needle-change"]);

    bin()
        .env("HF_TOKEN", "hf_test")
        .args(&args)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "invalid `experiment` value: needle-change",
        ));

    assert!(!work.path().join("qa_data").exists());
}

#[test]
fn failures_log_backtrace_only_when_enabled() {
    let src = source_tree();
    let work = tempdir().unwrap();
    let args = run_args(src.path(), work.path(), &["--experiment", "needle-change"]);

    bin()
        .env("HF_TOKEN", "hf_test")
        .env("RUST_BACKTRACE", "1")
        .env_remove("RUST_LIB_BACKTRACE")
        .args(&args)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unexpected Error"))
        .stderr(predicate::str::contains("Backtrace:"));

    bin()
        .env("HF_TOKEN", "hf_test")
        .env_remove("RUST_BACKTRACE")
        .env_remove("RUST_LIB_BACKTRACE")
        .args(&args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Backtrace:").not());
}

#[test]
fn unseeded_runs_say_shuffle_is_not_reproducible() {
    let src = source_tree();
    let work = tempdir().unwrap();
    let args: Vec<String> = run_args(
        src.path(),
        work.path(),
        &[
            "--experiment",
            "gold-idx-change",
            "--num-docs",
            "10",
            "--prompting-mode",
            "openbook-random",
        ],
    )
    .into_iter()
    .filter(|arg| arg != "--seed" && arg != "7")
    .collect();

    bin()
        .env("HF_TOKEN", "hf_test")
        .args(&args)
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "Shuffling distractors with an entropy seed, order is not reproducible",
        ));
}
