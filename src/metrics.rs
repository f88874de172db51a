//! Best-subspan exact match, using the SQuAD answer normalization.

use std::sync::LazyLock;

use regex::Regex;

pub const METRIC_NAME: &str = "best_subspan_em";

static ARTICLES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(a|an|the)\b").expect("article pattern is valid"));

/// Lowercase, strip punctuation, drop articles and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_punct: String = lowered
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    let without_articles = ARTICLES.replace_all(&without_punct, " ");
    without_articles.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 1.0 if any normalized ground truth occurs inside the normalized prediction.
pub fn best_subspan_em<S: AsRef<str>>(prediction: &str, ground_truths: &[S]) -> f64 {
    let normalized_prediction = normalize(prediction).to_lowercase();

    for ground_truth in ground_truths {
        let normalized_ground_truth = normalize(ground_truth.as_ref()).to_lowercase();
        if normalized_prediction.contains(&normalized_ground_truth) {
            return 1.0;
        }
    }
    0.0
}
