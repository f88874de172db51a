use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ExperimentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptingMode {
    #[serde(rename = "closedbook")]
    ClosedBook,
    #[serde(rename = "openbook")]
    OpenBook,
    #[serde(rename = "openbook-random")]
    OpenBookRandom,
}

impl PromptingMode {
    pub const ALL: [PromptingMode; 3] = [
        PromptingMode::ClosedBook,
        PromptingMode::OpenBook,
        PromptingMode::OpenBookRandom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptingMode::ClosedBook => "closedbook",
            PromptingMode::OpenBook => "openbook",
            PromptingMode::OpenBookRandom => "openbook-random",
        }
    }

    pub fn uses_documents(&self) -> bool {
        !matches!(self, PromptingMode::ClosedBook)
    }

    /// Name used in result paths, e.g. `openbook_random`.
    pub fn path_segment(&self) -> String {
        self.as_str().replace('-', "_")
    }
}

impl fmt::Display for PromptingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptingMode {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        PromptingMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| invalid_value("PromptingMode", "prompting_mode", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentKind {
    #[serde(rename = "gold-idx-change")]
    GoldIdxChange,
    #[serde(rename = "num-docs-change")]
    NumDocsChange,
}

impl ExperimentKind {
    pub const ALL: [ExperimentKind; 2] = [ExperimentKind::GoldIdxChange, ExperimentKind::NumDocsChange];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentKind::GoldIdxChange => "gold-idx-change",
            ExperimentKind::NumDocsChange => "num-docs-change",
        }
    }

    pub fn path_segment(&self) -> String {
        self.as_str().replace('-', "_")
    }
}

impl fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentKind {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        ExperimentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| invalid_value("ExperimentKind", "experiment", s))
    }
}

fn invalid_value(obj: &str, arg: &str, value: &str) -> ExperimentError {
    ExperimentError::Configuration(format!(
        "Tried to create {obj} instance with invalid `{arg}` value: {value}"
    ))
}

/// The axis held constant during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedAxis {
    NumDocs(usize),
    GoldIdx(usize),
}

impl FixedAxis {
    pub fn path_segment(&self) -> String {
        match self {
            FixedAxis::NumDocs(num_docs) => format!("{num_docs}_docs"),
            FixedAxis::GoldIdx(gold_idx) => format!("gold_idx_{gold_idx}"),
        }
    }
}

/// A single retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub text: String,
    #[serde(default, deserialize_with = "deserialize_loose_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_score")]
    pub score: Option<f64>,
    #[serde(default)]
    pub hasanswer: Option<bool>,
    #[serde(default)]
    pub isgold: Option<bool>,
    #[serde(default)]
    pub original_retrieval_index: Option<u64>,
}

impl Document {
    pub fn from_record(record: &serde_json::Value) -> Result<Self> {
        let has_fields = record.as_object().is_some_and(|fields| !fields.is_empty());
        if !has_fields {
            return Err(ExperimentError::MissingData(
                "must provide data for creation of a Document".to_string(),
            ));
        }
        Ok(Document::deserialize(record)?)
    }

    pub fn is_gold(&self) -> bool {
        self.isgold == Some(true)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(serde_json::Number),
    Text(String),
}

fn deserialize_loose_score<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Loose::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("score out of range: {n}"))),
        Some(Loose::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("score is not a number: {s:?}"))),
    }
}

fn deserialize_loose_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Loose>::deserialize(deserializer)?.map(|id| match id {
        Loose::Number(n) => n.to_string(),
        Loose::Text(s) => s,
    }))
}

/// One question with its acceptable answers and retrieved context.
///
/// `documents` is always empty in closed-book mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub question: String,
    pub answers: Vec<String>,
    pub documents: Vec<Document>,
}

/// Examples grouped by configuration key (`gold_at_0`, `10_total_documents`).
pub type Corpus = BTreeMap<String, Vec<Example>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_modes_and_kinds() {
        assert_eq!(
            "openbook-random".parse::<PromptingMode>().unwrap(),
            PromptingMode::OpenBookRandom
        );
        assert_eq!(
            "num-docs-change".parse::<ExperimentKind>().unwrap(),
            ExperimentKind::NumDocsChange
        );
        assert_eq!(PromptingMode::OpenBookRandom.path_segment(), "openbook_random");
        assert_eq!(ExperimentKind::GoldIdxChange.path_segment(), "gold_idx_change");
        assert_eq!(FixedAxis::NumDocs(20).path_segment(), "20_docs");
        assert_eq!(FixedAxis::GoldIdx(4).path_segment(), "gold_idx_4");
    }

    #[test]
    fn rejects_unknown_kind_naming_value() {
        let err = "gold-index".parse::<ExperimentKind>().unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
        assert!(err.to_string().contains("gold-index"));
    }

    #[test]
    fn document_coerces_score_and_id() {
        let doc = Document::from_record(&json!({
            "title": "Paris",
            "text": "Paris is the capital of France.",
            "id": 42,
            "score": "1.5",
            "hasanswer": true,
            "isgold": false,
            "original_retrieval_index": 3
        }))
        .unwrap();
        assert_eq!(doc.id.as_deref(), Some("42"));
        assert_eq!(doc.score, Some(1.5));
        assert_eq!(doc.original_retrieval_index, Some(3));
        assert!(!doc.is_gold());
    }

    #[test]
    fn document_optional_fields_default_to_none() {
        let doc = Document::from_record(&json!({"title": "t", "text": "x"})).unwrap();
        assert_eq!(doc.id, None);
        assert_eq!(doc.score, None);
        assert_eq!(doc.isgold, None);
    }

    #[test]
    fn document_requires_data() {
        let err = Document::from_record(&json!({})).unwrap_err();
        assert!(err.is_data_integrity());
    }
}
