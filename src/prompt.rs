use crate::error::{ExperimentError, Result};
use crate::model::{Document, PromptingMode};
use crate::tokenizer::{ChatFormatter, messages};

const OPENBOOK_PREAMBLE: &str = "Write a high-quality answer for the given question using only the provided search results (some of which might be irrelevant).";
const OPENBOOK_RANDOM_PREAMBLE: &str = "Write a high-quality answer for the given question using only the provided search results (some of which might be irrelevant). The search results are ordered randomly.";
const CLOSEDBOOK_PREAMBLE: &str = "Write a high-quality answer for the given question.";

const PART_SEPARATOR: &str = "\n\n";

/// Renders questions into prompts for one prompting mode.
pub struct PromptBuilder<'a> {
    mode: PromptingMode,
    preamble: &'static str,
    formatter: Option<&'a dyn ChatFormatter>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(mode: PromptingMode, formatter: Option<&'a dyn ChatFormatter>) -> Self {
        let preamble = match mode {
            PromptingMode::ClosedBook => CLOSEDBOOK_PREAMBLE,
            PromptingMode::OpenBook => OPENBOOK_PREAMBLE,
            PromptingMode::OpenBookRandom => OPENBOOK_RANDOM_PREAMBLE,
        };
        Self {
            mode,
            preamble,
            formatter,
        }
    }

    pub fn mode(&self) -> PromptingMode {
        self.mode
    }

    /// Documents are ignored in closed-book mode and required otherwise.
    pub fn build(&self, question: &str, documents: &[Document]) -> Result<String> {
        let body = self.body(question, documents)?;
        match self.formatter {
            Some(formatter) => formatter.apply_chat_template(&messages(&body, Some(self.preamble))),
            None => Ok([self.preamble, body.as_str()].join(PART_SEPARATOR)),
        }
    }

    fn body(&self, question: &str, documents: &[Document]) -> Result<String> {
        let mut parts = Vec::with_capacity(3);
        if self.mode.uses_documents() {
            if documents.is_empty() {
                return Err(ExperimentError::MissingData(format!(
                    "{} prompt needs documents for question: {question:?}",
                    self.mode
                )));
            }
            parts.push(format!("Search Results:\n{}", format_documents(documents)));
        }
        parts.push(format!("Question: {question}"));
        parts.push("Answer:".to_string());
        Ok(parts.join(PART_SEPARATOR))
    }
}

fn format_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(idx, doc)| format!("Document [{}](Title: {}) {}", idx + 1, doc.title, doc.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::ChatTemplate;

    fn doc(title: &str, text: &str) -> Document {
        Document {
            title: title.to_string(),
            text: text.to_string(),
            id: None,
            score: None,
            hasanswer: None,
            isgold: None,
            original_retrieval_index: None,
        }
    }

    #[test]
    fn builds_openbook_prompt() {
        let builder = PromptBuilder::new(PromptingMode::OpenBook, None);
        let docs = [doc("Paris", "Capital of France."), doc("Lyon", "A city.")];
        let prompt = builder.build("what is the capital of france", &docs).unwrap();
        assert_eq!(
            prompt,
            "Write a high-quality answer for the given question using only the provided search results (some of which might be irrelevant).\n\n\
             Search Results:\n\
             Document [1](Title: Paris) Capital of France.\n\
             Document [2](Title: Lyon) A city.\n\n\
             Question: what is the capital of france\n\n\
             Answer:"
        );
    }

    #[test]
    fn openbook_random_mentions_order() {
        let builder = PromptBuilder::new(PromptingMode::OpenBookRandom, None);
        let prompt = builder.build("q", &[doc("t", "x")]).unwrap();
        let first = prompt.lines().next().unwrap();
        assert!(first.ends_with("The search results are ordered randomly."));
        assert_eq!(prompt.lines().last(), Some("Answer:"));
    }

    #[test]
    fn closedbook_ignores_documents() {
        let builder = PromptBuilder::new(PromptingMode::ClosedBook, None);
        let prompt = builder.build("who wrote hamlet", &[doc("t", "x")]).unwrap();
        assert_eq!(
            prompt,
            "Write a high-quality answer for the given question.\n\nQuestion: who wrote hamlet\n\nAnswer:"
        );
    }

    #[test]
    fn openbook_without_documents_fails() {
        let builder = PromptBuilder::new(PromptingMode::OpenBook, None);
        let err = builder.build("q", &[]).unwrap_err();
        assert!(matches!(err, ExperimentError::MissingData(_)));
    }

    #[test]
    fn chat_formatting_splits_preamble_into_system_message() {
        let template = ChatTemplate::Falcon3;
        let builder = PromptBuilder::new(PromptingMode::ClosedBook, Some(&template));
        let prompt = builder.build("q", &[]).unwrap();
        assert_eq!(
            prompt,
            "<|system|>\nWrite a high-quality answer for the given question.\n\
             <|user|>\nQuestion: q\n\nAnswer:\n\
             <|assistant|>\n"
        );
    }
}
