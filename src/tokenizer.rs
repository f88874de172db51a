//! Chat formatting and prompt token counting.

use std::path::Path;

use tokenizers::{FromPretrainedParameters, Tokenizer};
use tracing::info;

use crate::error::{ExperimentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// `[system?, user]` conversation.
pub fn messages(user: &str, system: Option<&str>) -> Vec<Message> {
    let mut out = Vec::with_capacity(2);
    if let Some(system) = system {
        out.push(Message {
            role: Role::System,
            content: system.to_string(),
        });
    }
    out.push(Message {
        role: Role::User,
        content: user.to_string(),
    });
    out
}

/// Serializes a conversation into the prompt a chat model expects,
/// ending with the assistant generation cue.
pub trait ChatFormatter {
    fn apply_chat_template(&self, messages: &[Message]) -> Result<String>;
}

pub trait TokenCounter {
    /// Tokens of an already formatted prompt, as the backend will see it.
    fn count_tokens(&self, prompt: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    Llama3,
    Falcon3,
}

impl ChatTemplate {
    /// Resolves `auto|llama3|falcon3|none`; `None` means a base model without chat formatting.
    pub fn resolve(selector: &str, model: &str) -> Result<Option<ChatTemplate>> {
        match selector {
            "auto" => Ok(Self::detect(model)),
            "llama3" => Ok(Some(ChatTemplate::Llama3)),
            "falcon3" => Ok(Some(ChatTemplate::Falcon3)),
            "none" => Ok(None),
            other => Err(ExperimentError::Configuration(format!(
                "Unknown chat template: {other}"
            ))),
        }
    }

    pub fn detect(model: &str) -> Option<ChatTemplate> {
        let name = model.rsplit('/').next().unwrap_or(model);
        if !name.contains("Instruct") {
            return None;
        }
        if name.starts_with("Llama-3") || name.starts_with("Meta-Llama-3") {
            Some(ChatTemplate::Llama3)
        } else if name.starts_with("Falcon3") {
            Some(ChatTemplate::Falcon3)
        } else {
            None
        }
    }

    pub fn render(&self, messages: &[Message]) -> String {
        let mut out = String::new();
        match self {
            ChatTemplate::Llama3 => {
                out.push_str("<|begin_of_text|>");
                for message in messages {
                    out.push_str(&format!(
                        "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
                        message.role.as_str(),
                        message.content.trim()
                    ));
                }
                out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
            }
            ChatTemplate::Falcon3 => {
                for message in messages {
                    out.push_str(&format!("<|{}|>\n{}\n", message.role.as_str(), message.content));
                }
                out.push_str("<|assistant|>\n");
            }
        }
        out
    }
}

impl ChatFormatter for ChatTemplate {
    fn apply_chat_template(&self, messages: &[Message]) -> Result<String> {
        Ok(self.render(messages))
    }
}

/// A Hugging Face tokenizer paired with the chat template of its model.
pub struct HfTokenizer {
    model: String,
    tokenizer: Tokenizer,
    template: Option<ChatTemplate>,
}

impl HfTokenizer {
    pub fn from_file(model: &str, path: &Path, template: Option<ChatTemplate>) -> Result<Self> {
        info!("Loading tokenizer for {model} from {}", path.display());
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| ExperimentError::Tokenizer(format!("{}: {e}", path.display())))?;
        Ok(Self {
            model: model.to_string(),
            tokenizer,
            template,
        })
    }

    pub fn from_pretrained(model: &str, hf_token: &str, template: Option<ChatTemplate>) -> Result<Self> {
        info!("Fetching tokenizer for {model} from the Hugging Face hub");
        let params = FromPretrainedParameters {
            token: Some(hf_token.to_string()),
            ..Default::default()
        };
        let tokenizer = Tokenizer::from_pretrained(model, Some(params))
            .map_err(|e| ExperimentError::Tokenizer(format!("{model}: {e}")))?;
        Ok(Self {
            model: model.to_string(),
            tokenizer,
            template,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn template(&self) -> Option<ChatTemplate> {
        self.template
    }

    pub fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| ExperimentError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl ChatFormatter for HfTokenizer {
    fn apply_chat_template(&self, messages: &[Message]) -> Result<String> {
        match self.template {
            Some(template) => Ok(template.render(messages)),
            None => Err(ExperimentError::Tokenizer(format!(
                "{} has no chat template",
                self.model
            ))),
        }
    }
}

impl TokenCounter for HfTokenizer {
    // Special tokens are already part of a chat-formatted prompt.
    fn count_tokens(&self, prompt: &str) -> Result<usize> {
        Ok(self.tokenize(prompt)?.len())
    }
}

/// Approximate counts for runs without a real tokenizer.
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count_tokens(&self, prompt: &str) -> Result<usize> {
        Ok(prompt.split_whitespace().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const WORD_LEVEL_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "question": 1, "answer": 2},
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn detects_templates_from_model_id() {
        assert_eq!(
            ChatTemplate::detect("meta-llama/Llama-3.1-8B-Instruct"),
            Some(ChatTemplate::Llama3)
        );
        assert_eq!(
            ChatTemplate::detect("tiiuae/Falcon3-Mamba-7B-Instruct"),
            Some(ChatTemplate::Falcon3)
        );
        assert_eq!(ChatTemplate::detect("meta-llama/Llama-3.1-8B"), None);
        assert_eq!(
            ChatTemplate::resolve("none", "meta-llama/Llama-3.1-8B-Instruct").unwrap(),
            None
        );
        assert!(ChatTemplate::resolve("chatml", "x").is_err());
    }

    #[test]
    fn renders_llama3_conversation() {
        let rendered = ChatTemplate::Llama3.render(&messages("Question: q", Some("Be brief.")));
        assert_eq!(
            rendered,
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nQuestion: q<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn renders_falcon3_conversation() {
        let rendered = ChatTemplate::Falcon3.render(&messages("hi", None));
        assert_eq!(rendered, "<|user|>\nhi\n<|assistant|>\n");
    }

    #[test]
    fn counts_tokens_with_hf_tokenizer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        fs::write(&path, WORD_LEVEL_TOKENIZER).unwrap();

        let tokenizer = HfTokenizer::from_file("test/word-level", &path, None).unwrap();
        assert_eq!(tokenizer.tokenize("question answer other").unwrap(), vec![1, 2, 0]);
        assert_eq!(tokenizer.count_tokens("question answer other").unwrap(), 3);
        assert!(tokenizer.apply_chat_template(&messages("q", None)).is_err());
    }

    #[test]
    fn whitespace_counter_counts_words() {
        assert_eq!(WhitespaceCounter.count_tokens(" a  b\nc ").unwrap(), 3);
    }
}
