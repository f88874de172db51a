pub const DATA_SRC_DIR: &str = "./lost-in-the-middle/qa_data";
pub const DATA_DST_DIR: &str = "./qa_data";
pub const RESULTS_DIR: &str = "./results";

pub const SUPPORTED_NUM_DOCS: [usize; 3] = [10, 20, 30];
pub const SUPPORTED_GOLD_IDXS: [usize; 7] = [0, 4, 9, 14, 19, 24, 29];

pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.1-8B-Instruct";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/v1";
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_MAX_TOKENS: usize = 100;

/// Examples kept per configuration key when running in test mode.
pub const TEST_NUM_EXAMPLES: usize = 5;

pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

// File naming of the NQ-open corpus:
// nq-open-10_total_documents_gold_at_0.jsonl
pub const CORPUS_FILE_PREFIX: &str = "nq-open-";
pub const DOCUMENTS_MARKER: &str = "_documents_";
pub const GOLD_MARKER: &str = "_gold_at_";
pub const NUM_DOCS_FOLDER_SUFFIX: &str = "_total_documents";
