use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRagConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub llm: LLMConfig,
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible embeddings endpoint base, e.g. "https://api.openai.com/v1".
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// OpenAI-compatible chat-completions endpoint base.
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of results to return.
    pub top_k: usize,
    /// Candidate pool considered before diversification.
    pub fetch_k: usize,
    /// MMR trade-off: 0 = most diverse, 1 = most relevant.
    pub mmr_lambda: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of reasoning round-trips before forcing a text answer.
    pub max_rounds: usize,
    /// Per-tool execution timeout in seconds.
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Documents embedded and upserted per batch.
    pub batch_size: usize,
    /// Attempts per batch before it is recorded as failed.
    pub batch_retries: usize,
}

impl ReviewRagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.retrieval.top_k == 0 {
            return Err("retrieval.top_k must be > 0".into());
        }
        if self.retrieval.fetch_k < self.retrieval.top_k {
            return Err("retrieval.fetch_k must be >= retrieval.top_k".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err("retrieval.mmr_lambda must be in [0.0, 1.0]".into());
        }
        if self.agent.max_rounds == 0 {
            return Err("agent.max_rounds must be > 0".into());
        }
        if self.ingest.batch_size == 0 {
            return Err("ingest.batch_size must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ReviewRagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("review-rag");

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: "text-embedding-3-small".to_string(),
                dimension: 1536,
            },
            llm: LLMConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 4096,
                temperature: 0.2,
                top_p: 0.95,
            },
            retrieval: RetrievalConfig {
                top_k: 12,
                fetch_k: 30,
                mmr_lambda: 0.5,
            },
            agent: AgentConfig {
                max_rounds: 8,
                tool_timeout_secs: 60,
            },
            ingest: IngestConfig {
                batch_size: 1000,
                batch_retries: 3,
            },
        }
    }
}
