pub mod agent;
pub mod analysis;
pub mod chains;
pub mod config;
pub mod embeddings;
pub mod ingest;
pub mod llm;
pub mod prompts;
pub mod retrieval;
pub mod storage;
pub mod types;
pub mod usage;

// Re-export primary types for convenience
pub use agent::{AgentController, AgentReply};
pub use config::ReviewRagConfig;
pub use retrieval::{format_snippets_to_text, RetrievalError, Retriever};
pub use types::{ChunkKind, DocRecord, ReviewRecord, Snippet, ToolOutput, ToolPayload};
pub use usage::{UsageMeter, UsageSnapshot};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
