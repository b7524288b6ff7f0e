pub mod chat;
pub mod chunking;
pub mod embeddings;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod ollama;
pub mod openai;
pub mod retrieve;
pub mod store;

pub use chat::{CancelToken, ChatOutcome, ChatPipeline, ChatResponse, IngestSummary, PipelineStatus};
pub use chunking::TextSplitter;
pub use retrieve::{RetrievalOutcome, RetrievalResponse, RetrievalResult, Retriever};
pub use store::{CollectionStats, VectorStore};
