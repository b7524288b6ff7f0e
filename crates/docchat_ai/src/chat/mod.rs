//! End-to-end chat pipeline: retrieve, prompt, generate, remember, measure.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docchat_core::config::{ConfigHandle, PipelineConfig, Provider};
use docchat_core::domain::{round_to, ConversationTurn, SourceCitation};
use docchat_core::error::AppError;
use docchat_core::exchange_log::{
    ExchangeInput, ExchangeLog, ExchangeRecord, Feedback, FeedbackRecord,
};
use docchat_core::memory::SessionMemories;
use docchat_core::metrics::{MetricsState, MetricsTracker};
use serde::{Deserialize, Serialize};

use crate::chunking::TextSplitter;
use crate::embeddings::ollama_embed::OllamaEmbedder;
use crate::embeddings::openai_embed::OpenAiEmbedder;
use crate::embeddings::Embedder;
use crate::extract::ExtractorRegistry;
use crate::ingest::{DocumentLoader, FileFailure};
use crate::llm::ollama_chat::OllamaChat;
use crate::llm::openai_chat::OpenAiChat;
use crate::llm::{ChatModel, GenerationParams};
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::retrieve::{RetrievalOutcome, Retriever, NO_RELEVANT_DOCUMENTS};
use crate::store::{CollectionStats, VectorStore};

pub mod prompts;

/// Whether the answer came from the model or is the fallback text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatOutcome {
    Answer,
    Degraded { error: AppError },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub question: String,
    pub answer: String,
    pub outcome: ChatOutcome,
    /// False when nothing was retrieved for the question.
    pub evidence_found: bool,
    pub sources: Vec<SourceCitation>,
    pub confidence: f64,
    pub response_time_ms: f64,
    pub docs_consulted: u32,
    pub is_confident: bool,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

impl ChatResponse {
    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, ChatOutcome::Degraded { .. })
    }
}

/// Cooperative cancellation flag shared with the caller of a chat.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    /// Fragments added to the collection.
    pub chunks_added: usize,
    pub files_loaded: usize,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub documents_loaded: usize,
    pub memory_messages: usize,
    pub config: serde_json::Value,
    pub metrics: MetricsState,
    pub collection_stats: CollectionStats,
    pub supported_formats: Vec<String>,
}

pub struct ChatPipeline {
    config: ConfigHandle,
    store: Arc<VectorStore>,
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
    memory: SessionMemories,
    metrics: MetricsTracker,
    log: ExchangeLog,
    loader: DocumentLoader,
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("store", &self.store)
            .field("sessions", &self.memory.session_count())
            .finish()
    }
}

impl ChatPipeline {
    /// Build the provider's backends from `cfg` and open the pipeline.
    pub fn from_config(cfg: PipelineConfig) -> Result<Self, AppError> {
        let embed_timeout = Duration::from_secs(cfg.embedding_timeout_secs);
        let (embedder, model): (Arc<dyn Embedder>, Arc<dyn ChatModel>) = match cfg.provider {
            Provider::OpenAi => {
                let client = OpenAiClient::new(&cfg.openai_base_url, &cfg.openai_api_key)?;
                (
                    Arc::new(OpenAiEmbedder::new(client.clone(), embed_timeout)),
                    Arc::new(OpenAiChat::new(client)),
                )
            }
            Provider::Ollama => {
                let client = OllamaClient::new(&cfg.ollama_base_url)?;
                client.health_check()?;
                (
                    Arc::new(OllamaEmbedder::new(client.clone(), embed_timeout)),
                    Arc::new(OllamaChat::new(client)),
                )
            }
        };
        Self::open(cfg, embedder, model, ExtractorRegistry::with_defaults())
    }

    /// Open persisted state under the configured directories with the given backends.
    pub fn open(
        cfg: PipelineConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        extractors: ExtractorRegistry,
    ) -> Result<Self, AppError> {
        let config = ConfigHandle::new(cfg)?;
        let cfg = config.snapshot();

        let store = Arc::new(VectorStore::open(
            &cfg.persist_directory,
            &cfg.collection_name,
            &cfg.embedding_model,
            embedder,
        )?);
        let metrics = MetricsTracker::open(
            &cfg.state_directory.join("metrics"),
            cfg.low_confidence_cutoff,
        )?;
        let log = ExchangeLog::open(&cfg.state_directory.join("conversation_logs"))?;

        tracing::info!(
            provider = ?cfg.provider,
            chat_model = %cfg.chat_model,
            temperature = cfg.temperature,
            memory_window = cfg.memory_window,
            "chat pipeline initialized"
        );
        Ok(Self {
            retriever: Retriever::new(Arc::clone(&store)),
            store,
            config,
            model,
            memory: SessionMemories::new(),
            metrics,
            log,
            loader: DocumentLoader::new(extractors),
        })
    }

    pub fn config(&self) -> Arc<PipelineConfig> {
        self.config.snapshot()
    }

    pub fn chat(&self, session_id: &str, user_text: &str) -> Result<ChatResponse, AppError> {
        self.chat_with_cancel(session_id, user_text, &CancelToken::new())
    }

    /// Run one exchange. Retrieval errors propagate; generation errors are
    /// answered with the fallback text. A cancelled exchange leaves memory,
    /// metrics and the exchange log untouched.
    pub fn chat_with_cancel(
        &self,
        session_id: &str,
        user_text: &str,
        cancel: &CancelToken,
    ) -> Result<ChatResponse, AppError> {
        if user_text.trim().is_empty() {
            return Err(AppError::new("CHAT_EMPTY_MESSAGE", "Message must not be empty"));
        }
        let cfg = self.config.snapshot();
        let timer = self.metrics.start_timer();

        let evidence = self.retriever.retrieve(user_text, None, &cfg)?.into_outcome();
        if cancel.is_cancelled() {
            return Err(cancelled("retrieval"));
        }
        let (context, sources, confidence, docs_consulted) = match &evidence {
            RetrievalOutcome::Found(found) => (
                found.context_text(),
                found.sources(),
                found.avg_confidence,
                found.docs_consulted,
            ),
            RetrievalOutcome::Empty { query } => {
                tracing::info!(
                    session_id,
                    query_chars = query.chars().count(),
                    "no evidence, answering without context"
                );
                (NO_RELEVANT_DOCUMENTS.to_string(), Vec::new(), 0.0, 0)
            }
        };
        let evidence_found = matches!(evidence, RetrievalOutcome::Found(_));

        let messages = self.build_messages(session_id, &cfg, &context, user_text);
        let params = GenerationParams {
            model: cfg.chat_model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            timeout: Duration::from_secs(cfg.generation_timeout_secs),
        };
        let (answer, outcome) = match self.model.generate(&messages, &params) {
            Ok(text) => (text, ChatOutcome::Answer),
            Err(error) => {
                tracing::error!(
                    code = %error.code,
                    err = %error,
                    "generation failed, using fallback answer"
                );
                (cfg.fallback_answer.clone(), ChatOutcome::Degraded { error })
            }
        };
        if cancel.is_cancelled() {
            return Err(cancelled("generation"));
        }

        self.memory.append(session_id, user_text, &answer, cfg.memory_window);

        let elapsed = timer.elapsed();
        if let Err(e) = self.metrics.record(elapsed, confidence, docs_consulted) {
            tracing::warn!(code = %e.code, err = %e, "failed to persist metrics");
        }
        if let Err(e) = self.log.append(ExchangeInput {
            session_id,
            user_message: user_text,
            assistant_response: &answer,
            degraded: matches!(outcome, ChatOutcome::Degraded { .. }),
            evidence_found,
            sources: &sources,
            confidence,
            response_time_secs: elapsed,
            docs_consulted,
        }) {
            tracing::warn!(code = %e.code, err = %e, "failed to log exchange");
        }

        Ok(ChatResponse {
            question: user_text.to_string(),
            answer,
            outcome,
            evidence_found,
            sources,
            confidence,
            response_time_ms: round_to(elapsed * 1000.0, 2),
            docs_consulted,
            is_confident: confidence >= cfg.confidence_threshold,
            feedback: None,
        })
    }

    /// Attach a rating to `response` and append it to the feedback log.
    pub fn record_feedback(
        &self,
        session_id: &str,
        response: &mut ChatResponse,
        feedback: Feedback,
    ) -> Result<FeedbackRecord, AppError> {
        let record = self.log.append_feedback(
            session_id,
            &response.question,
            &response.answer,
            feedback,
        )?;
        response.feedback = Some(feedback);
        Ok(record)
    }

    pub fn feedback_history(&self, n: usize) -> Result<Vec<FeedbackRecord>, AppError> {
        self.log.recent_feedback(n)
    }

    /// System prompt with context, then the session history, then the new message.
    fn build_messages(
        &self,
        session_id: &str,
        cfg: &PipelineConfig,
        context: &str,
        user_text: &str,
    ) -> Vec<ConversationTurn> {
        let mut messages = vec![ConversationTurn::system(prompts::system_prompt(
            &cfg.assistant_name,
            &cfg.response_language,
            context,
        ))];
        messages.extend(self.memory.snapshot(session_id));
        messages.push(ConversationTurn::user(user_text));
        messages
    }

    pub fn ingest_directory(&self, dir: &Path) -> Result<IngestSummary, AppError> {
        let splitter = TextSplitter::from_config(&self.config.snapshot())?;
        let report = self.loader.load_directory(dir, &splitter)?;
        let chunks_added = self.store.add(&report.fragments)?;
        Ok(IngestSummary {
            chunks_added,
            files_loaded: report.files_loaded,
            failures: report.failures,
        })
    }

    pub fn ingest_file(&self, path: &Path) -> Result<usize, AppError> {
        let splitter = TextSplitter::from_config(&self.config.snapshot())?;
        let fragments = self.loader.load_file(path, &splitter)?;
        self.store.add(&fragments)
    }

    /// Save an upload under the configured upload directory and index it.
    pub fn ingest_bytes(&self, bytes: &[u8], filename: &str) -> Result<usize, AppError> {
        let cfg = self.config.snapshot();
        let splitter = TextSplitter::from_config(&cfg)?;
        let fragments = self
            .loader
            .load_uploaded_bytes(bytes, filename, &cfg.upload_directory, &splitter)?;
        self.store.add(&fragments)
    }

    pub fn supported_formats(&self) -> Vec<String> {
        self.loader.supported_formats()
    }

    pub fn collection_stats(&self) -> CollectionStats {
        self.store.collection_stats()
    }

    pub fn clear_collection(&self) -> Result<(), AppError> {
        self.store.clear()
    }

    pub fn clear_memory(&self, session_id: &str) {
        self.memory.clear(session_id);
    }

    /// Forget the session's history and empty the collection.
    pub fn clear_all(&self, session_id: &str) -> Result<(), AppError> {
        self.memory.clear(session_id);
        self.store.clear()
    }

    pub fn memory_messages(&self, session_id: &str) -> usize {
        self.memory.len(session_id)
    }

    pub fn metrics(&self) -> MetricsState {
        self.metrics.summary()
    }

    pub fn history(&self, n: usize) -> Result<Vec<ExchangeRecord>, AppError> {
        self.log.recent(n)
    }

    pub fn status(&self, session_id: &str) -> PipelineStatus {
        let collection_stats = self.store.collection_stats();
        PipelineStatus {
            documents_loaded: collection_stats.document_count,
            memory_messages: self.memory.len(session_id),
            config: self.config.snapshot().redacted(),
            metrics: self.metrics.summary(),
            collection_stats,
            supported_formats: self.loader.supported_formats(),
        }
    }

    /// Publish a new configuration for later requests.
    ///
    /// Storage locations, the collection, the embedding model and everything
    /// baked into the backends (provider, endpoints, key, embedding timeout)
    /// are fixed once the pipeline is open.
    pub fn retune(&self, cfg: PipelineConfig) -> Result<Arc<PipelineConfig>, AppError> {
        let current = self.config.snapshot();
        let fixed = [
            ("collection_name", current.collection_name == cfg.collection_name),
            ("persist_directory", current.persist_directory == cfg.persist_directory),
            ("state_directory", current.state_directory == cfg.state_directory),
            ("embedding_model", current.embedding_model == cfg.embedding_model),
            ("provider", current.provider == cfg.provider),
            ("openai_base_url", current.openai_base_url == cfg.openai_base_url),
            ("openai_api_key", current.openai_api_key == cfg.openai_api_key),
            ("ollama_base_url", current.ollama_base_url == cfg.ollama_base_url),
            (
                "embedding_timeout_secs",
                current.embedding_timeout_secs == cfg.embedding_timeout_secs,
            ),
            ("low_confidence_cutoff", current.low_confidence_cutoff == cfg.low_confidence_cutoff),
        ];
        if let Some((field, _)) = fixed.iter().find(|(_, same)| !same) {
            return Err(AppError::new(
                "CONFIG_RESTART_REQUIRED",
                "Setting cannot change while the pipeline is open",
            )
            .with_details(format!("field={field}")));
        }
        self.config.retune(cfg)
    }
}

fn cancelled(stage: &str) -> AppError {
    AppError::new("CHAT_CANCELLED", "Chat was cancelled").with_details(format!("after={stage}"))
}
