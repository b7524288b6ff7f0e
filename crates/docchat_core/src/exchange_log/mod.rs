use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::{round_to, SourceCitation};
use crate::error::AppError;

/// One completed chat exchange as written to `conversations.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeRecord {
    pub timestamp: String, // RFC3339
    pub session_id: String,
    pub user_message: String,
    pub assistant_response: String,
    /// True when the answer is the fallback text after a generation failure.
    #[serde(default)]
    pub degraded: bool,
    /// False when retrieval returned nothing and the prompt carried no context.
    #[serde(default)]
    pub evidence_found: bool,
    pub sources: Vec<SourceCitation>,
    pub confidence: f64,
    pub response_time_ms: f64,
    pub docs_consulted: u32,
}

/// A user's rating of an answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Positive,
    Negative,
}

impl std::str::FromStr for Feedback {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "up" | "+" => Ok(Self::Positive),
            "negative" | "down" | "-" => Ok(Self::Negative),
            other => Err(AppError::new(
                "CHAT_INVALID_FEEDBACK",
                "Feedback must be positive or negative",
            )
            .with_details(format!("value={other}"))),
        }
    }
}

/// One rating as written to `feedback.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRecord {
    pub timestamp: String, // RFC3339
    pub session_id: String,
    pub user_message: String,
    pub assistant_response: String,
    pub feedback: Feedback,
}

#[derive(Debug, Clone)]
pub struct ExchangeInput<'a> {
    pub session_id: &'a str,
    pub user_message: &'a str,
    pub assistant_response: &'a str,
    pub degraded: bool,
    pub evidence_found: bool,
    pub sources: &'a [SourceCitation],
    pub confidence: f64,
    pub response_time_secs: f64,
    pub docs_consulted: u32,
}

/// Append-only JSON Lines logs of chat exchanges and their ratings.
#[derive(Debug)]
pub struct ExchangeLog {
    path: PathBuf,
    feedback_path: PathBuf,
    // Serializes appends so concurrent exchanges never interleave within a line.
    write_lock: Mutex<()>,
}

impl ExchangeLog {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::new("PERSIST_LOG_FAILED", "Failed to create conversation log directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
        Ok(Self {
            path: dir.join("conversations.jsonl"),
            feedback_path: dir.join("feedback.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn feedback_path(&self) -> &Path {
        self.feedback_path.as_path()
    }

    pub fn append(&self, input: ExchangeInput<'_>) -> Result<ExchangeRecord, AppError> {
        let record = ExchangeRecord {
            timestamp: now_rfc3339()?,
            session_id: input.session_id.to_string(),
            user_message: input.user_message.to_string(),
            assistant_response: input.assistant_response.to_string(),
            degraded: input.degraded,
            evidence_found: input.evidence_found,
            sources: input.sources.to_vec(),
            confidence: round_to(input.confidence, 4),
            response_time_ms: round_to(input.response_time_secs * 1000.0, 2),
            docs_consulted: input.docs_consulted,
        };
        self.append_line(&self.path, &record)?;

        tracing::info!(
            confidence = record.confidence,
            response_time_ms = record.response_time_ms,
            docs = record.docs_consulted,
            "logged exchange"
        );
        Ok(record)
    }

    pub fn append_feedback(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_response: &str,
        feedback: Feedback,
    ) -> Result<FeedbackRecord, AppError> {
        let record = FeedbackRecord {
            timestamp: now_rfc3339()?,
            session_id: session_id.to_string(),
            user_message: user_message.to_string(),
            assistant_response: assistant_response.to_string(),
            feedback,
        };
        self.append_line(&self.feedback_path, &record)?;
        tracing::info!(session_id, feedback = ?feedback, "recorded feedback");
        Ok(record)
    }

    /// Last `n` exchanges, oldest first. Unparseable lines are skipped.
    pub fn recent(&self, n: usize) -> Result<Vec<ExchangeRecord>, AppError> {
        tail(&self.path, n)
    }

    /// Last `n` ratings, oldest first.
    pub fn recent_feedback(&self, n: usize) -> Result<Vec<FeedbackRecord>, AppError> {
        tail(&self.feedback_path, n)
    }

    fn append_line<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), AppError> {
        let mut line = serde_json::to_string(record).map_err(|e| {
            AppError::new("PERSIST_LOG_FAILED", "Failed to encode log record")
                .with_details(e.to_string())
        })?;
        line.push('\n');

        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                AppError::new("PERSIST_LOG_FAILED", "Failed to open conversation log")
                    .with_details(format!("path={}; err={}", path.display(), e))
            })?;
        f.write_all(line.as_bytes()).map_err(|e| {
            AppError::new("PERSIST_LOG_FAILED", "Failed to append conversation log")
                .with_details(format!("path={}; err={}", path.display(), e))
        })
    }
}

fn now_rfc3339() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::new("PERSIST_LOG_FAILED", "Failed to format timestamp")
            .with_details(e.to_string())
    })
}

fn tail<T: DeserializeOwned>(path: &Path, n: usize) -> Result<Vec<T>, AppError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::new("PERSIST_LOG_FAILED", "Failed to read conversation log")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    let mut out = Vec::new();
    for line in &lines[start..] {
        match serde_json::from_str::<T>(line) {
            Ok(rec) => out.push(rec),
            Err(e) => tracing::warn!(
                path = %path.display(),
                err = %e,
                "skipping malformed log line"
            ),
        }
    }
    Ok(out)
}
