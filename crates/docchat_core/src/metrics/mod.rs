use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::domain::round_to;
use crate::error::AppError;

/// Running statistics over every recorded query.
///
/// Each `avg_*` field is the arithmetic mean of its per-query values over
/// `total_queries` observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsState {
    pub total_queries: u64,
    pub avg_response_time_ms: f64,
    pub avg_confidence: f64,
    pub avg_docs_consulted: f64,
    pub low_confidence_count: u64,
}

impl MetricsState {
    /// Fold one observation into the running means.
    pub fn observe(
        &self,
        response_time_secs: f64,
        confidence: f64,
        docs_consulted: u32,
        low_cutoff: f64,
    ) -> Self {
        let n = self.total_queries as f64;
        let next = |mean: f64, v: f64| (mean * n + v) / (n + 1.0);
        Self {
            total_queries: self.total_queries + 1,
            avg_response_time_ms: next(self.avg_response_time_ms, response_time_secs * 1000.0),
            avg_confidence: next(self.avg_confidence, confidence),
            avg_docs_consulted: next(self.avg_docs_consulted, docs_consulted as f64),
            low_confidence_count: self.low_confidence_count + u64::from(confidence < low_cutoff),
        }
    }

    /// Copy with floats rounded to 2 decimals for display.
    pub fn rounded(&self) -> Self {
        Self {
            total_queries: self.total_queries,
            avg_response_time_ms: round_to(self.avg_response_time_ms, 2),
            avg_confidence: round_to(self.avg_confidence, 2),
            avg_docs_consulted: round_to(self.avg_docs_consulted, 2),
            low_confidence_count: self.low_confidence_count,
        }
    }
}

/// Brackets one query.
#[derive(Debug, Clone, Copy)]
pub struct QueryTimer {
    started: Instant,
}

impl QueryTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Seconds since [`QueryTimer::start`].
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Metrics persisted to `metrics.json` after every record and reloaded on open.
#[derive(Debug)]
pub struct MetricsTracker {
    path: PathBuf,
    low_confidence_cutoff: f64,
    state: Mutex<MetricsState>,
}

impl MetricsTracker {
    pub fn open(dir: &Path, low_confidence_cutoff: f64) -> Result<Self, AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::new("PERSIST_METRICS_FAILED", "Failed to create metrics directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
        let path = dir.join("metrics.json");
        let state = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| {
                AppError::new("PERSIST_METRICS_FAILED", "Failed to read metrics")
                    .with_details(format!("path={}; err={}", path.display(), e))
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                AppError::new("PERSIST_METRICS_FAILED", "Failed to decode metrics")
                    .with_details(format!("path={}; err={}", path.display(), e))
            })?
        } else {
            MetricsState::default()
        };
        tracing::info!(
            path = %path.display(),
            total_queries = state.total_queries,
            "metrics loaded"
        );
        Ok(Self {
            path,
            low_confidence_cutoff,
            state: Mutex::new(state),
        })
    }

    pub fn start_timer(&self) -> QueryTimer {
        QueryTimer::start()
    }

    /// Record one query and persist synchronously.
    ///
    /// The in-memory state only advances once the write has succeeded, so a failed
    /// persist leaves memory and disk in agreement.
    pub fn record(
        &self,
        response_time_secs: f64,
        confidence: f64,
        docs_consulted: u32,
    ) -> Result<MetricsState, AppError> {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = guard.observe(
            response_time_secs,
            confidence,
            docs_consulted,
            self.low_confidence_cutoff,
        );
        self.write(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Current values, rounded for display.
    pub fn summary(&self) -> MetricsState {
        self.raw().rounded()
    }

    pub fn raw(&self) -> MetricsState {
        match self.state.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    fn write(&self, st: &MetricsState) -> Result<(), AppError> {
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(st).map_err(|e| {
            AppError::new("PERSIST_METRICS_FAILED", "Failed to encode metrics")
                .with_details(e.to_string())
        })?;
        fs::write(&tmp, json.as_bytes()).map_err(|e| {
            AppError::new("PERSIST_METRICS_FAILED", "Failed to write metrics")
                .with_details(format!("path={}; err={}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            AppError::new("PERSIST_METRICS_FAILED", "Failed to finalize metrics write")
                .with_details(format!(
                    "tmp={}; dest={}; err={}",
                    tmp.display(),
                    self.path.display(),
                    e
                ))
        })?;
        Ok(())
    }
}
