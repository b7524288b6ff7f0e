use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One size-bounded piece of an ingested document.
///
/// For a given `source_id`, `chunk_index` runs `0..total_chunks` without gaps and
/// every fragment carries the same `total_chunks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fragment {
    pub content: String,
    pub source_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Character offset of `content` within the extracted document text.
    pub start_offset: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Fragment {
    /// Human-readable position, 1-based: `"2/5"`.
    pub fn position_label(&self) -> String {
        format!("{}/{}", self.chunk_index + 1, self.total_chunks)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// User-facing attribution for one relevant hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCitation {
    pub source: String,
    /// `"chunk_index+1/total_chunks"`.
    pub chunk: String,
    /// Similarity rounded to 2 decimals.
    pub relevance: f64,
}

pub fn round_to(v: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (v * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_label_is_one_based() {
        let f = Fragment {
            content: "x".to_string(),
            source_id: "a.txt".to_string(),
            chunk_index: 0,
            total_chunks: 3,
            start_offset: 0,
            metadata: BTreeMap::new(),
        };
        assert_eq!(f.position_label(), "1/3");
    }

    #[test]
    fn rounds_to_requested_decimals() {
        assert_eq!(round_to(0.876, 2), 0.88);
        assert_eq!(round_to(0.12346, 4), 0.1235);
    }
}
