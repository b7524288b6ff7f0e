//! Recursive character splitting with overlap.
//!
//! Text is cut on the coarsest separator first; a piece that is still longer
//! than `chunk_size` characters is cut again on the next finer separator, down
//! to fixed-width character runs. The resulting pieces are then merged
//! greedily into windows of at most `chunk_size` characters, each window
//! starting with up to `chunk_overlap` characters carried over from the
//! previous one.

use std::collections::{BTreeMap, VecDeque};

use docchat_core::config::PipelineConfig;
use docchat_core::domain::Fragment;
use docchat_core::error::AppError;

/// Paragraph break, line break, sentence end, word boundary, character.
pub const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

/// A contiguous slice of the input, measured in characters.
#[derive(Debug, Clone, Copy)]
struct Piece<'a> {
    text: &'a str,
    start: usize,
    len: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, AppError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "chunk_overlap must be smaller than a non-zero chunk_size",
            )
            .with_details(format!("chunk_size={chunk_size}; chunk_overlap={chunk_overlap}")));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, AppError> {
        Self::new(cfg.chunk_size, cfg.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into fragments of `source_id`. Blank text yields none.
    /// Interior whitespace is kept so fragments rebuild the text; only
    /// whitespace-only windows at the very end are dropped.
    pub fn split(
        &self,
        text: &str,
        source_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Vec<Fragment> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut atoms = Vec::new();
        self.atomize(text, 0, &SEPARATORS, &mut atoms);

        let mut windows = self.merge(&atoms);
        while windows
            .last()
            .is_some_and(|(content, _)| content.trim().is_empty())
        {
            windows.pop();
        }

        let total = windows.len() as u32;
        windows
            .into_iter()
            .enumerate()
            .map(|(i, (content, start))| Fragment {
                content,
                source_id: source_id.to_string(),
                chunk_index: i as u32,
                total_chunks: total,
                start_offset: start as u64,
                metadata: metadata.clone(),
            })
            .collect()
    }

    fn atomize<'a>(
        &self,
        text: &'a str,
        start: usize,
        separators: &[&str],
        out: &mut Vec<Piece<'a>>,
    ) {
        let len = text.chars().count();
        if len <= self.chunk_size {
            if len > 0 {
                out.push(Piece { text, start, len });
            }
            return;
        }
        let Some((sep, finer)) = separators.split_first() else {
            out.push(Piece { text, start, len });
            return;
        };

        if sep.is_empty() {
            self.char_runs(text, start, out);
        } else if !text.contains(sep) {
            self.atomize(text, start, finer, out);
        } else {
            // Separators stay attached to the piece they end.
            let mut pos = start;
            for part in text.split_inclusive(sep) {
                self.atomize(part, pos, finer, out);
                pos += part.chars().count();
            }
        }
    }

    fn char_runs<'a>(&self, text: &'a str, start: usize, out: &mut Vec<Piece<'a>>) {
        let mut run_start_byte = 0;
        let mut run_start_char = start;
        let mut run_len = 0;
        for (byte, _) in text.char_indices() {
            if run_len == self.chunk_size {
                out.push(Piece {
                    text: &text[run_start_byte..byte],
                    start: run_start_char,
                    len: run_len,
                });
                run_start_byte = byte;
                run_start_char += run_len;
                run_len = 0;
            }
            run_len += 1;
        }
        if run_len > 0 {
            out.push(Piece {
                text: &text[run_start_byte..],
                start: run_start_char,
                len: run_len,
            });
        }
    }

    fn merge(&self, atoms: &[Piece<'_>]) -> Vec<(String, usize)> {
        let mut windows = Vec::new();
        let mut current: VecDeque<Piece<'_>> = VecDeque::new();
        let mut total = 0usize;

        for piece in atoms {
            if total + piece.len > self.chunk_size && !current.is_empty() {
                windows.push(render(&current));
                while total > self.chunk_overlap
                    || (total + piece.len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(dropped) => total -= dropped.len,
                        None => break,
                    }
                }
            }
            current.push_back(*piece);
            total += piece.len;
        }
        if !current.is_empty() {
            windows.push(render(&current));
        }
        windows
    }
}

fn render(window: &VecDeque<Piece<'_>>) -> (String, usize) {
    let start = window.front().map(|p| p.start).unwrap_or(0);
    let content: String = window.iter().map(|p| p.text).collect();
    (content, start)
}
