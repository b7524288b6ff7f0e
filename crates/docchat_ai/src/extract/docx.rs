use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use docchat_core::error::AppError;

use super::{Extracted, Extractor};

/// Word documents: paragraphs of `word/document.xml`, one blank line apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extracted, AppError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            AppError::new("INGEST_DECODE_FAILED", "DOCX is not a valid ZIP container")
                .with_details(e.to_string())
        })?;
        let mut xml = String::new();
        {
            let mut entry = archive.by_name("word/document.xml").map_err(|e| {
                AppError::new("INGEST_DECODE_FAILED", "DOCX is missing word/document.xml")
                    .with_details(e.to_string())
            })?;
            entry.read_to_string(&mut xml).map_err(|e| {
                AppError::new("INGEST_DECODE_FAILED", "Failed to read DOCX document body")
                    .with_details(e.to_string())
            })?;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("archive_entries".to_string(), archive.len().to_string());
        Ok(Extracted {
            text: document_xml_to_text(&xml),
            metadata,
        })
    }
}

/// Flatten WordprocessingML to text: `<w:t>` runs, tabs and breaks kept.
pub(crate) fn document_xml_to_text(xml: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_run = false;
    let mut rest = xml;

    while let Some(lt) = rest.find('<') {
        if in_text {
            current.push_str(&decode_entities(&rest[..lt]));
        }
        let Some(gt) = rest[lt..].find('>') else {
            break;
        };
        let tag = &rest[lt + 1..lt + gt];
        rest = &rest[lt + gt + 1..];

        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");
        let closing = tag.starts_with('/');

        match name {
            "w:r" => in_run = !closing && !self_closing,
            "w:t" => in_text = !closing && !self_closing,
            // Outside a run, `w:tab` is a tab stop definition.
            "w:tab" if !closing && in_run => current.push('\t'),
            "w:br" | "w:cr" if !closing && in_run => current.push('\n'),
            "w:p" if closing || self_closing => {
                paragraphs.push(std::mem::take(&mut current));
            }
            _ => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
        .into_iter()
        .map(|p| p.trim_end().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            e if e.starts_with("#x") || e.starts_with("#X") => {
                u32::from_str_radix(&e[2..], 16).ok().and_then(char::from_u32)
            }
            e if e.starts_with('#') => e[1..].parse::<u32>().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=semi]),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}
