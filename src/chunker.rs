//! Chunker (SPEC_FULL §4.2).
//!
//! Grounded on the donor original's `paragraph_chunker.py`: paragraph-aware,
//! streaming-friendly splitting with sentence/word-boundary fallback for
//! oversized paragraphs, and overlap carried forward between chunks. Exposed
//! as an iterator producer per Design Notes §9 ("Lazy chunk sequences") so the
//! streaming processor can pull-drive embedding one chunk at a time.

use memmap2::Mmap;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{EngineError, EngineResult};

/// Paragraphs are separated by one or more blank lines.
static PARAGRAPH_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
/// Sentence boundary: `.`, `!`, or `?` followed by whitespace.
static SENTENCE_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:[.!?])\s+").unwrap());

const PARAGRAPH_SEPARATOR: &str = "\n\n";
/// Files below this size are read fully; larger files are windowed via mmap.
const MMAP_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
/// Window size for the memory-mapped large-file read path.
const MMAP_WINDOW_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerSettings {
    pub max_chunk_size: usize,
    pub overlap: usize,
    pub min_chunk_size: usize,
}

impl ChunkerSettings {
    pub fn from_mode_settings(settings: &crate::modes::ModeSettings) -> Self {
        Self {
            max_chunk_size: settings.max_chunk_size,
            overlap: settings.overlap,
            min_chunk_size: 100,
        }
    }
}

pub struct ParagraphChunker {
    settings: ChunkerSettings,
}

impl ParagraphChunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self { settings }
    }

    /// Deterministic: the same (text, settings) always yields the same sequence.
    pub fn chunk_streaming<'a>(&'a self, text: &str) -> impl Iterator<Item = String> + 'a {
        chunk_text(text, self.settings).into_iter()
    }

    /// File-size policy: small files are read fully; large files are windowed
    /// via memory-mapped I/O, chunking at the last paragraph boundary within
    /// each 1 MiB window and carrying the remainder forward.
    pub fn chunk_file(&self, path: &Path) -> EngineResult<Vec<String>> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() < MMAP_THRESHOLD_BYTES {
            let mut text = String::new();
            File::open(path)?.read_to_string(&mut text).map_err(|e| {
                EngineError::Extraction(format!("failed to read {}: {e}", path.display()))
            })?;
            return Ok(chunk_text(&text, self.settings));
        }
        self.chunk_file_mmap(path)
    }

    fn chunk_file_mmap(&self, path: &Path) -> EngineResult<Vec<String>> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| EngineError::Extraction(format!("mmap failed: {e}")))?;

        let mut chunks = Vec::new();
        let mut remainder = String::new();
        let mut offset = 0usize;
        let len = mmap.len();

        while offset < len {
            let window_end = (offset + MMAP_WINDOW_BYTES).min(len);
            let mut window_bytes = &mmap[offset..window_end];

            // Find the last paragraph boundary inside this window so we don't
            // split a paragraph across windows; carry the tail forward.
            let boundary = if window_end < len {
                find_last_paragraph_boundary(window_bytes)
            } else {
                None
            };

            let (consumed, carry) = match boundary {
                Some(b) => (b, &window_bytes[b..]),
                None => (window_bytes.len(), &window_bytes[window_bytes.len()..]),
            };
            window_bytes = &window_bytes[..consumed];

            let window_text = String::from_utf8_lossy(window_bytes);
            remainder.push_str(&window_text);
            chunks.extend(chunk_text(&remainder, self.settings));
            remainder = String::from_utf8_lossy(carry).into_owned();

            offset = window_end;
        }

        if !remainder.trim().is_empty() {
            chunks.extend(chunk_text(&remainder, self.settings));
        }

        Ok(chunks)
    }
}

fn find_last_paragraph_boundary(bytes: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(bytes);
    PARAGRAPH_SPLIT
        .find_iter(&text)
        .last()
        .map(|m| m.end())
}

/// Core splitting algorithm, SPEC_FULL §4.2 steps 1-5.
pub fn chunk_text(text: &str, settings: ChunkerSettings) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for raw_paragraph in PARAGRAPH_SPLIT.split(text) {
        let paragraph = raw_paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.len() > settings.max_chunk_size {
            for piece in split_large_paragraph(paragraph, settings.max_chunk_size) {
                append_piece(&mut chunks, &mut current, &piece, settings);
            }
            continue;
        }

        append_piece(&mut chunks, &mut current, paragraph, settings);
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Appends one atom (paragraph, sentence, or word-group) to the current
/// buffer, flushing and carrying overlap forward when it would overflow.
fn append_piece(chunks: &mut Vec<String>, current: &mut String, piece: &str, settings: ChunkerSettings) {
    let would_be_len = if current.is_empty() {
        piece.len()
    } else {
        current.len() + PARAGRAPH_SEPARATOR.len() + piece.len()
    };

    if !current.is_empty() && would_be_len > settings.max_chunk_size {
        // Overlap is best-effort: it never pushes the new buffer past
        // max_chunk_size, so it shrinks (and can vanish) for large pieces.
        let budget = settings
            .max_chunk_size
            .saturating_sub(piece.len() + PARAGRAPH_SEPARATOR.len());
        let effective_overlap = settings.overlap.min(budget);
        let overlap = overlap_text(current, effective_overlap);
        chunks.push(std::mem::take(current));
        if overlap.is_empty() {
            *current = piece.to_string();
        } else {
            *current = format!("{overlap}{PARAGRAPH_SEPARATOR}{piece}");
        }
        return;
    }

    if current.is_empty() {
        *current = piece.to_string();
    } else {
        current.push_str(PARAGRAPH_SEPARATOR);
        current.push_str(piece);
    }
}

/// Last `overlap` characters of `text`, trimmed forward to the first sentence
/// boundary (". ") if present, else to the first whitespace, else raw.
fn overlap_text(text: &str, overlap: usize) -> String {
    if overlap == 0 || text.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    let tail: String = chars[start..].iter().collect();

    if let Some(pos) = tail.find(". ") {
        return tail[pos + 2..].to_string();
    }
    if let Some(pos) = tail.find(char::is_whitespace) {
        return tail[pos + 1..].to_string();
    }
    tail
}

/// Splits an oversized paragraph at sentence boundaries; sentences that are
/// still too large are split at word boundaries.
fn split_large_paragraph(paragraph: &str, max_chunk_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last_end = 0;
    let mut sentence_start = 0;

    for m in SENTENCE_SPLIT.find_iter(paragraph) {
        let sentence = &paragraph[sentence_start..m.end()];
        push_sentence(&mut pieces, sentence.trim(), max_chunk_size);
        sentence_start = m.end();
        last_end = m.end();
    }
    if last_end < paragraph.len() {
        let tail = paragraph[sentence_start..].trim();
        if !tail.is_empty() {
            push_sentence(&mut pieces, tail, max_chunk_size);
        }
    }
    if pieces.is_empty() && !paragraph.trim().is_empty() {
        push_sentence(&mut pieces, paragraph.trim(), max_chunk_size);
    }
    pieces
}

fn push_sentence(pieces: &mut Vec<String>, sentence: &str, max_chunk_size: usize) {
    if sentence.len() <= max_chunk_size {
        pieces.push(sentence.to_string());
        return;
    }
    pieces.extend(split_by_words(sentence, max_chunk_size));
}

/// Splits an oversized sentence at word boundaries; a single word that still
/// exceeds `max_chunk_size` is emitted alone (indivisible).
fn split_by_words(sentence: &str, max_chunk_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        if word.len() > max_chunk_size {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.push(word.to_string());
            continue;
        }
        let would_be_len = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };
        if would_be_len > max_chunk_size {
            pieces.push(std::mem::take(&mut current));
            current = word.to_string();
        } else if current.is_empty() {
            current = word.to_string();
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_chunk_size: usize, overlap: usize) -> ChunkerSettings {
        ChunkerSettings {
            max_chunk_size,
            overlap,
            min_chunk_size: 100,
        }
    }

    #[test]
    fn empty_text_yields_zero_chunks() {
        assert!(chunk_text("", settings(512, 50)).is_empty());
        assert!(chunk_text("   \n\n  ", settings(512, 50)).is_empty());
    }

    #[test]
    fn single_small_paragraph_yields_one_chunk() {
        let text = "Sidhant is a software engineer. Python is essential for data science.";
        let chunks = chunk_text(text, settings(1000, 100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn five_paragraphs_under_eco_settings_yield_five_chunks_with_bounded_overlap() {
        let paragraph = "w".repeat(500);
        let text = vec![paragraph; 5].join("\n\n");
        let chunks = chunk_text(&text, settings(512, 50));

        assert_eq!(chunks.len(), 5);
        for c in &chunks {
            assert!(c.len() <= 512, "chunk exceeded max_chunk_size: {}", c.len());
        }
    }

    #[test]
    fn oversized_paragraph_splits_at_sentence_then_word_boundaries() {
        let sentence = "word ".repeat(200);
        let chunks = chunk_text(&sentence, settings(100, 10));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 100 || !c.contains(' '));
        }
    }

    #[test]
    fn indivisible_token_longer_than_limit_is_emitted_alone() {
        let token = "x".repeat(300);
        let chunks = chunk_text(&token, settings(100, 10));
        assert_eq!(chunks, vec![token]);
    }

    #[test]
    fn whitespace_only_paragraphs_are_skipped() {
        let text = "first paragraph\n\n   \n\nsecond paragraph";
        let chunks = chunk_text(text, settings(1000, 50));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "first paragraph\n\nsecond paragraph");
    }
}
