//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a `max_tokens`
//! limit. Splitting happens on paragraph boundaries (`\n\n`); paragraphs
//! longer than the limit are hard-split on the last newline or space that
//! fits. Consecutive chunks share up to `overlap_tokens` of trailing text so
//! that an answer straddling a boundary is still retrievable from one chunk.
//!
//! Chunk IDs are derived from the document ID and the chunk index, and each
//! chunk carries a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk, even for empty text.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let mut pieces: Vec<&str> = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() <= max_chars {
            pieces.push(trimmed);
        } else {
            hard_split(trimmed, max_chars, &mut pieces);
        }
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();

    for piece in pieces {
        if !buf.is_empty() && buf.len() + 2 + piece.len() > max_chars {
            let flushed = std::mem::take(&mut buf);
            buf = overlap_tail(&flushed, overlap_chars).to_string();
            chunks.push(make_chunk(document_id, chunks.len() as i64, &flushed));

            // The carried tail must never push the next piece over the limit.
            if !buf.is_empty() && buf.len() + 2 + piece.len() > max_chars {
                buf.clear();
            }
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(piece);
    }

    if !buf.is_empty() {
        chunks.push(make_chunk(document_id, chunks.len() as i64, &buf));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Split an oversized paragraph at newline or space boundaries.
fn hard_split<'a>(paragraph: &'a str, max_chars: usize, out: &mut Vec<&'a str>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining);
            break;
        }
        let limit = floor_char_boundary(remaining, max_chars);
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|pos| *pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit.max(next_char_boundary(remaining, 1)));
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[split_at..].trim_start();
    }
}

/// Trailing text of `chunk` (at most `overlap_chars` bytes) starting on a word.
fn overlap_tail(chunk: &str, overlap_chars: usize) -> &str {
    if overlap_chars == 0 || chunk.len() <= overlap_chars {
        return "";
    }
    let start = floor_char_boundary(chunk, chunk.len() - overlap_chars);
    let tail = &chunk[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim(),
        None => "",
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn next_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index.min(s.len())
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].id, "doc1:0");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10, 2);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert!(c.text.len() <= 40, "chunk {} too long: {}", i, c.text.len());
        }
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        // max 10 tokens => 40 chars, overlap 3 tokens => 12 chars
        let text = "Catan se joue de trois à quatre joueurs.\n\nUne extension permet six joueurs.";
        let chunks = chunk_text("doc1", text, 10, 3);
        assert!(chunks.len() >= 2);
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let last_word = first_words.last().unwrap();
        assert!(
            chunks[1].text.contains(last_word),
            "second chunk {:?} does not carry tail of {:?}",
            chunks[1].text,
            chunks[0].text
        );
    }

    #[test]
    fn test_hard_split_respects_utf8_boundaries() {
        let text = "é".repeat(100);
        let chunks = chunk_text("doc1", &text, 5, 0);
        assert!(chunks.len() > 1);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 2, 0);
        let c2 = chunk_text("doc1", text, 2, 0);
        assert_eq!(c1, c2);
    }
}
