//! Paragraph-boundary chunker for loaded documents.
//!
//! Document content is split on blank lines into pieces that stay under a
//! `max_tokens` budget (approximated at 4 chars per token). Oversized
//! paragraphs are hard-split at the nearest newline or space under the
//! budget. Chunk indices are contiguous from 0 within a document.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

const CHARS_PER_TOKEN: usize = 4;

/// Chunk every document in order. Empty documents produce no chunks.
pub fn chunk_documents(documents: &[Document], max_tokens: usize) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(&doc.path, &doc.content, max_tokens))
        .collect()
}

pub fn chunk_document(path: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let joined_len = if buffer.is_empty() {
            paragraph.len()
        } else {
            buffer.len() + 2 + paragraph.len()
        };

        if joined_len > max_chars && !buffer.is_empty() {
            flush(path, &mut chunks, &mut buffer);
        }

        if paragraph.len() > max_chars {
            // A single paragraph over budget: hard-split it on its own.
            flush(path, &mut chunks, &mut buffer);
            for piece in hard_split(paragraph, max_chars) {
                push_chunk(path, &mut chunks, piece);
            }
        } else {
            if !buffer.is_empty() {
                buffer.push_str("\n\n");
            }
            buffer.push_str(paragraph);
        }
    }

    flush(path, &mut chunks, &mut buffer);
    chunks
}

fn flush(path: &str, chunks: &mut Vec<Chunk>, buffer: &mut String) {
    if !buffer.is_empty() {
        push_chunk(path, chunks, buffer.trim());
        buffer.clear();
    }
}

fn push_chunk(path: &str, chunks: &mut Vec<Chunk>, text: &str) {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());

    chunks.push(Chunk {
        path: path.to_string(),
        chunk_index: chunks.len() as i64,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    });
}

/// Split an oversized paragraph at newline or space boundaries under
/// `max_chars`, falling back to a raw cut when no boundary exists.
fn hard_split(paragraph: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = paragraph;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                pieces.push(piece);
            }
            break;
        }
        let window = floor_char_boundary(remaining, max_chars);
        let cut = remaining[..window]
            .rfind('\n')
            .or_else(|| remaining[..window].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window);
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = &remaining[cut..];
    }

    pieces
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index.max(1)
}
