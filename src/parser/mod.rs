use thiserror::Error;

use crate::models::chunk::Chunk;

/// Content errors are permanent: the pipeline fails the document
/// immediately instead of retrying.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("file is not valid UTF-8 text: {0}")]
    InvalidEncoding(String),
}

/// Deterministic text extraction and chunking.
pub struct Parser {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Parser {
    /// `chunk_overlap < chunk_size` is enforced at configuration load time.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Decode uploaded bytes into text. Only plain-text formats are
    /// supported; binary uploads are rejected before any embedding work.
    pub fn extract_text(&self, file_bytes: &[u8], filename: &str) -> Result<String, ParseError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if file_bytes.starts_with(b"%PDF") {
            return Err(ParseError::UnsupportedFormat("pdf".to_string()));
        }

        match extension.as_str() {
            "txt" | "md" | "markdown" | "text" | "log" | "csv" | "json" | "" => {
                String::from_utf8(file_bytes.to_vec())
                    .map_err(|e| ParseError::InvalidEncoding(e.to_string()))
            }
            other => Err(ParseError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Split text into chunks of approximately `chunk_size` characters
    /// with `chunk_overlap` character overlap.
    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        split_text(text, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .filter(|content| !content.trim().is_empty())
            .map(|content| Chunk { content })
            .collect()
    }
}

/// Text chunking using recursive character splitting.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let separators = ["\n\n", "\n", ". ", " ", ""];
    recursive_split(text, &separators, chunk_size, chunk_overlap)
}

fn recursive_split(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    if text.len() <= chunk_size || separators.is_empty() {
        return vec![text.to_string()];
    }

    let separator = separators[0];
    let remaining_separators = &separators[1..];

    if separator.is_empty() {
        // Character-level split as fallback.
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let end = (start + chunk_size).min(text.len());
            chunks.push(text[start..end].to_string());
            if end >= text.len() {
                break;
            }
            start = end.saturating_sub(chunk_overlap);
        }
        return chunks;
    }

    let parts: Vec<&str> = text.split(separator).collect();
    let mut chunks = Vec::new();
    let mut current = String::new();

    for part in parts {
        let candidate = if current.is_empty() {
            part.to_string()
        } else {
            format!("{current}{separator}{part}")
        };

        if candidate.len() > chunk_size {
            if !current.is_empty() {
                if current.len() > chunk_size {
                    chunks.extend(recursive_split(
                        &current,
                        remaining_separators,
                        chunk_size,
                        chunk_overlap,
                    ));
                } else {
                    chunks.push(current.clone());
                }
                // Start new chunk with overlap.
                let overlap_start = current.len().saturating_sub(chunk_overlap);
                current = format!("{}{separator}{part}", &current[overlap_start..]);
            } else {
                // Single part bigger than chunk_size.
                chunks.extend(recursive_split(
                    part,
                    remaining_separators,
                    chunk_size,
                    chunk_overlap,
                ));
                current = String::new();
            }
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        if current.len() > chunk_size {
            chunks.extend(recursive_split(
                &current,
                remaining_separators,
                chunk_size,
                chunk_overlap,
            ));
        } else {
            chunks.push(current);
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_small_text() {
        let chunks = split_text("hello", 1000, 100);
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn test_split_empty() {
        let chunks = split_text("", 1000, 100);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_split_multiple_chunks() {
        let text = "a".repeat(500) + "\n\n" + &"b".repeat(500);
        let chunks = split_text(&text, 600, 50);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 650, "Chunk too large: {} chars", chunk.len());
        }
    }

    #[test]
    fn test_split_with_overlap() {
        let text = (0..10)
            .map(|i| format!("Paragraph {i}. {}", "x".repeat(50)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_text(&text, 200, 20);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_extract_text_plain() {
        let parser = Parser::new(1000, 100);
        let text = parser.extract_text(b"hello world", "notes.txt").unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_extract_text_markdown() {
        let parser = Parser::new(1000, 100);
        let text = parser.extract_text(b"# Title\nbody", "readme.md").unwrap();
        assert!(text.starts_with("# Title"));
    }

    #[test]
    fn test_extract_rejects_pdf() {
        let parser = Parser::new(1000, 100);
        let err = parser.extract_text(b"%PDF-1.7 ...", "paper.pdf").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_extract_rejects_unknown_extension() {
        let parser = Parser::new(1000, 100);
        let err = parser.extract_text(b"\x00\x01\x02", "image.png").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_extract_rejects_invalid_utf8() {
        let parser = Parser::new(1000, 100);
        let err = parser.extract_text(&[0xff, 0xfe, 0x00], "data.txt").unwrap_err();
        assert!(matches!(err, ParseError::InvalidEncoding(_)));
    }

    #[test]
    fn test_chunk_text_positions_are_dense() {
        let parser = Parser::new(100, 10);
        let text = "a".repeat(90) + "\n\n" + &"b".repeat(90) + "\n\n" + &"c".repeat(90);
        let chunks = parser.chunk_text(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| !c.content.trim().is_empty()));
    }

    #[test]
    fn test_chunk_text_empty_yields_no_chunks() {
        let parser = Parser::new(100, 10);
        assert!(parser.chunk_text("").is_empty());
        assert!(parser.chunk_text("   \n  ").is_empty());
    }
}
