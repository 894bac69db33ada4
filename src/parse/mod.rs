//! Document parser: PDF decoding delegated to `pdf-extract`, with this
//! module owning only the chunk boundary policy (page-based or fixed
//! character windows with overlap).

use async_trait::async_trait;

use crate::config::{ChunkPolicy, ChunkingConfig};
use crate::domain::{doc_stem, RawDocument};
use crate::error::{KbragError, Result};

/// Form feed; emitted by the PDF extractor between pages.
const PAGE_BREAK: char = '\u{0c}';

/// Parser seam consumed by the orchestration service.
///
/// Both operations return the full document rendition plus its ordered
/// chunk list.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse_to_text(&self, content: &[u8]) -> Result<(String, Vec<String>)>;
    async fn parse_to_markdown(&self, raw: &RawDocument) -> Result<(String, Vec<String>)>;
}

/// PDF parser backed by `pdf-extract`.
pub struct PdfParser {
    chunking: ChunkingConfig,
}

impl PdfParser {
    pub fn new(chunking: ChunkingConfig) -> Self {
        Self { chunking }
    }

    /// Run the blocking PDF text extraction off the async runtime.
    async fn extract_text(&self, content: &[u8]) -> Result<String> {
        let bytes = content.to_vec();
        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes)
        })
        .await
        .map_err(|e| KbragError::Parse(format!("PDF extraction task failed: {}", e)))?
        .map_err(|e| KbragError::Parse(format!("Not a valid PDF document: {}", e)))?;

        if text.trim().is_empty() {
            return Err(KbragError::Parse(
                "PDF contains no extractable text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl DocumentParser for PdfParser {
    async fn parse_to_text(&self, content: &[u8]) -> Result<(String, Vec<String>)> {
        let text = self.extract_text(content).await?;
        let chunks = chunk_by_policy(&text, &self.chunking);
        Ok((text, chunks))
    }

    async fn parse_to_markdown(&self, raw: &RawDocument) -> Result<(String, Vec<String>)> {
        let text = self.extract_text(&raw.content).await?;
        Ok(render_markdown(&raw.name, &text, &self.chunking))
    }
}

/// Apply the configured chunk boundary policy to extracted text.
///
/// Page policy falls back to windowing when the extractor emitted no page
/// breaks (single-page documents, or extractors that flatten pages).
pub fn chunk_by_policy(text: &str, config: &ChunkingConfig) -> Vec<String> {
    match config.policy {
        ChunkPolicy::Page => page_chunks(text)
            .unwrap_or_else(|| window_chunks(text, config.window_chars, config.overlap_chars)),
        ChunkPolicy::Window => {
            window_chunks(text, config.window_chars, config.overlap_chars)
        }
    }
}

/// Split on form-feed page breaks. Returns None when the text carries no
/// page breaks at all.
fn page_chunks(text: &str) -> Option<Vec<String>> {
    if !text.contains(PAGE_BREAK) {
        return None;
    }
    let pages: Vec<String> = text
        .split(PAGE_BREAK)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if pages.is_empty() {
        None
    } else {
        Some(pages)
    }
}

/// Fixed-size character windows with overlap.
///
/// Operates on characters rather than bytes so multi-byte UTF-8 content
/// never gets sliced mid-character.
pub fn window_chunks(text: &str, window_chars: usize, overlap_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || window_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let step = window_chars.saturating_sub(overlap_chars).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window_chars).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Render extracted text as a lightweight markdown document.
///
/// With page breaks present, each page becomes a `## Page N` section and
/// one markdown chunk; otherwise the full text is windowed like the plain
/// text rendition.
fn render_markdown(doc_name: &str, text: &str, config: &ChunkingConfig) -> (String, Vec<String>) {
    let title = format!("# {}", doc_stem(doc_name));

    if let Some(pages) = page_chunks(text) {
        let sections: Vec<String> = pages
            .iter()
            .enumerate()
            .map(|(idx, page)| format!("## Page {}\n\n{}", idx + 1, page))
            .collect();
        let full = format!("{}\n\n{}", title, sections.join("\n\n"));
        (full, sections)
    } else {
        let full = format!("{}\n\n{}", title, text.trim());
        let chunks = window_chunks(&full, config.window_chars, config.overlap_chars);
        (full, chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_config() -> ChunkingConfig {
        ChunkingConfig {
            policy: ChunkPolicy::Page,
            window_chars: 40,
            overlap_chars: 10,
        }
    }

    #[test]
    fn test_page_chunks_split_on_form_feed() {
        let text = "page one text\u{0c}page two text\u{0c}page three";
        let pages = page_chunks(text).unwrap();
        assert_eq!(pages, vec!["page one text", "page two text", "page three"]);
    }

    #[test]
    fn test_page_chunks_none_without_breaks() {
        assert!(page_chunks("just one flat blob of text").is_none());
    }

    #[test]
    fn test_page_policy_falls_back_to_windowing() {
        let text = "abcdefghij".repeat(10); // 100 chars, no page breaks
        let chunks = chunk_by_policy(&text, &page_config());
        assert!(chunks.len() > 1, "fallback should window the text");
    }

    #[test]
    fn test_window_chunks_overlap() {
        let text = "0123456789".repeat(4); // 40 chars
        let chunks = window_chunks(&text, 20, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        // Consecutive windows share the configured overlap
        assert_eq!(&chunks[0][15..], &chunks[1][..5]);
    }

    #[test]
    fn test_window_chunks_handles_multibyte() {
        let text = "héllo wörld ünïcödé ".repeat(10);
        let chunks = window_chunks(&text, 16, 4);
        assert!(!chunks.is_empty());
        // Would panic during slicing if byte offsets were used
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 16);
        }
    }

    #[test]
    fn test_window_chunks_empty_input() {
        assert!(window_chunks("   ", 100, 10).is_empty());
    }

    #[test]
    fn test_render_markdown_with_pages() {
        let text = "first page\u{0c}second page";
        let (full, chunks) = render_markdown("paper.pdf", text, &page_config());
        assert!(full.starts_with("# paper"));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("## Page 1"));
        assert!(chunks[1].contains("second page"));
    }

    #[tokio::test]
    async fn test_parse_invalid_pdf_fails_with_parse_error() {
        let parser = PdfParser::new(page_config());
        let err = parser.parse_to_text(b"definitely not a pdf").await.unwrap_err();
        assert!(matches!(err, KbragError::Parse(_)));
    }
}
