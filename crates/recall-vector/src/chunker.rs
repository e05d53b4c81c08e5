//! Text chunking: paragraphs first, sentence packing for long paragraphs,
//! and a fixed-window alternative.
//!
//! All sizes are counted in characters, not bytes.
//!
//! Known gap: paragraphs shorter than `min_size`, and a trailing sentence
//! buffer shorter than `min_size`, are dropped rather than merged into a
//! neighbour. Only when nothing at all survives does the whole input become
//! a single chunk.

use std::sync::LazyLock;

use regex::Regex;

use recall_core::config::ChunkingConfig;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("Invalid paragraph regex"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("Invalid sentence regex"));

/// How a document is cut into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Blank-line paragraphs; paragraphs over `max_size` are packed by sentence.
    Paragraph { min_size: usize, max_size: usize },
    /// Windows of `chunk_size` characters sharing `overlap` characters.
    FixedSize { chunk_size: usize, overlap: usize },
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        ChunkStrategy::Paragraph {
            min_size: 50,
            max_size: 1000,
        }
    }
}

/// Splits raw text into bounded-size units.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    strategy: ChunkStrategy,
}

impl Chunker {
    pub fn new(strategy: ChunkStrategy) -> Self {
        Self { strategy }
    }

    pub fn paragraph(min_size: usize, max_size: usize) -> Self {
        Self::new(ChunkStrategy::Paragraph { min_size, max_size })
    }

    pub fn fixed_size(chunk_size: usize, overlap: usize) -> Self {
        Self::new(ChunkStrategy::FixedSize {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        match config.strategy.as_str() {
            "fixed" => Self::fixed_size(config.chunk_size, config.overlap),
            _ => Self::paragraph(config.min_size, config.max_size),
        }
    }

    pub fn strategy(&self) -> &ChunkStrategy {
        &self.strategy
    }

    /// Chunk `text` in document order.
    ///
    /// Empty input yields no chunks. Otherwise, if the strategy produces
    /// nothing (input too short or only whitespace), the whole input is
    /// returned verbatim as one chunk.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let chunks = match self.strategy {
            ChunkStrategy::Paragraph { min_size, max_size } => {
                chunk_by_paragraph(text, min_size, max_size)
            }
            ChunkStrategy::FixedSize {
                chunk_size,
                overlap,
            } => chunk_by_fixed_size(text, chunk_size, overlap),
        };
        if chunks.is_empty() {
            vec![text.to_string()]
        } else {
            chunks
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on blank lines, dropping paragraphs under `min_size` and re-splitting
/// paragraphs over `max_size` by sentence.
pub fn chunk_by_paragraph(text: &str, min_size: usize, max_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    for para in PARAGRAPH_BREAK.split(text) {
        let para = para.trim();
        let len = char_len(para);
        if para.is_empty() || len < min_size {
            continue;
        }
        if len <= max_size {
            chunks.push(para.to_string());
        } else {
            chunks.extend(chunk_by_sentence(para, min_size, max_size));
        }
    }
    chunks
}

/// Sentences end at `.`, `!`, or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // The terminator is one ASCII byte.
        sentences.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Pack sentences into buffers of at most `max_size` characters.
///
/// A buffer is only emitted once it holds at least `min_size` characters, so
/// a single sentence longer than `max_size` stays whole.
pub fn chunk_by_sentence(text: &str, min_size: usize, max_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_sentences(text) {
        let sentence_len = char_len(sentence);
        if current_len + sentence_len > max_size && current_len >= min_size {
            chunks.push(current.trim().to_string());
            current = sentence.to_string();
            current_len = sentence_len;
        } else if current.is_empty() {
            current.push_str(sentence);
            current_len = sentence_len;
        } else {
            current.push(' ');
            current.push_str(sentence);
            current_len += 1 + sentence_len;
        }
    }

    if !current.is_empty() && current_len >= min_size {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Fixed windows of `chunk_size` characters, cut back to the last space when
/// one exists inside the window, with `overlap` characters carried over.
pub fn chunk_by_fixed_size(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            if let Some(offset) = chars[start..end].iter().rposition(|&c| c == ' ') {
                if offset > 0 {
                    end = start + offset;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end == chars.len() {
            break;
        }
        start = if end > start + overlap {
            end - overlap
        } else {
            end
        };
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(word: &str, n: usize) -> String {
        vec![word; n].join(" ")
    }

    #[test]
    fn test_paragraphs_split_on_blank_lines() {
        let a = para("alpha", 12);
        let b = para("beta", 12);
        let text = format!("{}\n\n{}\n  \n\n{}", a, b, a);
        let chunks = chunk_by_paragraph(&text, 10, 1000);
        assert_eq!(chunks, vec![a.clone(), b, a]);
    }

    #[test]
    fn test_short_paragraphs_dropped() {
        let long = para("memory", 10);
        let text = format!("tiny\n\n{}\n\nalso tiny", long);
        let chunks = chunk_by_paragraph(&text, 50, 1000);
        assert_eq!(chunks, vec![long]);
    }

    #[test]
    fn test_long_paragraph_packed_by_sentence() {
        let sentence = "The quick brown fox jumps over the lazy dog.";
        let paragraph = vec![sentence; 10].join(" ");
        let chunks = chunk_by_paragraph(&paragraph, 20, 100);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 100, "chunk too long: {}", chunk);
            assert!(chunk.ends_with('.'), "mid-sentence cut: {}", chunk);
        }
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, paragraph);
    }

    #[test]
    fn test_sentence_split_handles_all_terminators() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_sentence_without_following_whitespace_is_not_split() {
        assert_eq!(split_sentences("v1.2 is out"), vec!["v1.2 is out"]);
    }

    #[test]
    fn test_oversized_single_sentence_stays_whole() {
        let sentence = format!("{}.", para("word", 60));
        let chunks = chunk_by_sentence(&sentence, 10, 100);
        assert_eq!(chunks, vec![sentence]);
    }

    #[test]
    fn test_short_trailing_sentence_dropped() {
        let long = format!("{}.", para("word", 20));
        let text = format!("{} Tail.", long);
        let chunks = chunk_by_sentence(&text, 50, 102);
        assert_eq!(chunks, vec![long]);
    }

    #[test]
    fn test_chunker_falls_back_to_whole_input() {
        let chunker = Chunker::paragraph(50, 1000);
        assert_eq!(chunker.chunk("hello world"), vec!["hello world"]);
        assert_eq!(chunker.chunk("  padded  "), vec!["  padded  "]);
    }

    #[test]
    fn test_chunker_empty_input_yields_nothing() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("").is_empty());
        assert!(Chunker::fixed_size(10, 2).chunk("").is_empty());
    }

    #[test]
    fn test_chunker_whitespace_input_kept_verbatim() {
        let chunker = Chunker::paragraph(50, 1000);
        assert_eq!(chunker.chunk("   "), vec!["   "]);
        assert_eq!(chunker.chunk(" \n\n \t"), vec![" \n\n \t"]);
        assert_eq!(Chunker::fixed_size(10, 2).chunk("  "), vec!["  "]);
    }

    #[test]
    fn test_sizes_are_counted_in_characters() {
        // 30 three-byte characters: 90 bytes but 30 chars.
        let text = "記".repeat(30);
        let chunks = chunk_by_paragraph(&text, 25, 40);
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_fixed_size_short_text_is_single_chunk() {
        assert_eq!(chunk_by_fixed_size("short text", 100, 10), vec!["short text"]);
        assert!(chunk_by_fixed_size("", 100, 10).is_empty());
    }

    #[test]
    fn test_fixed_size_breaks_on_spaces_with_overlap() {
        let text = "aaaa bbbb cccc dddd eeee ffff";
        let chunks = chunk_by_fixed_size(text, 12, 4);

        for chunk in &chunks {
            assert!(char_len(chunk) <= 12);
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
        assert_eq!(chunks.first().map(String::as_str), Some("aaaa bbbb"));
        assert!(chunks.last().unwrap().ends_with("ffff"));
    }

    #[test]
    fn test_fixed_size_without_spaces_makes_progress() {
        let text = "x".repeat(25);
        let chunks = chunk_by_fixed_size(&text, 10, 3);
        assert_eq!(chunks[0].len(), 10);
        assert!(chunks.last().unwrap().len() <= 10);
        let total: usize = chunks.iter().map(String::len).sum();
        assert!(total >= 25);
    }

    #[test]
    fn test_from_config() {
        let mut config = ChunkingConfig::default();
        assert_eq!(
            Chunker::from_config(&config).strategy(),
            &ChunkStrategy::Paragraph {
                min_size: 50,
                max_size: 1000
            }
        );
        config.strategy = "fixed".into();
        assert_eq!(
            Chunker::from_config(&config).strategy(),
            &ChunkStrategy::FixedSize {
                chunk_size: 500,
                overlap: 100
            }
        );
    }
}
