//! Text splitting for article bodies.
//!
//! Both strategies cut the text into contiguous slices: concatenating the
//! pieces in order gives back the input exactly, and no piece is longer than
//! `max_chunk_size` characters.
//!
//! The sentence splitter prefers, in order, a paragraph break, the end of a
//! sentence, any whitespace, and only then a hard cut. The semantic splitter
//! groups sentences whose neighbourhood embeddings stay close and breaks
//! where the distance jumps above a percentile threshold.

use std::sync::Arc;

use an_core::storage::cosine_similarity;
use an_core::{EmbeddingModel, Error, Result};
use futures::future::try_join_all;

pub const DEFAULT_BUFFER_SIZE: usize = 1;
pub const DEFAULT_BREAKPOINT_PERCENTILE: f32 = 95.0;

/// Which strategy to use and how large a chunk may get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    pub use_semantic: bool,
    pub max_chunk_size: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            use_semantic: false,
            max_chunk_size: 1024,
        }
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…' | '\n')
}

/// Byte offsets right after each sentence, whitespace included.
fn sentence_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut saw_space = false;
        while let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                saw_space = true;
                chars.next();
            } else {
                break;
            }
        }
        if saw_space || c == '\n' {
            if let Some(&(i, _)) = chars.peek() {
                ends.push(i);
            }
        }
    }
    ends.push(text.len());
    ends.dedup();
    ends
}

/// Splits `text` into sentences, each keeping its trailing whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut start = 0;
    sentence_ends(text)
        .into_iter()
        .filter(|end| *end > 0)
        .map(|end| {
            let piece = &text[start..end];
            start = end;
            piece
        })
        .collect()
}

/// Lazy iterator over bounded slices of a text.
#[derive(Debug, Clone)]
pub struct SentenceChunks<'a> {
    text: &'a str,
    pos: usize,
    max_chars: usize,
}

impl<'a> SentenceChunks<'a> {
    /// Best byte offset to cut `window` at, always greater than zero.
    fn cut(window: &str) -> usize {
        if let Some(i) = window.rfind("\n\n") {
            let end = i + 2;
            let end = end + window[end..].len() - window[end..].trim_start().len();
            if end > 0 && end <= window.len() {
                return end;
            }
        }
        if let Some(end) = sentence_ends(window)
            .into_iter()
            .filter(|e| *e < window.len())
            .last()
        {
            if end > 0 {
                return end;
            }
        }
        if let Some((i, c)) = window
            .char_indices()
            .filter(|(i, c)| c.is_whitespace() && *i > 0)
            .last()
        {
            return i + c.len_utf8();
        }
        window.len()
    }
}

impl<'a> Iterator for SentenceChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.pos >= self.text.len() {
            return None;
        }
        let rest = &self.text[self.pos..];
        let limit = match rest.char_indices().nth(self.max_chars) {
            Some((i, _)) => i,
            None => {
                self.pos = self.text.len();
                return Some(rest);
            }
        };
        let end = Self::cut(&rest[..limit]);
        self.pos += end;
        Some(&rest[..end])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceSplitter {
    max_chunk_size: usize,
}

impl SentenceSplitter {
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn split<'a>(&self, text: &'a str) -> SentenceChunks<'a> {
        SentenceChunks {
            text,
            pos: 0,
            max_chars: self.max_chunk_size,
        }
    }
}

/// Breaks text where the meaning shifts, measured with an embedding model.
#[derive(Clone)]
pub struct SemanticSplitter {
    model: Arc<dyn EmbeddingModel>,
    buffer_size: usize,
    breakpoint_percentile: f32,
    fallback: SentenceSplitter,
}

impl SemanticSplitter {
    pub fn new(model: Arc<dyn EmbeddingModel>, max_chunk_size: usize) -> Self {
        Self {
            model,
            buffer_size: DEFAULT_BUFFER_SIZE,
            breakpoint_percentile: DEFAULT_BREAKPOINT_PERCENTILE,
            fallback: SentenceSplitter::new(max_chunk_size),
        }
    }

    pub fn with_breakpoint_percentile(mut self, percentile: f32) -> Self {
        self.breakpoint_percentile = percentile.clamp(0.0, 100.0);
        self
    }

    pub async fn split(&self, text: &str) -> Result<Vec<String>> {
        let sentences = split_sentences(text);
        if sentences.len() < 3 {
            return Ok(self.resplit(text));
        }

        let windows: Vec<String> = (0..sentences.len())
            .map(|i| {
                let from = i.saturating_sub(self.buffer_size);
                let to = (i + self.buffer_size + 1).min(sentences.len());
                sentences[from..to].concat()
            })
            .collect();
        let embeddings = try_join_all(windows.iter().map(|w| self.model.embed_text(w)))
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let distances: Vec<f32> = embeddings
            .windows(2)
            .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
            .collect();
        let threshold = percentile(&distances, self.breakpoint_percentile);

        let mut pieces = Vec::new();
        let mut group = String::new();
        for (i, sentence) in sentences.iter().enumerate() {
            group.push_str(sentence);
            if distances.get(i).is_some_and(|d| *d > threshold) {
                pieces.extend(self.resplit(&group));
                group.clear();
            }
        }
        pieces.extend(self.resplit(&group));
        Ok(pieces)
    }

    fn resplit(&self, group: &str) -> Vec<String> {
        self.fallback.split(group).map(str::to_string).collect()
    }
}

/// Linearly interpolated percentile, `0.0` for an empty slice.
fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f32)
}

/// A configured splitter.
#[derive(Clone)]
pub enum Splitter {
    Sentence(SentenceSplitter),
    Semantic(SemanticSplitter),
}

impl Splitter {
    /// The semantic strategy needs `model`; the sentence one ignores it.
    pub fn from_config(
        config: SplitterConfig,
        model: Option<Arc<dyn EmbeddingModel>>,
    ) -> Result<Self> {
        if !config.use_semantic {
            return Ok(Splitter::Sentence(SentenceSplitter::new(config.max_chunk_size)));
        }
        let model = model.ok_or_else(|| {
            Error::Config("semantic splitting requires an embedding model".to_string())
        })?;
        Ok(Splitter::Semantic(SemanticSplitter::new(model, config.max_chunk_size)))
    }

    pub async fn split(&self, text: &str) -> Result<Vec<String>> {
        match self {
            Splitter::Sentence(s) => Ok(s.split(text).map(str::to_string).collect()),
            Splitter::Semantic(s) => s.split(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn assert_bounded_and_gapless(text: &str, pieces: &[impl AsRef<str>], max: usize) {
        let joined: String = pieces.iter().map(|p| p.as_ref()).collect();
        assert_eq!(joined, text);
        for piece in pieces {
            let len = piece.as_ref().chars().count();
            assert!(len > 0 && len <= max, "piece of {} chars", len);
        }
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = SentenceSplitter::new(100);
        let pieces: Vec<&str> = splitter.split("One sentence. Two.").collect();
        assert_eq!(pieces, vec!["One sentence. Two."]);
        assert_eq!(splitter.split("").count(), 0);
    }

    #[test]
    fn test_three_times_max_reconstructs_without_gaps() {
        let max = 40;
        let sentence = "The model beat the benchmark again. ";
        let mut text = sentence.repeat(4);
        text.truncate(3 * max);
        assert_eq!(text.chars().count(), 3 * max);

        let pieces: Vec<&str> = SentenceSplitter::new(max).split(&text).collect();
        assert!(pieces.len() >= 3);
        assert_bounded_and_gapless(&text, &pieces, max);
        assert_eq!(pieces[0], "The model beat the benchmark again. ");
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let text = "First para, short.\n\nSecond paragraph runs on and on";
        let pieces: Vec<&str> = SentenceSplitter::new(30).split(text).collect();
        assert_eq!(pieces[0], "First para, short.\n\n");
        assert_bounded_and_gapless(text, &pieces, 30);
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "x".repeat(25);
        let pieces: Vec<&str> = SentenceSplitter::new(10).split(&text).collect();
        assert_eq!(pieces.len(), 3);
        assert_bounded_and_gapless(&text, &pieces, 10);
    }

    #[test]
    fn test_multibyte_text_respects_char_budget() {
        let text = "Café crème. Ünïcödé wörds everywhere. Ça va très bien. ".repeat(5);
        let pieces: Vec<&str> = SentenceSplitter::new(17).split(&text).collect();
        assert_bounded_and_gapless(&text, &pieces, 17);
    }

    #[test]
    fn test_split_sentences_keeps_whitespace() {
        assert_eq!(
            split_sentences("Hi there! How are you? Fine"),
            vec!["Hi there! ", "How are you? ", "Fine"]
        );
        assert_eq!(split_sentences("v1.2 is out."), vec!["v1.2 is out."]);
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 50.0), 3.0);
        assert!((percentile(&[0.0, 10.0], 95.0) - 9.5).abs() < 1e-6);
    }

    /// Topic A sentences mention "chips", topic B sentences "football".
    struct TopicEmbedder;

    #[async_trait]
    impl EmbeddingModel for TopicEmbedder {
        fn name(&self) -> &str {
            "topic"
        }

        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![
                text.matches("chips").count() as f32,
                text.matches("football").count() as f32,
            ])
        }
    }

    #[tokio::test]
    async fn test_semantic_split_breaks_on_topic_change() {
        let text = "New chips shipped. The chips are fast. Analysts like the chips. \
                    The football final was tense. The football crowd roared. Football fans cheered.";
        let splitter = SemanticSplitter::new(Arc::new(TopicEmbedder), 1024)
            .with_breakpoint_percentile(80.0);
        let pieces = splitter.split(text).await.unwrap();
        assert_eq!(pieces.concat(), text);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].ends_with("Analysts like the chips. "));
    }

    #[tokio::test]
    async fn test_semantic_groups_respect_max_size() {
        let text = "Chips chips chips chips. ".repeat(10);
        let splitter = SemanticSplitter::new(Arc::new(TopicEmbedder), 30);
        let pieces = splitter.split(&text).await.unwrap();
        assert_bounded_and_gapless(&text, &pieces, 30);
    }

    #[test]
    fn test_semantic_without_model_is_config_error() {
        let config = SplitterConfig {
            use_semantic: true,
            ..Default::default()
        };
        assert!(matches!(
            Splitter::from_config(config, None),
            Err(Error::Config(_))
        ));
    }
}
