//! Token sequence interface.
//!
//! The engine consumes tokenized text; it never tokenizes or parses on its
//! own. A [`TokenSequence`] carries the source text, the token strings with
//! their byte offsets, optional named annotation layers (e.g. `pos`, `ner`,
//! `lemma`), and an optional dependency parse over token indices.
//!
//! A small default tokenizer is included for lexicon compilation, tests, and
//! the CLI: it splits on whitespace and separates punctuation from
//! alphanumeric runs. Production callers are expected to bring their own
//! tokens and annotations.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct TokenSequence {
    text: String,
    /// Byte offset of this sequence within a larger source text, if any.
    offset: usize,
    tokens: Vec<String>,
    /// Byte offset of each token within `text`.
    offsets: Vec<usize>,
    /// Byte length of each token.
    lengths: Vec<usize>,
    /// Layer name -> per-token tag sets.
    annotations: BTreeMap<String, Vec<Vec<String>>>,
    /// Per-token edges toward the root: token -> (head index, label).
    up_deps: Vec<Vec<(usize, String)>>,
    /// Per-token edges away from the root: token -> (dependent index, label).
    down_deps: Vec<Vec<(usize, String)>>,
    has_deps: bool,
}

impl TokenSequence {
    pub fn new(text: impl Into<String>, tokens: Vec<String>, offsets: Vec<usize>, lengths: Vec<usize>) -> TokenSequence {
        let n = tokens.len();
        assert_eq!(offsets.len(), n);
        assert_eq!(lengths.len(), n);
        TokenSequence {
            text: text.into(),
            offset: 0,
            tokens,
            offsets,
            lengths,
            annotations: BTreeMap::new(),
            up_deps: vec![Vec::new(); n],
            down_deps: vec![Vec::new(); n],
            has_deps: false,
        }
    }

    /// Tokenize `text` with the default tokenizer.
    pub fn from_text(text: &str) -> TokenSequence {
        tokenize(text)
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn token(&self, i: usize) -> &str {
        &self.tokens[i]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Byte offset of token `i` within the source text.
    pub fn start_offset(&self, i: usize) -> usize {
        self.offsets[i]
    }

    /// Exclusive byte end offset of token `i` within the source text.
    pub fn end_offset(&self, i: usize) -> usize {
        self.offsets[i] + self.lengths[i]
    }

    /// The source substring spanned by tokens `[begin, end)`, or `""` for an
    /// empty range.
    pub fn spanned_text(&self, begin: usize, end: usize) -> &str {
        if begin >= end || begin >= self.len() {
            return "";
        }
        let end = end.min(self.len());
        &self.text[self.offsets[begin]..self.end_offset(end - 1)]
    }

    /// Install an annotation layer with one tag set per token.
    pub fn add_annotations(&mut self, layer: impl Into<String>, tags: Vec<Vec<String>>) {
        assert_eq!(tags.len(), self.tokens.len());
        self.annotations.insert(layer.into(), tags);
    }

    /// Install an annotation layer with a single tag per token.
    pub fn add_tag_layer(&mut self, layer: impl Into<String>, tags: &[&str]) {
        let tags = tags.iter().map(|t| vec![t.to_string()]).collect();
        self.add_annotations(layer, tags);
    }

    pub fn has_annotations(&self, layer: &str) -> bool {
        self.annotations.contains_key(layer)
    }

    /// Tags of token `i` in `layer`, or None if the layer is absent.
    pub fn token_annotation(&self, layer: &str, i: usize) -> Option<&[String]> {
        self.annotations.get(layer).map(|tags| tags[i].as_slice())
    }

    /// Install a dependency parse. Each edge is `(from, to, label)` where
    /// `to` is the token closer to the root.
    pub fn add_dependencies(&mut self, edges: &[(usize, usize, &str)]) {
        for &(from, to, label) in edges {
            self.up_deps[from].push((to, label.to_string()));
            self.down_deps[to].push((from, label.to_string()));
        }
        self.has_deps = true;
    }

    pub fn has_dependencies(&self) -> bool {
        self.has_deps
    }

    /// Edges from token `at` toward the root: (head index, label).
    pub fn up_dependencies(&self, at: usize) -> &[(usize, String)] {
        &self.up_deps[at]
    }

    /// Edges from token `at` away from the root: (dependent index, label).
    pub fn down_dependencies(&self, at: usize) -> &[(usize, String)] {
        &self.down_deps[at]
    }

    /// True if token `at` has no edge toward the root.
    pub fn is_root_token(&self, at: usize) -> bool {
        self.has_deps && self.up_deps[at].is_empty()
    }
}

/// Default tokenizer: alphanumeric/underscore runs are tokens, every other
/// non-whitespace character is a token of its own.
pub fn tokenize(text: &str) -> TokenSequence {
    let mut tokens = Vec::new();
    let mut offsets = Vec::new();
    let mut lengths = Vec::new();
    let mut word_start: Option<usize> = None;

    let flush = |tokens: &mut Vec<String>, offsets: &mut Vec<usize>, lengths: &mut Vec<usize>, start: usize, end: usize, text: &str| {
        tokens.push(text[start..end].to_string());
        offsets.push(start);
        lengths.push(end - start);
    };

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() || c == '_' {
            if word_start.is_none() {
                word_start = Some(i);
            }
        } else {
            if let Some(start) = word_start.take() {
                flush(&mut tokens, &mut offsets, &mut lengths, start, i, text);
            }
            if !c.is_whitespace() {
                flush(&mut tokens, &mut offsets, &mut lengths, i, i + c.len_utf8(), text);
            }
        }
    }
    if let Some(start) = word_start {
        flush(&mut tokens, &mut offsets, &mut lengths, start, text.len(), text);
    }

    TokenSequence::new(text, tokens, offsets, lengths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_punctuation_from_words() {
        let seq = tokenize("Cost is $ 1,130.");
        let toks: Vec<&str> = seq.tokens().iter().map(|t| t.as_str()).collect();
        assert_eq!(toks, vec!["Cost", "is", "$", "1", ",", "130", "."]);
        assert_eq!(seq.spanned_text(0, 2), "Cost is");
        assert_eq!(seq.spanned_text(3, 6), "1,130");
    }

    #[test]
    fn annotations_and_dependencies() {
        let mut seq = tokenize("Rita bought an apple");
        seq.add_tag_layer("pos", &["NNP", "VBD", "DT", "NN"]);
        assert_eq!(seq.token_annotation("pos", 0), Some(&["NNP".to_string()][..]));
        assert_eq!(seq.token_annotation("ner", 0), None);

        seq.add_dependencies(&[(0, 1, "nsubj"), (3, 1, "obj"), (2, 3, "det")]);
        assert!(seq.has_dependencies());
        assert!(seq.is_root_token(1));
        assert!(!seq.is_root_token(0));
        assert_eq!(seq.up_dependencies(0), &[(1, "nsubj".to_string())]);
        assert_eq!(seq.down_dependencies(1).len(), 2);
    }

    #[test]
    fn spanned_text_handles_empty_ranges() {
        let seq = tokenize("one two");
        assert_eq!(seq.spanned_text(1, 1), "");
        assert_eq!(seq.spanned_text(0, 2), "one two");
    }
}
