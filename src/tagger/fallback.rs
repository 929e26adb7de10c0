//! ネットワーク不要のオフラインタガー。
//!
//! Unicode の単語境界・文境界でテキストを分割し、品詞の代わりに
//! トークンの字形クラス（数字、記号、大文字始まり、小文字語など）を付与する。
//! CoreNLP サーバーを立てられない環境でのドライランやテストに使う。
use async_trait::async_trait;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use super::{TaggedText, Tagger};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackTagger;

impl FallbackTagger {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn words(text: &str) -> Vec<String> {
        text.nfc()
            .collect::<String>()
            .split_word_bounds()
            .filter(|token| !token.trim().is_empty())
            .map(ToString::to_string)
            .collect()
    }

    fn shape(word: &str) -> &'static str {
        let mut chars = word.chars();
        let Some(first) = chars.next() else {
            return "X";
        };
        if word.chars().all(char::is_numeric) {
            "NUM"
        } else if word.chars().all(|c| !c.is_alphanumeric()) {
            "PUNCT"
        } else if first.is_uppercase() {
            if chars.all(|c| !c.is_lowercase()) && word.chars().count() > 1 {
                "UPPER"
            } else {
                "TITLE"
            }
        } else if word.chars().all(char::is_lowercase) {
            "LOWER"
        } else {
            "MIXED"
        }
    }
}

#[async_trait]
impl Tagger for FallbackTagger {
    async fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        Ok(Self::words(text))
    }

    async fn tag_parts_of_speech(&self, text: &str) -> Result<TaggedText> {
        let words = Self::words(text);
        let tags = words.iter().map(|w| Self::shape(w).to_string()).collect();
        TaggedText::new(words, tags)
    }

    async fn split_sentences(&self, text: &str) -> Result<Vec<String>> {
        Ok(text
            .replace('\n', "")
            .unicode_sentences()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1999", "NUM")]
    #[case("!", "PUNCT")]
    #[case("NASA", "UPPER")]
    #[case("Madrid", "TITLE")]
    #[case("A", "TITLE")]
    #[case("perro", "LOWER")]
    #[case("iPhone", "MIXED")]
    fn shape_classifies_tokens(#[case] word: &str, #[case] expected: &str) {
        assert_eq!(FallbackTagger::shape(word), expected);
    }

    #[tokio::test]
    async fn tag_parts_of_speech_is_index_aligned() {
        let tagged = FallbackTagger::new()
            .tag_parts_of_speech("El Madrid ganó 2 partidos.")
            .await
            .expect("tagging never fails");
        assert_eq!(tagged.words, vec!["El", "Madrid", "ganó", "2", "partidos", "."]);
        assert_eq!(tagged.tags.len(), tagged.words.len());
        assert_eq!(tagged.tags[3], "NUM");
    }

    #[tokio::test]
    async fn split_sentences_handles_blank_input() {
        let sentences = FallbackTagger::new()
            .split_sentences("  \n ")
            .await
            .expect("split never fails");
        assert!(sentences.is_empty());
    }

    #[tokio::test]
    async fn split_sentences_splits_on_terminators() {
        let sentences = FallbackTagger::new()
            .split_sentences("First sentence. Second sentence! Third?")
            .await
            .expect("split never fails");
        assert_eq!(
            sentences,
            vec!["First sentence.", "Second sentence!", "Third?"]
        );
    }
}
