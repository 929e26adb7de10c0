//! 学習コーパスから特徴量モデルを構築する。
use std::collections::BTreeMap;
use std::time::Instant;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info};

use super::model::{FeatureModel, Vocabulary};
use super::{FeatureKind, FeatureSelection};
use crate::corpus::Corpus;
use crate::error::Result;
use crate::tagger::{TaggedText, Tagger};

/// モデル構築のパラメータ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderOptions {
    /// 文字 n-gram の幅。
    pub char_width: usize,
    /// 種別ごとに残す語彙数の上限。`None` は無制限。
    pub vocab_cap: Option<usize>,
    /// タガーへ1回に送るテキストのバイト数上限。
    pub max_request_bytes: usize,
    /// タガー呼び出しの並列数。
    pub concurrency: usize,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            char_width: 4,
            vocab_cap: None,
            max_request_bytes: 90_000,
            concurrency: 4,
        }
    }
}

pub struct FeatureModelBuilder<'a> {
    tagger: &'a dyn Tagger,
    options: BuilderOptions,
}

impl<'a> FeatureModelBuilder<'a> {
    #[must_use]
    pub fn new(tagger: &'a dyn Tagger, options: BuilderOptions) -> Self {
        Self { tagger, options }
    }

    /// 選択された種別ごとに、コーパス全体の n-gram を初出順に数える。
    ///
    /// 語・品詞 n-gram は文を上限バイト数未満のバッチにまとめてタガーへ送り、
    /// バッチ単位で数える。文字 n-gram は文ごとに生テキストから数える。
    ///
    /// # Errors
    /// 選択が空の場合、またはタガー呼び出しが失敗した場合はエラーを返す。
    pub async fn build(&self, corpus: &Corpus, selection: &FeatureSelection) -> Result<FeatureModel> {
        let selection = selection.validate()?;
        let started = Instant::now();
        let mut vocabularies: BTreeMap<FeatureKind, Vocabulary> = selection
            .kinds()
            .map(|kind| (kind, Vocabulary::new()))
            .collect();

        if selection.char_ngram {
            if let Some(vocabulary) = vocabularies.get_mut(&FeatureKind::CharNgram) {
                let source = FeatureKind::CharNgram.source(self.options.char_width);
                for sentence in corpus.sentences() {
                    for gram in source.grams(&sentence.text, &TaggedText::default()) {
                        vocabulary.observe(&gram);
                    }
                }
            }
        }

        if selection.needs_tagger() {
            let batches = batch_texts(
                corpus.sentences().iter().map(|s| s.text.as_str()),
                self.options.max_request_bytes,
            );
            debug!(
                batches = batches.len(),
                tagger = self.tagger.name(),
                "tagging training corpus"
            );

            let tagger = self.tagger;
            let tagged: Vec<TaggedText> = stream::iter(batches)
                .map(|batch| async move { tagger.tag_parts_of_speech(&batch).await })
                .buffered(self.options.concurrency.max(1))
                .try_collect()
                .await?;

            for batch in &tagged {
                for kind in selection.kinds().filter(|k| *k != FeatureKind::CharNgram) {
                    let source = kind.source(self.options.char_width);
                    if let Some(vocabulary) = vocabularies.get_mut(&kind) {
                        for gram in source.grams("", batch) {
                            vocabulary.observe(&gram);
                        }
                    }
                }
            }
        }

        let vocabularies: BTreeMap<FeatureKind, Vocabulary> = vocabularies
            .into_iter()
            .map(|(kind, vocabulary)| {
                let observed = vocabulary.len();
                let vocabulary = vocabulary.capped(self.options.vocab_cap);
                info!(
                    kind = %kind,
                    observed,
                    kept = vocabulary.len(),
                    "built vocabulary"
                );
                (kind, vocabulary)
            })
            .collect();

        info!(
            sentences = corpus.len(),
            kinds = %selection.flags(),
            elapsed_ms = started.elapsed().as_millis(),
            "feature model built"
        );
        Ok(FeatureModel::new(self.options.char_width, vocabularies))
    }
}

/// 文を半角スペースで連結し、各バッチのバイト数を `max_bytes` 未満に保つ。
/// 単独で上限を超える文はそれだけで1バッチになる。
fn batch_texts<'t>(texts: impl Iterator<Item = &'t str>, max_bytes: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for text in texts {
        if !current.is_empty() && current.len() + 1 + text.len() >= max_bytes {
            batches.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(text);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Sentence;
    use crate::tagger::FallbackTagger;

    fn corpus(sentences: &[(&str, &str)]) -> Corpus {
        let mut corpus = Corpus::new();
        for (author, text) in sentences {
            corpus.push(Sentence::new(*author, *text));
        }
        corpus
    }

    #[test]
    fn batches_stay_under_limit() {
        let batches = batch_texts(["aaaa", "bbbb", "cccc", "dd"].into_iter(), 10);
        assert_eq!(batches, vec!["aaaa bbbb", "cccc dd"]);
    }

    #[test]
    fn oversized_text_becomes_its_own_batch() {
        let batches = batch_texts(["a", "bbbbbbbbbbbb", "c"].into_iter(), 5);
        assert_eq!(batches, vec!["a", "bbbbbbbbbbbb", "c"]);
    }

    #[tokio::test]
    async fn builds_selected_vocabularies_in_discovery_order() {
        let tagger = FallbackTagger::new();
        let corpus = corpus(&[("A", "the cat sat"), ("B", "the dog")]);
        let builder = FeatureModelBuilder::new(&tagger, BuilderOptions::default());

        let model = builder
            .build(&corpus, &"wW".parse().expect("flags"))
            .await
            .expect("build");

        let words = model.vocabulary(FeatureKind::Word).expect("word vocabulary");
        assert_eq!(words.tokens().collect::<Vec<_>>(), vec!["the", "cat", "sat", "dog"]);
        assert_eq!(words.count("the"), Some(2));
        assert!(model.vocabulary(FeatureKind::CharNgram).is_none());
        let bigrams = model.vocabulary(FeatureKind::WordBigram).expect("bigrams");
        assert_eq!(bigrams.position("the cat"), Some(0));
    }

    #[tokio::test]
    async fn char_vocabulary_counts_per_sentence() {
        let tagger = FallbackTagger::new();
        let corpus = corpus(&[("A", "abcde"), ("A", "abcd")]);
        let options = BuilderOptions {
            char_width: 4,
            ..BuilderOptions::default()
        };
        let model = FeatureModelBuilder::new(&tagger, options)
            .build(&corpus, &"c".parse().expect("flags"))
            .await
            .expect("build");

        let chars = model.vocabulary(FeatureKind::CharNgram).expect("chars");
        assert_eq!(chars.tokens().collect::<Vec<_>>(), vec!["abcd", "bcde"]);
        assert_eq!(chars.count("abcd"), Some(2));
    }

    #[tokio::test]
    async fn vocab_cap_limits_each_kind() {
        let tagger = FallbackTagger::new();
        let corpus = corpus(&[("A", "a a a b b c")]);
        let options = BuilderOptions {
            vocab_cap: Some(2),
            ..BuilderOptions::default()
        };
        let model = FeatureModelBuilder::new(&tagger, options)
            .build(&corpus, &"w".parse().expect("flags"))
            .await
            .expect("build");
        let words = model.vocabulary(FeatureKind::Word).expect("words");
        assert_eq!(words.tokens().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
