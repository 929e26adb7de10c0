//! 文体特徴量（語・文字・品詞 n-gram）のモデル構築とベクトル化。
//!
//! 特徴種別の並び順は [`FeatureKind::ALL`] で固定されており、ベクトルの列順は
//! 常にこの順序で有効な種別の語彙を連結したものになる。
pub mod builder;
pub mod model;
pub mod ngram;
pub mod vectorizer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::tagger::TaggedText;

pub use builder::{BuilderOptions, FeatureModelBuilder};
pub use model::{FeatureModel, ModelPaths, Vocabulary};
pub use vectorizer::{FeatureVector, Vectorizer};

/// 特徴種別。宣言順がベクトルの連結順。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Word,
    WordBigram,
    WordTrigram,
    CharNgram,
    Pos,
    PosBigram,
    PosTrigram,
    PosFourgram,
}

/// n-gram の生成元。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GramSource {
    /// タガーが返した語列上の n-gram。
    Words(usize),
    /// トークン化前の生テキストの文字 n-gram。
    Chars(usize),
    /// 品詞タグ列上の n-gram。
    Tags(usize),
}

impl GramSource {
    /// チャンク（またはテキスト単位）の n-gram を出現順に生成する。
    #[must_use]
    pub fn grams(self, text: &str, tagged: &TaggedText) -> Vec<String> {
        match self {
            Self::Words(n) => ngram::token_ngrams(&tagged.words, n),
            Self::Chars(n) => ngram::char_ngrams(text, n),
            Self::Tags(n) => ngram::token_ngrams(&tagged.tags, n),
        }
    }

    #[must_use]
    pub fn needs_tagger(self) -> bool {
        !matches!(self, Self::Chars(_))
    }
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 8] = [
        FeatureKind::Word,
        FeatureKind::WordBigram,
        FeatureKind::WordTrigram,
        FeatureKind::CharNgram,
        FeatureKind::Pos,
        FeatureKind::PosBigram,
        FeatureKind::PosTrigram,
        FeatureKind::PosFourgram,
    ];

    /// 文字 n-gram の幅を与えて生成元を決める。
    #[must_use]
    pub fn source(self, char_width: usize) -> GramSource {
        match self {
            Self::Word => GramSource::Words(1),
            Self::WordBigram => GramSource::Words(2),
            Self::WordTrigram => GramSource::Words(3),
            Self::CharNgram => GramSource::Chars(char_width),
            Self::Pos => GramSource::Tags(1),
            Self::PosBigram => GramSource::Tags(2),
            Self::PosTrigram => GramSource::Tags(3),
            Self::PosFourgram => GramSource::Tags(4),
        }
    }

    /// コマンドラインで使う1文字フラグ。
    #[must_use]
    pub fn flag(self) -> char {
        match self {
            Self::Word => 'w',
            Self::WordBigram => 'W',
            Self::WordTrigram => 't',
            Self::CharNgram => 'c',
            Self::Pos => 'p',
            Self::PosBigram => 'P',
            Self::PosTrigram => 'T',
            Self::PosFourgram => 'F',
        }
    }

    #[must_use]
    pub fn from_flag(flag: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.flag() == flag)
    }

    /// モデルファイルの既定のファイル名。
    #[must_use]
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Word => "output_word.txt",
            Self::WordBigram => "output_biword.txt",
            Self::WordTrigram => "output_triword.txt",
            Self::CharNgram => "output_char.txt",
            Self::Pos => "output_pos.txt",
            Self::PosBigram => "output_bipos.txt",
            Self::PosTrigram => "output_tripos.txt",
            Self::PosFourgram => "output_4pos.txt",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::WordBigram => "word_bigram",
            Self::WordTrigram => "word_trigram",
            Self::CharNgram => "char_ngram",
            Self::Pos => "pos",
            Self::PosBigram => "pos_bigram",
            Self::PosTrigram => "pos_trigram",
            Self::PosFourgram => "pos_fourgram",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 有効な特徴種別の明示的な設定。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct FeatureSelection {
    pub word: bool,
    pub word_bigram: bool,
    pub word_trigram: bool,
    pub char_ngram: bool,
    pub pos: bool,
    pub pos_bigram: bool,
    pub pos_trigram: bool,
    pub pos_fourgram: bool,
}

impl FeatureSelection {
    /// すべての種別を有効にした設定。
    #[must_use]
    pub fn all() -> Self {
        Self::from_kinds(FeatureKind::ALL)
    }

    #[must_use]
    pub fn from_kinds(kinds: impl IntoIterator<Item = FeatureKind>) -> Self {
        let mut selection = Self::default();
        for kind in kinds {
            *selection.slot(kind) = true;
        }
        selection
    }

    fn slot(&mut self, kind: FeatureKind) -> &mut bool {
        match kind {
            FeatureKind::Word => &mut self.word,
            FeatureKind::WordBigram => &mut self.word_bigram,
            FeatureKind::WordTrigram => &mut self.word_trigram,
            FeatureKind::CharNgram => &mut self.char_ngram,
            FeatureKind::Pos => &mut self.pos,
            FeatureKind::PosBigram => &mut self.pos_bigram,
            FeatureKind::PosTrigram => &mut self.pos_trigram,
            FeatureKind::PosFourgram => &mut self.pos_fourgram,
        }
    }

    #[must_use]
    pub fn contains(&self, kind: FeatureKind) -> bool {
        match kind {
            FeatureKind::Word => self.word,
            FeatureKind::WordBigram => self.word_bigram,
            FeatureKind::WordTrigram => self.word_trigram,
            FeatureKind::CharNgram => self.char_ngram,
            FeatureKind::Pos => self.pos,
            FeatureKind::PosBigram => self.pos_bigram,
            FeatureKind::PosTrigram => self.pos_trigram,
            FeatureKind::PosFourgram => self.pos_fourgram,
        }
    }

    /// 有効な種別を固定の連結順で返す。
    pub fn kinds(&self) -> impl Iterator<Item = FeatureKind> + '_ {
        FeatureKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds().next().is_none()
    }

    /// いずれかの種別がタガー出力（語または品詞）を必要とするか。
    #[must_use]
    pub fn needs_tagger(&self) -> bool {
        self.kinds().any(|kind| kind != FeatureKind::CharNgram)
    }

    /// 少なくとも1種別が有効であることを検証する。
    ///
    /// # Errors
    /// すべて無効の場合は [`PipelineError::Configuration`] を返す。
    pub fn validate(self) -> Result<Self, PipelineError> {
        if self.is_empty() {
            return Err(PipelineError::Configuration(
                "at least one feature type must be enabled".to_string(),
            ));
        }
        Ok(self)
    }

    /// `wWtcpPTF` 形式のフラグ文字列。
    #[must_use]
    pub fn flags(&self) -> String {
        self.kinds().map(FeatureKind::flag).collect()
    }
}

impl FromStr for FeatureSelection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut kinds = Vec::new();
        for flag in s.chars() {
            let kind = FeatureKind::from_flag(flag).ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "unknown feature flag {flag:?} (expected any of wWtcpPTF)"
                ))
            })?;
            kinds.push(kind);
        }
        Self::from_kinds(kinds).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn kinds_follow_fixed_order_regardless_of_flag_order() {
        let selection: FeatureSelection = "Pcw".parse().expect("valid flags");
        let kinds: Vec<FeatureKind> = selection.kinds().collect();
        assert_eq!(
            kinds,
            vec![FeatureKind::Word, FeatureKind::CharNgram, FeatureKind::PosBigram]
        );
        assert_eq!(selection.flags(), "wcP");
    }

    #[rstest]
    #[case("")]
    #[case("x")]
    #[case("wq")]
    fn invalid_flags_are_rejected(#[case] flags: &str) {
        assert!(flags.parse::<FeatureSelection>().is_err());
    }

    #[test]
    fn char_only_selection_does_not_need_tagger() {
        let selection: FeatureSelection = "c".parse().expect("valid flags");
        assert!(!selection.needs_tagger());
        assert!(FeatureSelection::all().needs_tagger());
    }

    #[test]
    fn flags_round_trip_for_every_kind() {
        for kind in FeatureKind::ALL {
            assert_eq!(FeatureKind::from_flag(kind.flag()), Some(kind));
        }
    }
}
