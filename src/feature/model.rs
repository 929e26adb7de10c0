//! 特徴量モデル（種別ごとの語彙）と、その行指向ファイル形式での永続化。
//!
//! ファイルは1行1エントリで `<token> <count>` の形式。トークン自体が空白を
//! 含み得るため（語 n-gram、品詞 n-gram、空白を含む文字 n-gram）、
//! 読み込み時は最後の空白より後ろを出現回数として扱う。
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use super::{FeatureKind, FeatureSelection, GramSource};
use crate::error::{PipelineError, Result};

/// 順序付きの語彙。位置がベクトル内の列番号になる。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    entries: Vec<(String, u64)>,
    index: FxHashMap<String, usize>,
}

impl Vocabulary {
    /// 空の語彙。
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// トークンの出現を1回数える。初出のトークンは末尾に追加される。
    pub fn observe(&mut self, token: &str) {
        self.add(token, 1);
    }

    pub fn add(&mut self, token: &str, count: u64) {
        if let Some(&position) = self.index.get(token) {
            self.entries[position].1 += count;
            return;
        }
        self.index.insert(token.to_string(), self.entries.len());
        self.entries.push((token.to_string(), count));
    }

    /// 出現回数の上位 `cap` 件だけを残す。同数は初出順を優先し、
    /// 残したエントリは元の初出順を保つ。
    #[must_use]
    pub fn capped(self, cap: Option<usize>) -> Self {
        let Some(cap) = cap else {
            return self;
        };
        if self.entries.len() <= cap {
            return self;
        }

        let mut ranked: Vec<usize> = (0..self.entries.len()).collect();
        ranked.sort_by(|a, b| self.entries[*b].1.cmp(&self.entries[*a].1).then(a.cmp(b)));
        ranked.truncate(cap);
        ranked.sort_unstable();

        let mut capped = Self::new();
        for position in ranked {
            let (token, count) = &self.entries[position];
            capped.add(token, *count);
        }
        capped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn position(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    #[must_use]
    pub fn count(&self, token: &str) -> Option<u64> {
        self.position(token).map(|position| self.entries[position].1)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(token, _)| token.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(token, count)| (token.as_str(), *count))
    }
}

/// 構築後は不変の特徴量モデル。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureModel {
    char_width: usize,
    vocabularies: BTreeMap<FeatureKind, Vocabulary>,
}

impl FeatureModel {
    #[must_use]
    pub fn new(char_width: usize, vocabularies: BTreeMap<FeatureKind, Vocabulary>) -> Self {
        Self {
            char_width,
            vocabularies,
        }
    }

    #[must_use]
    pub fn char_width(&self) -> usize {
        self.char_width
    }

    #[must_use]
    pub fn vocabulary(&self, kind: FeatureKind) -> Option<&Vocabulary> {
        self.vocabularies.get(&kind)
    }

    /// モデルに含まれる種別（固定順）。
    pub fn kinds(&self) -> impl Iterator<Item = FeatureKind> + '_ {
        self.vocabularies.keys().copied()
    }

    /// 選択された種別の語彙サイズの合計。
    ///
    /// # Errors
    /// 選択された種別の語彙がモデルに無い場合は [`PipelineError::Configuration`] を返す。
    pub fn dimension(&self, selection: &FeatureSelection) -> Result<usize> {
        selection
            .kinds()
            .map(|kind| self.require(kind).map(Vocabulary::len))
            .sum()
    }

    pub(crate) fn require(&self, kind: FeatureKind) -> Result<&Vocabulary> {
        self.vocabulary(kind).ok_or_else(|| {
            PipelineError::Configuration(format!("feature model has no {kind} vocabulary"))
        })
    }

    /// 各種別の語彙を `paths` の対応するファイルへ書き出す。
    ///
    /// # Errors
    /// 書き込みに失敗した場合は [`PipelineError::Io`] を返す。
    pub fn save(&self, paths: &ModelPaths) -> Result<()> {
        for (kind, vocabulary) in &self.vocabularies {
            let Some(path) = paths.get(*kind) else {
                debug!(kind = %kind, "no output path for vocabulary, skipping");
                continue;
            };
            let mut buffer = String::new();
            for (token, count) in vocabulary.entries() {
                let _ = writeln!(buffer, "{token} {count}");
            }
            write_atomically(path, buffer.as_bytes())?;
            info!(kind = %kind, path = %path.display(), entries = vocabulary.len(), "saved vocabulary");
        }
        Ok(())
    }

    /// `paths` に列挙された種別の語彙ファイルを読み込む。
    ///
    /// # Errors
    /// ファイルが存在しない場合は [`PipelineError::Configuration`]、
    /// 行の形式が不正な場合は [`PipelineError::ModelFormat`] を返す。
    pub fn load(paths: &ModelPaths, char_width: usize) -> Result<Self> {
        let mut vocabularies = BTreeMap::new();
        for (kind, path) in paths.iter() {
            if !path.is_file() {
                return Err(PipelineError::Configuration(format!(
                    "model file for {kind} not found: {}",
                    path.display()
                )));
            }
            let raw =
                std::fs::read_to_string(path).map_err(|error| PipelineError::io(path, error))?;
            let vocabulary = parse_vocabulary(&raw, kind.source(char_width), path)?;
            debug!(kind = %kind, entries = vocabulary.len(), "loaded vocabulary");
            vocabularies.insert(kind, vocabulary);
        }
        Ok(Self::new(char_width, vocabularies))
    }
}

fn parse_vocabulary(raw: &str, source: GramSource, path: &Path) -> Result<Vocabulary> {
    let mut vocabulary = Vocabulary::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let malformed = |reason: String| PipelineError::ModelFormat {
            path: path.to_path_buf(),
            line: line_no + 1,
            reason,
        };

        let (token, count) = line
            .rsplit_once(' ')
            .ok_or_else(|| malformed("expected `<token> <count>`".to_string()))?;
        let count: u64 = count
            .parse()
            .map_err(|_| malformed(format!("invalid count {count:?}")))?;

        match source {
            GramSource::Chars(n) => {
                let width = token.chars().count();
                if width != n {
                    return Err(malformed(format!(
                        "expected {n} characters, found {width}"
                    )));
                }
            }
            GramSource::Words(n) | GramSource::Tags(n) => {
                let parts = token.split(' ').filter(|part| !part.is_empty()).count();
                if parts != n {
                    return Err(malformed(format!("expected {n} tokens, found {parts}")));
                }
            }
        }
        vocabulary.add(token, count);
    }
    Ok(vocabulary)
}

/// 種別ごとのモデルファイルの場所。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPaths {
    paths: BTreeMap<FeatureKind, PathBuf>,
}

impl ModelPaths {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `dir` 配下に既定のファイル名で配置する。
    #[must_use]
    pub fn in_dir(dir: &Path, selection: &FeatureSelection) -> Self {
        let mut paths = Self::new();
        for kind in selection.kinds() {
            paths.set(kind, dir.join(kind.default_file_name()));
        }
        paths
    }

    pub fn set(&mut self, kind: FeatureKind, path: impl Into<PathBuf>) {
        self.paths.insert(kind, path.into());
    }

    #[must_use]
    pub fn get(&self, kind: FeatureKind) -> Option<&Path> {
        self.paths.get(&kind).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureKind, &Path)> {
        self.paths.iter().map(|(kind, path)| (*kind, path.as_path()))
    }
}

/// 一時ファイルへ書き込んでから rename し、途中状態のファイルを残さない。
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|error| PipelineError::io(parent, error))?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    std::fs::write(&partial, bytes).map_err(|error| PipelineError::io(&partial, error))?;
    std::fs::rename(&partial, path).map_err(|error| PipelineError::io(path, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vocabulary(tokens: &[(&str, u64)]) -> Vocabulary {
        let mut vocabulary = Vocabulary::new();
        for (token, count) in tokens {
            vocabulary.add(token, *count);
        }
        vocabulary
    }

    #[test]
    fn observe_keeps_discovery_order() {
        let mut vocabulary = Vocabulary::new();
        for token in ["b", "a", "b", "c"] {
            vocabulary.observe(token);
        }
        assert_eq!(vocabulary.tokens().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(vocabulary.count("b"), Some(2));
        assert_eq!(vocabulary.position("c"), Some(2));
    }

    #[test]
    fn capped_keeps_most_frequent_in_discovery_order() {
        let capped = vocabulary(&[("x", 1), ("y", 5), ("z", 3), ("w", 3)]).capped(Some(2));
        assert_eq!(capped.tokens().collect::<Vec<_>>(), vec!["y", "z"]);
        let uncapped = vocabulary(&[("x", 1)]).capped(None);
        assert_eq!(uncapped.len(), 1);
    }

    #[test]
    fn save_and_load_preserve_order_and_counts() {
        let dir = tempdir().expect("tempdir");
        let mut vocabularies = BTreeMap::new();
        vocabularies.insert(FeatureKind::Word, vocabulary(&[("the", 4), ("cat", 1)]));
        vocabularies.insert(FeatureKind::PosBigram, vocabulary(&[("DT NN", 2)]));
        vocabularies.insert(FeatureKind::CharNgram, vocabulary(&[("a ca", 1), ("cat ", 2)]));
        let model = FeatureModel::new(4, vocabularies);

        let paths = ModelPaths::in_dir(dir.path(), &"wcP".parse().expect("flags"));
        model.save(&paths).expect("save");
        let loaded = FeatureModel::load(&paths, 4).expect("load");

        assert_eq!(loaded, model);
        let raw = std::fs::read_to_string(dir.path().join("output_bipos.txt")).expect("read");
        assert_eq!(raw, "DT NN 2\n");
    }

    #[test]
    fn load_rejects_wrong_arity() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output_biword.txt");
        std::fs::write(&path, "the cat 3\nlonely 1\n").expect("write");
        let mut paths = ModelPaths::new();
        paths.set(FeatureKind::WordBigram, &path);

        let error = FeatureModel::load(&paths, 4).expect_err("second line has one token");
        assert!(matches!(error, PipelineError::ModelFormat { line: 2, .. }));
    }

    #[test]
    fn load_missing_file_is_configuration_error() {
        let dir = tempdir().expect("tempdir");
        let paths = ModelPaths::in_dir(dir.path(), &"w".parse().expect("flags"));
        let error = FeatureModel::load(&paths, 4).expect_err("file is missing");
        assert!(matches!(error, PipelineError::Configuration(_)));
    }

    #[test]
    fn dimension_requires_selected_vocabularies() {
        let mut vocabularies = BTreeMap::new();
        vocabularies.insert(FeatureKind::Word, vocabulary(&[("a", 1), ("b", 1)]));
        vocabularies.insert(FeatureKind::Pos, vocabulary(&[("NN", 1)]));
        let model = FeatureModel::new(4, vocabularies);

        assert_eq!(model.dimension(&"wp".parse().expect("flags")).expect("dim"), 3);
        assert!(model.dimension(&"wc".parse().expect("flags")).is_err());
    }
}
