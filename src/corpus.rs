//! 著者ラベル付きの文コーパス。
//!
//! 著者ラベルは初出順に安定した整数インデックスへ割り当てられ、
//! すべての文のインデックスはこの対応表の範囲内にある。
use std::path::{Path, PathBuf};

use futures::{StreamExt, TryStreamExt, stream};
use rand::Rng;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::tagger::Tagger;

/// 著者ラベル付きの一文。取り込み後は不変。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub author: String,
    pub text: String,
}

impl Sentence {
    #[must_use]
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }
}

/// 一人の著者による一つの文書（コーパスディレクトリの1ファイル）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorDocument {
    pub author: String,
    pub text: String,
}

/// 順序付きの文列と、著者ラベル→著者インデックスの対応表。
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    sentences: Vec<Sentence>,
    author_ids: Vec<usize>,
    authors: Vec<String>,
    author_index: FxHashMap<String, usize>,
}

impl Corpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn author_id(&mut self, author: &str) -> usize {
        if let Some(&idx) = self.author_index.get(author) {
            return idx;
        }
        let idx = self.authors.len();
        self.authors.push(author.to_string());
        self.author_index.insert(author.to_string(), idx);
        idx
    }

    /// 文を末尾に追加する。
    pub fn push(&mut self, sentence: Sentence) {
        let idx = self.author_id(&sentence.author);
        self.sentences.push(sentence);
        self.author_ids.push(idx);
    }

    /// 同一著者の複数の文を追加する。
    pub fn extend_author<I, S>(&mut self, author: &str, sentences: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for text in sentences {
            self.push(Sentence::new(author, text));
        }
    }

    #[must_use]
    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    #[must_use]
    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// 著者ラベルの著者インデックス。
    #[must_use]
    pub fn author_index(&self, author: &str) -> Option<usize> {
        self.author_index.get(author).copied()
    }

    /// 文インデックスの著者インデックス。
    #[must_use]
    pub fn author_index_of_sentence(&self, sentence_idx: usize) -> Option<usize> {
        self.author_ids.get(sentence_idx).copied()
    }

    #[must_use]
    pub fn author_label(&self, author_idx: usize) -> Option<&str> {
        self.authors.get(author_idx).map(String::as_str)
    }

    /// 著者ごとの文数（著者インデックス順）。
    #[must_use]
    pub fn sentence_counts(&self) -> Vec<(String, usize)> {
        let mut counts = vec![0usize; self.authors.len()];
        for &idx in &self.author_ids {
            counts[idx] += 1;
        }
        self.authors.iter().cloned().zip(counts).collect()
    }

    /// JSON Lines 形式（1行1文）で保存する。
    ///
    /// # Errors
    /// 書き込みに失敗した場合は [`PipelineError::Io`] を返す。
    pub fn save_jsonl(&self, path: &Path) -> Result<()> {
        let mut buffer = String::new();
        for sentence in &self.sentences {
            let line = serde_json::to_string(sentence).map_err(|error| {
                PipelineError::io(path, std::io::Error::other(error))
            })?;
            buffer.push_str(&line);
            buffer.push('\n');
        }
        crate::feature::model::write_atomically(path, buffer.as_bytes())
    }

    /// JSON Lines 形式の文集合を読み込む。空行は無視する。
    ///
    /// # Errors
    /// 読み込みに失敗した場合、または不正な行がある場合はエラーを返す。
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| PipelineError::io(path, error))?;
        let mut corpus = Self::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let sentence: Sentence =
                serde_json::from_str(line).map_err(|error| PipelineError::ModelFormat {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    reason: error.to_string(),
                })?;
            corpus.push(sentence);
        }
        Ok(corpus)
    }

    /// 文書群をタガーで文分割してコーパスを構築する。
    ///
    /// 文書の各行を段落として扱い、段落単位でタガーに送る。段落は最大
    /// `concurrency` 並列で処理されるが、結果は元の順序で連結される。
    ///
    /// # Errors
    /// タガー呼び出しが一つでも失敗した場合はそのエラーを返す。
    pub async fn from_documents(
        documents: &[AuthorDocument],
        tagger: &dyn Tagger,
        concurrency: usize,
    ) -> Result<Self> {
        let paragraphs: Vec<(&str, &str)> = documents
            .iter()
            .flat_map(|doc| {
                doc.text
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(move |line| (doc.author.as_str(), line))
            })
            .collect();

        debug!(
            documents = documents.len(),
            paragraphs = paragraphs.len(),
            tagger = tagger.name(),
            "splitting paragraphs into sentences"
        );

        let split: Vec<(&str, Vec<String>)> = stream::iter(paragraphs)
            .map(|(author, paragraph)| async move {
                tagger
                    .split_sentences(paragraph)
                    .await
                    .map(|sentences| (author, sentences))
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        let mut corpus = Self::new();
        for (author, sentences) in split {
            corpus.extend_author(author, sentences);
        }

        for (author, count) in corpus.sentence_counts() {
            info!(author = %author, sentences = count, "loaded author sentences");
        }
        Ok(corpus)
    }
}

/// `<dir>/<author>/<file>` 形式のコーパスディレクトリを読み込む。
///
/// 著者ラベルはサブディレクトリ名。隠しファイルは無視し、著者・ファイルとも
/// 名前順に並べるので結果は決定的。
///
/// # Errors
/// ディレクトリやファイルの読み込みに失敗した場合は [`PipelineError::Io`] を返す。
pub async fn load_author_documents(dir: &Path) -> Result<Vec<AuthorDocument>> {
    let mut author_dirs = sorted_entries(dir).await?;
    author_dirs.retain(|path| path.is_dir());

    let mut documents = Vec::new();
    for author_dir in author_dirs {
        let Some(author) = author_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let author = author.to_string();
        for file in sorted_entries(&author_dir).await? {
            if !file.is_file() {
                continue;
            }
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|error| PipelineError::io(&file, error))?;
            documents.push(AuthorDocument {
                author: author.clone(),
                text,
            });
        }
    }

    if documents.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "no author documents found under {}",
            dir.display()
        )));
    }
    Ok(documents)
}

async fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|error| PipelineError::io(dir, error))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|error| PipelineError::io(dir, error))?
    {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

/// 文書をランダムに連結した多著者テキスト。
#[derive(Debug, Clone)]
pub struct InterleavedText {
    /// 連結順に並べた文書。
    pub documents: Vec<AuthorDocument>,
    /// 連結後のテキスト。
    pub text: String,
    /// 各文書の文字範囲（両端を含む）と著者。
    pub spans: Vec<AuthorSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorSpan {
    pub start: usize,
    pub end: usize,
    pub author: String,
}

impl InterleavedText {
    /// 人間が読むためのメタデータ（1行1文書、`start,end,author`）。
    #[must_use]
    pub fn metadata(&self) -> String {
        self.spans
            .iter()
            .map(|span| format!("{},{},{}\n", span.start, span.end, span.author))
            .collect()
    }
}

/// 文書の順序をランダムに入れ替えて一つの多著者テキストにする。
pub fn interleave_documents<R: Rng + ?Sized>(
    mut documents: Vec<AuthorDocument>,
    rng: &mut R,
) -> InterleavedText {
    documents.shuffle(rng);

    let mut text = String::new();
    let mut spans = Vec::with_capacity(documents.len());
    let mut offset = 0usize;
    for doc in &documents {
        let len = doc.text.chars().count();
        spans.push(AuthorSpan {
            start: offset,
            end: (offset + len).saturating_sub(1),
            author: doc.author.clone(),
        });
        text.push_str(&doc.text);
        offset += len;
    }

    InterleavedText {
        documents,
        text,
        spans,
    }
}
