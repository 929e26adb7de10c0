//! 文列を固定長チャンクに分割する。
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::corpus::Sentence;
use crate::error::{PipelineError, Result};

/// 連続する `chunk_size` 文（最後のチャンクのみそれ以下）のまとまり。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 文を半角スペース1つで連結したテキスト。
    pub text: String,
    /// 構成文の著者ラベル（文の順序どおり）。
    pub authors: Vec<String>,
}

impl Chunk {
    /// 構成文で最も多い著者。同数の場合は先に現れた著者。
    #[must_use]
    pub fn majority_author(&self) -> Option<&str> {
        majority(self.authors.iter().map(String::as_str))
    }

    #[must_use]
    pub fn sentence_count(&self) -> usize {
        self.authors.len()
    }
}

/// 出現回数が最大の要素を返す。同数なら初出が早いものを優先する。
pub(crate) fn majority<T, I>(items: I) -> Option<T>
where
    T: std::hash::Hash + Eq + Copy,
    I: IntoIterator<Item = T>,
{
    let mut order: Vec<T> = Vec::new();
    let mut counts: FxHashMap<T, usize> = FxHashMap::default();
    for item in items {
        let count = counts.entry(item).or_insert(0);
        if *count == 0 {
            order.push(item);
        }
        *count += 1;
    }

    let mut best: Option<(T, usize)> = None;
    for item in order {
        let count = counts[&item];
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((item, count)),
        }
    }
    best.map(|(item, _)| item)
}

/// 文列を入力順のまま `chunk_size` 文ずつに分割する。
///
/// # Errors
/// `chunk_size` が 0 の場合は [`PipelineError::Configuration`] を返す。
pub fn chunk(sentences: &[Sentence], chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(PipelineError::Configuration(
            "chunk size must be greater than 0".to_string(),
        ));
    }

    Ok(sentences
        .chunks(chunk_size)
        .map(|group| Chunk {
            text: group
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            authors: group.iter().map(|s| s.author.clone()).collect(),
        })
        .collect())
}
