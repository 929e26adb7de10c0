//! 重なりのあるスライディングウィンドウによる n-gram 生成。
//!
//! 長さ `L` の列と幅 `n` に対して `max(0, L - n + 1)` 個の窓を生成する。
//! 幅 0 は窓を生成しない。

/// 長さ `len` の列に対する幅 `n` の窓の数。
#[must_use]
pub fn window_count(len: usize, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    len.saturating_sub(n - 1)
}

/// トークン列の n-gram。各窓のトークンを半角スペースで連結する。
#[must_use]
pub fn token_ngrams(tokens: &[String], n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    tokens.windows(n).map(|window| window.join(" ")).collect()
}

/// 生テキストの文字 n-gram（Unicode スカラー値単位）。
///
/// 改行はモデルファイルの行区切りと衝突するため、窓を作る前に空白へ置き換える。
#[must_use]
pub fn char_ngrams(text: &str, n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    chars
        .windows(n)
        .map(|window| window.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn char_four_grams_of_abcde() {
        assert_eq!(char_ngrams("abcde", 4), vec!["abcd", "bcde"]);
    }

    #[test]
    fn token_bigrams_are_space_joined() {
        let tags: Vec<String> = ["NN", "VB", "DT"].iter().map(ToString::to_string).collect();
        assert_eq!(token_ngrams(&tags, 2), vec!["NN VB", "VB DT"]);
    }

    #[test]
    fn sequence_shorter_than_width_has_no_windows() {
        assert!(char_ngrams("abc", 4).is_empty());
        assert!(token_ngrams(&[], 1).is_empty());
        assert_eq!(window_count(3, 4), 0);
    }

    #[test]
    fn char_ngrams_count_multibyte_as_single_chars() {
        assert_eq!(char_ngrams("añob", 2), vec!["añ", "ño", "ob"]);
    }

    #[test]
    fn newlines_become_spaces() {
        assert_eq!(char_ngrams("a\nb", 3), vec!["a b"]);
    }

    proptest! {
        #[test]
        fn window_count_law(text in "\\PC{0,30}", n in 1usize..6) {
            let len = text.chars().count();
            let expected = if len + 1 > n { len + 1 - n } else { 0 };
            prop_assert_eq!(window_count(len, n), expected);
            prop_assert_eq!(char_ngrams(&text, n).len(), expected);
        }

        #[test]
        fn token_window_count_law(tokens in proptest::collection::vec("[a-z]{1,4}", 0..20), n in 1usize..5) {
            prop_assert_eq!(token_ngrams(&tokens, n).len(), window_count(tokens.len(), n));
        }
    }
}
