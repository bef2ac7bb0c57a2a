//! Token counting traits and utilities

pub mod tiktoken;

/// Trait for counting tokens in a string.
pub trait CountToken {
    fn count_token(&self, string: &str) -> usize;
}

/// Blanket impl of CountToken for Fn(&str) -> usize.
impl<F> CountToken for F where F: Fn(&str) -> usize {
    fn count_token(&self, string: &str) -> usize {
        self(string)
    }
}

/// Count the number of tokens in a string by the number of characters.
#[inline]
pub fn count_tokens_by_chars(string: &str) -> usize {
    string.chars().count()
}

/// The longest prefix of `text` (cut at a char boundary) that counts at most `budget` tokens.
///
/// Assumes the count grows with the prefix length, which holds for character counts and BPE tokenizers alike.
///
/// ```
/// use pipeprompt::utils::token::{count_tokens_by_chars, truncate_to_tokens};
/// assert_eq!(truncate_to_tokens("héllo world", 5, &count_tokens_by_chars), "héllo");
/// assert_eq!(truncate_to_tokens("short", 100, &count_tokens_by_chars), "short");
/// ```
pub fn truncate_to_tokens<'a>(text: &'a str, budget: usize, counter: &impl CountToken) -> &'a str {
    if counter.count_token(text) <= budget {
        return text;
    }
    let boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
    // largest cut such that text[..cut] fits; boundaries[0] == 0 always fits
    let (mut lo, mut hi) = (0, boundaries.len());
    while lo + 1 < hi {
        let mid = (lo + hi) / 2;
        if counter.count_token(&text[..boundaries[mid]]) <= budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    &text[..boundaries[lo]]
}

#[cfg(test)]
mod test_token {
    use super::{count_tokens_by_chars, truncate_to_tokens, CountToken};

    #[test]
    fn test_str_len_impl() {
        let counter = str::len;
        let size = counter.count_token("");
        assert_eq!(0, size);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_to_tokens("", 0, &count_tokens_by_chars), "");
        assert_eq!(truncate_to_tokens("abc", 0, &count_tokens_by_chars), "");
        assert_eq!(truncate_to_tokens("abcdef", 3, &count_tokens_by_chars), "abc");
        assert_eq!(truncate_to_tokens("日本語テキスト", 3, &count_tokens_by_chars), "日本語");
        let words = |s: &str| s.split_whitespace().count();
        assert_eq!(truncate_to_tokens("one two three four", 2, &words).trim_end(), "one two");
    }
}
