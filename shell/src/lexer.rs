//! Splitting a command line into words.
//!
//! Words are separated by runs of spaces and nothing else: no quoting, no escapes, no
//! other whitespace. The token array and every word are separate blocks on the user heap,
//! each sized exactly for what it holds.

use crate::heap::{AllocError, Allocation, Heap};
use std::fmt;
use std::mem;
use std::ops::Deref;

const DELIMITER: char = ' ';

/// One word of a command line.
#[derive(Debug)]
pub struct Token {
    text: String,
    _block: Allocation,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Deref for Token {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl PartialEq<str> for Token {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The words of a command line, in order.
///
/// Dropping the array frees every word and then the array block itself.
#[derive(Debug)]
pub struct TokenArray {
    tokens: Vec<Token>,
    _block: Allocation,
}

impl TokenArray {
    pub fn as_slice(&self) -> &[Token] {
        &self.tokens
    }
}

impl Deref for TokenArray {
    type Target = [Token];

    fn deref(&self) -> &[Token] {
        &self.tokens
    }
}

fn words(line: &str) -> impl Iterator<Item = &str> {
    line.split(DELIMITER).filter(|word| !word.is_empty())
}

pub fn count_words(line: &str) -> usize {
    words(line).count()
}

/// Split `line` into words, charging the array and each word to `heap`.
///
/// An empty or all-space line yields an empty array. If any allocation fails, everything
/// obtained so far is released before the error is returned.
pub fn parse_command(line: &str, heap: &Heap) -> Result<TokenArray, AllocError> {
    let count = count_words(line);
    let block = heap.calloc(count, mem::size_of::<Token>())?;
    let mut tokens = Vec::new();
    tokens.try_reserve_exact(count)?;

    for word in words(line) {
        let word_block = heap.malloc(word.len())?;
        let mut text = String::new();
        text.try_reserve_exact(word.len())?;
        text.push_str(word);
        tokens.push(Token {
            text,
            _block: word_block,
        });
    }

    Ok(TokenArray {
        tokens,
        _block: block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(tokens: &TokenArray) -> Vec<&str> {
        tokens.iter().map(Token::as_str).collect()
    }

    #[test]
    fn test_empty_line_has_no_tokens() {
        let heap = Heap::unbounded();
        let tokens = parse_command("", &heap).unwrap();
        assert!(tokens.is_empty());
        let tokens = parse_command("     ", &heap).unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_runs_of_spaces_collapse() {
        let heap = Heap::unbounded();
        let tokens = parse_command("  a   b ", &heap).unwrap();
        assert_eq!(texts(&tokens), vec!["a", "b"]);
        assert_eq!(count_words("  a   b "), 2);
    }

    #[test]
    fn test_only_space_separates() {
        let heap = Heap::unbounded();
        let tokens = parse_command("a\tb  c\"d e\"", &heap).unwrap();
        assert_eq!(texts(&tokens), vec!["a\tb", "c\"d", "e\""]);
    }

    #[test]
    fn test_joined_tokens_match_collapsed_line() {
        let heap = Heap::unbounded();
        for line in ["cd /tmp", "   ./repeat    hello  ", "x", "a b c d e f"] {
            let tokens = parse_command(line, &heap).unwrap();
            let joined = texts(&tokens).join(" ");
            let expected = line.split_whitespace().collect::<Vec<_>>().join(" ");
            assert_eq!(joined, expected);
        }
    }

    #[test]
    fn test_blocks_are_exactly_sized() {
        let heap = Heap::unbounded();
        let tokens = parse_command("ab cde", &heap).unwrap();
        assert_eq!(heap.live_blocks(), 3);
        assert_eq!(heap.in_use(), 2 * mem::size_of::<Token>() + 5);
        drop(tokens);
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_allocation_failure_releases_earlier_words() {
        let heap = Heap::with_limit(3 * mem::size_of::<Token>() + "alpha".len() + 2);
        assert_eq!(
            parse_command("alpha beta gamma", &heap).unwrap_err(),
            AllocError
        );
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.in_use(), 0);
    }

    #[test]
    fn test_array_allocation_failure() {
        let heap = Heap::with_limit(0);
        assert!(parse_command("a", &heap).is_err());
        assert_eq!(heap.live_blocks(), 0);
    }
}
