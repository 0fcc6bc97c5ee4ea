//! Glob patterns compiled to case-insensitive regular expressions.

use regex::{Regex, RegexBuilder};

use crate::error::SearchError;

/// A compiled `*` / `?` / `[...]` pattern.
///
/// `is_match` tests a whole string (file names), `find_in` looks for the
/// pattern anywhere in a string (lines of text).
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    whole: Regex,
    partial: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self, SearchError> {
        let body = glob_to_regex(pattern);
        let build = |expr: String| {
            RegexBuilder::new(&expr)
                .case_insensitive(true)
                .build()
                .map_err(|source| SearchError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
        };

        Ok(Self {
            source: pattern.to_string(),
            whole: build(format!(r"\A(?:{body})\z"))?,
            partial: build(body)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the entire `text` matches the pattern.
    pub fn is_match(&self, text: &str) -> bool {
        self.whole.is_match(text)
    }

    /// Whether the pattern matches some part of `text`.
    pub fn find_in(&self, text: &str) -> bool {
        self.partial.is_match(text)
    }
}

/// Translate glob syntax into an unanchored regex body.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str("(?s:.*)"),
            '?' => out.push_str("(?s:.)"),
            '[' => match bracket_class(&chars[i + 1..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }
    out
}

/// Translate the inside of a bracket expression starting right after `[`.
///
/// Returns the regex class and the number of chars consumed including the
/// closing `]`, or `None` when the bracket is never closed.
fn bracket_class(rest: &[char]) -> Option<(String, usize)> {
    let negated = matches!(rest.first(), Some('!') | Some('^'));
    let j = usize::from(negated);

    // A `]` right after the opening (or the negation) is a literal member.
    let search_from = if rest.get(j) == Some(&']') { j + 1 } else { j };
    let close = search_from + rest[search_from..].iter().position(|&c| c == ']')?;
    let members = &rest[j..close];

    let mut class = String::from("[");
    if negated {
        class.push('^');
    }

    let mut k = 0;
    while k < members.len() {
        let c = members[k];
        if k + 2 < members.len() && members[k + 1] == '-' {
            let (lo, hi) = if c <= members[k + 2] {
                (c, members[k + 2])
            } else {
                (members[k + 2], c)
            };
            push_class_char(&mut class, lo);
            class.push('-');
            push_class_char(&mut class, hi);
            k += 3;
        } else {
            push_class_char(&mut class, c);
            k += 1;
        }
    }
    class.push(']');

    Some((class, close + 1))
}

fn push_class_char(class: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '^' | '-' | '&' | '~') {
        class.push('\\');
    }
    class.push(c);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> WildcardPattern {
        WildcardPattern::new(p).unwrap()
    }

    #[test]
    fn test_star_and_question() {
        let p = pattern("*.txt");
        assert!(p.is_match("notes.txt"));
        assert!(p.is_match("NOTES.TXT"));
        assert!(p.is_match(".txt"));
        assert!(!p.is_match("notes.txt.bak"));

        let p = pattern("file?.log");
        assert!(p.is_match("file1.log"));
        assert!(!p.is_match("file10.log"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = pattern("a+b(1).txt");
        assert!(p.is_match("a+b(1).txt"));
        assert!(!p.is_match("aab1.txt"));
        assert!(!pattern("a.c").is_match("abc"));
    }

    #[test]
    fn test_bracket_classes() {
        let p = pattern("img[0-9].png");
        assert!(p.is_match("img3.png"));
        assert!(!p.is_match("imgx.png"));

        let p = pattern("[!a]*");
        assert!(p.is_match("banana"));
        assert!(!p.is_match("apple"));

        let p = pattern("[^a]*");
        assert!(!p.is_match("Apple"));

        let p = pattern("[]x]");
        assert!(p.is_match("]"));
        assert!(p.is_match("x"));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let p = pattern("data[1");
        assert!(p.is_match("data[1"));
        assert!(!p.is_match("data1"));
    }

    #[test]
    fn test_find_in_is_unanchored() {
        let p = pattern("err*42");
        assert!(p.find_in("2024-01-01 ERROR code 42 happened"));
        assert!(!p.is_match("2024-01-01 ERROR code 42 happened"));
        assert!(!p.find_in("all good"));
    }
}
