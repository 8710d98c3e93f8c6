//! Ordered regex dispatch: first full match wins. This is the declarative
//! lexical front-end both interpreters are built on, replacing the
//! source's `getattr`-based dispatch (`_match_<pattern-name>`) with an
//! explicit `match` inside each [`LineHandler`] implementation, since Rust
//! has no runtime method lookup by string name.

use regex::{Captures, Regex};

use crate::error::MatchError;

/// Implemented by interpreter state machines. `handle` is called with the
/// name of the pattern that matched and its captures; implementations are
/// expected to `match` on `pattern` exhaustively over the names they
/// declared in their [`MultiMatcher`].
pub trait LineHandler {
    fn handle(&mut self, pattern: &str, captures: &Captures) -> Result<(), MatchError>;

    /// Whether this handler supports the given pattern name. Defaults to
    /// `true`; a handler that only implements a subset of a shared grammar
    /// may override this to get a proper `NoHandler` error instead of a
    /// silent no-op.
    fn handles(&self, _pattern: &str) -> bool {
        true
    }
}

pub struct MultiMatcher {
    patterns: Vec<(&'static str, Regex)>,
}

impl MultiMatcher {
    /// Builds a matcher from `(name, pattern)` pairs in declaration order.
    /// Patterns are anchored with `^...$` automatically so that `fullmatch`
    /// semantics (the whole line must match) hold without repeating anchors
    /// at every call site.
    pub fn new(patterns: &[(&'static str, &str)]) -> Self {
        let compiled = patterns
            .iter()
            .map(|(name, pattern)| {
                let anchored = format!("^(?:{pattern})$");
                let regex = Regex::new(&anchored)
                    .unwrap_or_else(|err| panic!("invalid pattern {name:?}: {err}"));
                (*name, regex)
            })
            .collect();
        Self { patterns: compiled }
    }

    /// Tries every pattern in order against `line`; on the first full match,
    /// dispatches to `handler.handle`.
    pub fn fullmatch<H: LineHandler>(&self, line: &str, handler: &mut H) -> Result<(), MatchError> {
        for (name, regex) in &self.patterns {
            if let Some(captures) = regex.captures(line) {
                if !handler.handles(name) {
                    return Err(MatchError::NoHandler((*name).to_string()));
                }
                return handler.handle(name, &captures).map_err(MatchError::from);
            }
        }
        Err(MatchError::NoPatternMatched(line.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandler {
        seen: Vec<String>,
    }

    impl LineHandler for RecordingHandler {
        fn handle(&mut self, pattern: &str, captures: &Captures) -> Result<(), MatchError> {
            self.seen.push(format!(
                "{pattern}:{}",
                captures.get(1).map(|m| m.as_str()).unwrap_or("")
            ));
            Ok(())
        }
    }

    #[test]
    fn first_match_wins_in_declaration_order() {
        // Both patterns would match "abc"; the first declared must win.
        let matcher = MultiMatcher::new(&[("first", r"(\w+)"), ("second", r"abc")]);
        let mut handler = RecordingHandler { seen: Vec::new() };
        matcher.fullmatch("abc", &mut handler).unwrap();
        assert_eq!(handler.seen, vec!["first:abc"]);
    }

    #[test]
    fn no_pattern_matched_is_reported() {
        let matcher = MultiMatcher::new(&[("digits", r"\d+")]);
        let mut handler = RecordingHandler { seen: Vec::new() };
        let err = matcher.fullmatch("nope", &mut handler).unwrap_err();
        assert!(matches!(err, MatchError::NoPatternMatched(_)));
    }

    #[test]
    fn partial_matches_are_rejected_by_anchoring() {
        let matcher = MultiMatcher::new(&[("exact", r"M02\*")]);
        let mut handler = RecordingHandler { seen: Vec::new() };
        assert!(matcher.fullmatch("XM02*Y", &mut handler).is_err());
        assert!(matcher.fullmatch("M02*", &mut handler).is_ok());
    }
}
