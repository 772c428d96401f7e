//! Pattern: a fixed-length template over [`PatternElem`] that projects an
//! n-gram window into a counted key (spec §4.2).

use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GlamtkError;
use crate::markers::{POS_SEPARATOR, SKIP_MARKER, WSKIP_MARKER};

/// One slot of a [`Pattern`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternElem {
    /// Counted slot: contributes the word at this position to the key.
    Cnt,
    /// Unconditional skip: contributes the literal skip marker.
    Skp,
    /// Weighted skip: contributes the literal weighted-skip marker. Marks a
    /// pattern as a continuation pattern.
    Wskp,
    /// Part-of-speech: contributes the tag at this position.
    Pos,
    /// Delete: the slot contributes nothing to the key.
    Del,
    /// Wildcard: behaves like `Cnt` when building keys, but forces
    /// bucket-0 placement regardless of position (§9 open question
    /// resolution for the `x` label).
    Wild,
}

impl PatternElem {
    fn to_char(self) -> char {
        match self {
            PatternElem::Cnt => 'c',
            PatternElem::Skp => 's',
            PatternElem::Wskp => 'w',
            PatternElem::Pos => 'p',
            PatternElem::Del => 'd',
            PatternElem::Wild => 'x',
        }
    }

    fn from_char(c: char) -> Option<PatternElem> {
        match c {
            'c' => Some(PatternElem::Cnt),
            's' => Some(PatternElem::Skp),
            'w' => Some(PatternElem::Wskp),
            'p' => Some(PatternElem::Pos),
            'd' => Some(PatternElem::Del),
            'x' => Some(PatternElem::Wild),
            _ => None,
        }
    }
}

/// A token in the sliding window the sequencer feeds to [`Pattern::apply`].
#[derive(Copy, Clone, Debug)]
pub struct Token<'a> {
    pub word: &'a str,
    pub pos: Option<&'a str>,
}

impl<'a> Token<'a> {
    pub fn word(word: &'a str) -> Self {
        Token { word, pos: None }
    }
}

/// An ordered, non-empty sequence of [`PatternElem`] (spec §3/§4.2).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    elems: Vec<PatternElem>,
}

impl Pattern {
    pub fn new(elems: Vec<PatternElem>) -> Result<Pattern, GlamtkError> {
        if elems.is_empty() {
            return Err(GlamtkError::invariant("the empty pattern is forbidden"));
        }
        Ok(Pattern { elems })
    }

    /// Parse a fixed-length label over `{c,s,w,p,d,x}`, e.g. `"cc"`, `"wc"`.
    pub fn parse(label: &str) -> Result<Pattern, GlamtkError> {
        if label.is_empty() {
            return Err(GlamtkError::invariant("the empty pattern is forbidden"));
        }
        let elems = label
            .chars()
            .map(|c| {
                PatternElem::from_char(c)
                    .ok_or_else(|| GlamtkError::invariant(format!("unknown pattern element '{}'", c)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Pattern::new(elems)
    }

    pub fn label(&self) -> String {
        self.elems.iter().map(|e| e.to_char()).collect()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn element_at(&self, i: usize) -> PatternElem {
        self.elems[i]
    }

    /// All slots are `Cnt`/`Skp` (no continuation marker).
    pub fn is_absolute(&self) -> bool {
        !self.is_continuation()
    }

    /// Contains at least one `Wskp` slot.
    pub fn is_continuation(&self) -> bool {
        self.elems.iter().any(|e| *e == PatternElem::Wskp)
    }

    /// True if any slot is the full-vocabulary wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.elems.iter().any(|e| *e == PatternElem::Wild)
    }

    /// Index of the first `Cnt` slot (the bucket-selection rule in spec
    /// §4.3 step 3). `Wild` does not count, per the §9 resolution: a
    /// wildcard pattern always uses bucket 0.
    pub fn first_cnt_index(&self) -> Option<usize> {
        if self.has_wildcard() {
            return None;
        }
        self.elems.iter().position(|e| *e == PatternElem::Cnt)
    }

    /// Project a window of tokens (length must equal `self.len()`) into a
    /// key string. Slots join with a single space, which cannot appear
    /// inside a token (tokens are whitespace-split).
    pub fn apply(&self, window: &[Token<'_>]) -> Result<String, GlamtkError> {
        if window.len() != self.elems.len() {
            return Err(GlamtkError::invariant(format!(
                "window length {} does not match pattern length {}",
                window.len(),
                self.elems.len()
            )));
        }
        let mut parts = Vec::with_capacity(self.elems.len());
        for (elem, tok) in self.elems.iter().zip(window) {
            match elem {
                PatternElem::Cnt | PatternElem::Wild => parts.push(tok.word.to_string()),
                PatternElem::Skp => parts.push(SKIP_MARKER.to_string()),
                PatternElem::Wskp => parts.push(WSKIP_MARKER.to_string()),
                PatternElem::Pos => {
                    let pos = tok.pos.ok_or_else(|| {
                        GlamtkError::invariant("POS slot requires a tagged token")
                    })?;
                    parts.push(pos.to_string());
                }
                PatternElem::Del => {}
            }
        }
        Ok(parts.join(" "))
    }

    /// Utility from spec §4.2: replace every `Wskp` with `Skp`. Used by the
    /// pipeline driver to compute the backoff-denominator absolute pattern
    /// an estimator needs alongside a continuation pattern.
    pub fn derive_absolute(&self) -> Pattern {
        let elems = self
            .elems
            .iter()
            .map(|e| if *e == PatternElem::Wskp { PatternElem::Skp } else { *e })
            .collect();
        Pattern { elems }
    }

    /// Replace every `Wskp` with `Cnt`, recovering the literal all-counted
    /// pattern a continuation pattern was derived from. Not one of the two
    /// named utilities in spec §4.2, but required to implement the §4.4
    /// aggregation algorithm: the "prior pass over the corresponding
    /// absolute store" in scenario 2 reads counts keyed by the literal
    /// words, which only this projection recovers (`derive_absolute`
    /// collapses them to `Skp` and loses witness identity).
    pub fn continuation_source(&self) -> Pattern {
        let elems = self
            .elems
            .iter()
            .map(|e| if *e == PatternElem::Wskp { PatternElem::Cnt } else { *e })
            .collect();
        Pattern { elems }
    }

    /// Utility from spec §4.2: the continuation patterns needed to estimate
    /// `self` under Kneser-Ney. For a pattern of length L this is, for each
    /// split point k in 1..L, the pattern with a `Wskp` run of length k
    /// followed by `self`'s own trailing L-k slots.
    pub fn derive_continuation_family(&self) -> Vec<Pattern> {
        let l = self.elems.len();
        let mut out = Vec::with_capacity(l.saturating_sub(1));
        for k in 1..l {
            let mut elems = vec![PatternElem::Wskp; k];
            elems.extend_from_slice(&self.elems[k..]);
            out.push(Pattern { elems });
        }
        out
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<&str> for Pattern {
    type Error = GlamtkError;

    fn try_from(label: &str) -> Result<Pattern, GlamtkError> {
        Pattern::parse(label)
    }
}

/// Splits a `word/TAG` query-file or corpus token on [`POS_SEPARATOR`].
pub fn split_pos(raw: &str) -> (&str, Option<&str>) {
    match raw.rfind(POS_SEPARATOR) {
        Some(idx) => (&raw[..idx], Some(&raw[idx + 1..])),
        None => (raw, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_labels_round_trip() {
        let p = Pattern::parse("wc").unwrap();
        assert_eq!(p.label(), "wc");
        assert_eq!(p.len(), 2);
        assert!(p.is_continuation());
        assert!(!p.is_absolute());
    }

    #[test]
    fn empty_pattern_rejected() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::new(vec![]).is_err());
    }

    #[test]
    fn apply_builds_key_with_markers() {
        let p = Pattern::parse("cc").unwrap();
        let window = [Token::word("a"), Token::word("b")];
        assert_eq!(p.apply(&window).unwrap(), "a b");

        let p = Pattern::parse("wc").unwrap();
        assert_eq!(p.apply(&window).unwrap(), "% b");

        let p = Pattern::parse("sc").unwrap();
        assert_eq!(p.apply(&window).unwrap(), "_ b");
    }

    #[test]
    fn del_slot_drops_contribution() {
        let p = Pattern::parse("cdc").unwrap();
        let window = [Token::word("a"), Token::word("x"), Token::word("b")];
        assert_eq!(p.apply(&window).unwrap(), "a b");
    }

    #[test]
    fn derive_continuation_family_matches_scenario() {
        let base = Pattern::parse("cc").unwrap();
        let family = base.derive_continuation_family();
        assert_eq!(family.len(), 1);
        assert_eq!(family[0].label(), "wc");
    }

    #[test]
    fn continuation_source_recovers_literal_pattern() {
        let cont = Pattern::parse("wc").unwrap();
        assert_eq!(cont.continuation_source().label(), "cc");
        assert_eq!(cont.derive_absolute().label(), "sc");
    }

    #[test]
    fn first_cnt_index_skips_wildcard() {
        let p = Pattern::parse("xc").unwrap();
        assert_eq!(p.first_cnt_index(), None);
        let p = Pattern::parse("sc").unwrap();
        assert_eq!(p.first_cnt_index(), Some(1));
    }
}
