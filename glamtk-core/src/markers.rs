//! Reserved symbols (spec §6). Producer and consumer must agree on these
//! constants; an implementer may choose different strings but must document
//! and forbid them in input, which is what we do here.

use crate::error::GlamtkError;

/// Marks a literal, unconditional skip slot (`PatternElem::Skp`).
pub const SKIP_MARKER: &str = "_";

/// Marks a weighted-skip slot (`PatternElem::Wskp`), used for continuation
/// patterns.
pub const WSKIP_MARKER: &str = "%";

/// Separates a word from its part-of-speech tag.
pub const POS_SEPARATOR: char = '/';

/// Sentence-boundary tokens inserted when `sentence_markers` is enabled.
pub const SENTENCE_START: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";

/// Returns `Err` citing the offending symbol if `token` contains a reserved
/// marker. `line` is 1-indexed, matching the file-format error contract.
pub fn check_reserved(path: &std::path::Path, line: usize, token: &str) -> Result<(), GlamtkError> {
    if token.contains(SKIP_MARKER) {
        return Err(GlamtkError::file_format(
            path,
            line,
            format!("token '{}' contains the reserved skip marker '{}'", token, SKIP_MARKER),
        ));
    }
    if token.contains(WSKIP_MARKER) {
        return Err(GlamtkError::file_format(
            path,
            line,
            format!(
                "token '{}' contains the reserved weighted-skip marker '{}'",
                token, WSKIP_MARKER
            ),
        ));
    }
    if token.contains(POS_SEPARATOR) {
        return Err(GlamtkError::file_format(
            path,
            line,
            format!(
                "token '{}' contains the reserved POS separator '{}'",
                token, POS_SEPARATOR
            ),
        ));
    }
    if token.is_empty() {
        return Err(GlamtkError::file_format(path, line, "empty token"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn rejects_skip_marker() {
        let err = check_reserved(Path::new("corpus.txt"), 3, "a_b").unwrap_err();
        match err {
            GlamtkError::FileFormat { line, .. } => assert_eq!(line, 3),
            _ => panic!("expected FileFormat error"),
        }
    }

    #[test]
    fn accepts_plain_word() {
        assert!(check_reserved(Path::new("corpus.txt"), 1, "hello").is_ok());
    }
}
