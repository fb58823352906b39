//! Abbreviation matching for console keywords.
//!
//! Operators type `br int 0 en` for `break INTERNAL 0 enable`.  A prefix is
//! accepted only when it selects exactly one keyword; an exact match always
//! wins, so `VREG` never collides with a longer keyword that starts with it.
//! Comparison is case-insensitive.

use thiserror::Error;

/// Result of matching one typed word against a keyword set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordMatch<'a> {
    Unique(&'a str),
    NoMatch,
    Ambiguous { candidates: Vec<&'a str> },
}

/// Matches `part` against `words`.
pub fn match_keyword<'a>(part: &str, words: &[&'a str]) -> KeywordMatch<'a> {
    if part.is_empty() {
        return KeywordMatch::NoMatch;
    }
    if let Some(exact) = words.iter().copied().find(|w| w.eq_ignore_ascii_case(part)) {
        return KeywordMatch::Unique(exact);
    }

    let part = part.to_ascii_uppercase();
    let candidates: Vec<&'a str> = words
        .iter()
        .copied()
        .filter(|w| w.to_ascii_uppercase().starts_with(&part))
        .collect();
    match candidates.len() {
        0 => KeywordMatch::NoMatch,
        1 => KeywordMatch::Unique(candidates[0]),
        _ => KeywordMatch::Ambiguous { candidates },
    }
}

/// Why a typed word did not resolve to a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeywordError {
    #[error("unknown {what}: {part}")]
    Unknown { what: &'static str, part: String },

    #[error("ambiguous {what} '{part}': could be {}", .candidates.join(", "))]
    Ambiguous {
        what: &'static str,
        part: String,
        candidates: Vec<String>,
    },
}

/// Resolves `part` to one of `options`, each named by `name`.
///
/// # Errors
///
/// Returns a [`KeywordError`] naming `what` when nothing or more than one
/// option matches.
pub fn resolve<T: Copy>(
    what: &'static str,
    part: &str,
    options: &[T],
    name: impl Fn(T) -> &'static str,
) -> Result<T, KeywordError> {
    let names: Vec<&'static str> = options.iter().map(|o| name(*o)).collect();
    let unknown = || KeywordError::Unknown {
        what,
        part: part.to_string(),
    };
    match match_keyword(part, &names) {
        KeywordMatch::Unique(word) => options
            .iter()
            .copied()
            .find(|o| name(*o) == word)
            .ok_or_else(unknown),
        KeywordMatch::NoMatch => Err(unknown()),
        KeywordMatch::Ambiguous { candidates } => Err(KeywordError::Ambiguous {
            what,
            part: part.to_string(),
            candidates: candidates.into_iter().map(str::to_string).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edb_core::protocol::{BreakpointType, Channel};

    const WORDS: [&str; 4] = ["PASSIVE", "INTERNAL", "EXTERNAL", "COMBINED"];

    #[test]
    fn test_unique_prefix_matches() {
        assert_eq!(match_keyword("INT", &WORDS), KeywordMatch::Unique("INTERNAL"));
        assert_eq!(match_keyword("c", &WORDS), KeywordMatch::Unique("COMBINED"));
    }

    #[test]
    fn test_unknown_word_is_no_match() {
        assert_eq!(match_keyword("X", &WORDS), KeywordMatch::NoMatch);
        assert_eq!(match_keyword("", &WORDS), KeywordMatch::NoMatch);
    }

    #[test]
    fn test_shared_prefix_is_ambiguous_never_first_candidate() {
        let words = ["VCAP", "VBOOST", "VREG", "VRECT", "VINJ"];

        let result = match_keyword("VRE", &words);

        assert_eq!(
            result,
            KeywordMatch::Ambiguous {
                candidates: vec!["VREG", "VRECT"]
            }
        );
    }

    #[test]
    fn test_exact_match_wins_over_longer_keywords() {
        let words = ["wait", "waitall"];
        assert_eq!(match_keyword("WAIT", &words), KeywordMatch::Unique("wait"));
        assert!(matches!(
            match_keyword("wai", &words),
            KeywordMatch::Ambiguous { .. }
        ));
    }

    #[test]
    fn test_resolve_maps_back_to_enum_value() {
        let kind = resolve("breakpoint type", "ext", &BreakpointType::ALL, BreakpointType::name);
        assert_eq!(kind, Ok(BreakpointType::External));
    }

    #[test]
    fn test_resolve_error_names_candidates() {
        let err = resolve("channel", "vr", &Channel::ALL, Channel::name).unwrap_err();

        assert!(matches!(
            &err,
            KeywordError::Ambiguous { candidates, .. }
                if candidates == &["VREG".to_string(), "VRECT".to_string()]
        ));
        assert_eq!(
            err.to_string(),
            "ambiguous channel 'vr': could be VREG, VRECT"
        );
    }

    #[test]
    fn test_resolve_unknown_word_is_error_not_guess() {
        let err = resolve("channel", "vx", &Channel::ALL, Channel::name).unwrap_err();

        assert_eq!(
            err,
            KeywordError::Unknown {
                what: "channel",
                part: "vx".to_string()
            }
        );
        assert_eq!(err.to_string(), "unknown channel: vx");
    }
}
