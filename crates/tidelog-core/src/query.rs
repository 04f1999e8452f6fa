//! The tokenized search query language (§4.6). Parsing is shared here so
//! that `tidelog-store` (which owns the actual SQL translation) and any
//! other consumer agree on tokenization, atom kinds, and the lenient date
//! grammar used by `before:`/`after:`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown search atom: {0}")]
    UnknownAtom(String),
    #[error("could not parse time value: {0}")]
    BadTime(String),
    #[error("could not parse exit_code value: {0}")]
    BadExitCode(String),
}

/// One parsed search token, already split into its field kind and negation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub negate: bool,
    pub kind: AtomKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomKind {
    /// A bare token: matches if `command`, `hostname`, or
    /// `current_working_directory` contains it as a substring.
    Plain(String),
    User(String),
    Host(String),
    Cwd(String),
    ExitCode(i32),
    /// Seconds since epoch; matches `start_time <` this value.
    Before(i64),
    /// Seconds since epoch; matches `start_time >` this value.
    After(i64),
    StartTime(i64),
    EndTime(i64),
    Command(String),
    /// `field:value` where `field` is not one of the recognized fixed
    /// fields. The caller (the store) is responsible for validating this
    /// against the set of known custom column names and raising
    /// [`QueryError::UnknownAtom`] if it is not one.
    Custom { name: String, value: String },
}

/// Splits `query` on unescaped spaces. A backslash escapes the character
/// that follows it, but the escape sequence is *kept raw* in the returned
/// tokens (not yet resolved) — atom-splitting needs to tell an escaped `:`
/// apart from an unescaped one, which would be impossible once both have
/// collapsed to the same plain `:` character. Callers unescape via
/// [`unescape`] once they know which half of the token a character landed
/// in.
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = query.chars().peekable();
    let mut has_content = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_content = true;
                }
            }
            ' ' => {
                if has_content || !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                    has_content = false;
                }
            }
            other => {
                current.push(other);
                has_content = true;
            }
        }
    }
    if has_content || !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Resolves backslash escapes in a raw token half (as produced by
/// [`tokenize`]/[`split_field`]) into its literal text.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Finds the first *unescaped* `:` in a raw token and splits there. `token`
/// still has its backslash escapes intact (per [`tokenize`]), so a `\:`
/// is skipped rather than treated as a field separator — an escaped colon
/// stays part of a plain substring token instead of atomizing it.
fn split_field(token: &str) -> Option<(&str, &str)> {
    let bytes = token.as_bytes();
    let mut i = 0;
    let mut escaped = false;
    while i < bytes.len() {
        match bytes[i] {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b':' => return Some((&token[..i], &token[i + 1..])),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parses a full query string into its ordered list of atoms.
pub fn parse_query(query: &str) -> Result<Vec<Atom>, QueryError> {
    tokenize(query)
        .into_iter()
        .filter(|t| t != "-")
        .map(|token| parse_atom(&token))
        .collect()
}

fn parse_atom(token: &str) -> Result<Atom, QueryError> {
    let (negate, rest) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };

    let kind = match split_field(rest) {
        None => AtomKind::Plain(unescape(rest)),
        Some((field, value)) => {
            let field = unescape(field);
            let value = unescape(value);
            match field.as_str() {
                "user" => AtomKind::User(value),
                "host" | "hostname" => AtomKind::Host(value),
                "cwd" => AtomKind::Cwd(value),
                "exit_code" => AtomKind::ExitCode(
                    value
                        .parse()
                        .map_err(|_| QueryError::BadExitCode(value.clone()))?,
                ),
                "before" => AtomKind::Before(parse_lenient_time(&value)?),
                "after" => AtomKind::After(parse_lenient_time(&value)?),
                "start_time" => AtomKind::StartTime(parse_lenient_time(&value)?),
                "end_time" => AtomKind::EndTime(parse_lenient_time(&value)?),
                "command" => AtomKind::Command(value),
                other => AtomKind::Custom { name: other.to_string(), value },
            }
        }
    };

    Ok(Atom { negate, kind })
}

/// Generously parses a time value: RFC3339, `YYYY-MM-DD`, a bare Unix
/// epoch, with `_` accepted in place of a space (since spaces require
/// escaping inside an atom).
pub fn parse_lenient_time(raw: &str) -> Result<i64, QueryError> {
    let normalized = raw.replace('_', " ");

    if let Ok(epoch) = normalized.parse::<i64>() {
        return Ok(epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.timestamp());
    }

    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        let dt = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| QueryError::BadTime(raw.to_string()))?;
        return Ok(Utc.from_utc_datetime(&dt).timestamp());
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    Err(QueryError::BadTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_has_no_atoms() {
        assert_eq!(parse_query("").unwrap(), vec![]);
    }

    #[test]
    fn tokenizes_on_unescaped_spaces() {
        assert_eq!(tokenize("ls cwd:/tmp exit_code:0"), vec!["ls", "cwd:/tmp", "exit_code:0"]);
    }

    #[test]
    fn backslash_escapes_space_but_keeps_colon_raw_until_atomization() {
        // tokenize only needs to agree on *word boundaries*; it leaves escape
        // sequences raw so split_field can still tell an escaped colon from
        // an unescaped one. parse_query is where the literal text comes out.
        assert_eq!(tokenize(r"foo\ bar"), vec![r"foo\ bar"]);
        assert_eq!(parse_query(r"foo\ bar").unwrap(), vec![Atom { negate: false, kind: AtomKind::Plain("foo bar".into()) }]);
    }

    #[test]
    fn escaped_colon_stays_a_plain_substring_not_a_field_atom() {
        let atoms = parse_query(r"foo\:bar").unwrap();
        assert_eq!(atoms, vec![Atom { negate: false, kind: AtomKind::Plain("foo:bar".into()) }]);
    }

    #[test]
    fn escaped_colon_inside_a_field_value_stays_literal() {
        let atoms = parse_query(r"cwd:/path\:with\:colons").unwrap();
        assert_eq!(
            atoms,
            vec![Atom { negate: false, kind: AtomKind::Cwd("/path:with:colons".into()) }]
        );
    }

    #[test]
    fn negation_prefix_is_parsed() {
        let atoms = parse_query("-foo").unwrap();
        assert_eq!(atoms, vec![Atom { negate: true, kind: AtomKind::Plain("foo".into()) }]);
    }

    #[test]
    fn bare_dash_is_ignored() {
        assert_eq!(parse_query("ls -").unwrap().len(), 1);
    }

    #[test]
    fn unrecognized_field_becomes_custom_atom() {
        let atoms = parse_query("branch:main").unwrap();
        assert_eq!(
            atoms,
            vec![Atom {
                negate: false,
                kind: AtomKind::Custom { name: "branch".into(), value: "main".into() }
            }]
        );
    }

    #[test]
    fn exit_code_must_be_an_integer() {
        assert!(parse_query("exit_code:nope").is_err());
    }

    #[test]
    fn lenient_time_accepts_several_formats() {
        assert!(parse_lenient_time("1700000000").is_ok());
        assert!(parse_lenient_time("2023-11-14").is_ok());
        assert!(parse_lenient_time("2023-11-14T10:00:00Z").is_ok());
        assert!(parse_lenient_time("2023-11-14_10:00:00").is_ok());
        assert!(parse_lenient_time("not a time").is_err());
    }

    #[test]
    fn full_scenario_query_parses() {
        let atoms = parse_query("ls cwd:/tmp exit_code:0 -foo").unwrap();
        assert_eq!(atoms.len(), 4);
        assert_eq!(atoms[3].negate, true);
    }
}
