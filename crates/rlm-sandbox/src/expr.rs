//! First-party reader for the sandbox's fixed five-verb grammar.
//!
//! Per the Design Note "Embedded scripting", option (b): no general
//! interpreter is embedded, only calls to a closed helper menu. One
//! statement per line: `[name =] helper(arg, arg, ...)`. Arguments are
//! string literals, integers, or bare identifiers referring to a
//! previously-bound variable. A five-verb grammar does not justify an
//! external parser dependency, so this reader is hand-written.

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Ref(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub binding: Option<String>,
    pub helper: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty statement")]
    Empty,
    #[error("malformed call: {0}")]
    MalformedCall(String),
    #[error("unterminated string literal in: {0}")]
    UnterminatedString(String),
}

/// Parse one line of sandbox code into a `Statement`. Blank lines and lines
/// starting with `#` are skipped by the caller, not here.
pub fn parse_statement(line: &str) -> Result<Statement, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let (binding, rest) = match line.split_once('=') {
        // Guard against `==` inside calls and against an arg that merely
        // contains `=` (e.g. inside a string) by requiring the left side to
        // look like a bare identifier.
        Some((lhs, rhs)) if is_identifier(lhs.trim()) && !rhs.trim_start().starts_with('=') => {
            (Some(lhs.trim().to_string()), rhs.trim())
        }
        _ => (None, line),
    };

    let open = rest.find('(').ok_or_else(|| ParseError::MalformedCall(line.to_string()))?;
    if !rest.ends_with(')') {
        return Err(ParseError::MalformedCall(line.to_string()));
    }
    let helper = rest[..open].trim().to_string();
    if !is_identifier(&helper) {
        return Err(ParseError::MalformedCall(line.to_string()));
    }
    let args_src = &rest[open + 1..rest.len() - 1];
    let args = parse_args(args_src)?;

    Ok(Statement { binding, helper, args })
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_args(src: &str) -> Result<Vec<Arg>, ParseError> {
    let src = src.trim();
    if src.is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        // skip leading whitespace for this token
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] == b'"' {
            let start = i + 1;
            let mut end = start;
            let mut closed = false;
            let mut escaped = false;
            while end < bytes.len() {
                if escaped {
                    escaped = false;
                } else if bytes[end] == b'\\' {
                    escaped = true;
                } else if bytes[end] == b'"' {
                    closed = true;
                    break;
                }
                end += 1;
            }
            if !closed {
                return Err(ParseError::UnterminatedString(src.to_string()));
            }
            let raw = &src[start..end];
            args.push(Arg::Str(unescape(raw)));
            i = end + 1;
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            let token = src[start..i].trim();
            if let Ok(n) = token.parse::<i64>() {
                args.push(Arg::Int(n));
            } else {
                args.push(Arg::Ref(token.to_string()));
            }
        }
        // skip to next comma
        while i < bytes.len() && bytes[i] != b',' {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b',' {
            i += 1;
        }
    }

    Ok(args)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bound_call_with_string_and_int_args() {
        let stmt = parse_statement(r#"text = peek("README.md", 1, 50)"#).unwrap();
        assert_eq!(stmt.binding.as_deref(), Some("text"));
        assert_eq!(stmt.helper, "peek");
        assert_eq!(
            stmt.args,
            vec![Arg::Str("README.md".to_string()), Arg::Int(1), Arg::Int(50)]
        );
    }

    #[test]
    fn parses_unbound_call() {
        let stmt = parse_statement(r#"grep("TODO")"#).unwrap();
        assert!(stmt.binding.is_none());
        assert_eq!(stmt.helper, "grep");
    }

    #[test]
    fn parses_identifier_reference_arg() {
        let stmt = parse_statement(r#"add_buffer("notes", text)"#).unwrap();
        assert_eq!(stmt.args[1], Arg::Ref("text".to_string()));
    }

    #[test]
    fn rejects_missing_parens() {
        assert!(parse_statement("not a call").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(parse_statement(r#"peek("unterminated)"#).is_err());
    }
}
