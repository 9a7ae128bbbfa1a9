//! A deliberately small JSON-object-per-line reader for the POSIX helper's
//! wire protocol. The protocol only ever emits flat objects of string/
//! number/bool/null fields, so this avoids pulling in a full JSON crate
//! for something `os_release`'s `KEY=VALUE` parser-sized.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl Value {
    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Num(n) if *n >= 0.0 => Some(*n as u64),
            _ => None,
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Num(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub(crate) fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Parse one line of the form `{"key":"value","other":123,...}` into a
/// field map. Returns `Error::Io` on malformed input — the helper script
/// is the only producer, so a parse failure means the transport mangled
/// the stream, not a data-shape surprise.
pub(crate) fn parse_object(line: &str) -> Result<BTreeMap<String, Value>> {
    let line = line.trim();
    let inner = line
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| malformed(line))?;

    let mut fields = BTreeMap::new();
    for pair in split_top_level(inner) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once(':').ok_or_else(|| malformed(line))?;
        let key = parse_string(key.trim()).ok_or_else(|| malformed(line))?;
        let value = parse_value(value.trim()).ok_or_else(|| malformed(line))?;
        fields.insert(key, value);
    }
    Ok(fields)
}

fn malformed(line: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("malformed fs helper response: {line}"),
    ))
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escape = false;
    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_string(s: &str) -> Option<String> {
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn parse_value(s: &str) -> Option<Value> {
    if s == "null" {
        return Some(Value::Null);
    }
    if s == "true" {
        return Some(Value::Bool(true));
    }
    if s == "false" {
        return Some(Value::Bool(false));
    }
    if s.starts_with('"') {
        return parse_string(s).map(Value::Str);
    }
    s.parse::<f64>().ok().map(Value::Num)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_field_types() {
        let fields =
            parse_object(r#"{"error":"","size":123,"is_dir":false,"name":"a\"b"}"#).unwrap();
        assert_eq!(fields["error"].as_str(), Some(""));
        assert_eq!(fields["size"].as_u64(), Some(123));
        assert_eq!(fields["is_dir"].as_bool(), Some(false));
        assert_eq!(fields["name"].as_str(), Some("a\"b"));
    }

    #[test]
    fn rejects_lines_without_braces() {
        assert!(parse_object("not json").is_err());
    }
}
