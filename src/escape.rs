//! Quoting of arguments for the two remote shell families `rig` targets.
//!
//! `escape_posix` is a close adaptation of the teacher crate's own
//! `escape` module (itself a fork of the [`shell-escape`] crate's unix
//! half); `escape_windows` is new, written in the same
//! whitelist-then-quote style for `cmd.exe`/PowerShell targets, which the
//! teacher never has to deal with since it only ever shells out to a
//! POSIX `ssh(1)`.
//!
//! [`shell-escape`]: https://crates.io/crates/shell-escape

use std::borrow::Cow;

fn posix_whitelisted(byte: u8) -> bool {
    matches!(byte, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'=' | b'/' | b',' | b'.' | b'+')
}

/// Escape a single argument for a POSIX shell (`sh`, `bash`, `dash`).
///
/// Wraps in single quotes and closes/reopens around any embedded single
/// quote or `!` (history expansion under interactive `bash`), matching
/// `shell-escape::unix::escape`.
pub fn escape_posix(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.is_empty() && bytes.iter().copied().all(posix_whitelisted) {
        return Cow::Borrowed(s);
    }

    let mut escaped = Vec::with_capacity(bytes.len() + 2);
    escaped.push(b'\'');
    for &b in bytes {
        match b {
            b'\'' | b'!' => {
                escaped.push(b'\'');
                escaped.push(b'\\');
                escaped.push(b);
                escaped.push(b'\'');
            }
            _ => escaped.push(b),
        }
    }
    escaped.push(b'\'');
    Cow::Owned(String::from_utf8(escaped).expect("input was valid UTF-8 and only ASCII was added"))
}

fn windows_whitelisted(byte: u8) -> bool {
    matches!(byte, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'=' | b'\\' | b':' | b'.' | b'+')
}

/// Escape a single argument for `cmd.exe`/PowerShell.
///
/// Wraps in double quotes, doubling any embedded `"` (the convention both
/// `cmd.exe` and PowerShell's argv parser accept) and backslash-escaping a
/// backslash that immediately precedes a closing quote so it isn't read as
/// escaping that quote.
pub fn escape_windows(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.is_empty() && bytes.iter().copied().all(windows_whitelisted) {
        return Cow::Borrowed(s);
    }

    let mut escaped = String::with_capacity(bytes.len() + 2);
    escaped.push('"');
    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '"' => escaped.push_str("\"\""),
            '\\' if i + 1 == chars.len() => escaped.push_str("\\\\"),
            _ => escaped.push(c),
        }
    }
    escaped.push('"');
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_passthrough_for_safe_args() {
        assert_eq!(
            escape_posix("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_=/,.+"),
            Cow::Borrowed("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_=/,.+"),
        );
        assert_eq!(escape_posix("--aaa=bbb-ccc"), Cow::Borrowed("--aaa=bbb-ccc"));
    }

    #[test]
    fn posix_quotes_unsafe_args() {
        assert_eq!(
            escape_posix("linker=gcc -L/foo -Wl,bar"),
            "'linker=gcc -L/foo -Wl,bar'"
        );
        assert_eq!(
            escape_posix(r#"--features="default""#),
            r#"'--features="default"'"#
        );
        assert_eq!(escape_posix("it's"), r#"'it'\''s'"#);
        assert_eq!(escape_posix(""), "''");
        assert_eq!(escape_posix(" "), "' '");
    }

    #[test]
    fn windows_passthrough_for_safe_args() {
        assert_eq!(escape_windows("C:\\Windows\\System32"), Cow::Borrowed("C:\\Windows\\System32"));
    }

    #[test]
    fn windows_quotes_and_doubles_embedded_quotes() {
        assert_eq!(escape_windows("a b"), "\"a b\"");
        assert_eq!(escape_windows("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
