//! Route pattern validation.
//!
//! A pattern is accepted when it is non-empty, at most [`MAX_LEN`] bytes, has
//! as many `{` as `}`, and consists only of RFC 3986 characters (unreserved,
//! reserved, or `%XX` escapes) plus `{`, `}` and space.

use crate::error::Error;

pub const MAX_LEN: usize = 256;

pub fn validate(pattern: &str) -> Result<(), Error> {
    let invalid = |reason: String| Error::InvalidPattern { pattern: pattern.to_owned(), reason };

    if pattern.is_empty() {
        return Err(invalid("pattern cannot be empty".into()));
    }
    if pattern.len() > MAX_LEN {
        return Err(invalid(format!("pattern too long (max {MAX_LEN} bytes)")));
    }
    if pattern.matches('{').count() != pattern.matches('}').count() {
        return Err(invalid("unbalanced braces".into()));
    }

    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                    i += 3;
                    continue;
                }
                Some(_) => {
                    return Err(invalid(format!("invalid percent-encoding at byte {i}")));
                }
                None => return Err(invalid("incomplete percent-encoding".into())),
            }
        }
        if !allowed(b) {
            let shown = pattern[i..].chars().next().unwrap_or('?');
            return Err(invalid(format!("invalid character '{shown}' at byte {i}")));
        }
        i += 1;
    }
    Ok(())
}

fn allowed(b: u8) -> bool {
    match b {
        b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => true,
        // unreserved
        b'-' | b'.' | b'_' | b'~' => true,
        // reserved
        b':' | b'/' | b'?' | b'#' | b'[' | b']' | b'@' => true,
        b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' => true,
        b'{' | b'}' | b' ' => true,
        _ => false,
    }
}
