//! Line codec for the monitor protocol.
//!
//! Commands travel as newline-delimited lines: a keyword followed by zero or
//! more space-separated, percent-escaped arguments. Escaping follows RFC 3986
//! path-segment rules (space becomes `%20`, `/` is escaped, unreserved
//! characters pass through), so arguments can never contain a bare space or
//! newline on the wire.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ProtocolError;

/// Characters escaped in a protocol argument: everything outside the RFC 3986
/// path-segment vocabulary.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'!')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

/// Percent-escape one protocol argument.
pub fn escape(arg: &str) -> String {
    utf8_percent_encode(arg, PATH_SEGMENT).to_string()
}

/// Decode one percent-escaped protocol argument.
///
/// Rejects truncated or non-hex escapes and escapes that decode to invalid
/// UTF-8; both indicate a corrupt wire line.
pub fn unescape(arg: &str) -> Result<String, ProtocolError> {
    let bad = || ProtocolError::BadEscape {
        arg: arg.to_string(),
    };

    // percent_decode passes malformed escapes through verbatim; validate
    // them up front so corruption surfaces as an error instead.
    let bytes = arg.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).ok_or_else(bad)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return Err(bad());
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    percent_decode_str(arg)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| bad())
}

/// Build one wire line (without the trailing newline): keyword plus escaped
/// arguments, space-joined.
pub fn encode_line(keyword: &str, args: &[&str]) -> String {
    let mut line = String::from(keyword);
    for arg in args {
        line.push(' ');
        line.push_str(&escape(arg));
    }
    line
}

/// Split one wire line into its keyword and decoded arguments.
pub fn decode_line(line: &str) -> Result<(String, Vec<String>), ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let mut tokens = trimmed.split(' ');
    let keyword = tokens.next().unwrap_or_default().to_string();
    let args = tokens.map(unescape).collect::<Result<Vec<_>, _>>()?;
    Ok((keyword, args))
}
