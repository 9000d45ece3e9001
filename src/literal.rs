use std::borrow::Cow;

use crate::error::LiteralError;

/// Smallest value a numeric literal may hold.
pub const MIN_VALUE: i32 = i16::MIN as i32;
/// Largest value a numeric literal may hold. Values above `i16::MAX` wrap when stored.
pub const MAX_VALUE: i32 = u16::MAX as i32;

/// Whether a token looks like it is meant to be a number (as opposed to an identifier).
pub fn is_numeric_start(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '$' | '%' | '\'' | '-' | '+'))
}

/// Parse a numeric literal: hex (`0x1A`, `$1A`), binary (`0b1010`, `%1010`), character
/// (`'A'`), or signed decimal. First matching form wins.
pub fn parse_number(token: &str) -> Result<i32, LiteralError> {
    let value = if let Some(digits) = strip_prefix_ignore_case(token, "0x").or(token.strip_prefix('$')) {
        parse_radix(digits, 16, LiteralError::MalformedHex)?
    } else if let Some(digits) = strip_prefix_ignore_case(token, "0b").or(token.strip_prefix('%')) {
        parse_radix(digits, 2, LiteralError::MalformedBinary)?
    } else if token.starts_with('\'') {
        parse_char(token)? as u32 as i64
    } else {
        parse_decimal(token)?
    };
    check_range(value, MIN_VALUE, MAX_VALUE)
}

/// Ensure `value` lies within `min..=max`.
pub fn check_range(value: impl Into<i64>, min: i32, max: i32) -> Result<i32, LiteralError> {
    let value = value.into();
    if value < min as i64 || value > max as i64 {
        return Err(LiteralError::OutOfRange { min, max });
    }
    Ok(value as i32)
}

fn strip_prefix_ignore_case<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    let head = token.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &token[prefix.len()..])
}

fn parse_radix(digits: &str, radix: u32, malformed: LiteralError) -> Result<i64, LiteralError> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(malformed);
    }
    // Any digit string too long for i64 is certainly out of range
    i64::from_str_radix(digits, radix).map_err(|_| LiteralError::OutOfRange {
        min: MIN_VALUE,
        max: MAX_VALUE,
    })
}

fn parse_decimal(token: &str) -> Result<i64, LiteralError> {
    let digits = token.strip_prefix(['-', '+']).unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LiteralError::MalformedDecimal);
    }
    token.parse::<i64>().map_err(|_| LiteralError::OutOfRange {
        min: MIN_VALUE,
        max: MAX_VALUE,
    })
}

/// Parse a single-quoted character literal such as `'a'` or `'\n'`.
pub fn parse_char(token: &str) -> Result<char, LiteralError> {
    let inner = token
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .filter(|inner| !inner.is_empty())
        .ok_or(LiteralError::MalformedChar)?;
    let unescaped = unescape(inner)?;
    let mut chars = unescaped.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(LiteralError::MalformedChar),
    }
}

/// Parse a single- or double-quoted string literal into its bytes.
pub fn parse_string(token: &str) -> Result<Vec<u8>, LiteralError> {
    let quote = match token.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(LiteralError::MalformedString),
    };
    let inner = token[1..]
        .strip_suffix(quote)
        .ok_or(LiteralError::MalformedString)?;
    Ok(unescape(inner)?.into_owned().into_bytes())
}

fn unescape(s: &str) -> Result<Cow<'_, str>, LiteralError> {
    if !s.contains('\\') {
        return Ok(Cow::Borrowed(s));
    }
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('\'') => result.push('\''),
            Some('"') => result.push('"'),
            Some(other) => return Err(LiteralError::UnknownEscape(other)),
            // Trailing backslash
            None => return Err(LiteralError::MalformedString),
        }
    }
    Ok(Cow::Owned(result))
}
