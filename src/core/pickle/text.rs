//! Purpose: Parse the newline-terminated arguments of protocol 0 text opcodes.
//! Exports: `TextInt`, `parse_int`, `parse_long`, `parse_float`, `unquote_string`,
//! `decode_raw_unicode_escape`.
//! Role: Pure helpers; the decoder attaches offsets to the messages returned here.

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TextInt {
    Bool(bool),
    Int(i128),
    Big(String),
}

/// INT argument. `00` and `01` are the protocol 0 spellings of False and True.
pub(crate) fn parse_int(line: &[u8]) -> Result<TextInt, String> {
    match line {
        b"00" => return Ok(TextInt::Bool(false)),
        b"01" => return Ok(TextInt::Bool(true)),
        _ => {}
    }
    parse_integer(trim(line))
}

/// LONG argument, with the optional Python 2 `L` suffix.
pub(crate) fn parse_long(line: &[u8]) -> Result<TextInt, String> {
    let line = trim(line);
    let line = line.strip_suffix(b"L").unwrap_or(line);
    parse_integer(line)
}

pub(crate) fn parse_float(line: &[u8]) -> Result<f64, String> {
    let text = std::str::from_utf8(trim(line)).map_err(|_| "float literal is not ascii".to_string())?;
    text.parse::<f64>()
        .map_err(|_| format!("invalid float literal {text:?}"))
}

/// Integer literal with Python's base-0 rules: `0x`/`0o`/`0b` prefixes and legacy leading-zero octal.
fn parse_integer(digits: &[u8]) -> Result<TextInt, String> {
    let text =
        std::str::from_utf8(digits).map_err(|_| "integer literal is not ascii".to_string())?;
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, body) = match body.as_bytes() {
        [b'0', b'x' | b'X', ..] => (16, &body[2..]),
        [b'0', b'o' | b'O', ..] => (8, &body[2..]),
        [b'0', b'b' | b'B', ..] => (2, &body[2..]),
        [b'0', _, ..] => (8, &body[1..]),
        _ => (10, body),
    };
    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return Err(format!("invalid integer literal {text:?}"));
    }
    let sign = if negative { "-" } else { "" };
    if let Ok(value) = i128::from_str_radix(&format!("{sign}{body}"), radix) {
        return Ok(TextInt::Int(value));
    }
    if radix != 10 {
        return Err(format!("integer literal {text:?} does not fit 128 bits"));
    }
    Ok(TextInt::Big(format!("{sign}{body}")))
}

fn trim(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

/// STRING argument: a quoted Python 2 `repr` of a byte string.
pub(crate) fn unquote_string(line: &[u8]) -> Result<Vec<u8>, String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let inner = match line {
        [q @ (b'\'' | b'"'), inner @ .., last] if last == q => inner,
        _ => return Err("STRING argument is not a quoted literal".to_string()),
    };

    let mut out = Vec::with_capacity(inner.len());
    let mut idx = 0;
    while idx < inner.len() {
        let byte = inner[idx];
        idx += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let Some(&esc) = inner.get(idx) else {
            return Err("STRING literal ends with a lone backslash".to_string());
        };
        idx += 1;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\n' => {}
            b'x' => {
                let hex = inner
                    .get(idx..idx + 2)
                    .ok_or_else(|| "truncated \\x escape".to_string())?;
                out.push(hex_value(hex).ok_or_else(|| "invalid \\x escape".to_string())? as u8);
                idx += 2;
            }
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                let mut taken = 1;
                while taken < 3 {
                    match inner.get(idx) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            idx += 1;
                            taken += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// UNICODE argument: latin-1 text where only `\uXXXX` and `\UXXXXXXXX` are escapes.
pub(crate) fn decode_raw_unicode_escape(line: &[u8]) -> Result<String, String> {
    let mut units: Vec<u32> = Vec::with_capacity(line.len());
    let mut idx = 0;
    while idx < line.len() {
        if line[idx] != b'\\' {
            units.push(u32::from(line[idx]));
            idx += 1;
            continue;
        }
        let run_start = idx;
        while idx < line.len() && line[idx] == b'\\' {
            idx += 1;
        }
        let run = idx - run_start;
        let width = match line.get(idx) {
            Some(b'u') if run % 2 == 1 => 4,
            Some(b'U') if run % 2 == 1 => 8,
            _ => 0,
        };
        let literal = if width > 0 { run - 1 } else { run };
        units.extend(std::iter::repeat_n(u32::from(b'\\'), literal));
        if width > 0 {
            let hex = line
                .get(idx + 1..idx + 1 + width)
                .ok_or_else(|| "truncated \\u escape".to_string())?;
            units.push(hex_value(hex).ok_or_else(|| "invalid \\u escape".to_string())?);
            idx += 1 + width;
        }
    }
    combine_code_units(&units)
}

fn combine_code_units(units: &[u32]) -> Result<String, String> {
    let mut out = String::with_capacity(units.len());
    let mut idx = 0;
    while idx < units.len() {
        let unit = units[idx];
        idx += 1;
        let code = if (0xD800..0xDC00).contains(&unit) {
            match units.get(idx) {
                Some(&low) if (0xDC00..0xE000).contains(&low) => {
                    idx += 1;
                    0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00)
                }
                _ => return Err(format!("lone surrogate \\u{unit:04x}")),
            }
        } else {
            unit
        };
        let ch = char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"))?;
        out.push(ch);
    }
    Ok(out)
}

fn hex_value(digits: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::{
        TextInt, decode_raw_unicode_escape, parse_float, parse_int, parse_long, unquote_string,
    };

    #[test]
    fn int_line_handles_bool_spellings() {
        assert_eq!(parse_int(b"01").unwrap(), TextInt::Bool(true));
        assert_eq!(parse_int(b"00").unwrap(), TextInt::Bool(false));
        assert_eq!(parse_int(b"42").unwrap(), TextInt::Int(42));
        assert_eq!(parse_int(b"-7").unwrap(), TextInt::Int(-7));
        assert!(parse_int(b"4x").is_err());
        assert!(parse_int(b"").is_err());
    }

    #[test]
    fn long_line_strips_suffix_and_widens() {
        assert_eq!(parse_long(b"1467301200L").unwrap(), TextInt::Int(1_467_301_200));
        assert_eq!(
            parse_long(b"-1234567890123456789012345678901234567890L").unwrap(),
            TextInt::Big("-1234567890123456789012345678901234567890".to_string())
        );
    }

    #[test]
    fn integer_lines_follow_base_zero_rules() {
        assert_eq!(parse_int(b"010").unwrap(), TextInt::Int(8));
        assert_eq!(parse_int(b"0x10").unwrap(), TextInt::Int(16));
        assert_eq!(parse_int(b"-0o17").unwrap(), TextInt::Int(-15));
        assert_eq!(parse_int(b"0b101").unwrap(), TextInt::Int(5));
        assert_eq!(parse_int(b"0").unwrap(), TextInt::Int(0));
        assert_eq!(parse_long(b"0777L").unwrap(), TextInt::Int(511));
        assert_eq!(parse_long(b"0xffL").unwrap(), TextInt::Int(255));
        assert!(parse_int(b"09").is_err());
        assert!(parse_int(b"0x").is_err());
        assert!(parse_long(b"0x1000000000000000000000000000000000L").is_err());
    }

    #[test]
    fn float_line_parses_repr() {
        assert_eq!(parse_float(b"1.5").unwrap(), 1.5);
        assert!(parse_float(b"nan").unwrap().is_nan());
        assert!(parse_float(b"one").is_err());
    }

    #[test]
    fn string_line_unescapes_repr() {
        assert_eq!(unquote_string(b"'stats.count'").unwrap(), b"stats.count");
        assert_eq!(unquote_string(br#""it's""#).unwrap(), b"it's");
        assert_eq!(unquote_string(br"'a\nb\x41\101\\'").unwrap(), b"a\nbAA\\");
        assert_eq!(unquote_string(br"'\q'").unwrap(), br"\q");
        assert!(unquote_string(b"no quotes").is_err());
        assert!(unquote_string(b"'mismatch\"").is_err());
    }

    #[test]
    fn raw_unicode_escape_only_honours_u_escapes() {
        assert_eq!(decode_raw_unicode_escape(b"caf\xe9").unwrap(), "caf\u{e9}");
        assert_eq!(decode_raw_unicode_escape(br"\u00e9\n").unwrap(), "\u{e9}\\n");
        assert_eq!(decode_raw_unicode_escape(br"\\u0041").unwrap(), "\\\\u0041");
        assert_eq!(decode_raw_unicode_escape(br"\U0001f600").unwrap(), "\u{1f600}");
        assert_eq!(decode_raw_unicode_escape(br"\ud83d\ude00").unwrap(), "\u{1f600}");
        assert!(decode_raw_unicode_escape(br"\ud83d").is_err());
        assert!(decode_raw_unicode_escape(br"\u00").is_err());
    }
}
