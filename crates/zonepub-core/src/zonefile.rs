//! Zone file helpers: SOA serial access, comparison normalization, naming.
//!
//! Only what the engine needs is understood here. Everything else about
//! zone syntax is the structural checker's business.

use std::path::Path;
use std::sync::OnceLock;

use regex::bytes::Regex;

use crate::error::ZoneFileError;

fn soa_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i-u)^[^\s;]+\s+([0-9]+\s+)?(IN\s+)?SOA\s+")
            .expect("SOA line pattern is valid")
    })
}

fn origin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i-u)^\$ORIGIN\s+(\S+)\.\s*(;.*)?$").expect("ORIGIN pattern is valid")
    })
}

/// A token of zone file text as a byte range into the original content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token {
    start: usize,
    end: usize,
    line: usize,
    /// Starts in column 0, so it is an owner name.
    owner: bool,
    /// Inside `( ... )` at the point the token starts.
    grouped: bool,
}

/// Split zone text into tokens, dropping `;` comments and the `(` `)`
/// grouping characters. Quoted strings are one token.
fn tokenize(content: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line = 0;
    let mut depth = 0usize;
    let mut column_zero = true;
    let mut i = 0;

    while i < content.len() {
        match content[i] {
            b'\n' => {
                line += 1;
                column_zero = true;
                i += 1;
            }
            b';' => {
                while i < content.len() && content[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' => {
                depth += 1;
                column_zero = false;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                column_zero = false;
                i += 1;
            }
            b if b.is_ascii_whitespace() => {
                column_zero = false;
                i += 1;
            }
            first => {
                let start = i;
                if first == b'"' {
                    i += 1;
                    while i < content.len() && content[i] != b'"' && content[i] != b'\n' {
                        i += if content[i] == b'\\' { 2 } else { 1 };
                    }
                    i = (i + 1).min(content.len());
                } else {
                    while i < content.len()
                        && !content[i].is_ascii_whitespace()
                        && !matches!(content[i], b';' | b'(' | b')' | b'"')
                    {
                        i += if content[i] == b'\\' { 2 } else { 1 };
                    }
                    i = i.min(content.len());
                }
                tokens.push(Token {
                    start,
                    end: i,
                    line,
                    owner: column_zero,
                    grouped: depth > 0,
                });
                column_zero = false;
            }
        }
    }
    tokens
}

fn is_class(token: &[u8]) -> bool {
    [&b"IN"[..], b"CH", b"HS", b"CS"]
        .iter()
        .any(|class| token.eq_ignore_ascii_case(class))
}

fn is_ttl(token: &[u8]) -> bool {
    token.first().is_some_and(u8::is_ascii_digit)
}

/// Byte range of the serial field of the first SOA record.
///
/// The SOA type must sit in the type position of a record: preceded on its
/// line only by an owner, a TTL and a class. The serial is the third field
/// after it, wherever the record's line breaks and comments fall.
fn soa_serial_field(content: &[u8]) -> Result<(usize, usize), ZoneFileError> {
    let tokens = tokenize(content);
    let text = |t: &Token| &content[t.start..t.end];

    let mut line_start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.line != tokens[line_start].line {
            line_start = i;
        }
        if token.owner || token.grouped || !text(token).eq_ignore_ascii_case(b"SOA") {
            continue;
        }
        let prefix = &tokens[line_start..i];
        let in_type_position = prefix.len() <= 3
            && prefix.iter().enumerate().all(|(k, t)| {
                (k == 0 && t.owner) || is_class(text(t)) || is_ttl(text(t))
            });
        if !in_type_position {
            continue;
        }

        let serial = tokens[i + 1..]
            .iter()
            .take_while(|t| t.line == token.line || t.grouped)
            .nth(2)
            .ok_or(ZoneFileError::MissingSoa)?;
        return Ok((serial.start, serial.end));
    }
    Err(ZoneFileError::MissingSoa)
}

fn parse_serial(field: &[u8]) -> Result<u32, ZoneFileError> {
    let digits = String::from_utf8_lossy(field).into_owned();
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(ZoneFileError::InvalidSerial(digits));
    }
    digits
        .parse::<u32>()
        .map_err(|_| ZoneFileError::InvalidSerial(digits))
}

/// Read the SOA serial out of zone content.
pub fn soa_serial(content: &[u8]) -> Result<u32, ZoneFileError> {
    let (start, end) = soa_serial_field(content)?;
    parse_serial(&content[start..end])
}

/// Replace the SOA serial in zone content with `serial`.
///
/// Only the serial field of the first SOA record is touched; the rest of
/// the file is copied byte for byte.
pub fn embed_serial(content: &[u8], serial: u32) -> Result<Vec<u8>, ZoneFileError> {
    let (start, end) = soa_serial_field(content)?;
    parse_serial(&content[start..end])?;

    let serial = serial.to_string();
    let mut out = Vec::with_capacity(content.len() + serial.len());
    out.extend_from_slice(&content[..start]);
    out.extend_from_slice(serial.as_bytes());
    out.extend_from_slice(&content[end..]);
    Ok(out)
}

/// Canonical form used for change detection.
///
/// Drops `;` comments outside quoted strings, blank lines, and trailing
/// whitespace (including `\r`). Runs of spaces and tabs outside quoted
/// strings become one space; a leading run stays significant as one space,
/// since it means "same owner as the previous record".
pub fn normalize(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    for line in content.split(|&b| b == b'\n') {
        let line = trim_end(strip_comment(line));
        if line.is_empty() {
            continue;
        }
        squash_whitespace(line, &mut out);
        out.push(b'\n');
    }
    out
}

fn squash_whitespace(line: &[u8], out: &mut Vec<u8>) {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut pending_space = false;
    for &b in line {
        if !in_quotes && !escaped && (b == b' ' || b == b'\t') {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(b' ');
            pending_space = false;
        }
        out.push(b);
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            in_quotes = !in_quotes;
        }
    }
}

fn strip_comment(line: &[u8]) -> &[u8] {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, &b) in line.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b';' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn trim_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    &line[..end]
}

/// `$ORIGIN` declared before the SOA record, lowercase, without trailing dot.
pub fn zone_origin(content: &[u8]) -> Option<String> {
    for line in content.split(|&b| b == b'\n') {
        let line = trim_end(line);
        if soa_line_re().is_match(line) {
            break;
        }
        if let Some(caps) = origin_re().captures(line) {
            return Some(String::from_utf8_lossy(&caps[1]).to_ascii_lowercase());
        }
    }
    None
}

/// Whether a file stem and an `$ORIGIN` name the same zone, ignoring the
/// punctuation people use to make names filesystem-safe.
pub fn origin_matches(stem: &str, origin: &str) -> bool {
    const IGNORED: &[char] = &['/', '_', ',', ':', '-', '+', '*', '%', '^', '&', '#', '$'];
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !IGNORED.contains(c))
            .flat_map(char::to_lowercase)
            .collect()
    };
    squash(stem) == squash(origin)
}

/// Zone name for a zone file: lowercase file name without `suffix`.
pub fn zone_name_from_path(path: &Path, suffix: &str) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(suffix)?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_ascii_lowercase())
}

/// Lines whose PTR target is dotted but not fully qualified, which usually
/// means the origin gets appended by accident.
pub fn ptr_missing_dot_lines(content: &[u8]) -> Vec<String> {
    let mut bad = Vec::new();
    for raw in content.split(|&b| b == b'\n') {
        let line = trim_end(strip_comment(raw));
        let text = String::from_utf8_lossy(line);
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            if token.eq_ignore_ascii_case("PTR") {
                if let Some(target) = tokens.next() {
                    if target.contains('.') && !target.ends_with('.') {
                        bad.push(text.trim().to_string());
                    }
                }
                break;
            }
        }
    }
    bad
}

/// Whitespace errors in the sense of `git diff --check`: trailing
/// whitespace, a space before a tab in the indent, and blank lines at the
/// end of the file. One entry per offending line, 1-based.
pub fn whitespace_errors(content: &[u8]) -> Vec<String> {
    let mut errors = Vec::new();
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    let lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();

    for (i, line) in lines.iter().enumerate() {
        let number = i + 1;
        if line.last().is_some_and(|b| matches!(b, b' ' | b'\t' | b'\r')) {
            errors.push(format!("line {number}: trailing whitespace"));
        }
        let indent_len = line
            .iter()
            .position(|b| !matches!(b, b' ' | b'\t'))
            .unwrap_or(line.len());
        if line[..indent_len].windows(2).any(|w| w == b" \t") {
            errors.push(format!("line {number}: space before tab in indent"));
        }
    }

    let trailing_blank = lines.iter().rev().take_while(|l| l.is_empty()).count();
    if trailing_blank > 0 && trailing_blank < lines.len() {
        errors.push(format!(
            "line {}: blank line at end of file",
            lines.len() - trailing_blank + 1
        ));
    }
    errors
}
