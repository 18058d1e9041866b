//! Properties file parsing
//!
//! Changelog parameters are read from a Java-style properties file:
//!
//! ```text
//! # comment
//! ! also a comment
//! schema = app
//! owner:admin
//! long.value = first \
//!              second
//! ```
//!
//! Later duplicate keys override earlier ones.

use std::collections::BTreeMap;
use std::io::{self, Read};

/// Parsed properties, sorted by key
pub type Properties = BTreeMap<String, String>;

/// Read and parse properties from a stream
///
/// UTF-8 is tried first; anything else is read as ISO-8859-1.
pub fn load<R: Read>(mut reader: R) -> io::Result<Properties> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    };
    Ok(parse(&content))
}

/// Parse properties text
pub fn parse(content: &str) -> Properties {
    let mut props = Properties::new();

    for line in logical_lines(content) {
        let (key, value) = split_entry(&line);
        if key.is_empty() && value.is_empty() {
            continue;
        }
        props.insert(key, value);
    }

    props
}

/// Join continuation lines and drop comments and blanks
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let trimmed = raw.trim_start();

        if current.is_none() && (trimmed.is_empty() || trimmed.starts_with(['#', '!'])) {
            continue;
        }

        let mut acc = current.take().unwrap_or_default();
        if ends_with_continuation(trimmed) {
            acc.push_str(&trimmed[..trimmed.len() - 1]);
            current = Some(acc);
        } else {
            acc.push_str(trimmed);
            lines.push(acc);
        }
    }

    if let Some(acc) = current {
        lines.push(acc);
    }
    lines
}

/// An odd number of trailing backslashes continues the line
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (String, String) {
    let mut key = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    key.push(unescape(escaped));
                }
            }
            '=' | ':' => break,
            c if c.is_whitespace() => {
                // whitespace may be followed by a single '=' or ':'
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                if matches!(chars.peek(), Some('=') | Some(':')) {
                    chars.next();
                }
                break;
            }
            c => key.push(c),
        }
    }

    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }

    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                value.push(unescape(escaped));
            }
        } else {
            value.push(c);
        }
    }

    (key, value)
}

fn unescape(c: char) -> char {
    match c {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        'f' => '\u{c}',
        other => other,
    }
}
