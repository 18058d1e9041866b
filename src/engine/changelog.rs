//! Formatted-SQL changelogs
//!
//! ```sql
//! --liquibase formatted sql
//!
//! --changeset alice:1 context:dev,test
//! --comment: create the users table
//! CREATE TABLE ${schema_prefix}users (id INTEGER PRIMARY KEY, name TEXT);
//! --rollback DROP TABLE users;
//!
//! --include file:db/reference-data.sql
//! ```
//!
//! A changeset runs from its `--changeset author:id` line to the next directive that
//! opens another changeset or includes a file. Includes are resolved through the same
//! [`ResourceResolver`] as the root changelog.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;

use crate::error::EngineError;
use crate::resource::{normalize_path, ResourceResolver};

const HEADER: &str = "liquibase formatted sql";

/// One atomic unit of schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub id: String,
    pub author: String,
    /// Changelog file the changeset was declared in
    pub file: String,
    pub contexts: Vec<String>,
    pub run_always: bool,
    pub run_on_change: bool,
    pub description: Option<String>,
    pub body: String,
    /// Line of the `--changeset` directive
    pub line: usize,
}

impl ChangeSet {
    /// `file::id::author`, unique within a changelog
    pub fn identifier(&self) -> String {
        format!("{}::{}::{}", self.file, self.id, self.author)
    }

    /// MD5 of the body with lines trimmed and blank lines dropped
    ///
    /// Computed before parameter substitution, so changing a parameter value does not
    /// invalidate applied changesets.
    pub fn checksum(&self) -> String {
        let normalized: Vec<&str> = self
            .body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        format!("{:x}", md5::compute(normalized.join("\n")))
    }

    /// Whether the changeset runs under the given context filter
    ///
    /// No filter, an empty filter, or a changeset without contexts always match.
    pub fn matches_contexts(&self, filter: Option<&str>) -> bool {
        let wanted: Vec<String> = match filter {
            Some(f) => f
                .split(',')
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            None => return true,
        };

        if wanted.is_empty() || self.contexts.is_empty() {
            return true;
        }

        self.contexts
            .iter()
            .any(|c| wanted.contains(&c.to_lowercase()))
    }

    /// Body with `${name}` placeholders replaced
    pub fn sql(&self, parameters: &BTreeMap<String, String>) -> String {
        substitute(&self.body, parameters)
    }

    /// Description stored in the tracking table
    pub fn describe(&self) -> String {
        self.description.clone().unwrap_or_else(|| "sql".to_string())
    }
}

/// Replace `${name}` with known parameters; unknown placeholders are kept verbatim
pub fn substitute(text: &str, parameters: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match parameters.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// A fully expanded changelog (includes inlined, in declaration order)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    pub path: String,
    pub changesets: Vec<ChangeSet>,
}

enum Entry {
    ChangeSet(ChangeSet),
    Include(String),
}

impl ChangeLog {
    /// Load a changelog and everything it includes
    pub fn load(path: &str, resolver: &dyn ResourceResolver) -> Result<Self, EngineError> {
        let mut changesets = Vec::new();
        let mut stack = Vec::new();
        load_into(path, resolver, &mut stack, &mut changesets)?;
        Ok(ChangeLog {
            path: path.to_string(),
            changesets,
        })
    }

    /// Parse a single changelog file without following includes
    pub fn parse(path: &str, content: &str) -> Result<Self, EngineError> {
        let changesets = parse_entries(path, content)?
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::ChangeSet(cs) => Some(cs),
                Entry::Include(_) => None,
            })
            .collect();
        Ok(ChangeLog {
            path: path.to_string(),
            changesets,
        })
    }

    /// Identifiers declared more than once
    pub fn duplicates(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for cs in &self.changesets {
            let id = cs.identifier();
            if !seen.insert(id.clone()) && !duplicates.contains(&id) {
                duplicates.push(id);
            }
        }
        duplicates
    }
}

fn load_into(
    path: &str,
    resolver: &dyn ResourceResolver,
    stack: &mut Vec<String>,
    out: &mut Vec<ChangeSet>,
) -> Result<(), EngineError> {
    if stack.iter().any(|p| normalize_path(p) == normalize_path(path)) {
        return Err(EngineError::IncludeCycle(path.to_string()));
    }

    let content = read_resource(path, resolver)?;
    stack.push(path.to_string());

    for entry in parse_entries(path, &content)? {
        match entry {
            Entry::ChangeSet(cs) => out.push(cs),
            Entry::Include(included) => {
                load_into(&included, resolver, stack, out)?;
            }
        }
    }

    stack.pop();
    Ok(())
}

/// Read exactly one resource; zero or several matches are errors
fn read_resource(path: &str, resolver: &dyn ResourceResolver) -> Result<String, EngineError> {
    let mut streams = resolver.resolve(path)?;
    match streams.len() {
        0 => Err(EngineError::MissingResource(path.to_string())),
        1 => {
            let mut content = String::new();
            streams.remove(0).read_to_string(&mut content)?;
            Ok(content)
        }
        count => Err(EngineError::AmbiguousResource {
            path: path.to_string(),
            count,
        }),
    }
}

/// Match `--<keyword>` (spaces after `--` allowed) and return what follows it
fn directive<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix("--")?.trim_start();
    if rest.len() < keyword.len() || !rest.is_char_boundary(keyword.len()) {
        return None;
    }
    let (head, tail) = rest.split_at(keyword.len());
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    match tail.chars().next() {
        None => Some(tail),
        Some(c) if c.is_whitespace() || c == ':' => Some(tail),
        Some(_) => None,
    }
}

fn parse_entries(path: &str, content: &str) -> Result<Vec<Entry>, EngineError> {
    let error = |line: usize, message: &str| EngineError::Changelog {
        path: path.to_string(),
        line,
        message: message.to_string(),
    };

    let mut lines = content.lines().enumerate().map(|(i, l)| (i + 1, l));

    let header_found = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .map(|(_, l)| {
            l.trim()
                .strip_prefix("--")
                .map(|h| h.trim().eq_ignore_ascii_case(HEADER))
                .unwrap_or(false)
        })
        .unwrap_or(false);
    if !header_found {
        return Err(error(1, "missing '--liquibase formatted sql' header"));
    }

    let mut entries = Vec::new();
    let mut current: Option<ChangeSet> = None;

    for (number, raw) in lines {
        let line = raw.trim();

        if let Some(rest) = directive(line, "changeset") {
            if let Some(cs) = current.take() {
                entries.push(Entry::ChangeSet(cs));
            }
            current = Some(parse_changeset_header(path, number, rest)?);
        } else if let Some(rest) = directive(line, "include") {
            if let Some(cs) = current.take() {
                entries.push(Entry::ChangeSet(cs));
            }
            let target = rest
                .trim()
                .strip_prefix("file:")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| error(number, "include needs 'file:<path>'"))?;
            entries.push(Entry::Include(target.to_string()));
        } else if let Some(rest) = directive(line, "comment") {
            if let Some(cs) = current.as_mut() {
                let text = rest.trim_start().trim_start_matches(':').trim();
                if !text.is_empty() {
                    cs.description = Some(text.to_string());
                }
            }
        } else if directive(line, "rollback").is_some() {
            continue;
        } else if let Some(cs) = current.as_mut() {
            cs.body.push_str(raw);
            cs.body.push('\n');
        } else if !line.is_empty() && !line.starts_with("--") {
            return Err(error(number, "statement outside of a changeset"));
        }
    }

    if let Some(cs) = current.take() {
        entries.push(Entry::ChangeSet(cs));
    }

    Ok(entries)
}

fn parse_changeset_header(path: &str, line: usize, rest: &str) -> Result<ChangeSet, EngineError> {
    let mut tokens = rest.split_whitespace();

    let (author, id) = tokens
        .next()
        .and_then(|t| t.split_once(':'))
        .filter(|(a, i)| !a.is_empty() && !i.is_empty())
        .ok_or_else(|| EngineError::Changelog {
            path: path.to_string(),
            line,
            message: "changeset needs 'author:id'".to_string(),
        })?;

    let mut cs = ChangeSet {
        id: id.to_string(),
        author: author.to_string(),
        file: normalize_path(path).to_string(),
        contexts: Vec::new(),
        run_always: false,
        run_on_change: false,
        description: None,
        body: String::new(),
        line,
    };

    for token in tokens {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "context" | "contexts" => {
                cs.contexts = value
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "runalways" => cs.run_always = value.eq_ignore_ascii_case("true"),
            "runonchange" => cs.run_on_change = value.eq_ignore_ascii_case("true"),
            // other attributes (splitStatements, endDelimiter, ...) are not supported
            _ => {}
        }
    }

    Ok(cs)
}
