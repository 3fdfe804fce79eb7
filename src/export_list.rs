//! Support for symbol export lists. An export list restricts which symbols get exported from the
//! output file. Each entry is either an exact symbol name or a glob pattern. The accepted syntax
//! is `;`-separated patterns, optionally wrapped in `{ ... };`, with `#` line comments, `/* */`
//! block comments and double-quoted names that are always taken literally.

use crate::error::Result;
use crate::glob::Glob;
use anyhow::anyhow;
use anyhow::bail;
use std::collections::HashSet;
use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::opt;
use winnow::token::take_till;
use winnow::token::take_until;
use winnow::token::take_while;

#[derive(Debug, Default)]
pub struct ExportList {
    matches_all: bool,
    exact: HashSet<Vec<u8>>,
    patterns: Vec<Glob>,
}

enum Entry<'input> {
    Pattern(&'input str),
    /// A quoted name matches exactly, even if it contains glob metacharacters.
    Quoted(&'input str),
}

impl ExportList {
    pub fn parse(text: &str) -> Result<ExportList> {
        let entries = parse_export_list
            .parse(text)
            .map_err(|err| anyhow!("Failed to parse symbol export list:\n{err}"))?;
        let mut out = ExportList::default();
        for entry in entries {
            match entry {
                Entry::Pattern(pattern) => out.add_pattern(pattern)?,
                Entry::Quoted(name) => {
                    out.exact.insert(name.as_bytes().to_owned());
                }
            }
        }
        Ok(out)
    }

    /// Adds one symbol name or pattern. Unlike `Glob::compile`, an invalid pattern is an error
    /// here: the list was supplied by the user, so a pattern that can never match anything is a
    /// mistake worth reporting.
    pub fn add_pattern(&mut self, pattern: &str) -> Result {
        if pattern == "*" {
            self.matches_all = true;
        } else if pattern.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'\\')) {
            let Some(glob) = Glob::compile(pattern) else {
                bail!("Invalid export pattern `{pattern}`");
            };
            self.patterns.push(glob);
        } else {
            self.exact.insert(pattern.as_bytes().to_owned());
        }
        Ok(())
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.matches_all
            || self.exact.contains(name)
            || self.patterns.iter().any(|glob| glob.matches(name))
    }
}

fn parse_export_list<'input>(input: &mut &'input str) -> winnow::Result<Vec<Entry<'input>>> {
    let mut entries = Vec::new();

    skip_comments_and_whitespace(input)?;

    let braced = opt('{').parse_next(input)?.is_some();

    loop {
        skip_comments_and_whitespace(input)?;

        if braced {
            if input.starts_with('}') {
                '}'.parse_next(input)?;
                skip_comments_and_whitespace(input)?;
                opt(';').parse_next(input)?;
                skip_comments_and_whitespace(input)?;
                break;
            }
            // End of input without the closing brace fails in `parse_entry` below.
        } else if input.is_empty() {
            break;
        }

        entries.push(parse_entry(input)?);
        skip_comments_and_whitespace(input)?;
        opt(';').parse_next(input)?;
    }

    Ok(entries)
}

fn parse_entry<'input>(input: &mut &'input str) -> winnow::Result<Entry<'input>> {
    if input.starts_with('"') {
        '"'.parse_next(input)?;
        let name = take_until(0.., "\"").parse_next(input)?;
        '"'.parse_next(input)?;
        return Ok(Entry::Quoted(name));
    }
    // `#` only starts a comment between entries, so a bracket expression like `[#]` stays intact.
    let pattern = take_while(1.., |ch: char| {
        !ch.is_ascii_whitespace() && !matches!(ch, ';' | '{' | '}' | '"')
    })
    .parse_next(input)?;
    Ok(Entry::Pattern(pattern))
}

fn skip_comments_and_whitespace(input: &mut &str) -> winnow::Result<()> {
    loop {
        multispace0(input)?;
        if input.starts_with('#') {
            take_till(0.., '\n').parse_next(input)?;
        } else if input.starts_with("/*") {
            take_until(1.., "*/").parse_next(input)?;
            "*/".parse_next(input)?;
        } else {
            return Ok(());
        }
    }
}
