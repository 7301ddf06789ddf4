//! Lexical import extraction
//!
//! Each syntax has its own pattern; the scan merges their matches by position
//! so specifiers come out in source order. Nothing here can fail: text that
//! does not match simply yields fewer specifiers.

use std::collections::VecDeque;

use modwatch_core::{ImportSyntax, SyntaxKinds};
use once_cell::sync::Lazy;
use regex::Regex;

static STATIC_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:import|export)\s+[^'";]*?\bfrom\s*['"]([^'"\n]+)['"]"#)
        .expect("Invalid STATIC_IMPORT regex")
});

static BARE_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:import|export)\s*['"]([^'"\n]+)['"]"#)
        .expect("Invalid BARE_IMPORT regex")
});

static DYNAMIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .expect("Invalid DYNAMIC_IMPORT regex")
});

static REQUIRE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\brequire\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .expect("Invalid REQUIRE regex")
});

static CSS_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+([^;\n]+)"#).expect("Invalid CSS_IMPORT regex")
});

static CSS_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)|['"]([^'"]+)['"]"#)
        .expect("Invalid CSS_TARGET regex")
});

/// One specifier as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawImport {
    pub specifier: String,
    pub syntax: ImportSyntax,
}

/// Restartable view of the imports in one file. Every call to [`iter`]
/// starts a fresh lazy pass over the content.
///
/// [`iter`]: ImportScan::iter
#[derive(Debug, Clone, Copy)]
pub struct ImportScan<'a> {
    content: &'a str,
    kinds: SyntaxKinds,
}

impl<'a> ImportScan<'a> {
    pub fn new(content: &'a str, kinds: SyntaxKinds) -> Self {
        ImportScan { content, kinds }
    }

    pub fn iter(&self) -> ImportIter<'a> {
        let mut patterns = Vec::new();
        if self.kinds.esm {
            patterns.push(Pattern::new(ImportSyntax::Esm, &STATIC_FROM_RE));
            patterns.push(Pattern::new(ImportSyntax::Esm, &BARE_IMPORT_RE));
        }
        if self.kinds.dyn_esm {
            patterns.push(Pattern::new(ImportSyntax::DynamicEsm, &DYNAMIC_IMPORT_RE));
        }
        if self.kinds.cjs {
            patterns.push(Pattern::new(ImportSyntax::CommonJs, &REQUIRE_RE));
        }
        if self.kinds.css {
            patterns.push(Pattern::new(ImportSyntax::Css, &CSS_IMPORT_RE));
        }
        ImportIter {
            content: self.content,
            cursor: 0,
            patterns,
            pending: VecDeque::new(),
        }
    }
}

impl<'a> IntoIterator for &ImportScan<'a> {
    type Item = RawImport;
    type IntoIter = ImportIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Collect every import of `content` for the given syntaxes.
pub fn extract_imports(content: &str, kinds: SyntaxKinds) -> Vec<RawImport> {
    ImportScan::new(content, kinds).iter().collect()
}

#[derive(Debug)]
struct Hit {
    start: usize,
    end: usize,
    specifiers: Vec<String>,
}

#[derive(Debug)]
struct Pattern {
    syntax: ImportSyntax,
    regex: &'static Regex,
    /// `None` until searched; `Some(None)` once exhausted.
    next: Option<Option<Hit>>,
}

impl Pattern {
    fn new(syntax: ImportSyntax, regex: &'static Lazy<Regex>) -> Self {
        Pattern {
            syntax,
            regex: Lazy::force(regex),
            next: None,
        }
    }

    fn search(&self, content: &str, mut at: usize) -> Option<Hit> {
        while at <= content.len() {
            let caps = self.regex.captures_at(content, at)?;
            let whole = caps.get(0)?;
            if self.syntax.is_script() && is_member_access(content, whole.start()) {
                at = next_char_boundary(content, whole.start());
                continue;
            }
            let specifiers = match self.syntax {
                ImportSyntax::Css => caps
                    .get(1)
                    .map(|list| css_targets(list.as_str()))
                    .unwrap_or_default(),
                _ => caps
                    .get(1)
                    .map(|s| vec![s.as_str().trim().to_string()])
                    .unwrap_or_default(),
            };
            return Some(Hit {
                start: whole.start(),
                end: whole.end(),
                specifiers,
            });
        }
        None
    }
}

/// `obj.require(..)`, `x.import(..)` and CSS `@import` are not script imports.
fn is_member_access(content: &str, start: usize) -> bool {
    content[..start]
        .chars()
        .next_back()
        .is_some_and(|c| matches!(c, '.' | '@' | '$'))
}

fn next_char_boundary(content: &str, from: usize) -> usize {
    content[from..]
        .chars()
        .next()
        .map(|c| from + c.len_utf8())
        .unwrap_or(content.len() + 1)
}

fn css_targets(list: &str) -> Vec<String> {
    CSS_TARGET_RE
        .captures_iter(list)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim())
        .filter(|target| !target.is_empty() && !is_remote(target))
        .map(relative_css_target)
        .collect()
}

fn is_remote(target: &str) -> bool {
    target.starts_with("//") || target.contains("://") || target.starts_with("data:")
}

/// CSS has no package lookup: a bare target names a sibling file.
fn relative_css_target(target: &str) -> String {
    if target.starts_with("./")
        || target.starts_with("../")
        || target.starts_with('/')
        || target.starts_with("~/")
    {
        target.to_string()
    } else {
        format!("./{target}")
    }
}

/// Lazy iterator over the imports of one file, in source order.
#[derive(Debug)]
pub struct ImportIter<'a> {
    content: &'a str,
    cursor: usize,
    patterns: Vec<Pattern>,
    pending: VecDeque<RawImport>,
}

impl Iterator for ImportIter<'_> {
    type Item = RawImport;

    fn next(&mut self) -> Option<RawImport> {
        loop {
            if let Some(import) = self.pending.pop_front() {
                return Some(import);
            }

            let content = self.content;
            let cursor = self.cursor;
            let mut best: Option<(usize, usize)> = None;
            for (i, pattern) in self.patterns.iter_mut().enumerate() {
                // A cached hit that starts before the cursor overlapped an
                // earlier match and must be searched again.
                let stale = matches!(&pattern.next, Some(Some(hit)) if hit.start < cursor);
                if pattern.next.is_none() || stale {
                    pattern.next = Some(pattern.search(content, cursor));
                }
                if let Some(Some(hit)) = &pattern.next
                    && best.is_none_or(|(_, start)| hit.start < start)
                {
                    best = Some((i, hit.start));
                }
            }

            let (index, _) = best?;
            let pattern = &mut self.patterns[index];
            let Some(Some(hit)) = pattern.next.take() else {
                return None;
            };
            self.cursor = hit.end.max(hit.start + 1);
            let syntax = pattern.syntax;
            self.pending.extend(
                hit.specifiers
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(|specifier| RawImport { specifier, syntax }),
            );
        }
    }
}
