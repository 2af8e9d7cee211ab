//! Declaration scanner for Dart sources
//!
//! Not a full parser. Comments and string literal contents are blanked out
//! first, then top-level declaration headers and class-body members are
//! picked out by brace depth.

use crate::error::{ConfigError, ParseError};
use crate::parser::{read_source, ParsedFile, SourceParser};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use trellis_core::{Declaration, DeclarationKind, Diagnostic, SymbolTable};

/// Byte offset to line lookup. Handed out as the opaque parse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        LineIndex { starts }
    }

    /// 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> u32 {
        u32::try_from(self.starts.partition_point(|&start| start <= offset)).unwrap_or(u32::MAX)
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}

/// Declaration currently receiving members.
struct OpenBody {
    index: usize,
    first_segment: bool,
}

#[derive(Debug, Clone)]
pub struct DeclarationScanner {
    header: Regex,
    clause: Regex,
    annotation: Regex,
}

impl DeclarationScanner {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(DeclarationScanner {
            header: Regex::new(
                r"^(?P<mods>(?:(?:abstract|base|final|sealed|interface)\s+)*)(?P<kw>mixin\s+class|class|mixin|enum|extension\s+type|extension)\s+(?P<name>[A-Za-z_$][\w$]*)(?P<rest>.*)$",
            )?,
            clause: Regex::new(r"\b(?:extends|with|implements|on)\b")?,
            annotation: Regex::new(r"@[\w$.]+(?:\s*\([^)]*\))?")?,
        })
    }

    /// Extract top-level declarations from `source`.
    pub fn scan(&self, path: &Path, source: &str) -> Result<(Vec<Declaration>, LineIndex), ParseError> {
        let index = LineIndex::new(source);
        let masked = mask(source);
        let bytes = masked.as_bytes();

        let mut declarations: Vec<Declaration> = Vec::new();
        let mut open: Option<OpenBody> = None;
        let mut braces: Vec<usize> = Vec::new();
        let mut top_start = 0;
        let mut member_start = 0;

        for (i, &byte) in bytes.iter().enumerate() {
            let depth = braces.len();
            match byte {
                b'{' => {
                    if depth == 0 {
                        let line = index.line_of(first_non_space(bytes, top_start, i));
                        if let Some(decl) = self.declaration(&masked[top_start..i], path, line) {
                            declarations.push(decl);
                            open = Some(OpenBody { index: declarations.len() - 1, first_segment: true });
                            member_start = i + 1;
                        }
                    } else if depth == 1 {
                        if let Some(body) = open.as_mut() {
                            self.member(&masked[member_start..i], body, &mut declarations);
                        }
                    }
                    braces.push(i);
                }
                b'}' => {
                    if braces.pop().is_none() {
                        return Err(ParseError::Syntax {
                            path: path.to_path_buf(),
                            message: format!("unmatched `}}` at line {}", index.line_of(i)),
                        });
                    }
                    match depth - 1 {
                        0 => {
                            if let Some(mut body) = open.take() {
                                self.member(&masked[member_start..i], &mut body, &mut declarations);
                            }
                            top_start = i + 1;
                        }
                        1 => member_start = i + 1,
                        _ => {}
                    }
                }
                b';' => {
                    if depth == 0 {
                        let line = index.line_of(first_non_space(bytes, top_start, i));
                        if let Some(name) = self.typedef_name(&masked[top_start..i]) {
                            let mut decl = Declaration::new(name, DeclarationKind::TypeAlias, path);
                            decl.line = Some(line);
                            declarations.push(decl);
                        }
                        top_start = i + 1;
                    } else if depth == 1 {
                        if let Some(body) = open.as_mut() {
                            self.member(&masked[member_start..i], body, &mut declarations);
                            member_start = i + 1;
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(&unclosed) = braces.last() {
            return Err(ParseError::Syntax {
                path: path.to_path_buf(),
                message: format!("unclosed `{{` at line {}", index.line_of(unclosed)),
            });
        }

        Ok((declarations, index))
    }

    fn clean(&self, text: &str) -> String {
        let text = self.annotation.replace_all(text, " ");
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn declaration(&self, header: &str, path: &Path, line: u32) -> Option<Declaration> {
        let header = self.clean(header);
        let caps = self.header.captures(&header)?;
        let keyword = caps.name("kw")?.as_str();
        let name = caps.name("name")?.as_str();

        let kind = match keyword.split_whitespace().next()? {
            "mixin" if keyword.ends_with("class") => DeclarationKind::Class,
            "class" => DeclarationKind::Class,
            "mixin" => DeclarationKind::Mixin,
            "enum" => DeclarationKind::Enum,
            _ => DeclarationKind::Extension,
        };
        // `extension on String` introduces no name.
        if kind == DeclarationKind::Extension && keyword == "extension" && name == "on" {
            return None;
        }

        let mut decl = Declaration::new(name, kind, path);
        decl.line = Some(line);
        decl.is_abstract = caps
            .name("mods")
            .is_some_and(|m| m.as_str().split_whitespace().any(|w| w == "abstract"));
        let rest = strip_generics(caps.name("rest").map_or("", |m| m.as_str()));
        self.clauses(&rest, &mut decl);
        Some(decl)
    }

    fn clauses(&self, rest: &str, decl: &mut Declaration) {
        let marks: Vec<(usize, usize, &str)> = self
            .clause
            .find_iter(rest)
            .map(|m| (m.start(), m.end(), m.as_str()))
            .collect();

        for (k, &(_, end, keyword)) in marks.iter().enumerate() {
            let stop = marks.get(k + 1).map_or(rest.len(), |m| m.0);
            let mut names = type_list(&rest[end..stop]);
            match keyword {
                "extends" => decl.supertype = names.into_iter().next(),
                "with" => decl.mixins.append(&mut names),
                "implements" => decl.interfaces.append(&mut names),
                "on" if decl.kind == DeclarationKind::Mixin && !names.is_empty() => {
                    decl.supertype = Some(names.remove(0));
                    decl.interfaces.append(&mut names);
                }
                _ => {}
            }
        }
    }

    fn member(&self, segment: &str, body: &mut OpenBody, declarations: &mut [Declaration]) {
        let first = std::mem::replace(&mut body.first_segment, false);
        let Some(owner) = declarations.get_mut(body.index) else {
            return;
        };

        if owner.kind == DeclarationKind::Enum && first {
            for value in segment.split(',') {
                let value = value.split('(').next().unwrap_or("");
                if let Some(name) = leading_identifier(self.clean(value).as_str()) {
                    owner.members.push(name.to_string());
                }
            }
            return;
        }

        let text = strip_generics(&self.clean(segment));
        let head = text.find("=>").map_or(text.as_str(), |i| &text[..i]);
        let cut = match (head.find('('), head.find('=')) {
            (Some(p), Some(e)) => p.min(e),
            (Some(p), None) => p,
            (None, Some(e)) => e,
            (None, None) => head.len(),
        };
        let head = head[..cut].trim_end();
        let Some(name) = trailing_identifier(head) else {
            return;
        };
        let qualified = head[..head.len() - name.len()].ends_with('.');
        if name == owner.name || qualified || is_reserved(name) {
            return;
        }
        if !owner.members.iter().any(|m| m == name) {
            owner.members.push(name.to_string());
        }
    }

    fn typedef_name(&self, statement: &str) -> Option<String> {
        let statement = self.clean(statement);
        let rest = strip_generics(statement.strip_prefix("typedef ")?);
        let name = match rest.find('=') {
            Some(eq) => leading_identifier(rest[..eq].trim()),
            None => trailing_identifier(rest[..rest.find('(')?].trim_end()),
        };
        name.map(str::to_string)
    }
}

impl SourceParser for DeclarationScanner {
    fn resolve(&self, path: &Path, symbols: &SymbolTable) -> Result<ParsedFile, ParseError> {
        let source = read_source(path)?;
        let (declarations, index) = self.scan(path, &source)?;

        let local: HashSet<&str> = declarations.iter().map(|d| d.name.as_str()).collect();
        let mut diagnostics = Vec::new();
        for decl in &declarations {
            for supertype in decl.supertypes() {
                if local.contains(supertype) || symbols.contains(supertype) {
                    continue;
                }
                let diagnostic =
                    Diagnostic::warning(format!("unresolved supertype `{}` of `{}`", supertype, decl.name));
                diagnostics.push(match decl.line {
                    Some(line) => diagnostic.at_line(line),
                    None => diagnostic,
                });
            }
        }

        Ok(ParsedFile {
            declarations,
            diagnostics,
            tree: Some(Arc::new(index)),
        })
    }
}

/// Blank out comments and string literal contents, keeping byte offsets and newlines.
fn mask(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                blank(&mut out, i, 1);
                i += 1;
            }
        } else if rest.starts_with(b"/*") {
            // Block comments nest.
            let mut nesting = 0usize;
            while i < bytes.len() {
                if bytes[i..].starts_with(b"/*") {
                    nesting += 1;
                    blank(&mut out, i, 2);
                    i += 2;
                } else if bytes[i..].starts_with(b"*/") {
                    nesting -= 1;
                    blank(&mut out, i, 2);
                    i += 2;
                    if nesting == 0 {
                        break;
                    }
                } else {
                    blank(&mut out, i, 1);
                    i += 1;
                }
            }
        } else if bytes[i] == b'\'' || bytes[i] == b'"' {
            let quote = bytes[i];
            let fence = [quote; 3];
            let triple = rest.starts_with(&fence);
            i += if triple { 3 } else { 1 };
            while i < bytes.len() {
                if triple && bytes[i..].starts_with(&fence) {
                    i += 3;
                    break;
                }
                if !triple && bytes[i] == quote {
                    i += 1;
                    break;
                }
                if !triple && bytes[i] == b'\n' {
                    break;
                }
                let width = if bytes[i] == b'\\' { 2 } else { 1 };
                blank(&mut out, i, width);
                i += width;
            }
        } else {
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn blank(out: &mut [u8], at: usize, len: usize) {
    for byte in out.iter_mut().skip(at).take(len) {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

fn first_non_space(bytes: &[u8], start: usize, end: usize) -> usize {
    (start..end)
        .find(|&i| !bytes[i].is_ascii_whitespace())
        .unwrap_or(start)
}

/// Drop `<...>` type arguments, including nested ones.
fn strip_generics(text: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Comma-separated type names, import prefixes and nullability dropped.
fn type_list(text: &str) -> Vec<String> {
    text.split(',')
        .filter_map(|item| {
            let item = item.trim();
            let item = item.rsplit('.').next().unwrap_or(item);
            leading_identifier(item).map(str::to_string)
        })
        .collect()
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn leading_identifier(text: &str) -> Option<&str> {
    let end = text
        .char_indices()
        .find(|&(_, c)| !is_identifier_char(c))
        .map_or(text.len(), |(i, _)| i);
    let ident = &text[..end];
    match ident.chars().next() {
        Some(c) if !c.is_ascii_digit() => Some(ident),
        _ => None,
    }
}

fn trailing_identifier(text: &str) -> Option<&str> {
    let start = text
        .char_indices()
        .rev()
        .take_while(|&(_, c)| is_identifier_char(c))
        .last()
        .map(|(i, _)| i)?;
    leading_identifier(&text[start..])
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "operator" | "get" | "set" | "static" | "final" | "const" | "var" | "late" | "factory" | "external"
    )
}
