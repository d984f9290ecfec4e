/// Line-oriented reader for the TOML subset used by model files.
///
/// Supports `[section]` and `[section.name]` headers, `key = value` pairs
/// with bare or quoted keys, strings, integers, floats, booleans and
/// single-line arrays. Every key and value keeps its byte span so later
/// stages can point diagnostics at the offending text.
use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<Spanned<Value>>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "a string",
            Value::Int(_) => "an integer",
            Value::Float(_) => "a float",
            Value::Bool(_) => "a boolean",
            Value::Array(_) => "an array",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub key: Spanned<String>,
    pub value: Spanned<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    pub name: Spanned<String>,
    pub entries: Vec<Entry>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key.node == key)
    }
}

/// Split `source` into sections. All syntax errors are collected.
pub fn parse_document(source: &str) -> Result<Vec<Section>, Vec<Diagnostic>> {
    let mut sections: Vec<Section> = Vec::new();
    let mut diagnostics = Vec::new();
    let mut offset = 0usize;

    for raw in source.split_inclusive('\n') {
        let base = offset;
        offset += raw.len();
        let line = raw.trim_end_matches(['\n', '\r']);
        let mut cur = Cursor::new(line, base);
        cur.skip_ws();
        if cur.at_end() {
            continue;
        }

        if cur.peek() == Some('[') {
            match cur.header() {
                Ok(name) => {
                    if let Some(prev) = sections.iter().find(|s| s.name.node == name.node) {
                        diagnostics.push(
                            Diagnostic::error(
                                format!("duplicate section [{}]", name.node),
                                name.span,
                            )
                            .with_note(format!(
                                "first declared at byte {}",
                                prev.name.span.start
                            )),
                        );
                    }
                    sections.push(Section {
                        name,
                        entries: Vec::new(),
                    });
                }
                Err(d) => diagnostics.push(d),
            }
            continue;
        }

        let entry = match cur.entry() {
            Ok(entry) => entry,
            Err(d) => {
                diagnostics.push(d);
                continue;
            }
        };
        let Some(section) = sections.last_mut() else {
            diagnostics.push(
                Diagnostic::error("key outside of any section".to_string(), entry.key.span)
                    .with_help("start the file with a header such as [model]".to_string()),
            );
            continue;
        };
        if section.get(&entry.key.node).is_some() {
            diagnostics.push(Diagnostic::error(
                format!("duplicate key '{}' in [{}]", entry.key.node, section.name.node),
                entry.key.span,
            ));
            continue;
        }
        section.entries.push(entry);
    }

    if diagnostics.is_empty() {
        Ok(sections)
    } else {
        Err(diagnostics)
    }
}

// ---------------------------------------------------------------------------
// Cursor over one line
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    line: &'a str,
    pos: usize,
    base: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str, base: usize) -> Self {
        Self { line, pos: 0, base }
    }

    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    /// End of line or start of a comment.
    fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some('#'))
    }

    fn span(&self, from: usize) -> Span {
        Span::new((self.base + from) as u32, (self.base + self.pos) as u32)
    }

    fn span_to_end(&self, from: usize) -> Span {
        Span::new((self.base + from) as u32, (self.base + self.line.len()) as u32)
    }

    fn expect_end(&mut self) -> Result<(), Diagnostic> {
        self.skip_ws();
        if self.at_end() {
            return Ok(());
        }
        let start = self.pos;
        Err(Diagnostic::error(
            "unexpected text after value".to_string(),
            self.span_to_end(start),
        ))
    }

    fn header(&mut self) -> Result<Spanned<String>, Diagnostic> {
        let open = self.pos;
        self.bump();
        let start = self.pos;
        while !matches!(self.peek(), None | Some(']')) {
            self.bump();
        }
        if self.peek().is_none() {
            return Err(Diagnostic::error(
                "unterminated section header".to_string(),
                self.span(open),
            ));
        }
        let name = self.line[start..self.pos].trim().to_string();
        self.bump();
        let span = self.span(open);
        if name.is_empty() || name.split('.').any(|part| !is_bare_key(part.trim())) {
            return Err(Diagnostic::error(
                format!("invalid section name '{}'", name),
                span,
            ));
        }
        self.expect_end()?;
        Ok(Spanned::new(name, span))
    }

    fn entry(&mut self) -> Result<Entry, Diagnostic> {
        let key = self.key()?;
        self.skip_ws();
        if self.peek() != Some('=') {
            return Err(Diagnostic::error(
                format!("expected '=' after key '{}'", key.node),
                key.span,
            ));
        }
        self.bump();
        self.skip_ws();
        let value = self.value()?;
        self.expect_end()?;
        Ok(Entry { key, value })
    }

    fn key(&mut self) -> Result<Spanned<String>, Diagnostic> {
        let start = self.pos;
        if self.peek() == Some('"') {
            let s = self.string()?;
            return Ok(Spanned::new(s, self.span(start)));
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            self.bump();
        }
        if self.pos == start {
            return Err(Diagnostic::error(
                "expected a key".to_string(),
                self.span_to_end(start),
            ));
        }
        Ok(Spanned::new(
            self.line[start..self.pos].to_string(),
            self.span(start),
        ))
    }

    fn value(&mut self) -> Result<Spanned<Value>, Diagnostic> {
        let start = self.pos;
        let value = match self.peek() {
            Some('"') => Value::Str(self.string()?),
            Some('[') => self.array(start)?,
            Some(c) if c.is_ascii_alphabetic() => {
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
                    self.bump();
                }
                match &self.line[start..self.pos] {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    word => {
                        return Err(Diagnostic::error(
                            format!("unexpected '{}'", word),
                            self.span(start),
                        )
                        .with_help(format!("strings must be quoted: \"{}\"", word)))
                    }
                }
            }
            Some(_) => self.number(start)?,
            None => {
                return Err(Diagnostic::error(
                    "expected a value".to_string(),
                    self.span(start),
                ))
            }
        };
        Ok(Spanned::new(value, self.span(start)))
    }

    fn string(&mut self) -> Result<String, Diagnostic> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c @ ('"' | '\\')) => out.push(c),
                    _ => {
                        return Err(Diagnostic::error(
                            "invalid escape sequence".to_string(),
                            self.span(start),
                        ))
                    }
                },
                Some(c) => out.push(c),
                None => {
                    return Err(Diagnostic::error(
                        "unterminated string".to_string(),
                        self.span(start),
                    ))
                }
            }
        }
    }

    fn array(&mut self, start: usize) -> Result<Value, Diagnostic> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(Value::Array(items));
            }
            if self.at_end() {
                return Err(Diagnostic::error(
                    "unterminated array".to_string(),
                    self.span(start),
                )
                .with_help("arrays must close on the line they open".to_string()));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {}
                _ if self.at_end() => {}
                _ => {
                    let at = self.pos;
                    return Err(Diagnostic::error(
                        "expected ',' or ']' in array".to_string(),
                        self.span_to_end(at),
                    ));
                }
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Value, Diagnostic> {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | '_' | 'e' | 'E'))
        {
            self.bump();
        }
        let text: String = self.line[start..self.pos].chars().filter(|c| *c != '_').collect();
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Value::Int(v));
        }
        if let Ok(v) = text.parse::<f64>() {
            if v.is_finite() {
                return Ok(Value::Float(v));
            }
        }
        if self.pos == start {
            self.bump();
        }
        Err(Diagnostic::error(
            format!("invalid value '{}'", &self.line[start..self.pos]),
            self.span(start),
        ))
    }
}

fn is_bare_key(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
