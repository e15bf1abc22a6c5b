//! S-expression layer for KiCad on-disk formats.
//!
//! KiCad 6 boards, schematics and projects are S-expression documents. This
//! parser keeps atoms as the raw tokens found in the file (numbers included),
//! so a document can be re-serialized without altering values we never
//! touched. Only the operations the rest of the crate needs are provided:
//! path queries (`kicad_pcb/setup/stackup`), child lookup by head symbol and
//! in-place mutation for the variant filters.

use std::fmt;

use thiserror::Error;

/// Parse failure, with the line it happened on.
#[derive(Error, Debug)]
#[error("at line {line}: {message}")]
pub struct SexprError {
    /// 1-based line number.
    pub line: usize,
    /// Diagnostic text.
    pub message: String,
}

impl SexprError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A single node of an S-expression document.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    /// A bare token: symbol or number, kept verbatim.
    Symbol(String),
    /// A quoted string, with escapes resolved.
    Str(String),
    /// A parenthesized list.
    List(Vec<Sexpr>),
}

impl Sexpr {
    /// Builds a symbol atom.
    pub fn sym(s: impl Into<String>) -> Self {
        Self::Symbol(s.into())
    }

    /// Builds a quoted string atom.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Builds a numeric atom, formatted the way KiCad writes coordinates
    /// (up to six decimals, trailing zeros trimmed).
    #[must_use]
    pub fn num(v: f64) -> Self {
        let mut s = format!("{v:.6}");
        if s.contains('.') {
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
        }
        Self::Symbol(s)
    }

    /// The head symbol of a list, e.g. `layer` for `(layer "F.Cu")`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::List(items) => match items.first() {
                Some(Self::Symbol(s)) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Atom text, for both symbols and quoted strings.
    #[must_use]
    pub fn atom(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) | Self::Str(s) => Some(s.as_str()),
            Self::List(_) => None,
        }
    }

    /// Atom parsed as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.atom().and_then(|s| s.parse().ok())
    }

    /// List items (empty slice for atoms).
    #[must_use]
    pub fn items(&self) -> &[Sexpr] {
        match self {
            Self::List(items) => items.as_slice(),
            _ => &[],
        }
    }

    /// Mutable list items.
    pub fn items_mut(&mut self) -> &mut Vec<Sexpr> {
        match self {
            Self::List(items) => items,
            _ => unreachable!("items_mut on an atom"),
        }
    }

    /// First child list with the given head symbol.
    #[must_use]
    pub fn find(&self, head: &str) -> Option<&Sexpr> {
        self.items().iter().find(|e| e.name() == Some(head))
    }

    /// Mutable version of [`Sexpr::find`].
    pub fn find_mut(&mut self, head: &str) -> Option<&mut Sexpr> {
        match self {
            Self::List(items) => items.iter_mut().find(|e| e.name() == Some(head)),
            _ => None,
        }
    }

    /// All child lists with the given head symbol.
    pub fn find_all<'a>(&'a self, head: &'a str) -> impl Iterator<Item = &'a Sexpr> {
        self.items()
            .iter()
            .filter(move |e| e.name() == Some(head))
    }

    /// The value of a `(head value)` child, e.g. `F.Cu` for `(layer F.Cu)`.
    #[must_use]
    pub fn value_of(&self, head: &str) -> Option<&str> {
        self.find(head).and_then(|e| e.items().get(1)).and_then(Sexpr::atom)
    }

    /// Walks a `a/b/c` path of nested list heads and returns every match at
    /// the final level. The first path element must match this node's head.
    #[must_use]
    pub fn query(&self, path: &str) -> Vec<&Sexpr> {
        let mut parts = path.split('/');
        let Some(first) = parts.next() else {
            return Vec::new();
        };
        if self.name() != Some(first) {
            return Vec::new();
        }
        let mut level: Vec<&Sexpr> = vec![self];
        for part in parts {
            let mut next = Vec::new();
            for node in level {
                next.extend(node.items().iter().filter(|e| e.name() == Some(part)));
            }
            level = next;
        }
        level
    }

    /// Parses a document. The top level must be a single list.
    pub fn parse(text: &str) -> Result<Self, SexprError> {
        let mut parser = Parser {
            chars: text.chars().peekable(),
            line: 1,
        };
        parser.skip_ws();
        let root = parser.node()?;
        parser.skip_ws();
        if parser.chars.peek().is_some() {
            return Err(SexprError::new(parser.line, "trailing data after document"));
        }
        match root {
            Self::List(_) => Ok(root),
            _ => Err(SexprError::new(1, "expected a list at the top level")),
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Self::Symbol(s) => f.write_str(s),
            Self::Str(s) => write_quoted(f, s),
            Self::List(items) => {
                f.write_str("(")?;
                let mut first = true;
                for item in items {
                    // Nested lists go on their own line, atoms stay inline.
                    match item {
                        Self::List(_) => {
                            writeln!(f)?;
                            for _ in 0..=indent {
                                f.write_str("  ")?;
                            }
                            item.write_indented(f, indent + 1)?;
                        }
                        _ => {
                            if !first {
                                f.write_str(" ")?;
                            }
                            item.write_indented(f, indent)?;
                        }
                    }
                    first = false;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)?;
        if matches!(self, Self::List(_)) {
            writeln!(f)?;
        }
        Ok(())
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                self.line += 1;
            }
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn node(&mut self) -> Result<Sexpr, SexprError> {
        match self.chars.peek() {
            Some('(') => self.list(),
            Some('"') => self.quoted(),
            Some(_) => self.symbol(),
            None => Err(SexprError::new(self.line, "unexpected end of file")),
        }
    }

    fn list(&mut self) -> Result<Sexpr, SexprError> {
        let open_line = self.line;
        self.chars.next(); // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some(')') => {
                    self.chars.next();
                    return Ok(Sexpr::List(items));
                }
                Some(_) => items.push(self.node()?),
                None => {
                    return Err(SexprError::new(
                        open_line,
                        "unterminated list (missing `)`)",
                    ))
                }
            }
        }
    }

    fn quoted(&mut self) -> Result<Sexpr, SexprError> {
        let open_line = self.line;
        self.chars.next(); // consume '"'
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(Sexpr::Str(s)),
                Some('\\') => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(SexprError::new(open_line, "unterminated string")),
                },
                Some('\n') => {
                    self.line += 1;
                    s.push('\n');
                }
                Some(c) => s.push(c),
                None => return Err(SexprError::new(open_line, "unterminated string")),
            }
        }
    }

    fn symbol(&mut self) -> Result<Sexpr, SexprError> {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                break;
            }
            s.push(c);
            self.chars.next();
        }
        Ok(Sexpr::Symbol(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_atoms_and_lists() {
        let doc = Sexpr::parse("(kicad_pcb (version 20211014) (layer \"F.Cu\"))").unwrap();
        assert_eq!(doc.name(), Some("kicad_pcb"));
        assert_eq!(doc.value_of("version"), Some("20211014"));
        assert_eq!(doc.value_of("layer"), Some("F.Cu"));
    }

    #[test]
    fn query_walks_nested_paths() {
        let doc =
            Sexpr::parse("(kicad_pcb (setup (stackup (layer \"F.Cu\") (layer \"B.Cu\"))))").unwrap();
        let found = doc.query("kicad_pcb/setup/stackup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].find_all("layer").count(), 2);
    }

    #[test]
    fn query_results_outlive_the_path() {
        let doc = Sexpr::parse("(kicad_pcb (net 0 \"\") (net 1 \"GND\"))").unwrap();
        let found = {
            let path = String::from("kicad_pcb/net");
            doc.query(&path)
        };
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].items()[2].atom(), Some("GND"));
    }

    #[test]
    fn query_wrong_root_is_empty() {
        let doc = Sexpr::parse("(kicad_sch (setup))").unwrap();
        assert!(doc.query("kicad_pcb/setup").is_empty());
    }

    #[test]
    fn string_escapes_round_trip() {
        let doc = Sexpr::parse(r#"(title "a \"quoted\" name")"#).unwrap();
        assert_eq!(doc.items()[1].atom(), Some("a \"quoted\" name"));
        let text = doc.to_string();
        let again = Sexpr::parse(&text).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn numbers_stay_verbatim() {
        let doc = Sexpr::parse("(at 123.456789 -0.1)").unwrap();
        let text = doc.to_string();
        assert!(text.contains("123.456789"));
        assert!(text.contains("-0.1"));
    }

    #[test]
    fn num_formatting_trims_zeros() {
        assert_eq!(Sexpr::num(1.5), Sexpr::sym("1.5"));
        assert_eq!(Sexpr::num(2.0), Sexpr::sym("2"));
        assert_eq!(Sexpr::num(0.123456), Sexpr::sym("0.123456"));
    }

    #[test]
    fn unterminated_list_reports_line() {
        let err = Sexpr::parse("(a\n(b\n").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
