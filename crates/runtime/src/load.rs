//! Minimal source loader
//!
//! Scans text into a block of cells. Covers what the runtime's own tests
//! and natives need: words in all forms, paths, blocks, groups, integers,
//! decimals, text (`"..."` and `{...}`), tags, chars, issues, binaries,
//! blank, bar and any depth of quoting.
//!
//! Scanning is iterative; nesting depth is bounded only by memory.

use crate::error::{Condition, ErrorId};
use crate::interp::Interpreter;
use ren_core::{Cell, CellFlags, Heap, Kind, NodeId, Subclass};

fn syntax(what: &str, near: impl Into<String>) -> Condition {
    Condition::new(ErrorId::Syntax, [what.to_string(), near.into()])
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | '"' | '{' | '}' | ';')
}

/// An array being filled while its closing bracket is pending.
struct Level {
    kind: Kind,
    cells: Vec<Cell>,
    /// Quote marks written before the opening bracket.
    quotes: u32,
    newline: bool,
}

struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    heap: &'a mut Heap,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn token(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| !is_delimiter(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn escaped_char(&mut self) -> Result<char, Condition> {
        let c = self.peek().ok_or_else(|| syntax("escape", "^"))?;
        self.pos += 1;
        Ok(match c {
            '/' => '\n',
            '-' => '\t',
            '@' => '\0',
            other => other,
        })
    }

    fn quoted_text(&mut self) -> Result<String, Condition> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax("missing", "\"")),
                Some('"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('^') => {
                    self.pos += 1;
                    out.push(self.escaped_char()?);
                }
                Some(c) => {
                    self.pos += 1;
                    out.push(c);
                }
            }
        }
    }

    fn braced_text(&mut self) -> Result<String, Condition> {
        self.pos += 1;
        let mut out = String::new();
        let mut depth = 1;
        loop {
            match self.peek() {
                None => return Err(syntax("missing", "}")),
                Some('^') => {
                    self.pos += 1;
                    out.push(self.escaped_char()?);
                }
                Some(c) => {
                    self.pos += 1;
                    if c == '{' {
                        depth += 1;
                    } else if c == '}' {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(out);
                        }
                    }
                    out.push(c);
                }
            }
        }
    }

    fn string_cell(&mut self, kind: Kind, text: &str) -> Cell {
        let node = self.heap.make_string(text);
        Cell::series(kind, node, 0)
    }

    fn word_cell(&mut self, kind: Kind, name: &str) -> Result<Cell, Condition> {
        if name.is_empty() {
            return Err(syntax("word", name));
        }
        let spelling = self.heap.intern(name);
        Ok(Cell::any_word(kind, spelling))
    }

    fn number_cell(token: &str) -> Result<Cell, Condition> {
        if let Ok(i) = token.parse::<i64>() {
            return Ok(Cell::integer(i));
        }
        match token.parse::<f64>() {
            Ok(d) if d.is_finite() => Ok(Cell::decimal(d)),
            _ => Err(syntax("number", token)),
        }
    }

    fn looks_numeric(token: &str) -> bool {
        let mut chars = token.chars();
        match chars.next() {
            Some(c) if c.is_ascii_digit() => true,
            Some('-' | '+') => chars.next().is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        }
    }

    /// Word, set-word, path or set-path from a bare token. `get` turns
    /// words and paths into their get- forms.
    fn token_cell(&mut self, token: &str, get: bool) -> Result<Cell, Condition> {
        let (body, set) = match token.strip_suffix(':') {
            Some(body) if !get && !body.is_empty() => (body, true),
            _ => (token, false),
        };
        let is_path = body.len() > 1 && body.contains('/') && !body.chars().all(|c| c == '/');
        if !is_path {
            let kind = match (get, set) {
                (true, _) => Kind::GetWord,
                (_, true) => Kind::SetWord,
                _ => Kind::Word,
            };
            return self.word_cell(kind, body);
        }
        let mut parts = Vec::new();
        for part in body.split('/') {
            if part.is_empty() {
                return Err(syntax("path", token));
            }
            if Self::looks_numeric(part) {
                parts.push(Self::number_cell(part)?);
            } else {
                parts.push(self.word_cell(Kind::Word, part)?);
            }
        }
        let node = self.heap.make_managed_array(Subclass::Array, parts);
        let kind = match (get, set) {
            (true, _) => Kind::GetPath,
            (_, true) => Kind::SetPath,
            _ => Kind::Path,
        };
        Ok(Cell::series(kind, node, 0))
    }

    fn binary_cell(&mut self) -> Result<Cell, Condition> {
        self.pos += 2;
        let mut digits = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax("missing", "}")),
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some(c) => {
                    digits.push(c);
                    self.pos += 1;
                }
            }
        }
        if digits.len() % 2 != 0 {
            return Err(syntax("binary", digits));
        }
        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for i in (0..digits.len()).step_by(2) {
            let pair = digits.get(i..i + 2).ok_or_else(|| syntax("binary", digits.clone()))?;
            let b = u8::from_str_radix(pair, 16).map_err(|_| syntax("binary", pair))?;
            bytes.push(b);
        }
        let node = self.heap.make_bytes(bytes);
        Ok(Cell::series(Kind::Binary, node, 0))
    }

    fn char_cell(&mut self) -> Result<Cell, Condition> {
        self.pos += 1;
        let text = self.quoted_text()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Cell::char(c)),
            _ => Err(syntax("char", text)),
        }
    }

    /// Scan one non-bracket value starting at the current position.
    fn scalar(&mut self) -> Result<Cell, Condition> {
        let c = self.peek().ok_or_else(|| syntax("end", ""))?;
        match c {
            '"' => {
                let text = self.quoted_text()?;
                Ok(self.string_cell(Kind::Text, &text))
            }
            '{' => {
                let text = self.braced_text()?;
                Ok(self.string_cell(Kind::Text, &text))
            }
            '<' if self
                .peek_at(1)
                .is_some_and(|n| n.is_alphanumeric() || n == '.' || n == '/') =>
            {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != '>') {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(syntax("missing", ">"));
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(self.string_cell(Kind::Tag, &text))
            }
            '#' if self.peek_at(1) == Some('"') => self.char_cell(),
            '#' if self.peek_at(1) == Some('{') => self.binary_cell(),
            '#' => {
                self.pos += 1;
                let token = self.token();
                self.word_cell(Kind::Issue, &token)
            }
            ':' => {
                self.pos += 1;
                let token = self.token();
                self.token_cell(&token, true)
            }
            '/' if self.peek_at(1).is_some_and(|n| !is_delimiter(n) && n != '/') => {
                self.pos += 1;
                let token = self.token();
                self.word_cell(Kind::Refinement, &token)
            }
            _ => {
                let token = self.token();
                if token.is_empty() {
                    return Err(syntax("character", c.to_string()));
                }
                match token.as_str() {
                    "_" => Ok(Cell::blank()),
                    "|" => Ok(Cell::bar()),
                    t if Self::looks_numeric(t) => Self::number_cell(t),
                    t => self.token_cell(t, false),
                }
            }
        }
    }

    fn run(mut self) -> Result<NodeId, Condition> {
        let mut stack = vec![Level {
            kind: Kind::Block,
            cells: Vec::new(),
            quotes: 0,
            newline: false,
        }];
        let mut newline = false;
        let mut quotes = 0u32;

        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                if c == '\n' {
                    newline = true;
                }
                self.pos += 1;
                continue;
            }
            if c == ';' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                continue;
            }
            if c == '\'' {
                quotes += 1;
                self.pos += 1;
                continue;
            }
            match c {
                '[' | '(' => {
                    self.pos += 1;
                    stack.push(Level {
                        kind: if c == '[' { Kind::Block } else { Kind::Group },
                        cells: Vec::new(),
                        quotes: std::mem::take(&mut quotes),
                        newline: std::mem::take(&mut newline),
                    });
                    continue;
                }
                ']' | ')' => {
                    self.pos += 1;
                    let expected = if c == ']' { Kind::Block } else { Kind::Group };
                    if quotes > 0 {
                        return Err(syntax("quote", c.to_string()));
                    }
                    let level = match stack.pop() {
                        Some(level) if stack.is_empty() => {
                            stack.push(level);
                            return Err(syntax("extra", c.to_string()));
                        }
                        Some(level) => level,
                        None => return Err(syntax("extra", c.to_string())),
                    };
                    if level.kind != expected {
                        let want = if level.kind == Kind::Block { "]" } else { ")" };
                        return Err(syntax("missing", want));
                    }
                    let node = self.heap.make_managed_array(Subclass::Array, level.cells);
                    let mut cell = Cell::series(level.kind, node, 0);
                    if level.newline {
                        cell.set_flag(CellFlags::NEWLINE_BEFORE);
                    }
                    let cell = self.heap.quotify(cell, level.quotes);
                    if let Some(parent) = stack.last_mut() {
                        parent.cells.push(cell);
                    }
                    continue;
                }
                _ => {}
            }
            let mut cell = self.scalar()?;
            if std::mem::take(&mut newline) {
                cell.set_flag(CellFlags::NEWLINE_BEFORE);
            }
            let cell = self.heap.quotify(cell, std::mem::take(&mut quotes));
            if let Some(level) = stack.last_mut() {
                level.cells.push(cell);
            }
        }

        if quotes > 0 {
            return Err(syntax("quote", "end of input"));
        }
        if stack.len() > 1 {
            let want = match stack.last().map(|l| l.kind) {
                Some(Kind::Group) => ")",
                _ => "]",
            };
            return Err(syntax("missing", want));
        }
        let cells = stack.pop().map(|l| l.cells).unwrap_or_default();
        Ok(self.heap.make_managed_array(Subclass::Array, cells))
    }
}

/// Scan `text` into a managed, unbound array.
pub fn scan(heap: &mut Heap, text: &str) -> Result<NodeId, Condition> {
    Scanner {
        chars: text.chars().collect(),
        pos: 0,
        heap,
    }
    .run()
}

impl Interpreter {
    /// Scan `text` and bind it into the library context, creating library
    /// variables for words not seen before.
    pub fn load(&mut self, text: &str) -> Result<NodeId, Condition> {
        let array = scan(&mut self.heap, text)?;
        self.bind_deep(array, self.lib, true)?;
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mold::mold;

    fn round(text: &str) -> String {
        let mut heap = Heap::default();
        let array = scan(&mut heap, text).unwrap();
        let items: Vec<String> = heap.cells(array).iter().map(|c| mold(&heap, c)).collect();
        items.join(" ")
    }

    #[test]
    fn test_scan_words_and_paths() {
        assert_eq!(round("a b: :c /d #e"), "a b: :c /d #e");
        assert_eq!(round("a/b/1 a/b: :a/b"), "a/b/1 a/b: :a/b");
        assert_eq!(round("+ - * / = <"), "+ - * / = <");
    }

    #[test]
    fn test_scan_numbers_and_scalars() {
        assert_eq!(round("1 -2 3.5 _ |"), "1 -2 3.5 _ |");
        assert_eq!(round("#\"x\" #{0aFF}"), "#\"x\" #{0AFF}");
    }

    #[test]
    fn test_scan_strings_and_tags() {
        assert_eq!(round(r#""a^/b" {x {y}} <opt> <...>"#), "\"a^/b\" \"x {y}\" <opt> <...>");
    }

    #[test]
    fn test_scan_quotes() {
        assert_eq!(round("'a ''b '''''[c] '1"), "'a ''b '''''[c] '1");
    }

    #[test]
    fn test_scan_nesting_and_comments() {
        assert_eq!(round("[a (b [c])] ; trailing\n d"), "[a (b [c])] d");
    }

    #[test]
    fn test_scan_errors() {
        let mut heap = Heap::default();
        let err = scan(&mut heap, "[a (b]").unwrap_err();
        assert_eq!(err.id, ErrorId::Syntax);
        assert!(scan(&mut heap, "a ]").is_err());
        assert!(scan(&mut heap, "\"open").is_err());
        assert!(scan(&mut heap, "[").is_err());
    }

    #[test]
    fn test_deep_nesting_scans_iteratively() {
        let depth = 100_000;
        let text = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let mut heap = Heap::default();
        let array = scan(&mut heap, &text).unwrap();
        assert_eq!(heap.len(array), 1);
    }
}
