//! JSON-path addressing.
//!
//! Only the subset needed for diagnostics and directed mutation:
//! `$`, `.name`, `['quoted name']` and `[index]`.

use crate::error::PathError;
use std::fmt;

/// One step of a [`JsonPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    pub fn key(name: impl Into<String>) -> Self {
        Segment::Key(name.into())
    }
}

/// An ordered sequence of object keys and array indices, rooted at `$`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// Replace the last segment; no-op on the root path.
    pub fn set_last(&mut self, segment: Segment) {
        if let Some(last) = self.segments.last_mut() {
            *last = segment;
        }
    }

    /// A new path extended by one segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut child = self.clone();
        child.push(segment);
        child
    }

    /// Parse a path string. A leading `$` is optional.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        Parser::new(input).parse()
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn fail<T>(&self) -> Result<T, PathError> {
        Err(PathError::Parse {
            path: self.input.to_string(),
            offset: self.offset(),
        })
    }

    fn expect(&mut self, expected: char) -> Result<(), PathError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            self.fail()
        }
    }

    fn parse(mut self) -> Result<JsonPath, PathError> {
        if self.peek() == Some('$') {
            self.pos += 1;
        }

        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    segments.push(Segment::Key(self.identifier()?));
                }
                '[' => {
                    self.pos += 1;
                    segments.push(self.bracketed()?);
                    self.expect(']')?;
                }
                _ => return self.fail(),
            }
        }
        Ok(JsonPath { segments })
    }

    fn identifier(&mut self) -> Result<String, PathError> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !is_plain_char(c) {
                break;
            }
            name.push(c);
            self.pos += 1;
        }
        if name.is_empty() {
            return self.fail();
        }
        Ok(name)
    }

    fn bracketed(&mut self) -> Result<Segment, PathError> {
        match self.peek() {
            Some('\'') => {
                self.pos += 1;
                let mut name = String::new();
                loop {
                    match self.peek() {
                        None => return self.fail(),
                        Some('\'') => {
                            self.pos += 1;
                            return Ok(Segment::Key(name));
                        }
                        Some('\\') => {
                            self.pos += 1;
                            match self.peek() {
                                Some(c @ ('\'' | '\\')) => {
                                    name.push(c);
                                    self.pos += 1;
                                }
                                _ => return self.fail(),
                            }
                        }
                        Some(c) => {
                            name.push(c);
                            self.pos += 1;
                        }
                    }
                }
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = self.peek().filter(char::is_ascii_digit) {
                    digits.push(d);
                    self.pos += 1;
                }
                match digits.parse() {
                    Ok(idx) => Ok(Segment::Index(idx)),
                    Err(_) => self.fail(),
                }
            }
            _ => self.fail(),
        }
    }
}

fn is_plain_char(c: char) -> bool {
    !matches!(c, '.' | '[' | ']' | '\'' | '\\' | '$') && !c.is_whitespace()
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(is_plain_char)
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                Segment::Index(i) => write!(f, "[{}]", i)?,
                Segment::Key(k) if is_plain_key(k) => write!(f, ".{}", k)?,
                Segment::Key(k) => {
                    write!(f, "['")?;
                    for c in k.chars() {
                        if c == '\'' || c == '\\' {
                            write!(f, "\\")?;
                        }
                        write!(f, "{}", c)?;
                    }
                    write!(f, "']")?;
                }
            }
        }
        Ok(())
    }
}
