//! Paths into reactive state.
//!
//! A path locates a value inside a wrapped object graph using dot and
//! bracket notation: `user.address[0].city`. Keys that themselves contain
//! `.`, `[` or `]` are written in quoted bracket form: `headers["x.y"]`.
//!
//! Every path has exactly one canonical string form (its `Display`), which
//! is what subscriptions are keyed by, so `a["b"][0]` and `a.b[0]` name the
//! same subscription. Numeric keys address the same slot as indices and
//! print as indices: `items.2` is `items[2]`. Inside quotes, `\` escapes the
//! next character.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::error::PathError;

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// The array index this segment addresses, if any. Numeric keys count.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) => numeric_key(k),
        }
    }

    /// The object key this segment addresses.
    pub fn to_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

/// `"2"` is numeric, `"02"` and `"+2"` are plain keys.
fn numeric_key(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

fn needs_quotes(key: &str) -> bool {
    key.is_empty() || key.contains(['.', '[', ']'])
}

/// A parsed path. The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The empty path, addressing the whole state.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse dot/bracket notation. The empty string is the root path.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let chars: Vec<char> = input.chars().collect();
        let mut segments = Vec::new();
        let mut pos = 0;
        // Whether the previous token requires a key next (after a `.`).
        let mut expect_key = false;

        while pos < chars.len() {
            match chars[pos] {
                '[' => {
                    if expect_key {
                        return Err(PathError::EmptySegment(pos, input.to_string()));
                    }
                    let open = pos;
                    pos += 1;
                    if matches!(chars.get(pos), Some('"' | '\'')) {
                        let quote = chars[pos];
                        pos += 1;
                        let mut key = String::new();
                        loop {
                            match chars.get(pos) {
                                Some('\\') if pos + 1 < chars.len() => {
                                    key.push(chars[pos + 1]);
                                    pos += 2;
                                }
                                Some(c) if *c != quote => {
                                    key.push(*c);
                                    pos += 1;
                                }
                                _ => break,
                            }
                        }
                        if chars.get(pos) != Some(&quote) || chars.get(pos + 1) != Some(&']') {
                            return Err(PathError::UnterminatedIndex(open, input.to_string()));
                        }
                        segments.push(Segment::Key(key));
                        pos += 2;
                    } else {
                        let start = pos;
                        while pos < chars.len() && chars[pos] != ']' {
                            pos += 1;
                        }
                        if pos >= chars.len() {
                            return Err(PathError::UnterminatedIndex(open, input.to_string()));
                        }
                        let raw: String = chars[start..pos].iter().collect();
                        let index = raw.trim().parse().map_err(|_| PathError::InvalidIndex {
                            index: raw.clone(),
                            path: input.to_string(),
                        })?;
                        segments.push(Segment::Index(index));
                        pos += 1;
                    }
                }
                '.' => {
                    if expect_key || segments.is_empty() {
                        return Err(PathError::EmptySegment(pos, input.to_string()));
                    }
                    expect_key = true;
                    pos += 1;
                }
                ']' => return Err(PathError::EmptySegment(pos, input.to_string())),
                _ => {
                    if !segments.is_empty() && !expect_key {
                        // `a[0]b` has no separator before `b`.
                        return Err(PathError::EmptySegment(pos, input.to_string()));
                    }
                    let start = pos;
                    while pos < chars.len() && !matches!(chars[pos], '.' | '[' | ']') {
                        pos += 1;
                    }
                    segments.push(Segment::Key(chars[start..pos].iter().collect()));
                    expect_key = false;
                }
            }
        }

        if expect_key {
            return Err(PathError::EmptySegment(chars.len(), input.to_string()));
        }
        Ok(Self(segments))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Final segment, or `None` for the root.
    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// The containing path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    /// Split into (container path, final segment).
    pub fn split_last(&self) -> Option<(Path, &Segment)> {
        let (last, rest) = self.0.split_last()?;
        Some((Self(rest.to_vec()), last))
    }

    /// This path extended by one segment.
    pub fn join(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// This path followed by every segment of `other`.
    pub fn concat(&self, other: &Path) -> Path {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) if numeric_key(key).is_some() => write!(f, "[{key}]")?,
                Segment::Key(key) if needs_quotes(key) => {
                    f.write_str("[\"")?;
                    for c in key.chars() {
                        if matches!(c, '"' | '\\') {
                            f.write_char('\\')?;
                        }
                        f.write_char(c)?;
                    }
                    f.write_str("\"]")?;
                }
                Segment::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}
