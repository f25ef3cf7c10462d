//! Source Reader
//!
//! Loads one file into a contiguous buffer, tracks (line, column), and
//! maintains the include stack the Preprocessor drives for `#include`.
//! Backslash-newline splicing is handled transparently here: callers see
//! logical characters, never the raw `\` + `\n` pair.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// One loaded source file. Immutable once created; shared by `Rc` so every
/// token's location can cheaply point back at it.
#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    /// Buffer content, NUL-terminated so the scanner always has a safe
    /// one-character lookahead without bounds checks.
    pub buffer: Vec<u8>,
}

impl SourceFile {
    pub fn from_str(name: impl Into<String>, text: &str) -> Self {
        let mut buffer = text.as_bytes().to_vec();
        buffer.push(0);
        SourceFile { name: name.into(), buffer }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(SourceFile::from_str(path.display().to_string(), &text))
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}

/// A quadruple: shared file reference, line, column, and a byte offset into
/// the file's buffer (stands in for "pointer into the buffer").
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Rc<SourceFile>,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl PartialEq for SourceLocation {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.file, &other.file)
            && self.line == other.line
            && self.column == other.column
            && self.offset == other.offset
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display_name(), self.line, self.column)
    }
}

/// Cursor over a [`SourceFile`]'s buffer. Presents backslash-newline
/// spliced lines as a single logical character stream; bumps the line
/// counter across a splice without emitting anything for it.
pub struct SourceReader {
    file: Rc<SourceFile>,
    pos: usize,
    line: u32,
    line_start: usize,
}

impl SourceReader {
    pub fn new(file: Rc<SourceFile>) -> Self {
        SourceReader { file, pos: 0, line: 1, line_start: 0 }
    }

    pub fn file(&self) -> &Rc<SourceFile> {
        &self.file
    }

    fn raw_at(&self, pos: usize) -> u8 {
        self.file.buffer.get(pos).copied().unwrap_or(0)
    }

    /// Splice `\` immediately followed by a newline (`\n` or `\r\n`) out of
    /// the stream at `pos`, returning the number of raw bytes a splice
    /// consumes there, or 0 if there is none to splice.
    fn splice_len_at(&self, pos: usize) -> usize {
        if self.raw_at(pos) != b'\\' {
            return 0;
        }
        match self.raw_at(pos + 1) {
            b'\n' => 2,
            b'\r' if self.raw_at(pos + 2) == b'\n' => 3,
            _ => 0,
        }
    }

    /// Peek the next logical character without consuming it.
    pub fn peek(&self) -> u8 {
        let mut p = self.pos;
        loop {
            let spliced = self.splice_len_at(p);
            if spliced == 0 {
                return self.raw_at(p);
            }
            p += spliced;
        }
    }

    /// Peek `n` logical characters ahead (0 = next character).
    pub fn peek_at(&self, n: usize) -> u8 {
        let mut p = self.pos;
        let mut remaining = n;
        loop {
            let spliced = self.splice_len_at(p);
            if spliced > 0 {
                p += spliced;
                continue;
            }
            if remaining == 0 {
                return self.raw_at(p);
            }
            if self.raw_at(p) == 0 {
                return 0;
            }
            p += 1;
            remaining -= 1;
        }
    }

    /// Current logical offset, line, and column (1-based column).
    pub fn location(&self) -> (usize, u32, u32) {
        let col = (self.pos - self.line_start + 1) as u32;
        (self.pos, self.line, col)
    }

    pub fn make_location(&self, file: &Rc<SourceFile>) -> SourceLocation {
        let (offset, line, column) = self.location();
        SourceLocation { file: Rc::clone(file), line, column, offset }
    }

    /// Consume and return the next logical character, transparently
    /// skipping any backslash-newline splices first.
    pub fn advance(&mut self) -> u8 {
        loop {
            let spliced = self.splice_len_at(self.pos);
            if spliced == 0 {
                break;
            }
            self.pos += spliced;
            self.line += 1;
            self.line_start = self.pos;
        }
        let c = self.raw_at(self.pos);
        if c == 0 {
            return 0;
        }
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        c
    }

    pub fn is_at_end(&self) -> bool {
        self.peek() == 0
    }
}

/// One entry on the include stack: the file currently being scanned, the
/// reader's cursor, and the location we'll resume at in the includer.
pub struct IncludeFrame {
    pub file: Rc<SourceFile>,
}

/// Ordered include search: quoted form tries the includer's directory
/// first, then `-I` paths, then builtin system paths; angled form skips
/// the includer's directory.
pub struct IncludeStack {
    frames: Vec<IncludeFrame>,
    pub user_paths: Vec<PathBuf>,
    pub system_paths: Vec<PathBuf>,
    /// Files that carried `#pragma once` and must not be included again,
    /// keyed by canonicalized path.
    once_guarded: HashSet<PathBuf>,
}

impl IncludeStack {
    pub fn new(user_paths: Vec<PathBuf>, system_paths: Vec<PathBuf>) -> Self {
        IncludeStack { frames: Vec::new(), user_paths, system_paths, once_guarded: HashSet::new() }
    }

    pub fn push(&mut self, file: Rc<SourceFile>) {
        self.frames.push(IncludeFrame { file });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_dir(&self) -> Option<PathBuf> {
        self.frames.last().and_then(|f| {
            Path::new(&f.file.name).parent().map(|p| p.to_path_buf())
        })
    }

    pub fn mark_pragma_once(&mut self, path: &Path) {
        if let Ok(canon) = path.canonicalize() {
            self.once_guarded.insert(canon);
        } else {
            self.once_guarded.insert(path.to_path_buf());
        }
    }

    pub fn already_included_once(&self, path: &Path) -> bool {
        let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.once_guarded.contains(&canon)
    }

    /// Resolve `#include "name"` or `#include <name>` to a filesystem path.
    /// `angled` selects the angled-bracket search order.
    pub fn search(&self, name: &str, angled: bool) -> Option<PathBuf> {
        if !angled {
            if let Some(dir) = self.current_dir() {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        for dir in self.user_paths.iter().chain(self.system_paths.iter()) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splices_backslash_newline() {
        let file = Rc::new(SourceFile::from_str("t.c", "ab\\\ncd"));
        let mut r = SourceReader::new(Rc::clone(&file));
        let mut out = Vec::new();
        loop {
            let c = r.advance();
            if c == 0 {
                break;
            }
            out.push(c);
        }
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn splice_bumps_line_without_emitting_newline() {
        let file = Rc::new(SourceFile::from_str("t.c", "a\\\nb"));
        let mut r = SourceReader::new(Rc::clone(&file));
        assert_eq!(r.advance(), b'a');
        assert_eq!(r.advance(), b'b');
        let (_, line, _) = r.location();
        assert_eq!(line, 2);
    }

    #[test]
    fn include_search_order_quoted_vs_angled() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("h.h"), "quoted").unwrap();
        let sys = tmp.path().join("sys");
        std::fs::create_dir(&sys).unwrap();
        std::fs::write(sys.join("h.h"), "system").unwrap();

        let mut stack = IncludeStack::new(vec![], vec![sys.clone()]);
        stack.push(Rc::new(SourceFile::from_str(sub.join("main.c").display().to_string(), "")));

        let quoted = stack.search("h.h", false).unwrap();
        assert_eq!(quoted, sub.join("h.h"));

        let angled = stack.search("h.h", true).unwrap();
        assert_eq!(angled, sys.join("h.h"));
    }
}
