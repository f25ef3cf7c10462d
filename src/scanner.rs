//! Scanner
//!
//! Turns a [`SourceReader`] into a lazy sequence of [`Token`]s. Handles
//! comment skipping, numeric pp-number scanning, identifier scanning
//! (including UCN escapes and high-bit UTF-8 continuation bytes), string
//! and character literal recognition with encoding prefixes, and the full
//! punctuator/digraph table.

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::source::SourceReader;
use crate::token::{Encoding, Keyword, Punct, Token, TokenKind};

pub struct Scanner<'r, 'd> {
    reader: &'r mut SourceReader,
    diags: &'d mut DiagnosticSink,
}

impl<'r, 'd> Scanner<'r, 'd> {
    pub fn new(reader: &'r mut SourceReader, diags: &'d mut DiagnosticSink) -> Self {
        Scanner { reader, diags }
    }

    fn peek(&self) -> u8 {
        self.reader.peek()
    }

    fn peek_at(&self, n: usize) -> u8 {
        self.reader.peek_at(n)
    }

    fn advance(&mut self) -> u8 {
        self.reader.advance()
    }

    /// Consume the next character if it equals `c`; report whether it did.
    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == c {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_horizontal_whitespace(&mut self) -> bool {
        let mut saw_ws = false;
        while matches!(self.peek(), b' ' | b'\t' | 0x0b | 0x0c) {
            saw_ws = true;
            self.advance();
        }
        saw_ws
    }

    fn skip_comment(&mut self) {
        let start = self.reader.make_location(self.reader.file());
        if self.eat(b'/') {
            // line comment: terminated by newline or EOF
            while !self.reader.is_at_end() && self.peek() != b'\n' {
                self.advance();
            }
        } else if self.eat(b'*') {
            loop {
                if self.reader.is_at_end() {
                    self.diags.error(
                        DiagnosticKind::Lexical,
                        start,
                        "unterminated block comment",
                    );
                    return;
                }
                let c = self.advance();
                if c == b'*' && self.peek() == b'/' {
                    self.advance();
                    return;
                }
            }
        }
    }

    /// Skip whitespace and comments, returning true if anything was
    /// skipped (drives the leading-whitespace flag on the next token).
    fn skip_trivia(&mut self) -> bool {
        let mut any = false;
        loop {
            if self.skip_horizontal_whitespace() {
                any = true;
                continue;
            }
            if self.peek() == b'/' && (self.peek_at(1) == b'/' || self.peek_at(1) == b'*') {
                self.advance();
                self.skip_comment();
                any = true;
                continue;
            }
            break;
        }
        any
    }

    fn make_token(&self, kind: TokenKind, start_offset: usize, leading_ws: bool) -> Token {
        let loc = self.reader.make_location(self.reader.file());
        let (cur_offset, _, _) = self.reader.location();
        let text = self.slice_text(start_offset, cur_offset);
        // The reported location is the token's *start*, not where the
        // cursor ended up after scanning it.
        let start_loc = self.location_at(start_offset, &loc);
        Token::new(kind, text, start_loc, leading_ws)
    }

    fn slice_text(&self, start: usize, end: usize) -> String {
        let buf = &self.reader.file().buffer;
        String::from_utf8_lossy(&buf[start.min(buf.len())..end.min(buf.len())]).into_owned()
    }

    /// Reconstruct the (line, column) the scan started at from the
    /// token's start byte offset, by re-deriving from the file buffer.
    /// The buffer has no line index, so this walks from the start of the
    /// buffer once per token; acceptable for a front-end whose tokens are
    /// consumed once each, never re-derived in a hot loop.
    fn location_at(&self, offset: usize, current: &crate::source::SourceLocation) -> crate::source::SourceLocation {
        let buf = &self.reader.file().buffer;
        let mut line = 1u32;
        let mut line_start = 0usize;
        for (i, &b) in buf.iter().enumerate().take(offset) {
            if b == b'\n' {
                line += 1;
                line_start = i + 1;
            }
        }
        let column = (offset - line_start + 1) as u32;
        crate::source::SourceLocation { file: std::rc::Rc::clone(&current.file), line, column, offset }
    }

    /// Scan the next token, skipping horizontal whitespace and comments.
    /// Newline is a distinct token the Preprocessor needs to see.
    pub fn scan(&mut self) -> Token {
        let leading_ws = self.skip_trivia();
        let (start_offset, _, _) = self.reader.location();

        if self.peek() == b'\n' {
            self.advance();
            return self.make_token(TokenKind::Newline, start_offset, leading_ws);
        }
        if self.reader.is_at_end() {
            return self.make_token(TokenKind::Eof, start_offset, leading_ws);
        }

        let c = self.peek();
        match c {
            b'#' => {
                self.advance();
                if self.eat(b'#') {
                    self.make_token(TokenKind::Punct(Punct::HashHash), start_offset, leading_ws)
                } else {
                    self.make_token(TokenKind::HashDirective, start_offset, leading_ws)
                }
            }
            b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'?' | b',' | b'~' | b';' => {
                self.advance();
                self.make_token(TokenKind::Punct(single_char_punct(c)), start_offset, leading_ws)
            }
            b':' => {
                self.advance();
                if self.eat(b'>') {
                    self.make_token(TokenKind::Punct(Punct::RBracket), start_offset, leading_ws)
                } else {
                    self.make_token(TokenKind::Punct(Punct::Colon), start_offset, leading_ws)
                }
            }
            b'-' => {
                self.advance();
                let k = if self.eat(b'>') { Punct::Arrow }
                    else if self.eat(b'-') { Punct::Dec }
                    else if self.eat(b'=') { Punct::SubAssign }
                    else { Punct::Sub };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'+' => {
                self.advance();
                let k = if self.eat(b'+') { Punct::Inc }
                    else if self.eat(b'=') { Punct::AddAssign }
                    else { Punct::Add };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'<' => {
                self.advance();
                let k = if self.eat(b'<') {
                    if self.eat(b'=') { Punct::ShlAssign } else { Punct::Shl }
                } else if self.eat(b'=') {
                    Punct::Le
                } else if self.eat(b':') {
                    Punct::LBracket // digraph <:
                } else if self.eat(b'%') {
                    Punct::LBrace // digraph <%
                } else {
                    Punct::Less
                };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'%' => {
                self.advance();
                if self.eat(b'=') {
                    return self.make_token(TokenKind::Punct(Punct::ModAssign), start_offset, leading_ws);
                }
                if self.eat(b'>') {
                    return self.make_token(TokenKind::Punct(Punct::RBrace), start_offset, leading_ws);
                }
                if self.peek() == b':' {
                    if self.peek_at(1) == b'%' && self.peek_at(2) == b':' {
                        self.advance();
                        self.advance();
                        self.advance();
                        return self.make_token(TokenKind::Punct(Punct::HashHash), start_offset, leading_ws);
                    }
                    self.advance();
                    return self.make_token(TokenKind::HashDirective, start_offset, leading_ws);
                }
                self.make_token(TokenKind::Punct(Punct::Mod), start_offset, leading_ws)
            }
            b'>' => {
                self.advance();
                let k = if self.eat(b'>') {
                    if self.eat(b'=') { Punct::ShrAssign } else { Punct::Shr }
                } else if self.eat(b'=') {
                    Punct::Ge
                } else {
                    Punct::Greater
                };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'=' => {
                self.advance();
                let k = if self.eat(b'=') { Punct::Eq } else { Punct::Assign };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'!' => {
                self.advance();
                let k = if self.eat(b'=') { Punct::Ne } else { Punct::Not };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'&' => {
                self.advance();
                let k = if self.eat(b'&') { Punct::AndAnd }
                    else if self.eat(b'=') { Punct::AndAssign }
                    else { Punct::Amp };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'|' => {
                self.advance();
                let k = if self.eat(b'|') { Punct::OrOr }
                    else if self.eat(b'=') { Punct::OrAssign }
                    else { Punct::Pipe };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'*' => {
                self.advance();
                let k = if self.eat(b'=') { Punct::MulAssign } else { Punct::Mul };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'/' => {
                self.advance();
                let k = if self.eat(b'=') { Punct::DivAssign } else { Punct::Div };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'^' => {
                self.advance();
                let k = if self.eat(b'=') { Punct::XorAssign } else { Punct::Caret };
                self.make_token(TokenKind::Punct(k), start_offset, leading_ws)
            }
            b'.' => {
                if self.peek_at(1).is_ascii_digit() {
                    return self.scan_number(start_offset, leading_ws);
                }
                self.advance();
                if self.peek() == b'.' && self.peek_at(1) == b'.' {
                    self.advance();
                    self.advance();
                    return self.make_token(TokenKind::Punct(Punct::Ellipsis), start_offset, leading_ws);
                }
                self.make_token(TokenKind::Punct(Punct::Dot), start_offset, leading_ws)
            }
            b'0'..=b'9' => self.scan_number(start_offset, leading_ws),
            b'u' | b'U' | b'L' => {
                let enc = peek_encoding(c, self.peek_at(1));
                if enc.is_some() {
                    let consumed = match c {
                        b'u' if self.peek_at(1) == b'8' => 2,
                        _ => 1,
                    };
                    for _ in 0..consumed {
                        self.advance();
                    }
                    if self.peek() == b'\'' {
                        return self.scan_char(start_offset, leading_ws, enc.unwrap());
                    }
                    if self.peek() == b'"' {
                        return self.scan_string(start_offset, leading_ws, enc.unwrap());
                    }
                    // not actually a literal prefix; fall through as identifier start
                }
                self.scan_identifier(start_offset, leading_ws)
            }
            b'\'' => self.scan_char(start_offset, leading_ws, Encoding::None),
            b'"' => self.scan_string(start_offset, leading_ws, Encoding::None),
            b'_' | b'$' | b'a'..=b'z' | b'A'..=b'Z' => self.scan_identifier(start_offset, leading_ws),
            0x80..=0xfd => self.scan_identifier(start_offset, leading_ws),
            b'\\' if self.peek_at(1) == b'u' || self.peek_at(1) == b'U' => {
                self.scan_identifier(start_offset, leading_ws)
            }
            other => {
                let loc = self.reader.make_location(self.reader.file());
                self.diags.error(
                    DiagnosticKind::Lexical,
                    loc,
                    format!("stray character '{}' in program", other as char),
                );
                self.advance();
                self.resync();
                self.make_token(TokenKind::Invalid(other as char), start_offset, leading_ws)
            }
        }
    }

    /// Resynchronize after a lexical error by skipping to the next
    /// whitespace or newline.
    fn resync(&mut self) {
        while !self.reader.is_at_end() && !matches!(self.peek(), b' ' | b'\t' | b'\n') {
            self.advance();
        }
    }

    fn is_ucn_start(&self) -> bool {
        self.peek() == b'\\' && (self.peek_at(1) == b'u' || self.peek_at(1) == b'U')
    }

    fn scan_identifier(&mut self, start_offset: usize, leading_ws: bool) -> Token {
        loop {
            let c = self.peek();
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || (0x80..=0xfd).contains(&c) {
                self.advance();
            } else if self.is_ucn_start() {
                self.advance();
                self.advance();
                for _ in 0..4 {
                    if self.peek().is_ascii_hexdigit() {
                        self.advance();
                    }
                }
            } else {
                break;
            }
        }
        let text = self.slice_text(start_offset, self.reader.location().0);
        if let Some(kw) = Keyword::from_str(&text) {
            self.make_token(TokenKind::Keyword(kw), start_offset, leading_ws)
        } else {
            self.make_token(TokenKind::Identifier(text), start_offset, leading_ws)
        }
    }

    /// Greedy pp-number scan over `[.0-9A-Za-z_]` with exponent sign
    /// pairs. Classification into integer vs. floating is left to the
    /// parser; this only records the raw spelling.
    fn scan_number(&mut self, start_offset: usize, leading_ws: bool) -> Token {
        loop {
            let c = self.peek();
            if c == b'.' || c.is_ascii_alphanumeric() || c == b'_' {
                if matches!(c, b'e' | b'E' | b'p' | b'P')
                    && matches!(self.peek_at(1), b'+' | b'-')
                {
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
            } else if self.is_ucn_start() {
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
        let text = self.slice_text(start_offset, self.reader.location().0);
        self.make_token(TokenKind::PpNumber(text), start_offset, leading_ws)
    }

    /// Consume one escape sequence, starting at the backslash. Returns the
    /// raw spelling consumed (not decoded further here — decoding into a
    /// scalar value belongs to the semantic layer that interprets the
    /// finished literal).
    fn scan_escape(&mut self) {
        self.advance(); // backslash
        match self.peek() {
            b'a' | b'b' | b'f' | b'n' | b'r' | b't' | b'v' | b'e' | b'\\' | b'\'' | b'"' | b'?' => {
                self.advance();
            }
            b'x' => {
                self.advance();
                while self.peek().is_ascii_hexdigit() {
                    self.advance();
                }
            }
            b'0'..=b'7' => {
                for _ in 0..3 {
                    if (b'0'..=b'7').contains(&self.peek()) {
                        self.advance();
                    }
                }
            }
            b'u' => {
                self.advance();
                for _ in 0..4 {
                    if self.peek().is_ascii_hexdigit() {
                        self.advance();
                    }
                }
            }
            b'U' => {
                self.advance();
                for _ in 0..8 {
                    if self.peek().is_ascii_hexdigit() {
                        self.advance();
                    }
                }
            }
            _ => {
                let loc = self.reader.make_location(self.reader.file());
                self.diags.error(DiagnosticKind::Lexical, loc, "invalid escape sequence");
            }
        }
    }

    fn scan_char(&mut self, start_offset: usize, leading_ws: bool, encoding: Encoding) -> Token {
        let open_loc = self.reader.make_location(self.reader.file());
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            if self.reader.is_at_end() || self.peek() == b'\n' {
                self.diags.error(DiagnosticKind::Lexical, open_loc, "unterminated character literal");
                break;
            }
            if self.peek() == b'\'' {
                self.advance();
                break;
            }
            if self.peek() == b'\\' {
                let before = self.reader.location().0;
                self.scan_escape();
                let after = self.reader.location().0;
                value.push_str(&self.slice_text(before, after));
            } else {
                value.push(self.advance() as char);
            }
        }
        self.make_token(TokenKind::CharConstant { value, encoding }, start_offset, leading_ws)
    }

    fn scan_string(&mut self, start_offset: usize, leading_ws: bool, encoding: Encoding) -> Token {
        let open_loc = self.reader.make_location(self.reader.file());
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            if self.reader.is_at_end() || self.peek() == b'\n' {
                self.diags.error(DiagnosticKind::Lexical, open_loc, "unterminated string literal");
                break;
            }
            if self.peek() == b'"' {
                self.advance();
                break;
            }
            if self.peek() == b'\\' {
                let before = self.reader.location().0;
                self.scan_escape();
                let after = self.reader.location().0;
                value.push_str(&self.slice_text(before, after));
            } else {
                value.push(self.advance() as char);
            }
        }
        self.make_token(TokenKind::StringLiteral { value, encoding }, start_offset, leading_ws)
    }
}

fn peek_encoding(c: u8, next: u8) -> Option<Encoding> {
    match c {
        b'u' if next == b'8' => Some(Encoding::Utf8),
        b'u' => Some(Encoding::Char16),
        b'U' => Some(Encoding::Char32),
        b'L' => Some(Encoding::Wchar),
        _ => None,
    }
}

fn single_char_punct(c: u8) -> Punct {
    match c {
        b'(' => Punct::LParen,
        b')' => Punct::RParen,
        b'[' => Punct::LBracket,
        b']' => Punct::RBracket,
        b'{' => Punct::LBrace,
        b'}' => Punct::RBrace,
        b'?' => Punct::Question,
        b',' => Punct::Comma,
        b'~' => Punct::Tilde,
        b';' => Punct::Semi,
        _ => unreachable!("single_char_punct called with {}", c as char),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;
    use std::rc::Rc;

    fn scan_all(src: &str) -> Vec<TokenKind> {
        let file = Rc::new(SourceFile::from_str("t.c", src));
        let mut reader = SourceReader::new(file);
        let mut diags = DiagnosticSink::new();
        let mut scanner = Scanner::new(&mut reader, &mut diags);
        let mut kinds = Vec::new();
        loop {
            let tok = scanner.scan();
            let eof = tok.is_eof();
            kinds.push(tok.kind);
            if eof {
                break;
            }
        }
        kinds
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        let kinds = scan_all("int x_1");
        assert_eq!(kinds[0], TokenKind::Keyword(Keyword::Int));
        assert_eq!(kinds[1], TokenKind::Identifier("x_1".into()));
    }

    #[test]
    fn scans_digraphs_as_their_canonical_punct() {
        let kinds = scan_all("<: :>");
        assert_eq!(kinds[0], TokenKind::Punct(Punct::LBracket));
        assert_eq!(kinds[1], TokenKind::Punct(Punct::RBracket));
    }

    #[test]
    fn scans_three_char_ellipsis_and_shift_assign() {
        let kinds = scan_all("... <<=");
        assert_eq!(kinds[0], TokenKind::Punct(Punct::Ellipsis));
        assert_eq!(kinds[1], TokenKind::Punct(Punct::ShlAssign));
    }

    #[test]
    fn pp_number_defers_float_vs_int_classification() {
        let kinds = scan_all("1.5e10f 42");
        assert_eq!(kinds[0], TokenKind::PpNumber("1.5e10f".into()));
        assert_eq!(kinds[1], TokenKind::PpNumber("42".into()));
    }

    #[test]
    fn newline_is_a_distinct_token() {
        let kinds = scan_all("a\nb");
        assert!(matches!(kinds[1], TokenKind::Newline));
    }

    #[test]
    fn leading_whitespace_flag_set_after_space() {
        let file = Rc::new(SourceFile::from_str("t.c", "a b"));
        let mut reader = SourceReader::new(file);
        let mut diags = DiagnosticSink::new();
        let mut scanner = Scanner::new(&mut reader, &mut diags);
        let first = scanner.scan();
        let second = scanner.scan();
        assert!(!first.leading_whitespace);
        assert!(second.leading_whitespace);
    }

    #[test]
    fn encoded_string_literal_prefix() {
        let kinds = scan_all(r#"u8"hi""#);
        match &kinds[0] {
            TokenKind::StringLiteral { value, encoding } => {
                assert_eq!(value, "hi");
                assert_eq!(*encoding, Encoding::Utf8);
            }
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_preserves_kind_and_lexeme() {
        let src = "int main ( void ) { return 0 ; }";
        let file = Rc::new(SourceFile::from_str("t.c", src));
        let mut reader = SourceReader::new(file);
        let mut diags = DiagnosticSink::new();
        let mut scanner = Scanner::new(&mut reader, &mut diags);
        let mut first_pass = Vec::new();
        loop {
            let tok = scanner.scan();
            if tok.is_eof() {
                break;
            }
            first_pass.push((tok.kind.clone(), tok.text.clone()));
        }
        // Re-serialize each lexeme, re-scan, and expect the same sequence.
        let reassembled: String = first_pass.iter().map(|(_, t)| format!("{t} ")).collect();
        let file2 = Rc::new(SourceFile::from_str("t2.c", &reassembled));
        let mut reader2 = SourceReader::new(file2);
        let mut diags2 = DiagnosticSink::new();
        let mut scanner2 = Scanner::new(&mut reader2, &mut diags2);
        let mut second_pass = Vec::new();
        loop {
            let tok = scanner2.scan();
            if tok.is_eof() {
                break;
            }
            second_pass.push((tok.kind.clone(), tok.text.clone()));
        }
        assert_eq!(first_pass, second_pass);
    }
}
