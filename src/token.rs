//! Token and hide-set definitions shared by the Scanner, Preprocessor, and
//! Parser.

use crate::source::SourceLocation;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Per-token set of macro names currently being expanded. Small and
/// immutable once built (empty for most tokens), so it's cheap to clone
/// and share via `Rc`.
pub type HideSet = Rc<BTreeSet<String>>;

pub fn empty_hide_set() -> HideSet {
    thread_local! {
        static EMPTY: HideSet = Rc::new(BTreeSet::new());
    }
    EMPTY.with(|e| Rc::clone(e))
}

pub fn hide_set_union(a: &HideSet, b: &HideSet) -> HideSet {
    if a.is_empty() {
        return Rc::clone(b);
    }
    if b.is_empty() {
        return Rc::clone(a);
    }
    let mut merged = (**a).clone();
    merged.extend(b.iter().cloned());
    Rc::new(merged)
}

pub fn hide_set_with(a: &HideSet, name: &str) -> HideSet {
    if a.contains(name) {
        return Rc::clone(a);
    }
    let mut merged = (**a).clone();
    merged.insert(name.to_string());
    Rc::new(merged)
}

/// C keywords. Punctuators and literal shapes are carried directly by
/// [`TokenKind`] variants rather than an integer tag table, but the set of
/// names here mirrors the historical `CONST..STATIC_ASSERT` keyword range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Const, Restrict, Volatile, Atomic,
    Void, Char, Short, Int, Long, Float, Double, Signed, Unsigned, Bool, Complex,
    Struct, Union, Enum,
    Inline, Noreturn, Alignas,
    Typedef, Extern, Static, ThreadLocal, Auto, Register,
    Break, Case, Continue, Default, Do, Else, For, Goto, If, Return, Sizeof, Switch, While,
    Alignof, Generic, Imaginary, StaticAssert,
}

impl Keyword {
    pub fn from_str(s: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match s {
            "const" => Const, "restrict" => Restrict, "volatile" => Volatile, "_Atomic" => Atomic,
            "void" => Void, "char" => Char, "short" => Short, "int" => Int, "long" => Long,
            "float" => Float, "double" => Double, "signed" => Signed, "unsigned" => Unsigned,
            "_Bool" => Bool, "_Complex" => Complex,
            "struct" => Struct, "union" => Union, "enum" => Enum,
            "inline" => Inline, "_Noreturn" => Noreturn, "_Alignas" => Alignas,
            "typedef" => Typedef, "extern" => Extern, "static" => Static,
            "_Thread_local" => ThreadLocal, "auto" => Auto, "register" => Register,
            "break" => Break, "case" => Case, "continue" => Continue, "default" => Default,
            "do" => Do, "else" => Else, "for" => For, "goto" => Goto, "if" => If,
            "return" => Return, "sizeof" => Sizeof, "switch" => Switch, "while" => While,
            "_Alignof" => Alignof, "_Generic" => Generic, "_Imaginary" => Imaginary,
            "_Static_assert" => StaticAssert,
            _ => return None,
        })
    }
}

/// String/character literal encoding prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    None,
    Char16,
    Char32,
    Utf8,
    Wchar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Colon, Comma, Semi, Dot, Ellipsis, Question, Tilde, Not, Hash, HashHash,
    Add, Sub, Mul, Div, Mod, Amp, Pipe, Caret, Less, Greater, Assign,
    Arrow, Inc, Dec,
    Shl, Shr, Le, Ge, Eq, Ne, AndAnd, OrOr,
    MulAssign, DivAssign, ModAssign, AddAssign, SubAssign,
    ShlAssign, ShrAssign, AndAssign, XorAssign, OrAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Keyword(Keyword),
    /// A pp-number; whether it denotes an integer or floating constant is
    /// decided later by the parser/semantic layer.
    PpNumber(String),
    CharConstant { value: String, encoding: Encoding },
    StringLiteral { value: String, encoding: Encoding },
    Punct(Punct),
    /// Emitted distinctly so the preprocessor can detect directive lines.
    Newline,
    /// `#` at the start of a line, about to be followed by a directive name.
    HashDirective,
    Eof,
    Invalid(char),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Owned spelling of the token. For most tokens this is a slice of the
    /// source text; for paste/stringize results it is synthesized, which
    /// is why it's owned rather than borrowed.
    pub text: String,
    pub location: SourceLocation,
    pub leading_whitespace: bool,
    pub hide_set: HideSet,
}

impl Token {
    pub fn new(kind: TokenKind, text: String, location: SourceLocation, leading_whitespace: bool) -> Self {
        Token { kind, text, location, leading_whitespace, hide_set: empty_hide_set() }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier(_))
    }

    pub fn identifier_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_punct(&self, p: Punct) -> bool {
        matches!(&self.kind, TokenKind::Punct(k) if *k == p)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.kind, TokenKind::Keyword(k) if *k == kw)
    }

    /// Whether a rescan of this identifier token would re-enter macro `name`
    /// (the termination mechanism for self-referential macros, spec. §4.3).
    pub fn hides(&self, name: &str) -> bool {
        self.hide_set.contains(name)
    }

    pub fn with_hide_set(mut self, hs: HideSet) -> Self {
        self.hide_set = hs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hide_set_union_preserves_both_names() {
        let a = hide_set_with(&empty_hide_set(), "A");
        let b = hide_set_with(&empty_hide_set(), "B");
        let u = hide_set_union(&a, &b);
        assert!(u.contains("A") && u.contains("B"));
    }

    #[test]
    fn keyword_lookup_is_exact() {
        assert_eq!(Keyword::from_str("int"), Some(Keyword::Int));
        assert_eq!(Keyword::from_str("integer"), None);
    }
}
