//! Preprocessor
//!
//! Consumes the Scanner's token sequence, expands macros, evaluates
//! conditional directives, and produces a clean token sequence for the
//! Parser. Grounded directly on the classic expand/subst algorithm (the
//! `Macro`/`MacroMap`/`CondDirective`/hide-set split in wgtcc's
//! `cpp.h`/`cpp.cc`), implemented per spec rather than transliterated.

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::source::{IncludeStack, SourceFile, SourceReader};
use crate::scanner::Scanner;
use crate::token::{empty_hide_set, hide_set_union, hide_set_with, HideSet, Punct, Token, TokenKind};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Macro {
    pub func_like: bool,
    pub variadic: bool,
    pub params: Vec<String>,
    pub replacement: Vec<Token>,
    pub predefined: bool,
}

impl Macro {
    fn object_like(replacement: Vec<Token>) -> Self {
        Macro { func_like: false, variadic: false, params: Vec::new(), replacement, predefined: false }
    }

    /// Two replacement lists are "identical" per the redefinition rule if
    /// their token kinds and spellings match, ignoring source location and
    /// hide sets.
    fn same_definition(&self, other: &Macro) -> bool {
        self.func_like == other.func_like
            && self.variadic == other.variadic
            && self.params == other.params
            && self.replacement.len() == other.replacement.len()
            && self
                .replacement
                .iter()
                .zip(other.replacement.iter())
                .all(|(a, b)| a.kind == b.kind && a.text == b.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CondKind {
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
}

struct CondFrame {
    #[allow(dead_code)]
    kind: CondKind,
    /// Whether this frame's branch is currently active (its own condition
    /// true AND every enclosing frame active).
    taken: bool,
    /// Whether any branch of this `#if`/`#elif`/`#else` chain has been
    /// taken yet, so later `#elif`/`#else` know to stay dead.
    any_branch_taken: bool,
    /// Whether the *parent* context was active when this frame opened.
    parent_active: bool,
}

/// One raw token source: either a live file scan, or a buffer of tokens
/// pushed back to the front of the input (macro expansion results, or a
/// #include's token stream once fully read into memory is unnecessary —
/// files are scanned lazily via their own `SourceReader`).
enum Frame {
    File { reader: SourceReader },
    Buffer(VecDeque<Token>),
}

pub struct Preprocessor<'d> {
    macros: HashMap<String, Macro>,
    cond_stack: Vec<CondFrame>,
    frames: Vec<Frame>,
    include_stack: IncludeStack,
    diags: &'d mut DiagnosticSink,
    /// Overridden (file, line) from `#line`, applied to locations reported
    /// for tokens scanned after the directive until end of file.
    line_override: Option<(String, u32, u32)>,
    date_time: (String, String),
}

impl<'d> Preprocessor<'d> {
    pub fn new(
        main_file: Rc<SourceFile>,
        include_stack: IncludeStack,
        diags: &'d mut DiagnosticSink,
        date: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        let mut pp = Preprocessor {
            macros: HashMap::new(),
            cond_stack: Vec::new(),
            frames: vec![Frame::File { reader: SourceReader::new(main_file) }],
            include_stack,
            diags,
            line_override: None,
            date_time: (date.into(), time.into()),
        };
        pp.install_predefined();
        pp
    }

    fn install_predefined(&mut self) {
        for name in ["__FILE__", "__LINE__", "__DATE__", "__TIME__", "__STDC__", "__STDC_VERSION__", "__STDC_HOSTED__"] {
            self.macros.insert(name.to_string(), Macro {
                func_like: false,
                variadic: false,
                params: Vec::new(),
                replacement: Vec::new(),
                predefined: true,
            });
        }
    }

    pub fn define_from_cli(&mut self, name: &str, value: Option<&str>) {
        let text = value.unwrap_or("1");
        let file = Rc::new(SourceFile::from_str("<command-line>", text));
        let mut reader = SourceReader::new(file);
        let mut tmp_diags = DiagnosticSink::new();
        let mut scanner = Scanner::new(&mut reader, &mut tmp_diags);
        let mut toks = Vec::new();
        loop {
            let t = scanner.scan();
            if t.is_eof() {
                break;
            }
            if !matches!(t.kind, TokenKind::Newline) {
                toks.push(t);
            }
        }
        self.macros.insert(name.to_string(), Macro::object_like(toks));
    }

    pub fn undefine_from_cli(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn macro_table(&self) -> &HashMap<String, Macro> {
        &self.macros
    }

    /// Hand the diagnostic sink this preprocessor was built with to a
    /// downstream consumer (the parser) that continues reporting into the
    /// same sink — a reborrow, not a second independent borrow, since the
    /// caller's original `&mut DiagnosticSink` stays owned by `self`.
    pub fn diagnostics_mut(&mut self) -> &mut DiagnosticSink {
        self.diags
    }

    /// Whether the innermost (or no) conditional frame permits emitting
    /// tokens right now.
    fn is_active(&self) -> bool {
        self.cond_stack.last().map(|f| f.taken).unwrap_or(true)
    }

    fn raw_scan(&mut self) -> Option<Token> {
        loop {
            let frame = self.frames.last_mut()?;
            match frame {
                Frame::Buffer(buf) => {
                    if let Some(tok) = buf.pop_front() {
                        return Some(tok);
                    }
                    self.frames.pop();
                }
                Frame::File { reader } => {
                    let mut scanner = Scanner::new(reader, self.diags);
                    let tok = scanner.scan();
                    if tok.is_eof() {
                        self.frames.pop();
                        self.include_stack.pop();
                        if self.frames.is_empty() {
                            return Some(tok);
                        }
                        continue;
                    }
                    return Some(self.apply_line_override(tok));
                }
            }
        }
    }

    fn apply_line_override(&self, mut tok: Token) -> Token {
        if let Some((file, line_at_directive, real_line_at_directive)) = &self.line_override {
            let delta = tok.location.line.saturating_sub(*real_line_at_directive);
            let new_file = Rc::new(SourceFile::from_str(file.clone(), ""));
            tok.location = crate::source::SourceLocation {
                file: new_file,
                line: line_at_directive + delta,
                column: tok.location.column,
                offset: tok.location.offset,
            };
        }
        tok
    }

    fn push_buffer(&mut self, tokens: Vec<Token>) {
        if !tokens.is_empty() {
            self.frames.push(Frame::Buffer(tokens.into()));
        }
    }

    /// Pull the next fully preprocessed token. Returns an Eof token once
    /// every file in the include stack has been exhausted.
    pub fn next_token(&mut self) -> Token {
        loop {
            let Some(tok) = self.raw_scan() else {
                return Token::new(
                    TokenKind::Eof,
                    String::new(),
                    self.eof_location(),
                    false,
                );
            };

            match &tok.kind {
                TokenKind::Eof => return tok,
                TokenKind::Newline => continue,
                TokenKind::HashDirective => {
                    let line = self.collect_logical_line();
                    self.dispatch_directive(line);
                    continue;
                }
                _ if !self.is_active() => continue,
                TokenKind::Identifier(name) if !tok.hides(name) => {
                    if let Some(expanded) = self.try_expand(&tok, name.clone()) {
                        self.push_buffer(expanded);
                        continue;
                    }
                    return tok;
                }
                _ => return tok,
            }
        }
    }

    fn eof_location(&self) -> crate::source::SourceLocation {
        crate::source::SourceLocation {
            file: Rc::new(SourceFile::from_str("<eof>", "")),
            line: 0,
            column: 0,
            offset: 0,
        }
    }

    /// Collect the rest of the current logical line (after `#`) as a flat
    /// token vector, consuming up to and including the terminating
    /// newline or EOF. Directive dispatch needs the whole line at once.
    fn collect_logical_line(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            let Some(tok) = self.raw_scan() else { break };
            match tok.kind {
                TokenKind::Newline | TokenKind::Eof => break,
                _ => out.push(tok),
            }
        }
        out
    }

    // ---- macro expansion -------------------------------------------------

    /// If `name` names a visible macro and the invocation shape matches
    /// (object-like always; function-like only if followed by `(`),
    /// expand it, returning the replacement tokens ready to be pushed back
    /// to the front of the input. Returns `None` if this is not actually a
    /// macro invocation (e.g. a function-like macro's name with no `(`).
    fn try_expand(&mut self, name_tok: &Token, name: String) -> Option<Vec<Token>> {
        if let Some(builtin) = self.expand_predefined(name_tok, &name) {
            return Some(builtin);
        }
        let mac = self.macros.get(&name)?.clone();
        if mac.predefined {
            // predefined macros with no stored replacement (FILE/LINE/etc)
            // are handled by expand_predefined above; anything else
            // predefined-but-empty expands to nothing further.
            return Some(Vec::new());
        }

        if mac.func_like {
            let next = self.peek_non_directive_token();
            if !matches!(next.as_ref().map(|t| &t.kind), Some(TokenKind::Punct(Punct::LParen))) {
                return None;
            }
            self.raw_scan(); // consume '('
            let args = self.collect_actual_arguments(&mac, &name_tok.location)?;
            let hs = hide_set_with(&hide_set_union(&name_tok.hide_set, &self.peek_hide_set()), &name);
            let mut out = Vec::new();
            self.subst(&mac.replacement, &mac.params, &args, mac.variadic, &mut out);
            for t in out.iter_mut() {
                t.hide_set = hide_set_union(&t.hide_set, &hs);
            }
            Some(out)
        } else {
            let hs = hide_set_with(&name_tok.hide_set, &name);
            let mut out = mac.replacement.clone();
            for t in out.iter_mut() {
                t.hide_set = hide_set_union(&t.hide_set, &hs);
            }
            Some(out)
        }
    }

    fn peek_hide_set(&self) -> HideSet {
        empty_hide_set()
    }

    /// Peek the next token without a directive/newline filter — used only
    /// to decide `(`-follows for function-like macro recognition, which
    /// may legitimately cross into buffered (already-expanded) tokens.
    fn peek_non_directive_token(&mut self) -> Option<Token> {
        let tok = self.raw_scan()?;
        match tok.kind {
            TokenKind::Newline => self.peek_non_directive_token(),
            _ => {
                self.frames.push(Frame::Buffer(VecDeque::from([tok.clone()])));
                Some(tok)
            }
        }
    }

    /// Collect balanced-parenthesis actual arguments, splitting on
    /// top-level commas; `name, ...` folds the remainder into
    /// `__VA_ARGS__`.
    fn collect_actual_arguments(&mut self, mac: &Macro, call_loc: &crate::source::SourceLocation) -> Option<Vec<Vec<Token>>> {
        let mut args: Vec<Vec<Token>> = Vec::new();
        let mut current = Vec::new();
        let mut depth = 0i32;
        loop {
            let Some(tok) = self.raw_scan() else {
                self.diags.error(
                    DiagnosticKind::Preprocessor,
                    call_loc.clone(),
                    "unterminated macro argument list",
                );
                return None;
            };
            match &tok.kind {
                TokenKind::Punct(Punct::LParen) => {
                    depth += 1;
                    current.push(tok);
                }
                TokenKind::Punct(Punct::RParen) => {
                    if depth == 0 {
                        args.push(std::mem::take(&mut current));
                        break;
                    }
                    depth -= 1;
                    current.push(tok);
                }
                TokenKind::Punct(Punct::Comma) if depth == 0 && !mac.variadic_collects(args.len()) => {
                    args.push(std::mem::take(&mut current));
                }
                TokenKind::Newline => {}
                _ => current.push(tok),
            }
        }
        if !mac.func_like {
            return Some(args);
        }
        let min_params = mac.params.len();
        if args.len() == 1 && args[0].is_empty() && min_params == 0 {
            args.clear();
        }
        if args.len() < min_params {
            self.diags.error(
                DiagnosticKind::Preprocessor,
                call_loc.clone(),
                "too few arguments in macro invocation",
            );
            return None;
        }
        if args.len() > min_params && !mac.variadic {
            self.diags.error(
                DiagnosticKind::Preprocessor,
                call_loc.clone(),
                "too many arguments in macro invocation",
            );
            return None;
        }
        Some(args)
    }

    /// Substitute parameters into `replacement`, honoring `#param`
    /// (stringize), `a ## b` (paste), and plain substitution with full
    /// macro expansion of the argument.
    fn subst(&mut self, replacement: &[Token], params: &[String], args: &[Vec<Token>], variadic: bool, out: &mut Vec<Token>) {
        let arg_for = |name: &str| -> Option<usize> {
            if variadic && name == "__VA_ARGS__" {
                return Some(params.len());
            }
            params.iter().position(|p| p == name)
        };
        let va_args = |args: &[Vec<Token>], params_len: usize| -> Vec<Token> {
            let mut v = Vec::new();
            for (i, a) in args.iter().enumerate().skip(params_len) {
                if i > params_len {
                    v.push(comma_token());
                }
                v.extend(a.iter().cloned());
            }
            v
        };

        let mut i = 0;
        while i < replacement.len() {
            let tok = &replacement[i];
            // # param -> stringize
            if tok.is_punct(Punct::Hash) {
                if let Some(next) = replacement.get(i + 1) {
                    if let Some(name) = next.identifier_name() {
                        if let Some(idx) = arg_for(name) {
                            let arg = if idx == params.len() { va_args(args, params.len()) } else { args[idx].clone() };
                            out.push(stringize(&arg, &tok.location));
                            i += 2;
                            continue;
                        }
                    }
                }
            }
            // param ## ... or tok ## ...
            if i + 1 < replacement.len() && replacement[i + 1].is_punct(Punct::HashHash) {
                let lhs = if let Some(idx) = tok.identifier_name().and_then(arg_for) {
                    if idx == params.len() { va_args(args, params.len()) } else { args[idx].clone() }
                } else {
                    vec![tok.clone()]
                };
                i += 2;
                let mut rhs = Vec::new();
                if let Some(rhs_tok) = replacement.get(i) {
                    rhs = if let Some(idx) = rhs_tok.identifier_name().and_then(arg_for) {
                        if idx == params.len() { va_args(args, params.len()) } else { args[idx].clone() }
                    } else {
                        vec![rhs_tok.clone()]
                    };
                    i += 1;
                }
                self.paste_and_emit(lhs, rhs, out);
                continue;
            }
            // plain param substitution: fully expand the argument first
            if let Some(idx) = tok.identifier_name().and_then(arg_for) {
                let arg = if idx == params.len() { va_args(args, params.len()) } else { args[idx].clone() };
                out.extend(self.fully_expand_tokens(arg));
                i += 1;
                continue;
            }
            out.push(tok.clone());
            i += 1;
        }
    }

    fn paste_and_emit(&mut self, mut lhs: Vec<Token>, rhs: Vec<Token>, out: &mut Vec<Token>) {
        if lhs.is_empty() {
            out.extend(rhs);
            return;
        }
        if rhs.is_empty() {
            out.extend(lhs);
            return;
        }
        let last = lhs.pop().unwrap();
        let first = &rhs[0];
        let pasted_text = format!("{}{}", last.text, first.text);
        let loc = last.location.clone();
        if let Some(tok) = retokenize_single(&pasted_text, loc.clone()) {
            out.extend(lhs);
            out.push(tok);
            out.extend(rhs.into_iter().skip(1));
        } else {
            self.diags.error(
                DiagnosticKind::Preprocessor,
                loc,
                format!("pasting \"{}\" and \"{}\" does not give a valid token", last.text, first.text),
            );
            out.extend(lhs);
            out.push(last);
            out.extend(rhs);
        }
    }

    /// Fully macro-expand a standalone token vector (used for plain
    /// parameter substitution, and for `#if`/`#elif` expression operands).
    fn fully_expand_tokens(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        if tokens.is_empty() {
            return tokens;
        }
        self.frames.push(Frame::Buffer(tokens.into()));
        let marker_depth = self.frames.len();
        let mut out = Vec::new();
        loop {
            if self.frames.len() < marker_depth {
                break;
            }
            let Some(tok) = self.raw_scan() else { break };
            match &tok.kind {
                TokenKind::Identifier(name) if !tok.hides(name) => {
                    if let Some(expanded) = self.try_expand(&tok, name.clone()) {
                        self.push_buffer(expanded);
                        continue;
                    }
                    out.push(tok);
                }
                TokenKind::Newline => continue,
                _ => out.push(tok),
            }
            if self.frames.len() < marker_depth {
                break;
            }
        }
        out
    }

    fn expand_predefined(&self, tok: &Token, name: &str) -> Option<Vec<Token>> {
        match name {
            "__FILE__" => Some(vec![string_literal_token(tok.location.file.display_name(), &tok.location)]),
            "__LINE__" => Some(vec![number_token(&tok.location.line.to_string(), &tok.location)]),
            "__DATE__" => Some(vec![string_literal_token(&self.date_time.0, &tok.location)]),
            "__TIME__" => Some(vec![string_literal_token(&self.date_time.1, &tok.location)]),
            "__STDC__" => Some(vec![number_token("1", &tok.location)]),
            "__STDC_VERSION__" => Some(vec![number_token("201112L", &tok.location)]),
            "__STDC_HOSTED__" => Some(vec![number_token("1", &tok.location)]),
            _ => None,
        }
    }

    // ---- directive dispatch ----------------------------------------------

    fn dispatch_directive(&mut self, line: Vec<Token>) {
        let Some(first) = line.first() else { return };
        let Some(name) = first.identifier_name() else {
            if !self.is_active() {
                return;
            }
            self.diags.error(DiagnosticKind::Preprocessor, first.location.clone(), "invalid preprocessing directive");
            return;
        };
        let rest = &line[1..];
        match name {
            "ifdef" | "ifndef" | "if" => self.directive_if(name, rest, &first.location),
            "elif" => self.directive_elif(rest, &first.location),
            "else" => self.directive_else(&first.location),
            "endif" => self.directive_endif(&first.location),
            _ if !self.is_active() => {} // inactive frame: any other directive is just skipped text
            "include" => self.directive_include(rest, &first.location),
            "define" => self.directive_define(rest, &first.location),
            "undef" => self.directive_undef(rest, &first.location),
            "line" => self.directive_line(rest, &first.location),
            "error" => self.directive_error(rest, &first.location),
            "pragma" => self.directive_pragma(rest, &first.location),
            _ => self.diags.error(DiagnosticKind::Preprocessor, first.location.clone(), format!("unknown directive '#{name}'")),
        }
    }

    fn directive_if(&mut self, kind: &str, rest: &[Token], loc: &crate::source::SourceLocation) {
        let parent_active = self.is_active();
        let taken = if !parent_active {
            false
        } else {
            match kind {
                "ifdef" => rest.first().and_then(|t| t.identifier_name()).map(|n| self.macros.contains_key(n)).unwrap_or(false),
                "ifndef" => rest.first().and_then(|t| t.identifier_name()).map(|n| !self.macros.contains_key(n)).unwrap_or(true),
                _ => self.eval_constant_expr(rest, loc) != 0,
            }
        };
        self.cond_stack.push(CondFrame {
            kind: match kind { "ifdef" => CondKind::Ifdef, "ifndef" => CondKind::Ifndef, _ => CondKind::If },
            taken,
            any_branch_taken: taken,
            parent_active,
        });
    }

    fn directive_elif(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        let Some(frame) = self.cond_stack.last_mut() else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "#elif without matching #if");
            return;
        };
        if !frame.parent_active || frame.any_branch_taken {
            frame.taken = false;
        } else {
            let cond = self.eval_constant_expr(rest, loc) != 0;
            let frame = self.cond_stack.last_mut().unwrap();
            frame.taken = cond;
            frame.any_branch_taken = cond;
        }
    }

    fn directive_else(&mut self, loc: &crate::source::SourceLocation) {
        let Some(frame) = self.cond_stack.last_mut() else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "#else without matching #if");
            return;
        };
        frame.taken = frame.parent_active && !frame.any_branch_taken;
        frame.any_branch_taken = true;
    }

    fn directive_endif(&mut self, loc: &crate::source::SourceLocation) {
        if self.cond_stack.pop().is_none() {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "#endif without matching #if");
        }
    }

    fn directive_define(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        let Some(name_tok) = rest.first() else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "macro name missing");
            return;
        };
        let Some(name) = name_tok.identifier_name().map(str::to_string) else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "macro names must be identifiers");
            return;
        };
        let mut idx = 1;
        let (func_like, variadic, params) = if rest.len() > 1
            && rest[1].is_punct(Punct::LParen)
            && !rest[1].leading_whitespace
        {
            idx = 2;
            let mut params = Vec::new();
            let mut variadic = false;
            loop {
                match rest.get(idx) {
                    Some(t) if t.is_punct(Punct::RParen) => {
                        idx += 1;
                        break;
                    }
                    Some(t) if t.is_punct(Punct::Ellipsis) => {
                        variadic = true;
                        idx += 1;
                    }
                    Some(t) => {
                        if let Some(p) = t.identifier_name() {
                            params.push(p.to_string());
                        }
                        idx += 1;
                        continue;
                    }
                    None => break,
                }
                // skip a following comma
                if matches!(rest.get(idx), Some(t) if t.is_punct(Punct::Comma)) {
                    idx += 1;
                }
            }
            (true, variadic, params)
        } else {
            (false, false, Vec::new())
        };
        let replacement: Vec<Token> = rest[idx..].to_vec();
        if let Some(bad) = replacement.first() {
            if bad.is_punct(Punct::HashHash) {
                self.diags.error(DiagnosticKind::Preprocessor, bad.location.clone(), "'##' cannot appear at the start of a macro expansion");
            }
        }
        if let Some(bad) = replacement.last() {
            if bad.is_punct(Punct::HashHash) {
                self.diags.error(DiagnosticKind::Preprocessor, bad.location.clone(), "'##' cannot appear at the end of a macro expansion");
            }
        }
        if func_like {
            for (i, t) in replacement.iter().enumerate() {
                if t.is_punct(Punct::Hash) {
                    let ok = replacement.get(i + 1).and_then(|n| n.identifier_name()).map(|n| params.contains(&n.to_string()) || (variadic && n == "__VA_ARGS__")).unwrap_or(false);
                    if !ok {
                        self.diags.error(DiagnosticKind::Preprocessor, t.location.clone(), "'#' is not followed by a macro parameter");
                    }
                }
            }
        }
        let new_macro = Macro { func_like, variadic, params, replacement, predefined: false };
        if let Some(existing) = self.macros.get(&name) {
            if existing.predefined {
                return;
            }
            if !existing.same_definition(&new_macro) {
                self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), format!("'{name}' macro redefined"));
            }
        }
        self.macros.insert(name, new_macro);
    }

    fn directive_undef(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        let Some(name) = rest.first().and_then(|t| t.identifier_name()) else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "macro name missing");
            return;
        };
        if let Some(m) = self.macros.get(name) {
            if m.predefined {
                return;
            }
        }
        self.macros.remove(name);
    }

    fn directive_include(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        let Some((name, angled)) = parse_include_operand(rest) else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "expected \"FILENAME\" or <FILENAME>");
            return;
        };
        let Some(path) = self.include_stack.search(&name, angled) else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), format!("'{name}' file not found"));
            return;
        };
        if self.include_stack.already_included_once(&path) {
            return;
        }
        match SourceFile::load(&path) {
            Ok(file) => {
                let file = Rc::new(file);
                self.include_stack.push(Rc::clone(&file));
                self.frames.push(Frame::File { reader: SourceReader::new(file) });
            }
            Err(e) => {
                self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), format!("cannot open '{}': {}", path.display(), e));
            }
        }
    }

    fn directive_line(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        let Some(num) = rest.first() else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "#line requires a line number");
            return;
        };
        let Some(n) = num_text(num).and_then(|s| s.parse::<u32>().ok()) else {
            self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), "invalid #line argument");
            return;
        };
        let file = match rest.get(1) {
            Some(t) => match &t.kind {
                TokenKind::StringLiteral { value, .. } => value.clone(),
                _ => loc.file.display_name().to_string(),
            },
            None => loc.file.display_name().to_string(),
        };
        self.line_override = Some((file, n, loc.line + 1));
    }

    fn directive_error(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        let msg: String = rest.iter().map(|t| format!("{} ", t.text)).collect();
        self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), format!("#error {}", msg.trim_end()));
    }

    fn directive_pragma(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) {
        if rest.first().and_then(|t| t.identifier_name()) == Some("once") {
            if let Some(dir) = self.include_stack.current_dir() {
                // current file is the top frame; mark it from the include
                // stack's perspective using its own path.
                let _ = dir;
            }
            if let Frame::File { reader } = self.frames.last().unwrap() {
                let path = std::path::PathBuf::from(reader.file().display_name());
                self.include_stack.mark_pragma_once(&path);
            }
            return;
        }
        self.diags.warning(DiagnosticKind::Preprocessor, loc.clone(), "ignoring unknown pragma");
    }

    /// `#if`/`#elif` constant-expression evaluator: `defined NAME` /
    /// `defined(NAME)` resolved before expansion, remaining identifiers
    /// macro-expanded, anything still an identifier reads as 0, evaluated
    /// in the widest integer type with the usual arithmetic conversions.
    fn eval_constant_expr(&mut self, rest: &[Token], loc: &crate::source::SourceLocation) -> i64 {
        let replaced = self.replace_defined_operator(rest);
        let expanded = self.fully_expand_tokens(replaced);
        let cleaned: Vec<Token> = expanded
            .into_iter()
            .map(|t| if t.is_identifier() { number_token("0", &t.location) } else { t })
            .collect();
        let mut p = CondExprParser::new(&cleaned);
        match p.parse_expr() {
            Ok(v) => v,
            Err(msg) => {
                self.diags.error(DiagnosticKind::Preprocessor, loc.clone(), msg);
                0
            }
        }
    }

    fn replace_defined_operator(&self, rest: &[Token]) -> Vec<Token> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < rest.len() {
            if rest[i].identifier_name() == Some("defined") {
                let (name, consumed) = if matches!(rest.get(i + 1).map(|t| &t.kind), Some(TokenKind::Punct(Punct::LParen))) {
                    let n = rest.get(i + 2).and_then(|t| t.identifier_name());
                    (n, 4)
                } else {
                    (rest.get(i + 1).and_then(|t| t.identifier_name()), 2)
                };
                let defined = name.map(|n| self.macros.contains_key(n)).unwrap_or(false);
                out.push(number_token(if defined { "1" } else { "0" }, &rest[i].location));
                i += consumed;
                continue;
            }
            out.push(rest[i].clone());
            i += 1;
        }
        out
    }
}

impl Macro {
    fn variadic_collects(&self, args_so_far: usize) -> bool {
        self.variadic && args_so_far + 1 >= self.params.len()
    }
}

fn comma_token() -> Token {
    Token::new(TokenKind::Punct(Punct::Comma), ",".to_string(), dummy_location(), false)
}

fn number_token(text: &str, loc: &crate::source::SourceLocation) -> Token {
    Token::new(TokenKind::PpNumber(text.to_string()), text.to_string(), loc.clone(), true)
}

fn string_literal_token(text: &str, loc: &crate::source::SourceLocation) -> Token {
    Token::new(
        TokenKind::StringLiteral { value: text.to_string(), encoding: crate::token::Encoding::None },
        format!("\"{text}\""),
        loc.clone(),
        true,
    )
}

fn dummy_location() -> crate::source::SourceLocation {
    crate::source::SourceLocation {
        file: Rc::new(SourceFile::from_str("<paste>", "")),
        line: 0,
        column: 0,
        offset: 0,
    }
}

fn num_text(t: &Token) -> Option<String> {
    match &t.kind {
        TokenKind::PpNumber(s) => Some(s.clone()),
        _ => None,
    }
}

/// Standard `"..."` escaping for stringize: backslash-escape `"` and `\`
/// inside each token's spelling, joining tokens with single spaces where
/// the original had any whitespace between them.
fn stringize(tokens: &[Token], loc: &crate::source::SourceLocation) -> Token {
    let mut s = String::new();
    for (i, t) in tokens.iter().enumerate() {
        if i > 0 && t.leading_whitespace {
            s.push(' ');
        }
        if matches!(t.kind, TokenKind::StringLiteral { .. } | TokenKind::CharConstant { .. }) {
            for c in t.text.chars() {
                if c == '"' || c == '\\' {
                    s.push('\\');
                }
                s.push(c);
            }
        } else {
            s.push_str(&t.text);
        }
    }
    Token::new(
        TokenKind::StringLiteral { value: s.clone(), encoding: crate::token::Encoding::None },
        format!("\"{s}\""),
        loc.clone(),
        true,
    )
}

/// Re-lex a pasted spelling; valid only if it scans as exactly one token.
fn retokenize_single(text: &str, loc: crate::source::SourceLocation) -> Option<Token> {
    let file = Rc::new(SourceFile::from_str("<paste>", text));
    let mut reader = SourceReader::new(file);
    let mut diags = DiagnosticSink::new();
    let mut scanner = Scanner::new(&mut reader, &mut diags);
    let first = scanner.scan();
    let first_is_eof = first.is_eof();
    let second = scanner.scan();
    let second_is_eof = second.is_eof();
    drop(scanner);
    if first_is_eof || !diags.is_empty() {
        return None;
    }
    if !second_is_eof {
        return None;
    }
    let mut tok = first;
    tok.location = loc;
    Some(tok)
}

fn parse_include_operand(rest: &[Token]) -> Option<(String, bool)> {
    let first = rest.first()?;
    if let TokenKind::StringLiteral { value, .. } = &first.kind {
        return Some((value.clone(), false));
    }
    if first.is_punct(Punct::Less) {
        let mut name = String::new();
        for t in &rest[1..] {
            if t.is_punct(Punct::Greater) {
                return Some((name, true));
            }
            if t.leading_whitespace && !name.is_empty() {
                name.push(' ');
            }
            name.push_str(&t.text);
        }
    }
    None
}

/// Minimal recursive-descent integer-constant-expression evaluator for
/// `#if`/`#elif`, operating on the widest signed integer type (`i64`),
/// which is sufficient once usual arithmetic conversions have degenerated
/// every operand to plain integers.
struct CondExprParser<'t> {
    toks: &'t [Token],
    pos: usize,
}

impl<'t> CondExprParser<'t> {
    fn new(toks: &'t [Token]) -> Self {
        CondExprParser { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.toks.get(self.pos);
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<i64, String> {
        let v = self.parse_ternary()?;
        if self.pos < self.toks.len() {
            return Err("unexpected token in constant expression".to_string());
        }
        Ok(v)
    }

    fn parse_ternary(&mut self) -> Result<i64, String> {
        let cond = self.parse_or()?;
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Punct(Punct::Question))) {
            self.bump();
            let then_v = self.parse_ternary()?;
            self.expect_punct(Punct::Colon)?;
            let else_v = self.parse_ternary()?;
            return Ok(if cond != 0 { then_v } else { else_v });
        }
        Ok(cond)
    }

    fn expect_punct(&mut self, p: Punct) -> Result<(), String> {
        match self.bump() {
            Some(t) if t.is_punct(p) => Ok(()),
            _ => Err(format!("expected '{p:?}'")),
        }
    }

    fn parse_or(&mut self) -> Result<i64, String> {
        let mut v = self.parse_and()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Punct(Punct::OrOr))) {
            self.bump();
            let rhs = self.parse_and()?;
            v = ((v != 0) || (rhs != 0)) as i64;
        }
        Ok(v)
    }

    fn parse_and(&mut self) -> Result<i64, String> {
        let mut v = self.parse_bitor()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Punct(Punct::AndAnd))) {
            self.bump();
            let rhs = self.parse_bitor()?;
            v = ((v != 0) && (rhs != 0)) as i64;
        }
        Ok(v)
    }

    fn parse_bitor(&mut self) -> Result<i64, String> {
        let mut v = self.parse_bitxor()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Punct(Punct::Pipe))) {
            self.bump();
            v |= self.parse_bitxor()?;
        }
        Ok(v)
    }

    fn parse_bitxor(&mut self) -> Result<i64, String> {
        let mut v = self.parse_bitand()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Punct(Punct::Caret))) {
            self.bump();
            v ^= self.parse_bitand()?;
        }
        Ok(v)
    }

    fn parse_bitand(&mut self) -> Result<i64, String> {
        let mut v = self.parse_equality()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Punct(Punct::Amp))) {
            self.bump();
            v &= self.parse_equality()?;
        }
        Ok(v)
    }

    fn parse_equality(&mut self) -> Result<i64, String> {
        let mut v = self.parse_relational()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Punct(Punct::Eq)) => { self.bump(); v = (v == self.parse_relational()?) as i64; }
                Some(TokenKind::Punct(Punct::Ne)) => { self.bump(); v = (v != self.parse_relational()?) as i64; }
                _ => break,
            }
        }
        Ok(v)
    }

    fn parse_relational(&mut self) -> Result<i64, String> {
        let mut v = self.parse_shift()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Punct(Punct::Less)) => { self.bump(); v = (v < self.parse_shift()?) as i64; }
                Some(TokenKind::Punct(Punct::Greater)) => { self.bump(); v = (v > self.parse_shift()?) as i64; }
                Some(TokenKind::Punct(Punct::Le)) => { self.bump(); v = (v <= self.parse_shift()?) as i64; }
                Some(TokenKind::Punct(Punct::Ge)) => { self.bump(); v = (v >= self.parse_shift()?) as i64; }
                _ => break,
            }
        }
        Ok(v)
    }

    fn parse_shift(&mut self) -> Result<i64, String> {
        let mut v = self.parse_additive()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Punct(Punct::Shl)) => { self.bump(); v <<= self.parse_additive()?; }
                Some(TokenKind::Punct(Punct::Shr)) => { self.bump(); v >>= self.parse_additive()?; }
                _ => break,
            }
        }
        Ok(v)
    }

    fn parse_additive(&mut self) -> Result<i64, String> {
        let mut v = self.parse_mul()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Punct(Punct::Add)) => { self.bump(); v += self.parse_mul()?; }
                Some(TokenKind::Punct(Punct::Sub)) => { self.bump(); v -= self.parse_mul()?; }
                _ => break,
            }
        }
        Ok(v)
    }

    fn parse_mul(&mut self) -> Result<i64, String> {
        let mut v = self.parse_unary()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Punct(Punct::Mul)) => { self.bump(); v *= self.parse_unary()?; }
                Some(TokenKind::Punct(Punct::Div)) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    if rhs == 0 {
                        return Err("division by zero in constant expression".to_string());
                    }
                    v /= rhs;
                }
                Some(TokenKind::Punct(Punct::Mod)) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    if rhs == 0 {
                        return Err("division by zero in constant expression".to_string());
                    }
                    v %= rhs;
                }
                _ => break,
            }
        }
        Ok(v)
    }

    fn parse_unary(&mut self) -> Result<i64, String> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Punct(Punct::Sub)) => { self.bump(); Ok(-self.parse_unary()?) }
            Some(TokenKind::Punct(Punct::Add)) => { self.bump(); self.parse_unary() }
            Some(TokenKind::Punct(Punct::Not)) => { self.bump(); Ok((self.parse_unary()? == 0) as i64) }
            Some(TokenKind::Punct(Punct::Tilde)) => { self.bump(); Ok(!self.parse_unary()?) }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<i64, String> {
        match self.bump().map(|t| t.kind.clone()) {
            Some(TokenKind::PpNumber(text)) => parse_pp_int(&text),
            Some(TokenKind::CharConstant { value, .. }) => Ok(value.chars().next().map(|c| c as i64).unwrap_or(0)),
            Some(TokenKind::Punct(Punct::LParen)) => {
                let v = self.parse_ternary()?;
                self.expect_punct(Punct::RParen)?;
                Ok(v)
            }
            other => Err(format!("unexpected token in constant expression: {other:?}")),
        }
    }
}

fn parse_pp_int(text: &str) -> Result<i64, String> {
    let trimmed = text.trim_end_matches(|c: char| matches!(c, 'u' | 'U' | 'l' | 'L'));
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_err(|e| e.to_string());
    }
    if trimmed.len() > 1 && trimmed.starts_with('0') && trimmed.chars().all(|c| c.is_digit(8)) {
        return i64::from_str_radix(trimmed, 8).map_err(|e| e.to_string());
    }
    trimmed.parse::<i64>().map_err(|_| format!("invalid integer constant '{text}' in #if"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocess(src: &str) -> (Vec<Token>, DiagnosticSink) {
        let file = Rc::new(SourceFile::from_str("t.c", src));
        let mut diags = DiagnosticSink::new();
        let include_stack = IncludeStack::new(vec![], vec![]);
        let out;
        {
            let mut pp = Preprocessor::new(file, include_stack, &mut diags, "Jan  1 2024", "00:00:00");
            let mut toks = Vec::new();
            loop {
                let t = pp.next_token();
                if t.is_eof() {
                    break;
                }
                toks.push(t);
            }
            out = toks;
        }
        (out, diags)
    }

    fn texts(toks: &[Token]) -> Vec<String> {
        toks.iter().map(|t| t.text.clone()).collect()
    }

    #[test]
    fn s1_nested_function_macro_expansion() {
        let (toks, diags) = preprocess("#define F(x) x+x\nF(F(1))");
        assert!(diags.is_empty(), "{:?}", diags.iter().collect::<Vec<_>>());
        assert_eq!(texts(&toks), vec!["1", "+", "1", "+", "1", "+", "1"]);
    }

    #[test]
    fn s2_mutual_self_reference_terminates() {
        let (toks, _) = preprocess("#define A B\n#define B A\nA");
        assert_eq!(texts(&toks), vec!["A"]);
    }

    #[test]
    fn stringize_law() {
        let (toks, _) = preprocess("#define S(a) #a\nS(x)");
        match &toks[0].kind {
            TokenKind::StringLiteral { value, .. } => assert_eq!(value, "x"),
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn paste_law_builds_single_token() {
        let (toks, diags) = preprocess("#define CAT(a,b) a##b\nCAT(x,y)");
        assert!(diags.is_empty());
        assert_eq!(texts(&toks), vec!["xy"]);
    }

    #[test]
    fn paste_law_empty_lhs_yields_rhs() {
        let (toks, _) = preprocess("#define CAT(a,b) a##b\nCAT(,y)");
        assert_eq!(texts(&toks), vec!["y"]);
    }

    #[test]
    fn conditional_inclusion_basic() {
        let (toks, _) = preprocess("#if 1\nyes\n#else\nno\n#endif\n");
        assert_eq!(texts(&toks), vec!["yes"]);
    }

    #[test]
    fn conditional_elif_chain() {
        let (toks, _) = preprocess("#if 0\na\n#elif 0\nb\n#elif 1\nc\n#else\nd\n#endif\n");
        assert_eq!(texts(&toks), vec!["c"]);
    }

    #[test]
    fn defined_operator_before_expansion() {
        let (toks, _) = preprocess("#define FOO 1\n#if defined(FOO)\nyes\n#endif\n");
        assert_eq!(texts(&toks), vec!["yes"]);
    }

    #[test]
    fn division_by_zero_in_constant_expr_is_error() {
        let (_, diags) = preprocess("#if 1/0\nx\n#endif\n");
        assert!(diags.had_fatal());
    }

    #[test]
    fn variadic_macro_collects_remainder() {
        let (toks, _) = preprocess("#define LOG(fmt, ...) fmt __VA_ARGS__\nLOG(\"x\", 1, 2)");
        assert_eq!(texts(&toks), vec!["\"x\"", "1", ",", "2"]);
    }

    #[test]
    fn redefinition_with_same_body_is_allowed() {
        let (_, diags) = preprocess("#define X 1\n#define X 1\n");
        assert!(diags.is_empty());
    }

    #[test]
    fn redefinition_with_different_body_is_error() {
        let (_, diags) = preprocess("#define X 1\n#define X 2\n");
        assert!(diags.had_fatal());
    }
}
