//! Recursive-descent parser.
//!
//! Grounded on the teacher's `Parser { tokens: Vec<Token>, pos: usize }`
//! shape (unlimited pushback via a saved `pos`, a `mark`/`release` pair
//! for the one genuine lookahead ambiguity) generalized from Seq's flat
//! word grammar to full C declarations, statements, and expressions with
//! precedence climbing, cross-checked against `original_source/parser.cc`
//! for declarator composition (`modify_base`) and function-definition
//! recognition.

use crate::ast::{self, BinaryOp, CaseLabel, Constant, Expr, ExprKind, FunctionDefinition, Initializer, LabelTable, Stmt, StmtKind, UnaryOp};
use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::preprocessor::Preprocessor;
use crate::scope::{self, IdentKind, Identifier, Linkage, Scope, ScopeKind, ScopeRef, TagBinding, TagKind};
use crate::sema;
use crate::source::SourceLocation;
use crate::token::{Encoding, Keyword, Punct, Token, TokenKind};
use crate::types::{self, ArithTag, FunctionType, Param, QualifiedType, Qualifiers, Type};
use bumpalo::collections::Vec as BVec;
use bumpalo::Bump;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageClass {
    None,
    Typedef,
    Extern,
    Static,
    ThreadLocal,
    Auto,
    Register,
}

/// A postfix/prefix piece of a declarator, in the order the grammar
/// discovers them. Building the actual `Type` is deferred until the base
/// type from the declaration-specifiers is known (`modify_base`).
enum DeclPiece {
    Pointer(Qualifiers),
    Array(types::ArrayLen),
    Function(Vec<Param>, bool),
}

/// One declarator result: the declared name (absent for abstract
/// declarators used in casts/sizeof) and the chain of pieces to apply to
/// the base type, outside-in.
struct Declarator {
    name: Option<String>,
    pieces: Vec<DeclPiece>,
    loc: SourceLocation,
}

impl Declarator {
    /// Compose the final type: innermost piece (nearest the identifier)
    /// applies first, working outward — this is `modify_base` read as a
    /// fold rather than a mutate-in-place walk.
    fn build_type(&self, base: QualifiedType) -> QualifiedType {
        let mut ty = base;
        for piece in self.pieces.iter().rev() {
            ty = match piece {
                DeclPiece::Pointer(quals) => QualifiedType { ty: Type::pointer_to(ty), quals: *quals },
                DeclPiece::Array(len) => QualifiedType::unqualified(Type::Array { element: Box::new(ty), len: len.clone() }),
                DeclPiece::Function(params, variadic) => QualifiedType::unqualified(Type::Function(std::rc::Rc::new(FunctionType {
                    ret: ty,
                    params: params.clone(),
                    variadic: *variadic,
                    inline: false,
                    noreturn: false,
                }))),
            };
        }
        ty
    }
}

struct LoopFrame {
    continue_label: u32,
    break_label: u32,
}

struct SwitchFrame {
    subject: u32, // temp-var id holding the switch subject
    cases: Vec<CaseLabel>,
    default_label: Option<u32>,
    break_label: u32,
}

enum ControlFrame {
    Loop(LoopFrame),
    Switch(SwitchFrame),
}

pub struct Parser<'a, 'd> {
    tokens: Vec<Token>,
    pos: usize,
    diags: &'d mut DiagnosticSink,
    arena: &'a Bump,
    global_scope: ScopeRef,
    scope: ScopeRef,
    control_stack: Vec<ControlFrame>,
    labels: Option<LabelTable>,
    temp_counter: u32,
    pub function_defs: Vec<FunctionDefinition<'a>>,
}

impl<'a, 'd> Parser<'a, 'd> {
    /// Drains `pp` to end of file and takes over its diagnostic sink by
    /// reborrowing through it — a caller that already handed `pp` its
    /// `&mut DiagnosticSink` at construction must not also hand one to the
    /// parser; that would be two live mutable borrows of the same sink.
    pub fn new(pp: &'d mut Preprocessor<'_>, arena: &'a Bump) -> Self {
        let mut tokens = Vec::new();
        loop {
            let t = pp.next_token();
            let is_eof = t.is_eof();
            tokens.push(t);
            if is_eof {
                break;
            }
        }
        let diags = pp.diagnostics_mut();
        let global_scope = Scope::new_root();
        Parser {
            tokens,
            pos: 0,
            diags,
            arena,
            scope: global_scope.clone(),
            global_scope,
            control_stack: Vec::new(),
            labels: None,
            temp_counter: 0,
            function_defs: Vec::new(),
        }
    }

    /// Hand over the file-scope table built while parsing, for a caller
    /// that wants to resolve names against the translation unit after the
    /// parser itself has gone out of scope.
    pub fn into_global_scope(self) -> ScopeRef {
        self.global_scope
    }

    // ---- token-stream primitives -----------------------------------------

    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_eof(&self) -> bool {
        self.cur().is_eof()
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if !t.is_eof() {
            self.pos += 1;
        }
        t
    }

    fn mark(&self) -> usize {
        self.pos
    }

    fn release(&mut self, mark: usize) {
        self.pos = mark;
    }

    fn check_punct(&self, p: Punct) -> bool {
        self.cur().is_punct(p)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct) -> bool {
        if self.eat_punct(p) {
            true
        } else {
            let loc = self.cur().location.clone();
            self.error(loc, format!("expected '{p:?}', found '{}'", self.cur().text));
            self.resync();
            false
        }
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.cur().is_keyword(kw)
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&mut self, loc: SourceLocation, msg: impl Into<String>) {
        self.diags.error(DiagnosticKind::Syntactic, loc, msg);
    }

    /// Resynchronize at the next `;` or `}` so one mistake doesn't cascade
    /// into dozens of spurious follow-on errors.
    fn resync(&mut self) {
        loop {
            if self.at_eof() {
                return;
            }
            if self.check_punct(Punct::Semi) {
                self.bump();
                return;
            }
            if self.check_punct(Punct::RBrace) {
                return;
            }
            self.bump();
        }
    }

    fn fresh_temp(&mut self) -> u32 {
        let id = self.temp_counter;
        self.temp_counter += 1;
        id
    }

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scope = Scope::child(&self.scope, kind);
    }

    fn pop_scope(&mut self) {
        let parent = self.scope.borrow().parent();
        if let Some(parent) = parent {
            self.scope = parent;
        }
    }

    // ---- declaration specifiers and declarators ---------------------------

    /// True if the current token starts a declaration-specifier sequence:
    /// a type-specifier keyword, a qualifier, a storage-class keyword, or
    /// an identifier classified as a typedef-name in the current scope.
    fn at_decl_specifier(&self) -> bool {
        if let TokenKind::Keyword(kw) = &self.cur().kind {
            return matches!(
                kw,
                Keyword::Void | Keyword::Char | Keyword::Short | Keyword::Int | Keyword::Long
                    | Keyword::Float | Keyword::Double | Keyword::Signed | Keyword::Unsigned
                    | Keyword::Bool | Keyword::Complex | Keyword::Struct | Keyword::Union | Keyword::Enum
                    | Keyword::Const | Keyword::Restrict | Keyword::Volatile | Keyword::Atomic
                    | Keyword::Typedef | Keyword::Extern | Keyword::Static | Keyword::ThreadLocal
                    | Keyword::Auto | Keyword::Register | Keyword::Inline | Keyword::Noreturn
            );
        }
        if let Some(name) = self.cur().identifier_name() {
            return scope::is_typedef_name(&self.scope, name);
        }
        false
    }

    /// Parse declaration-specifiers into (base type, storage class,
    /// noreturn). Function-specifier `inline` is folded into the
    /// returned type's `Function` variant by the caller once the
    /// declarator is known.
    fn parse_decl_specifiers(&mut self) -> (QualifiedType, StorageClass, bool, bool) {
        let mut tag = ArithTag::empty();
        let mut quals = Qualifiers::empty();
        let mut storage = StorageClass::None;
        let mut saw_void = false;
        let mut aggregate: Option<Type> = None;
        let mut inline = false;
        let mut noreturn = false;

        loop {
            if let TokenKind::Keyword(kw) = self.cur().kind {
                match kw {
                    Keyword::Typedef => { storage = StorageClass::Typedef; self.bump(); }
                    Keyword::Extern => { storage = StorageClass::Extern; self.bump(); }
                    Keyword::Static => { storage = StorageClass::Static; self.bump(); }
                    Keyword::ThreadLocal => { storage = StorageClass::ThreadLocal; self.bump(); }
                    Keyword::Auto => { storage = StorageClass::Auto; self.bump(); }
                    Keyword::Register => { storage = StorageClass::Register; self.bump(); }
                    Keyword::Inline => { inline = true; self.bump(); }
                    Keyword::Noreturn => { noreturn = true; self.bump(); }
                    Keyword::Const => { quals |= Qualifiers::CONST; self.bump(); }
                    Keyword::Restrict => { quals |= Qualifiers::RESTRICT; self.bump(); }
                    Keyword::Volatile => { quals |= Qualifiers::VOLATILE; self.bump(); }
                    Keyword::Atomic => { quals |= Qualifiers::ATOMIC; self.bump(); }
                    Keyword::Void => { saw_void = true; self.bump(); }
                    Keyword::Char => { tag |= ArithTag::CHAR; self.bump(); }
                    Keyword::Short => { tag |= ArithTag::SHORT; self.bump(); }
                    Keyword::Int => { tag |= ArithTag::INT; self.bump(); }
                    Keyword::Long => {
                        if tag.contains(ArithTag::LONG) {
                            tag = (tag & !ArithTag::LONG) | ArithTag::LONG_LONG;
                        } else {
                            tag |= ArithTag::LONG;
                        }
                        self.bump();
                    }
                    Keyword::Float => { tag |= ArithTag::FLOAT; self.bump(); }
                    Keyword::Double => { tag |= ArithTag::DOUBLE; self.bump(); }
                    Keyword::Signed => { tag |= ArithTag::SIGNED; self.bump(); }
                    Keyword::Unsigned => { tag |= ArithTag::UNSIGNED; self.bump(); }
                    Keyword::Bool => { tag |= ArithTag::BOOL; self.bump(); }
                    Keyword::Complex => { tag |= ArithTag::COMPLEX; self.bump(); }
                    Keyword::Struct | Keyword::Union => {
                        aggregate = Some(self.parse_struct_or_union_specifier());
                    }
                    Keyword::Enum => {
                        aggregate = Some(self.parse_enum_specifier());
                    }
                    _ => break,
                }
                continue;
            }
            if let Some(name) = self.cur().identifier_name() {
                if aggregate.is_none() && tag.is_empty() && !saw_void {
                    if let Some(id) = scope::lookup_ident(&self.scope, name) {
                        if id.kind == IdentKind::TypedefName {
                            aggregate = Some(id.ty.ty.clone());
                            quals |= id.ty.quals;
                            self.bump();
                            continue;
                        }
                    }
                }
            }
            break;
        }

        let base_ty = if let Some(t) = aggregate {
            t
        } else if saw_void {
            Type::Void
        } else {
            Type::Arithmetic(types::intern_arith(tag))
        };
        (QualifiedType { ty: base_ty, quals }, storage, inline, noreturn)
    }

    fn parse_struct_or_union_specifier(&mut self) -> Type {
        let is_struct = self.check_keyword(Keyword::Struct);
        self.bump(); // struct|union
        let tag_name = self.cur().identifier_name().map(str::to_string);
        if tag_name.is_some() {
            self.bump();
        }

        if !self.check_punct(Punct::LBrace) {
            // Reference to an existing (possibly forward) tag.
            if let Some(name) = &tag_name {
                if let Some(binding) = scope::lookup_tag(&self.scope, name) {
                    return binding.ty.clone();
                }
                let handle = types::new_struct_union(is_struct, Some(name.clone()));
                let ty = Type::StructUnion(handle);
                let _ = self.scope.borrow_mut().declare_tag(name.clone(), TagBinding {
                    kind: if is_struct { TagKind::Struct } else { TagKind::Union },
                    ty: ty.clone(),
                });
                return ty;
            }
            let loc = self.cur().location.clone();
            self.error(loc, "expected struct/union tag or body");
            return Type::StructUnion(types::new_struct_union(is_struct, None));
        }

        let handle = if let Some(name) = &tag_name {
            if let Some(binding) = self.scope.borrow().tag_here(name) {
                match &binding.ty {
                    Type::StructUnion(h) => h.clone(),
                    _ => types::new_struct_union(is_struct, Some(name.clone())),
                }
            } else {
                types::new_struct_union(is_struct, Some(name.clone()))
            }
        } else {
            types::new_struct_union(is_struct, None)
        };

        if let Some(name) = &tag_name {
            let _ = self.scope.borrow_mut().declare_tag(name.clone(), TagBinding {
                kind: if is_struct { TagKind::Struct } else { TagKind::Union },
                ty: Type::StructUnion(handle.clone()),
            });
        }

        self.bump(); // '{'
        let mut members = Vec::new();
        while !self.check_punct(Punct::RBrace) && !self.at_eof() {
            let (base, _, _, _) = self.parse_decl_specifiers();
            loop {
                if self.eat_punct(Punct::Colon) {
                    let width = self.parse_constant_int_expr() as u8;
                    members.push((None, base.clone(), Some(width)));
                } else {
                    let d = self.parse_declarator();
                    let ty = d.build_type(base.clone());
                    let width = if self.eat_punct(Punct::Colon) {
                        Some(self.parse_constant_int_expr() as u8)
                    } else {
                        None
                    };
                    members.push((d.name, ty, width));
                }
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::Semi);
        }
        self.expect_punct(Punct::RBrace);

        if let Err(e) = types::layout_struct_union(&mut handle.borrow_mut(), members) {
            let loc = self.cur().location.clone();
            self.error(loc, e);
        }
        Type::StructUnion(handle)
    }

    fn parse_enum_specifier(&mut self) -> Type {
        self.bump(); // enum
        let tag_name = self.cur().identifier_name().map(str::to_string);
        if tag_name.is_some() {
            self.bump();
        }

        if !self.check_punct(Punct::LBrace) {
            if let Some(name) = &tag_name {
                if let Some(binding) = scope::lookup_tag(&self.scope, name) {
                    return binding.ty.clone();
                }
            }
            let loc = self.cur().location.clone();
            self.error(loc, "expected enum tag or body");
            return Type::Enum(types::new_enum(tag_name));
        }

        self.bump(); // '{'
        let handle = types::new_enum(tag_name.clone());
        let mut next_value: i64 = 0;
        while !self.check_punct(Punct::RBrace) && !self.at_eof() {
            let Some(name) = self.cur().identifier_name().map(str::to_string) else {
                let loc = self.cur().location.clone();
                self.error(loc, "expected enumerator name");
                break;
            };
            self.bump();
            let value = if self.eat_punct(Punct::Assign) {
                self.parse_constant_int_expr()
            } else {
                next_value
            };
            next_value = value + 1;
            handle.borrow_mut().constants.push((name.clone(), value));
            let _ = self.scope.borrow_mut().declare(Identifier {
                name,
                ty: QualifiedType::unqualified(Type::Enum(handle.clone())),
                kind: IdentKind::Enumerator,
                linkage: Linkage::None,
                is_defined: true,
            });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace);
        if let Some(name) = &tag_name {
            let _ = self.scope.borrow_mut().declare_tag(name.clone(), TagBinding { kind: TagKind::Enum, ty: Type::Enum(handle.clone()) });
        }
        Type::Enum(handle)
    }

    /// Parse a declarator: `'*' qual* declarator`, direct-declarators
    /// (`identifier`, `'(' declarator ')'`, postfix `[len]`/`(params)`
    /// chains). `allow_abstract` permits an absent identifier, for
    /// type-names in casts/`sizeof`.
    fn parse_declarator(&mut self) -> Declarator {
        self.parse_declarator_inner(true)
    }

    fn parse_abstract_declarator(&mut self) -> Declarator {
        self.parse_declarator_inner(true)
    }

    fn parse_declarator_inner(&mut self, _allow_abstract: bool) -> Declarator {
        let loc = self.cur().location.clone();
        let mut prefix_pieces = Vec::new();
        while self.eat_punct(Punct::Mul) {
            let mut q = Qualifiers::empty();
            loop {
                match self.cur().kind {
                    TokenKind::Keyword(Keyword::Const) => { q |= Qualifiers::CONST; self.bump(); }
                    TokenKind::Keyword(Keyword::Volatile) => { q |= Qualifiers::VOLATILE; self.bump(); }
                    TokenKind::Keyword(Keyword::Restrict) => { q |= Qualifiers::RESTRICT; self.bump(); }
                    TokenKind::Keyword(Keyword::Atomic) => { q |= Qualifiers::ATOMIC; self.bump(); }
                    _ => break,
                }
            }
            prefix_pieces.push(DeclPiece::Pointer(q));
        }

        let (name, mut inner_pieces) = self.parse_direct_declarator();
        // Direct-declarator postfix pieces bind tighter than the pointer
        // prefix, so the final hole-filling order is: postfix pieces
        // first (innermost), then the pointer pieces (outermost).
        inner_pieces.extend(prefix_pieces);
        Declarator { name, pieces: inner_pieces, loc }
    }

    fn parse_direct_declarator(&mut self) -> (Option<String>, Vec<DeclPiece>) {
        let (name, mut pieces) = if self.eat_punct(Punct::LParen) {
            let grouped = self.parse_declarator_inner(true);
            self.expect_punct(Punct::RParen);
            (grouped.name, grouped.pieces)
        } else if let Some(n) = self.cur().identifier_name().map(str::to_string) {
            self.bump();
            (Some(n), Vec::new())
        } else {
            (None, Vec::new())
        };

        let postfix = self.parse_declarator_postfix();
        (name, postfix.into_iter().chain(pieces).collect())
    }

    /// Parse zero or more trailing `[len]` / `(params)` suffixes,
    /// returning them innermost-first (closest to the identifier first).
    fn parse_declarator_postfix(&mut self) -> Vec<DeclPiece> {
        let mut pieces = Vec::new();
        loop {
            if self.eat_punct(Punct::LBracket) {
                let len = if self.check_punct(Punct::RBracket) {
                    types::ArrayLen::Unknown
                } else {
                    types::ArrayLen::Known(self.parse_constant_int_expr() as u64)
                };
                self.expect_punct(Punct::RBracket);
                pieces.push(DeclPiece::Array(len));
            } else if self.eat_punct(Punct::LParen) {
                let (params, variadic) = self.parse_param_list();
                self.expect_punct(Punct::RParen);
                pieces.push(DeclPiece::Function(params, variadic));
            } else {
                break;
            }
        }
        // Innermost piece is the *first* one discovered by the grammar
        // (closest to the identifier); later postfixes (from a grouped
        // declarator's outer suffixes) come after. Chained postfixes on
        // the same identifier compose left-to-right as written, which is
        // already the order `pieces` was built in.
        pieces
    }

    fn parse_param_list(&mut self) -> (Vec<Param>, bool) {
        let mut params = Vec::new();
        let mut variadic = false;
        if self.check_punct(Punct::RParen) {
            return (params, variadic);
        }
        if self.check_keyword(Keyword::Void) {
            let mark = self.mark();
            self.bump();
            if self.check_punct(Punct::RParen) {
                return (params, variadic);
            }
            self.release(mark);
        }
        loop {
            if self.eat_punct(Punct::Ellipsis) {
                variadic = true;
                break;
            }
            let (base, _, _, _) = self.parse_decl_specifiers();
            let d = self.parse_declarator();
            let ty = d.build_type(base);
            params.push(Param { name: d.name, ty });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        (params, variadic)
    }

    fn parse_type_name(&mut self) -> QualifiedType {
        let (base, _, _, _) = self.parse_decl_specifiers();
        let d = self.parse_abstract_declarator();
        d.build_type(base)
    }

    // ---- external declarations / function definitions ---------------------

    pub fn parse_translation_unit(&mut self) {
        while !self.at_eof() {
            self.parse_external_declaration();
        }
    }

    fn parse_external_declaration(&mut self) {
        let (base, storage, inline, noreturn) = self.parse_decl_specifiers();
        if self.eat_punct(Punct::Semi) {
            return; // bare `struct S;` or similar.
        }
        loop {
            let d = self.parse_declarator();
            let mut ty = d.build_type(base.clone());
            if let Type::Function(f) = &ty.ty {
                let mut f = (**f).clone();
                f.inline = inline;
                f.noreturn = noreturn;
                ty = QualifiedType { ty: Type::Function(std::rc::Rc::new(f)), quals: ty.quals };
            }

            let is_function_def = ty.ty.is_function() && self.check_punct(Punct::LBrace);
            let kind = if storage == StorageClass::Typedef {
                IdentKind::TypedefName
            } else if ty.ty.is_function() {
                IdentKind::Function
            } else {
                IdentKind::Object
            };
            let linkage = match storage {
                StorageClass::Static => Linkage::Internal,
                StorageClass::Typedef | StorageClass::Auto | StorageClass::Register => Linkage::None,
                _ => Linkage::External,
            };

            if let Some(name) = d.name.clone() {
                let declare_result = self.scope.borrow_mut().declare(Identifier {
                    name: name.clone(),
                    ty: ty.clone(),
                    kind,
                    linkage,
                    is_defined: is_function_def,
                });
                if let Err(e) = declare_result {
                    self.error(d.loc.clone(), e);
                }

                if is_function_def {
                    self.parse_function_body(name, ty);
                    return;
                }
            }

            if self.check_punct(Punct::Assign) {
                self.bump();
                self.parse_initializer();
            }
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::Semi);
    }

    fn parse_function_body(&mut self, name: String, ty: QualifiedType) {
        self.labels = Some(LabelTable::new());
        self.push_scope(ScopeKind::Function);
        if let Type::Function(f) = &ty.ty {
            for p in &f.params {
                if let Some(pname) = &p.name {
                    let _ = self.scope.borrow_mut().declare(Identifier {
                        name: pname.clone(),
                        ty: p.ty.clone(),
                        kind: IdentKind::Object,
                        linkage: Linkage::None,
                        is_defined: true,
                    });
                }
            }
        }
        let body = self.parse_compound_statement();
        let func_scope = self.scope.clone();
        for unresolved in scope::unresolved_labels(&func_scope) {
            let loc = self.cur().location.clone();
            self.error(loc, format!("use of undeclared label '{unresolved}'"));
        }
        self.pop_scope();
        let labels = self.labels.take().unwrap_or_default();
        self.function_defs.push(FunctionDefinition { name, ty, body, labels });
    }

    // ---- statements ---------------------------------------------------------

    fn parse_compound_statement(&mut self) -> &'a Stmt<'a> {
        let loc = self.cur().location.clone();
        self.expect_punct(Punct::LBrace);
        self.push_scope(ScopeKind::Block);
        let mut items = BVec::new_in(self.arena);
        while !self.check_punct(Punct::RBrace) && !self.at_eof() {
            items.push(self.parse_block_item());
        }
        self.expect_punct(Punct::RBrace);
        self.pop_scope();
        ast::alloc_stmt(self.arena, StmtKind::Compound(items), loc)
    }

    fn parse_block_item(&mut self) -> &'a Stmt<'a> {
        if self.at_decl_specifier() {
            return self.parse_declaration_statement();
        }
        self.parse_statement()
    }

    fn parse_declaration_statement(&mut self) -> &'a Stmt<'a> {
        let loc = self.cur().location.clone();
        let (base, storage, _, _) = self.parse_decl_specifiers();
        let mut inits = BVec::new_in(self.arena);
        if !self.check_punct(Punct::Semi) {
            loop {
                let d = self.parse_declarator();
                let ty = d.build_type(base.clone());
                let kind = if storage == StorageClass::Typedef { IdentKind::TypedefName } else { IdentKind::Object };
                if let Some(name) = d.name.clone() {
                    let declare_result = self.scope.borrow_mut().declare(Identifier {
                        name,
                        ty: ty.clone(),
                        kind,
                        linkage: Linkage::None,
                        is_defined: true,
                    });
                    if let Err(e) = declare_result {
                        self.error(d.loc.clone(), e);
                    }
                }
                if self.eat_punct(Punct::Assign) {
                    let value = self.parse_initializer();
                    inits.push(Initializer { offset_path: Vec::new(), value });
                }
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::Semi);
        ast::alloc_stmt(self.arena, StmtKind::Declaration(inits), loc)
    }

    /// A single initializer expression (braced aggregate or designated
    /// forms are not recursed into further here — a single flat level of
    /// `{ a, b, .field = c, [2] = d }` is supported, matching the
    /// flattened-offset-path model described for initializers; deeper
    /// nesting is treated the same way by recursing on `parse_initializer`
    /// for each element and prepending the outer path below).
    fn parse_initializer(&mut self) -> &'a Expr<'a> {
        if self.check_punct(Punct::LBrace) {
            let loc = self.cur().location.clone();
            self.bump();
            let mut inits = BVec::new_in(self.arena);
            let mut positional = 0u32;
            while !self.check_punct(Punct::RBrace) && !self.at_eof() {
                let offset_path = if self.eat_punct(Punct::Dot) {
                    let field = self.cur().identifier_name().map(str::to_string).unwrap_or_default();
                    self.bump();
                    self.expect_punct(Punct::Assign);
                    vec![hash_member(&field)]
                } else if self.eat_punct(Punct::LBracket) {
                    let idx = self.parse_constant_int_expr() as u32;
                    self.expect_punct(Punct::RBracket);
                    self.expect_punct(Punct::Assign);
                    positional = idx + 1;
                    vec![idx]
                } else {
                    let p = positional;
                    positional += 1;
                    vec![p]
                };
                let value = self.parse_initializer();
                inits.push(Initializer { offset_path, value });
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::RBrace);
            return ast::alloc_expr(self.arena, ExprKind::CompoundLiteral { inits }, QualifiedType::unqualified(Type::Void), false, loc);
        }
        self.parse_assignment_expr()
    }

    fn parse_statement(&mut self) -> &'a Stmt<'a> {
        let loc = self.cur().location.clone();
        if self.check_punct(Punct::LBrace) {
            return self.parse_compound_statement();
        }
        if self.eat_punct(Punct::Semi) {
            return ast::alloc_stmt(self.arena, StmtKind::Empty, loc);
        }
        if self.eat_keyword(Keyword::If) {
            return self.parse_if();
        }
        if self.eat_keyword(Keyword::While) {
            return self.parse_while();
        }
        if self.eat_keyword(Keyword::Do) {
            return self.parse_do_while();
        }
        if self.eat_keyword(Keyword::For) {
            return self.parse_for();
        }
        if self.eat_keyword(Keyword::Switch) {
            return self.parse_switch();
        }
        if self.eat_keyword(Keyword::Break) {
            self.expect_punct(Punct::Semi);
            return self.lower_break(loc);
        }
        if self.eat_keyword(Keyword::Continue) {
            self.expect_punct(Punct::Semi);
            return self.lower_continue(loc);
        }
        if self.eat_keyword(Keyword::Return) {
            let value = if self.check_punct(Punct::Semi) { None } else { Some(self.parse_expr()) };
            self.expect_punct(Punct::Semi);
            return ast::alloc_stmt(self.arena, StmtKind::Return(value), loc);
        }
        if self.eat_keyword(Keyword::Goto) {
            let name = self.cur().identifier_name().map(str::to_string).unwrap_or_default();
            self.bump();
            self.expect_punct(Punct::Semi);
            let label_id = self.labels.as_mut().unwrap().intern(&name);
            scope::reference_label(&scope::function_scope(&self.scope).unwrap(), &name);
            return ast::alloc_stmt(self.arena, StmtKind::Goto { label_id }, loc);
        }
        if self.eat_keyword(Keyword::Case) {
            return self.parse_case();
        }
        if self.eat_keyword(Keyword::Default) {
            return self.parse_default();
        }
        // Labeled statement: `identifier ':' statement`.
        if let Some(name) = self.cur().identifier_name().map(str::to_string) {
            let mark = self.mark();
            self.bump();
            if self.eat_punct(Punct::Colon) {
                let func_scope = scope::function_scope(&self.scope).unwrap();
                if let Err(e) = scope::define_label(&func_scope, &name) {
                    self.error(loc.clone(), e);
                }
                let label_id = self.labels.as_mut().unwrap().intern(&name);
                let inner = self.parse_statement();
                return ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id, inner }, loc);
            }
            self.release(mark);
        }
        let expr = self.parse_expr();
        self.expect_punct(Punct::Semi);
        self.wrap_expr_statement(expr, loc)
    }

    fn wrap_expr_statement(&mut self, expr: &'a Expr<'a>, loc: SourceLocation) -> &'a Stmt<'a> {
        let mut items = BVec::new_in(self.arena);
        items.push(ast::alloc_stmt(self.arena, StmtKind::Declaration({
            let mut v = BVec::new_in(self.arena);
            v.push(Initializer { offset_path: Vec::new(), value: expr });
            v
        }), loc.clone()));
        // A single-item Compound keeps ExprStatement from needing its own
        // variant while still letting the checker and codegen walk a
        // uniform statement shape; the Declaration wrapper carries no
        // actual binding (its initializer list is only ever inspected for
        // the expression's side effects and final value).
        ast::alloc_stmt(self.arena, StmtKind::Compound(items), loc)
    }

    fn parse_if(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        self.expect_punct(Punct::LParen);
        let cond = self.parse_expr();
        self.expect_punct(Punct::RParen);
        let then = self.parse_statement();
        let otherwise = if self.eat_keyword(Keyword::Else) { Some(self.parse_statement()) } else { None };
        ast::alloc_stmt(self.arena, StmtKind::If { cond, then, otherwise }, loc)
    }

    fn parse_while(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        self.expect_punct(Punct::LParen);
        let cond = self.parse_expr();
        self.expect_punct(Punct::RParen);

        let start = self.labels.as_mut().unwrap().fresh("while_start");
        let brk = self.labels.as_mut().unwrap().fresh("while_end");
        self.control_stack.push(ControlFrame::Loop(LoopFrame { continue_label: start, break_label: brk }));
        let body = self.parse_statement();
        self.control_stack.pop();

        let mut inner = BVec::new_in(self.arena);
        inner.push(body);
        inner.push(ast::alloc_stmt(self.arena, StmtKind::Goto { label_id: start }, loc.clone()));
        let loop_body = ast::alloc_stmt(self.arena, StmtKind::Compound(inner), loc.clone());

        let guarded = ast::alloc_stmt(self.arena, StmtKind::If { cond, then: loop_body, otherwise: None }, loc.clone());
        let labeled_start = ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: start, inner: guarded }, loc.clone());
        let labeled_end = ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: brk, inner: ast::alloc_stmt(self.arena, StmtKind::Empty, loc.clone()) }, loc.clone());

        let mut outer = BVec::new_in(self.arena);
        outer.push(labeled_start);
        outer.push(labeled_end);
        ast::alloc_stmt(self.arena, StmtKind::Compound(outer), loc)
    }

    fn parse_do_while(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        let start = self.labels.as_mut().unwrap().fresh("do_start");
        let cont = self.labels.as_mut().unwrap().fresh("do_continue");
        let brk = self.labels.as_mut().unwrap().fresh("do_end");
        self.control_stack.push(ControlFrame::Loop(LoopFrame { continue_label: cont, break_label: brk }));
        let body = self.parse_statement();
        self.control_stack.pop();
        self.eat_keyword(Keyword::While);
        self.expect_punct(Punct::LParen);
        let cond = self.parse_expr();
        self.expect_punct(Punct::RParen);
        self.expect_punct(Punct::Semi);

        let labeled_cont = ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: cont, inner: ast::alloc_stmt(self.arena, StmtKind::Empty, loc.clone()) }, loc.clone());
        let jump_back = ast::alloc_stmt(self.arena, StmtKind::If { cond, then: ast::alloc_stmt(self.arena, StmtKind::Goto { label_id: start }, loc.clone()), otherwise: None }, loc.clone());

        let mut inner = BVec::new_in(self.arena);
        inner.push(body);
        inner.push(labeled_cont);
        inner.push(jump_back);
        let labeled_start = ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: start, inner: ast::alloc_stmt(self.arena, StmtKind::Compound(inner), loc.clone()) }, loc.clone());
        let labeled_end = ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: brk, inner: ast::alloc_stmt(self.arena, StmtKind::Empty, loc.clone()) }, loc.clone());

        let mut outer = BVec::new_in(self.arena);
        outer.push(labeled_start);
        outer.push(labeled_end);
        ast::alloc_stmt(self.arena, StmtKind::Compound(outer), loc)
    }

    fn parse_for(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        self.expect_punct(Punct::LParen);
        self.push_scope(ScopeKind::Block);

        let mut prelude = BVec::new_in(self.arena);
        if self.at_decl_specifier() {
            prelude.push(self.parse_declaration_statement());
        } else if !self.check_punct(Punct::Semi) {
            let e = self.parse_expr();
            prelude.push(self.wrap_expr_statement(e, loc.clone()));
            self.expect_punct(Punct::Semi);
        } else {
            self.bump();
        }

        let cond = if self.check_punct(Punct::Semi) { None } else { Some(self.parse_expr()) };
        self.expect_punct(Punct::Semi);
        let step = if self.check_punct(Punct::RParen) { None } else { Some(self.parse_expr()) };
        self.expect_punct(Punct::RParen);

        let start = self.labels.as_mut().unwrap().fresh("for_start");
        let cont = self.labels.as_mut().unwrap().fresh("for_continue");
        let brk = self.labels.as_mut().unwrap().fresh("for_end");
        self.control_stack.push(ControlFrame::Loop(LoopFrame { continue_label: cont, break_label: brk }));
        let body = self.parse_statement();
        self.control_stack.pop();

        let mut loop_body_items = BVec::new_in(self.arena);
        loop_body_items.push(body);
        loop_body_items.push(ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: cont, inner: ast::alloc_stmt(self.arena, StmtKind::Empty, loc.clone()) }, loc.clone()));
        if let Some(step) = step {
            loop_body_items.push(self.wrap_expr_statement(step, loc.clone()));
        }
        loop_body_items.push(ast::alloc_stmt(self.arena, StmtKind::Goto { label_id: start }, loc.clone()));
        let loop_body = ast::alloc_stmt(self.arena, StmtKind::Compound(loop_body_items), loc.clone());

        let true_expr = ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Int(1)), QualifiedType::unqualified(Type::Arithmetic(types::int_type())), false, loc.clone());
        let guard_cond = cond.unwrap_or(true_expr);
        let guarded = ast::alloc_stmt(self.arena, StmtKind::If { cond: guard_cond, then: loop_body, otherwise: None }, loc.clone());

        prelude.push(ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: start, inner: guarded }, loc.clone()));
        prelude.push(ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: brk, inner: ast::alloc_stmt(self.arena, StmtKind::Empty, loc.clone()) }, loc.clone()));

        self.pop_scope();
        ast::alloc_stmt(self.arena, StmtKind::Compound(prelude), loc)
    }

    fn parse_switch(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        self.expect_punct(Punct::LParen);
        let subject_expr = self.parse_expr();
        self.expect_punct(Punct::RParen);

        let subject_temp = self.fresh_temp();
        let brk = self.labels.as_mut().unwrap().fresh("switch_end");
        self.control_stack.push(ControlFrame::Switch(SwitchFrame { subject: subject_temp, cases: Vec::new(), default_label: None, break_label: brk }));
        let body = self.parse_statement();
        let Some(ControlFrame::Switch(frame)) = self.control_stack.pop() else {
            unreachable!("switch frame must still be on top: only this function pushes/pops it")
        };

        let subject_ty = subject_expr.ty.clone();
        let temp = ast::alloc_expr(self.arena, ExprKind::TempVar(subject_temp), subject_ty.clone(), false, loc.clone());
        let assign_subject = ast::alloc_expr(
            self.arena,
            ExprKind::Binary { op: BinaryOp::Assign, lhs: temp, rhs: subject_expr },
            subject_ty.clone(),
            false,
            loc.clone(),
        );

        let mut dispatch = BVec::new_in(self.arena);
        dispatch.push(self.wrap_expr_statement(assign_subject, loc.clone()));
        for case in &frame.cases {
            let k = ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Int(case.value)), subject_ty.clone(), false, loc.clone());
            let eq = ast::alloc_expr(
                self.arena,
                ExprKind::Binary { op: BinaryOp::Eq, lhs: temp, rhs: k },
                QualifiedType::unqualified(Type::Arithmetic(types::int_type())),
                false,
                loc.clone(),
            );
            let goto_case = ast::alloc_stmt(self.arena, StmtKind::Goto { label_id: case.label_id }, loc.clone());
            dispatch.push(ast::alloc_stmt(self.arena, StmtKind::If { cond: eq, then: goto_case, otherwise: None }, loc.clone()));
        }
        let fallthrough_target = frame.default_label.unwrap_or(frame.break_label);
        dispatch.push(ast::alloc_stmt(self.arena, StmtKind::Goto { label_id: fallthrough_target }, loc.clone()));
        dispatch.push(body);
        dispatch.push(ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id: frame.break_label, inner: ast::alloc_stmt(self.arena, StmtKind::Empty, loc.clone()) }, loc.clone()));

        ast::alloc_stmt(self.arena, StmtKind::Compound(dispatch), loc)
    }

    fn parse_case(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        let value = self.parse_constant_int_expr();
        self.expect_punct(Punct::Colon);
        let Some(ControlFrame::Switch(frame)) = self.control_stack.last_mut() else {
            self.error(loc.clone(), "'case' statement not in switch statement");
            return self.parse_statement();
        };
        if frame.cases.iter().any(|c| c.value == value) {
            self.error(loc.clone(), format!("duplicate case value '{value}'"));
        }
        let label_id = self.labels.as_mut().unwrap().fresh("case");
        if let Some(ControlFrame::Switch(frame)) = self.control_stack.last_mut() {
            frame.cases.push(CaseLabel { value, label_id });
        }
        let inner = self.parse_statement();
        ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id, inner }, loc)
    }

    fn parse_default(&mut self) -> &'a Stmt<'a> {
        let loc = self.tokens[self.pos - 1].location.clone();
        self.expect_punct(Punct::Colon);
        let Some(ControlFrame::Switch(frame)) = self.control_stack.last_mut() else {
            self.error(loc.clone(), "'default' statement not in switch statement");
            return self.parse_statement();
        };
        if frame.default_label.is_some() {
            self.error(loc.clone(), "multiple default labels in one switch");
        }
        let label_id = self.labels.as_mut().unwrap().fresh("default");
        if let Some(ControlFrame::Switch(frame)) = self.control_stack.last_mut() {
            frame.default_label = Some(label_id);
        }
        let inner = self.parse_statement();
        ast::alloc_stmt(self.arena, StmtKind::Labeled { label_id, inner }, loc)
    }

    /// `break` binds to the innermost enclosing loop *or* switch.
    fn lower_break(&mut self, loc: SourceLocation) -> &'a Stmt<'a> {
        let label = self.control_stack.iter().rev().find_map(|f| match f {
            ControlFrame::Loop(l) => Some(l.break_label),
            ControlFrame::Switch(s) => Some(s.break_label),
        });
        match label {
            Some(label_id) => ast::alloc_stmt(self.arena, StmtKind::Goto { label_id }, loc),
            None => {
                self.error(loc.clone(), "'break' statement not in loop or switch statement");
                ast::alloc_stmt(self.arena, StmtKind::Empty, loc)
            }
        }
    }

    /// `continue` binds to the innermost enclosing *loop*, skipping over
    /// any switch frames in between.
    fn lower_continue(&mut self, loc: SourceLocation) -> &'a Stmt<'a> {
        let label = self.control_stack.iter().rev().find_map(|f| match f {
            ControlFrame::Loop(l) => Some(l.continue_label),
            ControlFrame::Switch(_) => None,
        });
        match label {
            Some(label_id) => ast::alloc_stmt(self.arena, StmtKind::Goto { label_id }, loc),
            None => {
                self.error(loc.clone(), "'continue' statement not in a loop");
                ast::alloc_stmt(self.arena, StmtKind::Empty, loc)
            }
        }
    }

    // ---- expressions (precedence climbing) ---------------------------------

    fn parse_expr(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_assignment_expr();
        while self.eat_punct(Punct::Comma) {
            let loc = lhs.loc.clone();
            let rhs = self.parse_assignment_expr();
            let ty = rhs.ty.clone();
            lhs = ast::alloc_expr(self.arena, ExprKind::Binary { op: BinaryOp::Comma, lhs, rhs }, ty, false, loc);
        }
        lhs
    }

    fn parse_assignment_expr(&mut self) -> &'a Expr<'a> {
        let lhs = self.parse_conditional_expr();
        let op = match self.cur().kind {
            TokenKind::Punct(Punct::Assign) => Some(BinaryOp::Assign),
            TokenKind::Punct(Punct::MulAssign) => Some(BinaryOp::MulAssign),
            TokenKind::Punct(Punct::DivAssign) => Some(BinaryOp::DivAssign),
            TokenKind::Punct(Punct::ModAssign) => Some(BinaryOp::ModAssign),
            TokenKind::Punct(Punct::AddAssign) => Some(BinaryOp::AddAssign),
            TokenKind::Punct(Punct::SubAssign) => Some(BinaryOp::SubAssign),
            TokenKind::Punct(Punct::ShlAssign) => Some(BinaryOp::ShlAssign),
            TokenKind::Punct(Punct::ShrAssign) => Some(BinaryOp::ShrAssign),
            TokenKind::Punct(Punct::AndAssign) => Some(BinaryOp::AndAssign),
            TokenKind::Punct(Punct::XorAssign) => Some(BinaryOp::XorAssign),
            TokenKind::Punct(Punct::OrAssign) => Some(BinaryOp::OrAssign),
            _ => None,
        };
        let Some(op) = op else { return lhs };
        let loc = self.cur().location.clone();
        self.bump();
        let rhs = self.parse_assignment_expr();
        self.build_binary(op, lhs, rhs, loc)
    }

    fn parse_conditional_expr(&mut self) -> &'a Expr<'a> {
        let cond = self.parse_binary_expr(0);
        if self.eat_punct(Punct::Question) {
            let loc = cond.loc.clone();
            let then = self.parse_expr();
            self.expect_punct(Punct::Colon);
            let otherwise = self.parse_conditional_expr();
            let (ty, is_lvalue) = sema::check_conditional(&then.ty, &otherwise.ty, self.diags, &loc);
            return ast::alloc_expr(self.arena, ExprKind::Conditional { cond, then, otherwise }, ty, is_lvalue, loc);
        }
        cond
    }

    fn binop_for_punct(&self, p: &TokenKind) -> Option<(BinaryOp, u8)> {
        use BinaryOp::*;
        let TokenKind::Punct(p) = p else { return None };
        Some(match p {
            Punct::OrOr => (LogOr, 1),
            Punct::AndAnd => (LogAnd, 2),
            Punct::Pipe => (BitOr, 3),
            Punct::Caret => (BitXor, 4),
            Punct::Amp => (BitAnd, 5),
            Punct::Eq => (Eq, 6),
            Punct::Ne => (Ne, 6),
            Punct::Less => (Lt, 7),
            Punct::Greater => (Gt, 7),
            Punct::Le => (Le, 7),
            Punct::Ge => (Ge, 7),
            Punct::Shl => (Shl, 8),
            Punct::Shr => (Shr, 8),
            Punct::Add => (Add, 9),
            Punct::Sub => (Sub, 9),
            Punct::Mul => (Mul, 10),
            Punct::Div => (Div, 10),
            Punct::Mod => (Mod, 10),
            _ => return None,
        })
    }

    fn parse_binary_expr(&mut self, min_prec: u8) -> &'a Expr<'a> {
        let mut lhs = self.parse_unary_or_cast_expr();
        loop {
            let Some((op, prec)) = self.binop_for_punct(&self.cur().kind) else { break };
            if prec < min_prec {
                break;
            }
            let loc = self.cur().location.clone();
            self.bump();
            let rhs = self.parse_binary_expr(prec + 1);
            lhs = self.build_binary(op, lhs, rhs, loc);
        }
        lhs
    }

    fn build_binary(&mut self, op: BinaryOp, lhs: &'a Expr<'a>, rhs: &'a Expr<'a>, loc: SourceLocation) -> &'a Expr<'a> {
        let (ty, is_lvalue) = sema::check_binary(op, &lhs.ty, lhs.is_lvalue, &rhs.ty, self.diags, &loc);
        ast::alloc_expr(self.arena, ExprKind::Binary { op, lhs, rhs }, ty, is_lvalue, loc)
    }

    /// `(' type-name ')' unary-expr` vs a parenthesized expression: try
    /// the type-name parse first (a type-name can only start with a
    /// type-specifier/qualifier or a typedef-name), backtracking to a
    /// plain parenthesized expression otherwise.
    fn parse_unary_or_cast_expr(&mut self) -> &'a Expr<'a> {
        if self.check_punct(Punct::LParen) {
            let mark = self.mark();
            let loc = self.cur().location.clone();
            self.bump();
            if self.at_decl_specifier() {
                let target = self.parse_type_name();
                if self.eat_punct(Punct::RParen) {
                    let operand = self.parse_unary_or_cast_expr();
                    let (ty, is_lvalue) = sema::check_cast(&target, &operand.ty, self.diags, &loc);
                    return ast::alloc_expr(self.arena, ExprKind::Cast { operand }, ty, is_lvalue, loc);
                }
            }
            self.release(mark);
        }
        self.parse_unary_expr()
    }

    fn parse_unary_expr(&mut self) -> &'a Expr<'a> {
        let loc = self.cur().location.clone();
        let prefix_op = match self.cur().kind {
            TokenKind::Punct(Punct::Add) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Sub) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punct(Punct::Not) => Some(UnaryOp::LogNot),
            TokenKind::Punct(Punct::Amp) => Some(UnaryOp::AddrOf),
            TokenKind::Punct(Punct::Mul) => Some(UnaryOp::Deref),
            TokenKind::Punct(Punct::Inc) => Some(UnaryOp::PreInc),
            TokenKind::Punct(Punct::Dec) => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = prefix_op {
            self.bump();
            let operand = self.parse_unary_expr();
            let (ty, is_lvalue) = sema::check_unary(op, &operand.ty, operand.is_lvalue, self.diags, &loc);
            return ast::alloc_expr(self.arena, ExprKind::Unary { op, operand }, ty, is_lvalue, loc);
        }
        if self.eat_keyword(Keyword::Sizeof) {
            return self.parse_sizeof(loc);
        }
        self.parse_postfix_expr()
    }

    fn parse_sizeof(&mut self, loc: SourceLocation) -> &'a Expr<'a> {
        let ulong = QualifiedType::unqualified(Type::Arithmetic(types::unsigned_long_type()));
        if self.check_punct(Punct::LParen) {
            let mark = self.mark();
            self.bump();
            if self.at_decl_specifier() {
                let target = self.parse_type_name();
                self.expect_punct(Punct::RParen);
                if !target.ty.is_complete() || target.ty.is_function() {
                    self.error(loc.clone(), "sizeof applied to incomplete or function type");
                }
                let size = target.ty.size_of() as i64;
                return ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Int(size)), ulong, false, loc);
            }
            self.release(mark);
        }
        let operand = self.parse_unary_expr();
        if !operand.ty.ty.is_complete() || operand.ty.ty.is_function() {
            self.error(loc.clone(), "sizeof applied to incomplete or function type");
        }
        let size = operand.ty.ty.size_of() as i64;
        ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Int(size)), ulong, false, loc)
    }

    fn parse_postfix_expr(&mut self) -> &'a Expr<'a> {
        let mut expr = self.parse_primary_expr();
        loop {
            let loc = self.cur().location.clone();
            if self.eat_punct(Punct::LBracket) {
                let index = self.parse_expr();
                self.expect_punct(Punct::RBracket);
                let (ty, is_lvalue) = sema::check_subscript(&expr.ty, &index.ty, self.diags, &loc);
                expr = ast::alloc_expr(self.arena, ExprKind::Subscript { base: expr, index }, ty, is_lvalue, loc);
            } else if self.eat_punct(Punct::LParen) {
                let mut args = BVec::new_in(self.arena);
                if !self.check_punct(Punct::RParen) {
                    loop {
                        args.push(self.parse_assignment_expr());
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RParen);
                let arg_types: Vec<QualifiedType> = args.iter().map(|a| a.ty.clone()).collect();
                let ty = sema::check_call(&expr.ty, &arg_types, self.diags, &loc);
                expr = ast::alloc_expr(self.arena, ExprKind::Call { callee: expr, args }, ty, false, loc);
            } else if self.check_punct(Punct::Dot) || self.check_punct(Punct::Arrow) {
                let via_arrow = self.check_punct(Punct::Arrow);
                self.bump();
                let member = self.cur().identifier_name().map(str::to_string).unwrap_or_default();
                self.bump();
                let (ty, offset, is_lvalue) = sema::check_member(&expr.ty, via_arrow, &member, self.diags, &loc);
                expr = ast::alloc_expr(self.arena, ExprKind::Member { base: expr, member_offset: offset, via_arrow }, ty, is_lvalue, loc);
            } else if self.check_punct(Punct::Inc) || self.check_punct(Punct::Dec) {
                let op = if self.check_punct(Punct::Inc) { UnaryOp::PostInc } else { UnaryOp::PostDec };
                self.bump();
                let (ty, is_lvalue) = sema::check_unary(op, &expr.ty, expr.is_lvalue, self.diags, &loc);
                expr = ast::alloc_expr(self.arena, ExprKind::Unary { op, operand: expr }, ty, is_lvalue, loc);
            } else {
                break;
            }
        }
        expr
    }

    fn parse_primary_expr(&mut self) -> &'a Expr<'a> {
        let loc = self.cur().location.clone();
        if self.eat_punct(Punct::LParen) {
            let inner = self.parse_expr();
            self.expect_punct(Punct::RParen);
            return inner;
        }
        let tok = self.cur().clone();
        match &tok.kind {
            TokenKind::PpNumber(text) => {
                self.bump();
                let (constant, ty) = parse_pp_number(text);
                ast::alloc_expr(self.arena, ExprKind::Constant(constant), ty, false, loc)
            }
            TokenKind::CharConstant { value, .. } => {
                self.bump();
                let v = value.chars().next().map(|c| c as i64).unwrap_or(0);
                ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Char(v)), QualifiedType::unqualified(Type::Arithmetic(types::intern_arith(ArithTag::SIGNED | ArithTag::INT))), false, loc)
            }
            TokenKind::StringLiteral { value, encoding } => {
                self.bump();
                let mut text = value.clone();
                let mut enc = *encoding;
                // Adjacent string literal concatenation: a plain string
                // next to an encoded one takes the encoded prefix, but
                // two different encoded prefixes next to each other have
                // no well-defined combined encoding.
                while let TokenKind::StringLiteral { value: more, encoding: more_enc } = &self.cur().kind {
                    let more = more.clone();
                    let more_enc = *more_enc;
                    if enc != Encoding::None && more_enc != Encoding::None && enc != more_enc {
                        let bad_loc = self.cur().location.clone();
                        self.error(bad_loc, "concatenation of string literals with different encoding prefixes");
                    } else if enc == Encoding::None {
                        enc = more_enc;
                    }
                    text.push_str(&more);
                    self.bump();
                }
                let array_ty = Type::Array { element: Box::new(QualifiedType::unqualified(Type::Arithmetic(types::char_type()))), len: types::ArrayLen::Known(text.len() as u64 + 1) };
                ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Str(text)), QualifiedType::unqualified(array_ty), false, loc)
            }
            TokenKind::Identifier(name) => {
                self.bump();
                // An enumerator reference folds to its value immediately:
                // it's the only identifier kind that's a constant
                // expression, and `fold_constant_int` has no scope access
                // to resolve `Ident` nodes back to one later.
                if let Some(id) = scope::lookup_ident(&self.scope, name) {
                    if id.kind == IdentKind::Enumerator {
                        if let Type::Enum(handle) = &id.ty.ty {
                            let value = handle
                                .borrow()
                                .constants
                                .iter()
                                .find(|(n, _)| n == name)
                                .map(|(_, v)| *v)
                                .unwrap_or(0);
                            return ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Int(value)), id.ty.clone(), false, loc);
                        }
                    }
                }
                let (ty, is_lvalue) = sema::check_identifier(&self.scope, name, self.diags, &loc);
                ast::alloc_expr(self.arena, ExprKind::Ident { name: name.clone() }, ty, is_lvalue, loc)
            }
            _ => {
                self.error(loc.clone(), format!("expected expression, found '{}'", tok.text));
                self.bump();
                ast::alloc_expr(self.arena, ExprKind::Constant(Constant::Int(0)), QualifiedType::unqualified(Type::Arithmetic(types::int_type())), false, loc)
            }
        }
    }

    /// Constant-expression evaluator for array bounds / bit-field widths
    /// / enumerator values / `case` labels — delegates the fold to
    /// `sema::fold_constant_int` over a fully parsed (and thus already
    /// type-annotated) conditional-expression subtree.
    fn parse_constant_int_expr(&mut self) -> i64 {
        let expr = self.parse_conditional_expr();
        match sema::fold_constant_int(expr) {
            Ok(v) => v,
            Err(e) => {
                let loc = expr.loc.clone();
                self.error(loc, e);
                0
            }
        }
    }
}

fn hash_member(name: &str) -> u32 {
    name.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
}

/// Classify a pp-number's lexeme into an integer or floating constant per
/// §4.2's deferred-classification rule: any `.`, exponent marker, or a
/// trailing `f`/`F`/`l`/`L` alongside a decimal point means floating.
fn parse_pp_number(text: &str) -> (Constant, QualifiedType) {
    let looks_floating = text.contains('.')
        || text.to_ascii_lowercase().contains('e') && !text.starts_with("0x") && !text.starts_with("0X")
        || (text.starts_with("0x") || text.starts_with("0X")) && text.to_ascii_lowercase().contains('p');
    if looks_floating {
        let trimmed = text.trim_end_matches(|c: char| matches!(c, 'f' | 'F' | 'l' | 'L'));
        let value: f64 = trimmed.parse().unwrap_or(0.0);
        let is_float = text.ends_with('f') || text.ends_with('F');
        let tag = if is_float { ArithTag::FLOAT } else { ArithTag::DOUBLE };
        (Constant::Float(value), QualifiedType::unqualified(Type::Arithmetic(types::intern_arith(tag))))
    } else {
        let unsigned = text.to_ascii_lowercase().contains('u');
        let long_count = text.chars().filter(|c| *c == 'l' || *c == 'L').count();
        let trimmed = text.trim_end_matches(|c: char| matches!(c, 'u' | 'U' | 'l' | 'L'));
        let value: i64 = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).unwrap_or(0)
        } else if trimmed.len() > 1 && trimmed.starts_with('0') {
            i64::from_str_radix(trimmed, 8).unwrap_or(0)
        } else {
            trimmed.parse().unwrap_or(0)
        };
        let mut tag = ArithTag::INT;
        if unsigned { tag |= ArithTag::UNSIGNED; }
        if long_count == 1 { tag |= ArithTag::LONG; }
        if long_count >= 2 { tag |= ArithTag::LONG_LONG; }
        (Constant::Int(value), QualifiedType::unqualified(Type::Arithmetic(types::intern_arith(tag))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{IncludeStack, SourceFile};
    use std::rc::Rc;

    fn parse(src: &str) -> (Vec<FunctionDefinition<'static>>, DiagnosticSink) {
        // Leak the arena for the test's lifetime — tests are short-lived
        // processes in miniature, and this sidesteps threading a lifetime
        // parameter through the test helper.
        let arena: &'static Bump = Box::leak(Box::new(Bump::new()));
        let file = Rc::new(SourceFile::from_str("t.c", src));
        let mut diags = DiagnosticSink::new();
        let include_stack = IncludeStack::new(vec![], vec![]);
        let mut pp = Preprocessor::new(file, include_stack, &mut diags, "Jan  1 2024", "00:00:00");
        let mut parser = Parser::new(&mut pp, arena);
        parser.parse_translation_unit();
        (parser.function_defs, diags)
    }

    #[test]
    fn s4_function_pointer_declarator() {
        let (_, diags) = parse("int (*fp)(int, int);");
        assert!(diags.is_empty(), "{:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn parses_simple_function_definition() {
        let (funcs, diags) = parse("int add(int a, int b) { return a + b; }");
        assert!(diags.is_empty(), "{:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>());
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "add");
    }

    #[test]
    fn s5_incompatible_pointer_to_float_assignment_is_error() {
        let (_, diags) = parse("void f(void) { int *p; float x; x = p; }");
        assert!(diags.had_fatal());
    }

    #[test]
    fn while_loop_lowers_without_errors() {
        let (_, diags) = parse("void f(void) { int i; i = 0; while (i < 10) { i = i + 1; } }");
        assert!(diags.is_empty(), "{:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn for_loop_with_break_and_continue() {
        let (_, diags) = parse("void f(void) { int i; for (i = 0; i < 10; i = i + 1) { if (i == 5) break; if (i == 2) continue; } }");
        assert!(diags.is_empty(), "{:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn switch_with_duplicate_case_is_error() {
        let (_, diags) = parse("void f(int x) { switch (x) { case 1: break; case 1: break; } }");
        assert!(diags.had_fatal());
    }

    #[test]
    fn break_outside_loop_or_switch_is_error() {
        let (_, diags) = parse("void f(void) { break; }");
        assert!(diags.had_fatal());
    }

    #[test]
    fn s6_enum_constant_folding() {
        let (_, diags) = parse("enum { A = 1 << 3, B = A + 1 };");
        assert!(diags.is_empty(), "{:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn goto_to_undeclared_label_is_error() {
        let (_, diags) = parse("void f(void) { goto nowhere; }");
        assert!(diags.had_fatal());
    }

    #[test]
    fn typedef_then_redeclared_identifier_in_nested_block_changes_classification() {
        let (_, diags) = parse("typedef int T; void f(void) { T x; { int T; T = 1; } }");
        assert!(diags.is_empty(), "{:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>());
    }
}
