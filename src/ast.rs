//! Typed AST node families.
//!
//! Every node is allocated out of a `bumpalo::Bump` owned by the
//! `TranslationUnit` (see `translation_unit.rs`), so the tree is built
//! bottom-up as `&'a Expr<'a>` / `&'a Stmt<'a>` references rather than
//! boxed owned nodes — tearing down the `TranslationUnit` frees the whole
//! tree at once, matching §5's arena-ownership model. Cyclic references
//! (label/goto, "jump to end of switch") are represented as indices into
//! the function's label table rather than direct pointers, so the tree
//! itself stays a DAG.

use crate::source::SourceLocation;
use crate::types::QualifiedType;
use bumpalo::collections::Vec as BVec;
use bumpalo::Bump;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    BitNot,
    LogNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    AddrOf,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul, Div, Mod, Add, Sub, Shl, Shr,
    Lt, Gt, Le, Ge, Eq, Ne,
    BitAnd, BitXor, BitOr, LogAnd, LogOr,
    Assign, MulAssign, DivAssign, ModAssign, AddAssign, SubAssign,
    ShlAssign, ShrAssign, AndAssign, XorAssign, OrAssign,
    Comma,
}

impl BinaryOp {
    /// The plain binary op an `op=` compound assignment implicitly
    /// applies, e.g. `+=` implies `+`.
    pub fn underlying_op(self) -> Option<BinaryOp> {
        use BinaryOp::*;
        Some(match self {
            MulAssign => Mul, DivAssign => Div, ModAssign => Mod,
            AddAssign => Add, SubAssign => Sub,
            ShlAssign => Shl, ShrAssign => Shr,
            AndAssign => BitAnd, XorAssign => BitXor, OrAssign => BitOr,
            _ => return None,
        })
    }

    pub fn is_compound_assign(self) -> bool {
        self.underlying_op().is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Constant {
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(i64),
    Str(String),
}

#[derive(Debug)]
pub enum ExprKind<'a> {
    Constant(Constant),
    /// A reference to a declared object, function, or enumerator.
    Ident { name: String },
    Unary { op: UnaryOp, operand: &'a Expr<'a> },
    Binary { op: BinaryOp, lhs: &'a Expr<'a>, rhs: &'a Expr<'a> },
    Conditional { cond: &'a Expr<'a>, then: &'a Expr<'a>, otherwise: &'a Expr<'a> },
    Call { callee: &'a Expr<'a>, args: BVec<'a, &'a Expr<'a>> },
    Cast { operand: &'a Expr<'a> },
    CompoundLiteral { inits: BVec<'a, Initializer<'a>> },
    /// `.`/`->` reduced to one form: `base` is always an expression whose
    /// *value* (after an implicit deref if `via_arrow`) is the aggregate;
    /// `member_offset` is resolved by the semantic checker.
    Member { base: &'a Expr<'a>, member_offset: u32, via_arrow: bool },
    Subscript { base: &'a Expr<'a>, index: &'a Expr<'a> },
    /// A checker-introduced temporary, used when lowering compound
    /// assignment and post-increment/decrement to avoid re-evaluating a
    /// side-effecting base expression twice.
    TempVar(u32),
}

#[derive(Debug)]
pub struct Expr<'a> {
    pub kind: ExprKind<'a>,
    pub ty: QualifiedType,
    pub is_lvalue: bool,
    pub loc: SourceLocation,
}

/// One (offset-path, value) pair from a designated or positional
/// initializer, flattened in declaration order as described in §4.4's
/// initializer handling; later entries targeting the same storage
/// overwrite earlier ones when materialized.
#[derive(Debug)]
pub struct Initializer<'a> {
    pub offset_path: Vec<u32>,
    pub value: &'a Expr<'a>,
}

/// One case label collected during a `switch` body parse.
#[derive(Debug, Clone)]
pub struct CaseLabel {
    pub value: i64,
    pub label_id: u32,
}

#[derive(Debug)]
pub enum StmtKind<'a> {
    Empty,
    If { cond: &'a Expr<'a>, then: &'a Stmt<'a>, otherwise: Option<&'a Stmt<'a>> },
    Compound(BVec<'a, &'a Stmt<'a>>),
    /// A target for `goto`/fallthrough jumps; `label_id` indexes the
    /// owning function's label table.
    Labeled { label_id: u32, inner: &'a Stmt<'a> },
    Goto { label_id: u32 },
    Return(Option<&'a Expr<'a>>),
    Declaration(BVec<'a, Initializer<'a>>),
}

#[derive(Debug)]
pub struct Stmt<'a> {
    pub kind: StmtKind<'a>,
    pub loc: SourceLocation,
}

/// A function's label table: every label referenced or defined in its
/// body, indexed by the `label_id` stored on `Goto`/`Labeled` nodes.
#[derive(Debug, Default)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable::default()
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            return pos as u32;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    /// Allocate an id for a compiler-synthesized label (loop exit,
    /// switch dispatch target) with no source-level name.
    pub fn fresh(&mut self, hint: &str) -> u32 {
        let name = format!("{hint}${}", self.names.len());
        self.names.push(name);
        (self.names.len() - 1) as u32
    }

    pub fn name_of(&self, id: u32) -> &str {
        &self.names[id as usize]
    }
}

#[derive(Debug)]
pub struct FunctionDefinition<'a> {
    pub name: String,
    pub ty: QualifiedType,
    pub body: &'a Stmt<'a>,
    pub labels: LabelTable,
}

/// Allocation helpers over a shared `Bump`. Kept as free functions (not
/// methods on `TranslationUnit`) so expression/statement construction can
/// be unit-tested against a bare `Bump` without standing up a full
/// translation unit.
pub fn alloc_expr<'a>(arena: &'a Bump, kind: ExprKind<'a>, ty: QualifiedType, is_lvalue: bool, loc: SourceLocation) -> &'a Expr<'a> {
    arena.alloc(Expr { kind, ty, is_lvalue, loc })
}

pub fn alloc_stmt<'a>(arena: &'a Bump, kind: StmtKind<'a>, loc: SourceLocation) -> &'a Stmt<'a> {
    arena.alloc(Stmt { kind, loc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;
    use crate::types::{int_type, Type};
    use std::rc::Rc;

    fn loc() -> SourceLocation {
        SourceLocation { file: Rc::new(SourceFile::from_str("t.c", "")), line: 1, column: 1, offset: 0 }
    }

    fn int_ty() -> QualifiedType {
        QualifiedType::unqualified(Type::Arithmetic(int_type()))
    }

    #[test]
    fn builds_a_binary_expression_tree() {
        let arena = Bump::new();
        let one = alloc_expr(&arena, ExprKind::Constant(Constant::Int(1)), int_ty(), false, loc());
        let two = alloc_expr(&arena, ExprKind::Constant(Constant::Int(2)), int_ty(), false, loc());
        let sum = alloc_expr(&arena, ExprKind::Binary { op: BinaryOp::Add, lhs: one, rhs: two }, int_ty(), false, loc());
        match &sum.kind {
            ExprKind::Binary { op: BinaryOp::Add, lhs, rhs } => {
                assert!(matches!(lhs.kind, ExprKind::Constant(Constant::Int(1))));
                assert!(matches!(rhs.kind, ExprKind::Constant(Constant::Int(2))));
            }
            other => panic!("expected Binary, got {other:?}"),
        }
    }

    #[test]
    fn label_table_interns_named_labels_and_mints_fresh_ones() {
        let mut labels = LabelTable::new();
        let done = labels.intern("done");
        let done_again = labels.intern("done");
        assert_eq!(done, done_again);
        let synthetic = labels.fresh("loop_exit");
        assert_ne!(synthetic, done);
        assert!(labels.name_of(synthetic).starts_with("loop_exit$"));
    }

    #[test]
    fn compound_assign_exposes_its_underlying_op() {
        assert_eq!(BinaryOp::AddAssign.underlying_op(), Some(BinaryOp::Add));
        assert_eq!(BinaryOp::Add.underlying_op(), None);
    }
}
