//! Semantic Checker.
//!
//! Each function here is invoked by the parser at the moment it finishes
//! building one expression node, annotating it with a type and an
//! lvalue-ness flag — never as a separate tree-walking pass. This mirrors
//! the teacher's `typechecker.rs`, which folds checking into the same
//! walk that builds its IR rather than running a second traversal; the
//! type rules themselves come from the historical `TypeChecker` methods in
//! `original_source/parser.cc` (`AdditiveOp`, `MultiplicativeOp`,
//! `AssignOp`, and friends), generalized to the richer C type lattice.

use crate::ast::{BinaryOp, Constant, Expr, ExprKind, UnaryOp};
use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::scope::{self, ScopeRef};
use crate::source::SourceLocation;
use crate::types::{self, QualifiedType, Type};

fn err(diags: &mut DiagnosticSink, loc: &SourceLocation, msg: impl Into<String>) {
    diags.error(DiagnosticKind::Semantic, loc.clone(), msg);
}

fn int_qt() -> QualifiedType {
    QualifiedType::unqualified(Type::Arithmetic(types::int_type()))
}

/// `identifier` as a primary expression: look it up, decide the resulting
/// type and whether it denotes an lvalue (objects and dereferenced things
/// are; functions and enumerators are not).
pub fn check_identifier(scope: &ScopeRef, name: &str, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    match scope::lookup_ident(scope, name) {
        Some(id) => {
            let is_lvalue = !id.ty.ty.is_function();
            (id.ty.clone(), is_lvalue)
        }
        None => {
            err(diags, loc, format!("use of undeclared identifier '{name}'"));
            (int_qt(), false)
        }
    }
}

/// `base[index]`: exactly one of the two operands decays to pointer; the
/// result is the pointee, always an lvalue.
pub fn check_subscript(base: &QualifiedType, index: &QualifiedType, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    let decayed = base.ty.decay();
    let Type::Pointer(target) = &decayed else {
        err(diags, loc, "subscripted value is not an array or pointer");
        return (int_qt(), false);
    };
    if !index.ty.is_integer() {
        err(diags, loc, "array subscript is not an integer");
    }
    ((**target).clone(), true)
}

/// `base.member` / `base->member`: resolve `member` against the struct or
/// union either directly (`.`) or through one level of pointer deref
/// (`->`); returns the resolved type, a dense `u32` offset handle for the
/// AST node, and whether the result is an lvalue.
pub fn check_member(base: &QualifiedType, via_arrow: bool, member: &str, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, u32, bool) {
    let aggregate_ty = if via_arrow {
        match &base.ty {
            Type::Pointer(target) => target.ty.clone(),
            _ => {
                err(diags, loc, "member reference type is not a pointer");
                return (int_qt(), 0, false);
            }
        }
    } else {
        base.ty.clone()
    };
    let Type::StructUnion(handle) = &aggregate_ty else {
        err(diags, loc, format!("member reference base type is not a struct or union"));
        return (int_qt(), 0, false);
    };
    let body = handle.borrow();
    let Some(&idx) = body.member_index.get(member) else {
        err(diags, loc, format!("no member named '{member}' in '{}'", body.tag.as_deref().unwrap_or("<anonymous>")));
        return (int_qt(), 0, false);
    };
    (body.members[idx].ty.clone(), idx as u32, true)
}

/// `callee(args...)`: callee must be a function (after pointer-to-function
/// decay), arity must match unless variadic, and each argument must be
/// assignment-compatible with its parameter (checked loosely: arithmetic
/// vs. arithmetic, pointer vs. pointer, or exact structural match).
pub fn check_call(callee: &QualifiedType, args: &[QualifiedType], diags: &mut DiagnosticSink, loc: &SourceLocation) -> QualifiedType {
    let func_ty = match &callee.ty {
        Type::Function(_) => callee.ty.clone(),
        Type::Pointer(target) if target.ty.is_function() => target.ty.clone(),
        _ => {
            err(diags, loc, "called object is not a function or function pointer");
            return int_qt();
        }
    };
    let Type::Function(f) = &func_ty else { unreachable!("matched above") };
    if args.len() < f.params.len() || (!f.variadic && args.len() > f.params.len()) {
        err(diags, loc, format!("expected {} argument(s), found {}", f.params.len(), args.len()));
    }
    for (param, arg) in f.params.iter().zip(args.iter()) {
        if param.ty.ty.is_arithmetic() && arg.ty.is_arithmetic() {
            continue;
        }
        if param.ty.ty.is_pointer() && arg.ty.decay().is_pointer() {
            continue;
        }
        if !types::compatible(&param.ty.ty, &arg.ty) {
            err(diags, loc, "incompatible argument type in function call");
        }
    }
    f.ret.clone()
}

/// Prefix/postfix unary operators, per §4.6's table: arithmetic ops need a
/// scalar operand and promote integers; `&` needs an lvalue and produces a
/// pointer; `*` needs a pointer and produces an lvalue; inc/dec need a
/// modifiable (non-const) lvalue.
pub fn check_unary(op: UnaryOp, operand: &QualifiedType, is_lvalue: bool, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    match op {
        UnaryOp::Plus | UnaryOp::Neg | UnaryOp::BitNot => {
            if !operand.ty.is_arithmetic() {
                err(diags, loc, "invalid argument type to unary arithmetic operator");
                return (int_qt(), false);
            }
            (QualifiedType::unqualified(types::integer_promote(&operand.ty)), false)
        }
        UnaryOp::LogNot => {
            if !operand.ty.is_scalar() {
                err(diags, loc, "invalid argument type to logical negation");
            }
            (int_qt(), false)
        }
        UnaryOp::AddrOf => {
            if !is_lvalue {
                err(diags, loc, "cannot take the address of an rvalue");
            }
            (QualifiedType::unqualified(Type::pointer_to(operand.clone())), false)
        }
        UnaryOp::Deref => {
            let decayed = operand.ty.decay();
            let Type::Pointer(target) = &decayed else {
                err(diags, loc, "indirection requires pointer operand");
                return (int_qt(), false);
            };
            ((**target).clone(), true)
        }
        UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
            if !is_lvalue {
                err(diags, loc, "expression is not assignable");
            } else if operand.is_const() {
                err(diags, loc, "cannot modify a const-qualified value");
            }
            if !operand.ty.is_scalar() {
                err(diags, loc, "increment/decrement requires arithmetic or pointer operand");
            }
            (operand.clone(), false)
        }
    }
}

/// `cond ? then : otherwise`: both branches must be mutually comparable;
/// when both are arithmetic, the result follows the usual arithmetic
/// conversions, otherwise they must be the same (or compatible pointer)
/// type.
pub fn check_conditional(then: &QualifiedType, otherwise: &QualifiedType, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    if then.ty.is_arithmetic() && otherwise.ty.is_arithmetic() {
        return (QualifiedType::unqualified(types::usual_arithmetic_conversions(&then.ty, &otherwise.ty)), false);
    }
    if types::compatible(&then.ty.decay(), &otherwise.ty.decay()) {
        return (QualifiedType::unqualified(then.ty.decay()), false);
    }
    err(diags, loc, "incompatible operand types in conditional expression");
    (then.clone(), false)
}

/// `(target)operand`: reject casts to/from aggregates (only scalar casts
/// and void casts are permitted).
pub fn check_cast(target: &QualifiedType, operand: &QualifiedType, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    let decayed_operand = operand.ty.decay();
    if !target.ty.is_void() && !target.ty.is_scalar() {
        err(diags, loc, "cast to non-scalar type");
    } else if !decayed_operand.is_scalar() && !decayed_operand.is_void() {
        err(diags, loc, "cast from non-scalar operand");
    }
    (target.clone(), false)
}

/// The full binary-operator typing table: arithmetic ops apply the usual
/// arithmetic conversions, relational/equality ops compare scalars and
/// yield `int`, logical ops short-circuit over scalars and yield `int`,
/// assignment (and compound-assignment) checks the left side is a
/// modifiable lvalue, and comma discards the left operand's type.
pub fn check_binary(op: BinaryOp, lhs: &QualifiedType, lhs_is_lvalue: bool, rhs: &QualifiedType, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    use BinaryOp::*;
    match op {
        Mul | Div | Mod => {
            if !lhs.ty.is_arithmetic() || !rhs.ty.is_arithmetic() {
                err(diags, loc, "invalid operands to arithmetic operator");
                return (int_qt(), false);
            }
            if op == Mod && (lhs.ty.decay().is_pointer() || matches!((lhs.ty.arith_info(), rhs.ty.arith_info()), (Some(a), _) if a.is_float)) {
                err(diags, loc, "invalid operands to '%' (floating-point)");
            }
            (QualifiedType::unqualified(types::usual_arithmetic_conversions(&lhs.ty, &rhs.ty)), false)
        }
        Add => check_additive(lhs, rhs, true, diags, loc),
        Sub => check_additive(lhs, rhs, false, diags, loc),
        Shl | Shr | BitAnd | BitXor | BitOr => {
            if !lhs.ty.is_integer() || !rhs.ty.is_integer() {
                err(diags, loc, "invalid operands to bitwise operator");
                return (int_qt(), false);
            }
            let ty = if matches!(op, Shl | Shr) {
                QualifiedType::unqualified(types::integer_promote(&lhs.ty))
            } else {
                QualifiedType::unqualified(types::usual_arithmetic_conversions(&lhs.ty, &rhs.ty))
            };
            (ty, false)
        }
        Lt | Gt | Le | Ge | Eq | Ne => {
            let lhs_decayed = lhs.ty.decay();
            let rhs_decayed = rhs.ty.decay();
            let ok = (lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic())
                || (lhs_decayed.is_pointer() && rhs_decayed.is_pointer());
            if !ok {
                err(diags, loc, "invalid operands to comparison operator");
            }
            (int_qt(), false)
        }
        LogAnd | LogOr => {
            if !lhs.ty.is_scalar() || !rhs.ty.is_scalar() {
                err(diags, loc, "invalid operands to logical operator");
            }
            (int_qt(), false)
        }
        Assign => check_assignment(lhs, lhs_is_lvalue, rhs, diags, loc),
        MulAssign | DivAssign | ModAssign | AddAssign | SubAssign | ShlAssign | ShrAssign | AndAssign | XorAssign | OrAssign => {
            let underlying = op.underlying_op().expect("compound assignment always has an underlying op");
            let (computed, _) = check_binary(underlying, lhs, lhs_is_lvalue, rhs, diags, loc);
            let (result, _) = check_assignment(lhs, lhs_is_lvalue, &computed, diags, loc);
            (result, false)
        }
        Comma => (rhs.clone(), false),
    }
}

fn check_additive(lhs: &QualifiedType, rhs: &QualifiedType, is_add: bool, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    let lhs_decayed = lhs.ty.decay();
    let rhs_decayed = rhs.ty.decay();
    if lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic() {
        return (QualifiedType::unqualified(types::usual_arithmetic_conversions(&lhs.ty, &rhs.ty)), false);
    }
    if lhs_decayed.is_pointer() && rhs.ty.is_integer() {
        return (QualifiedType::unqualified(lhs_decayed), false);
    }
    if is_add && lhs.ty.is_integer() && rhs_decayed.is_pointer() {
        return (QualifiedType::unqualified(rhs_decayed), false);
    }
    if !is_add && lhs_decayed.is_pointer() && rhs_decayed.is_pointer() {
        if !types::compatible(&lhs_decayed, &rhs_decayed) {
            err(diags, loc, "subtracting pointers to incompatible types");
        }
        return (QualifiedType::unqualified(Type::Arithmetic(types::intern_arith(types::ArithTag::SIGNED | types::ArithTag::LONG))), false);
    }
    err(diags, loc, "invalid operands to additive operator");
    (int_qt(), false)
}

fn check_assignment(lhs: &QualifiedType, lhs_is_lvalue: bool, rhs: &QualifiedType, diags: &mut DiagnosticSink, loc: &SourceLocation) -> (QualifiedType, bool) {
    if !lhs_is_lvalue {
        err(diags, loc, "expression is not assignable");
    } else if lhs.is_const() {
        err(diags, loc, "cannot assign to a const-qualified value");
    }
    let rhs_decayed = rhs.ty.decay();
    let compatible = (lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic())
        || (lhs.ty.is_pointer() && rhs_decayed.is_pointer())
        || types::compatible(&lhs.ty, &rhs_decayed);
    if !compatible {
        err(diags, loc, "incompatible types when assigning");
    }
    (lhs.clone(), true)
}

/// Fold a constant-expression subtree to an `i64`, for array bounds,
/// bit-field widths, `case` labels, and enumerator initializers. Division
/// and modulo by a folded zero are reported as compile-time errors rather
/// than deferred to runtime, matching the preprocessor's `#if` evaluator.
pub fn fold_constant_int(expr: &Expr<'_>) -> Result<i64, String> {
    match &expr.kind {
        ExprKind::Constant(Constant::Int(v)) => Ok(*v),
        ExprKind::Constant(Constant::UInt(v)) => Ok(*v as i64),
        ExprKind::Constant(Constant::Char(v)) => Ok(*v),
        ExprKind::Constant(Constant::Float(_)) => Err("floating constant is not a valid integer constant expression".to_string()),
        ExprKind::Constant(Constant::Str(_)) => Err("string literal is not a valid integer constant expression".to_string()),
        ExprKind::Unary { op, operand } => {
            let v = fold_constant_int(operand)?;
            Ok(match op {
                UnaryOp::Plus => v,
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::BitNot => !v,
                UnaryOp::LogNot => (v == 0) as i64,
                _ => return Err("operator is not valid in a constant expression".to_string()),
            })
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = fold_constant_int(lhs)?;
            let b = fold_constant_int(rhs)?;
            fold_binary_int(*op, a, b)
        }
        ExprKind::Conditional { cond, then, otherwise } => {
            if fold_constant_int(cond)? != 0 {
                fold_constant_int(then)
            } else {
                fold_constant_int(otherwise)
            }
        }
        ExprKind::Cast { operand } => fold_constant_int(operand),
        _ => Err("expression is not an integer constant expression".to_string()),
    }
}

fn fold_binary_int(op: BinaryOp, a: i64, b: i64) -> Result<i64, String> {
    use BinaryOp::*;
    Ok(match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        Div => {
            if b == 0 {
                return Err("division by zero in constant expression".to_string());
            }
            a.wrapping_div(b)
        }
        Mod => {
            if b == 0 {
                return Err("division by zero in constant expression".to_string());
            }
            a.wrapping_rem(b)
        }
        Shl => a.wrapping_shl(b as u32),
        Shr => a.wrapping_shr(b as u32),
        BitAnd => a & b,
        BitOr => a | b,
        BitXor => a ^ b,
        Lt => (a < b) as i64,
        Gt => (a > b) as i64,
        Le => (a <= b) as i64,
        Ge => (a >= b) as i64,
        Eq => (a == b) as i64,
        Ne => (a != b) as i64,
        LogAnd => (a != 0 && b != 0) as i64,
        LogOr => (a != 0 || b != 0) as i64,
        Comma => b,
        _ => return Err("operator is not valid in a constant expression".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::alloc_expr;
    use crate::scope::Scope;
    use crate::source::SourceFile;
    use bumpalo::Bump;
    use std::rc::Rc;

    fn loc() -> SourceLocation {
        SourceLocation { file: Rc::new(SourceFile::from_str("t.c", "")), line: 1, column: 1, offset: 0 }
    }

    fn int_const<'a>(arena: &'a Bump, v: i64) -> &'a Expr<'a> {
        alloc_expr(arena, ExprKind::Constant(Constant::Int(v)), int_qt(), false, loc())
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let scope = Scope::new_root();
        let mut diags = DiagnosticSink::new();
        let (ty, is_lvalue) = check_identifier(&scope, "missing", &mut diags, &loc());
        assert!(diags.had_fatal());
        assert!(!is_lvalue);
        assert!(ty.ty.is_arithmetic());
    }

    #[test]
    fn pointer_plus_int_keeps_pointer_type() {
        let mut diags = DiagnosticSink::new();
        let pointee = int_qt();
        let ptr = QualifiedType::unqualified(Type::pointer_to(pointee));
        let (ty, _) = check_binary(BinaryOp::Add, &ptr, false, &int_qt(), &mut diags, &loc());
        assert!(diags.is_empty());
        assert!(ty.ty.is_pointer());
    }

    #[test]
    fn assigning_through_non_lvalue_is_an_error() {
        let mut diags = DiagnosticSink::new();
        check_assignment(&int_qt(), false, &int_qt(), &mut diags, &loc());
        assert!(diags.had_fatal());
    }

    #[test]
    fn folds_nested_constant_arithmetic() {
        let arena = Bump::new();
        let a = int_const(&arena, 3);
        let b = int_const(&arena, 4);
        let sum = alloc_expr(&arena, ExprKind::Binary { op: BinaryOp::Mul, lhs: a, rhs: b }, int_qt(), false, loc());
        assert_eq!(fold_constant_int(sum).unwrap(), 12);
    }

    #[test]
    fn folds_division_by_zero_to_an_error() {
        let arena = Bump::new();
        let a = int_const(&arena, 1);
        let zero = int_const(&arena, 0);
        let div = alloc_expr(&arena, ExprKind::Binary { op: BinaryOp::Div, lhs: a, rhs: zero }, int_qt(), false, loc());
        assert!(fold_constant_int(div).is_err());
    }
}
