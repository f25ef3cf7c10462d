//! Type system: the arithmetic/pointer/array/function/struct-union/enum
//! lattice, qualifier sets, integer promotion, usual arithmetic
//! conversions, and aggregate layout (including bit-field packing).
//!
//! Arithmetic types are interned process-wide the way the historical tag
//! bitmask (`T_SIGNED`, `T_CHAR`, ... `T_LONG_LONG`) worked: a canonicalized
//! tag indexes a table so two `int`s always hand back the same handle.

use bitflags::bitflags;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Mutex, OnceLock};

bitflags! {
    /// Arithmetic-type tag bits. Only the type-specifier bits from the
    /// historical tag bitmask; storage-class and qualifier bits live
    /// elsewhere (`Qualifiers`, declaration specifiers).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArithTag: u32 {
        const SIGNED      = 0x0001;
        const UNSIGNED    = 0x0002;
        const CHAR        = 0x0004;
        const SHORT       = 0x0008;
        const INT         = 0x0010;
        const LONG        = 0x0020;
        const LONG_LONG   = 0x0040;
        const FLOAT       = 0x0080;
        const DOUBLE      = 0x0100;
        const LONG_DOUBLE = 0x0200;
        const BOOL        = 0x0400;
        const COMPLEX     = 0x0800;
    }
}

bitflags! {
    /// Qualifier bits (`const`/`volatile`/`restrict`/`_Atomic`), attached
    /// to a [`QualifiedType`] rather than to `Type` directly — arrays and
    /// functions never carry qualifiers themselves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Qualifiers: u8 {
        const CONST    = 0x01;
        const VOLATILE = 0x02;
        const RESTRICT = 0x04;
        const ATOMIC   = 0x08;
    }
}

impl fmt::Display for Qualifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Qualifiers::CONST) { parts.push("const"); }
        if self.contains(Qualifiers::VOLATILE) { parts.push("volatile"); }
        if self.contains(Qualifiers::RESTRICT) { parts.push("restrict"); }
        if self.contains(Qualifiers::ATOMIC) { parts.push("_Atomic"); }
        write!(f, "{}", parts.join(" "))
    }
}

/// Canonicalize a raw combination of specifier keywords into a normal-form
/// tag: bare `signed`/`int` collapse into plain `int`, `long long` folds to
/// `LONG_LONG`, `unsigned` alone means `unsigned int`.
pub fn canonicalize_tag(mut tag: ArithTag) -> ArithTag {
    if !tag.intersects(ArithTag::FLOAT | ArithTag::DOUBLE | ArithTag::BOOL | ArithTag::CHAR
        | ArithTag::SHORT | ArithTag::INT | ArithTag::LONG | ArithTag::LONG_LONG)
    {
        tag |= ArithTag::INT;
    }
    if !tag.intersects(ArithTag::UNSIGNED) && !tag.intersects(ArithTag::FLOAT | ArithTag::DOUBLE | ArithTag::BOOL) {
        tag |= ArithTag::SIGNED;
    }
    tag
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithInfo {
    pub tag: ArithTag,
    pub width: u32,
    pub align: u32,
    pub rank: u8,
    pub is_unsigned: bool,
    pub is_float: bool,
}

impl ArithInfo {
    fn compute(tag: ArithTag) -> ArithInfo {
        let is_float = tag.intersects(ArithTag::FLOAT | ArithTag::DOUBLE | ArithTag::LONG_DOUBLE);
        let is_unsigned = tag.contains(ArithTag::UNSIGNED);
        let (width, align, rank) = if tag.contains(ArithTag::BOOL) {
            (1, 1, 0)
        } else if tag.contains(ArithTag::LONG_DOUBLE) {
            (16, 16, 60)
        } else if tag.contains(ArithTag::DOUBLE) {
            (8, 8, 50)
        } else if tag.contains(ArithTag::FLOAT) {
            (4, 4, 40)
        } else if tag.contains(ArithTag::CHAR) {
            (1, 1, 10)
        } else if tag.contains(ArithTag::SHORT) {
            (2, 2, 20)
        } else if tag.contains(ArithTag::LONG_LONG) {
            (8, 8, 50)
        } else if tag.contains(ArithTag::LONG) {
            (8, 8, 40)
        } else {
            (4, 4, 30)
        };
        ArithInfo { tag, width, align, rank, is_unsigned, is_float }
    }
}

fn arith_cache() -> &'static Mutex<HashMap<u32, Rc<ArithInfo>>> {
    // `Rc` is not `Send`, but the whole crate is single-threaded by design
    // (§5: no internal parallelism), so one process-wide table behind a
    // `Mutex` purely for interior mutability is fine; nothing ever crosses
    // a thread boundary.
    struct SingleThreadCache(Mutex<HashMap<u32, Rc<ArithInfo>>>);
    unsafe impl Sync for SingleThreadCache {}
    unsafe impl Send for SingleThreadCache {}
    static CACHE: OnceLock<SingleThreadCache> = OnceLock::new();
    &CACHE.get_or_init(|| SingleThreadCache(Mutex::new(HashMap::new()))).0
}

/// Intern an arithmetic type by its canonical tag; repeated calls with the
/// same effective tag return `Rc`s that are `ptr_eq`.
pub fn intern_arith(tag: ArithTag) -> Rc<ArithInfo> {
    let canon = canonicalize_tag(tag);
    let mut cache = arith_cache().lock().unwrap();
    cache
        .entry(canon.bits())
        .or_insert_with(|| Rc::new(ArithInfo::compute(canon)))
        .clone()
}

pub fn int_type() -> Rc<ArithInfo> { intern_arith(ArithTag::INT) }
pub fn unsigned_int_type() -> Rc<ArithInfo> { intern_arith(ArithTag::UNSIGNED | ArithTag::INT) }
pub fn unsigned_long_type() -> Rc<ArithInfo> { intern_arith(ArithTag::UNSIGNED | ArithTag::LONG) }
pub fn char_type() -> Rc<ArithInfo> { intern_arith(ArithTag::SIGNED | ArithTag::CHAR) }

/// Array length: either a constant bound or "incomplete" (`T[]`, or a VLA
/// bound we reject per the open-question decision recorded in
/// `DESIGN.md` — variably-modified types are not supported).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLen {
    Known(u64),
    Unknown,
}

#[derive(Debug, Clone)]
pub struct QualifiedType {
    pub ty: Type,
    pub quals: Qualifiers,
}

impl QualifiedType {
    pub fn unqualified(ty: Type) -> Self {
        QualifiedType { ty, quals: Qualifiers::empty() }
    }

    pub fn is_const(&self) -> bool {
        self.quals.contains(Qualifiers::CONST)
    }
}

impl PartialEq for QualifiedType {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.quals == other.quals
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Option<String>,
    pub ty: QualifiedType,
}

#[derive(Debug, Clone)]
pub struct FunctionType {
    pub ret: QualifiedType,
    pub params: Vec<Param>,
    pub variadic: bool,
    pub inline: bool,
    pub noreturn: bool,
}

impl PartialEq for FunctionType {
    fn eq(&self, other: &Self) -> bool {
        self.ret == other.ret
            && self.variadic == other.variadic
            && self.params.len() == other.params.len()
            && self.params.iter().zip(other.params.iter()).all(|(a, b)| a.ty == b.ty)
    }
}

#[derive(Debug, Clone)]
pub struct BitField {
    pub width: u8,
    pub bit_offset: u8,
}

#[derive(Debug, Clone)]
pub struct Member {
    /// `None` for an unnamed bit-field, which still consumes storage.
    pub name: Option<String>,
    pub ty: QualifiedType,
    pub offset: u32,
    pub bitfield: Option<BitField>,
}

#[derive(Debug)]
pub struct StructUnionBody {
    pub is_struct: bool,
    pub is_complete: bool,
    pub tag: Option<String>,
    pub members: Vec<Member>,
    /// Name -> index into `members`, including names spliced up from
    /// anonymous struct/union members.
    pub member_index: HashMap<String, usize>,
    pub align: u32,
    pub width: u32,
}

impl StructUnionBody {
    fn incomplete(is_struct: bool, tag: Option<String>) -> Self {
        StructUnionBody {
            is_struct,
            is_complete: false,
            tag,
            members: Vec::new(),
            member_index: HashMap::new(),
            align: 1,
            width: 0,
        }
    }
}

/// A handle to a struct/union's body. Completion (forward-declared ->
/// complete) mutates the same `Rc<RefCell<_>>`, so every earlier-taken
/// pointer/handle observes the completed body without needing to be
/// revisited — the "mutable `Type` during completion" design note.
pub type StructHandle = Rc<RefCell<StructUnionBody>>;

pub fn new_struct_union(is_struct: bool, tag: Option<String>) -> StructHandle {
    Rc::new(RefCell::new(StructUnionBody::incomplete(is_struct, tag)))
}

#[derive(Debug)]
pub struct EnumBody {
    pub tag: Option<String>,
    pub underlying: Rc<ArithInfo>,
    pub constants: Vec<(String, i64)>,
}

pub type EnumHandle = Rc<RefCell<EnumBody>>;

pub fn new_enum(tag: Option<String>) -> EnumHandle {
    Rc::new(RefCell::new(EnumBody { tag, underlying: int_type(), constants: Vec::new() }))
}

#[derive(Debug, Clone)]
pub enum Type {
    Void,
    Arithmetic(Rc<ArithInfo>),
    Pointer(Box<QualifiedType>),
    Array { element: Box<QualifiedType>, len: ArrayLen },
    Function(Rc<FunctionType>),
    StructUnion(StructHandle),
    Enum(EnumHandle),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Void, Type::Void) => true,
            (Type::Arithmetic(a), Type::Arithmetic(b)) => Rc::ptr_eq(a, b),
            (Type::Pointer(a), Type::Pointer(b)) => a == b,
            (Type::Array { element: ea, len: la }, Type::Array { element: eb, len: lb }) => ea == eb && la == lb,
            (Type::Function(a), Type::Function(b)) => a == b,
            (Type::StructUnion(a), Type::StructUnion(b)) => Rc::ptr_eq(a, b),
            (Type::Enum(a), Type::Enum(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for Type {}

impl Type {
    pub fn pointer_to(target: QualifiedType) -> Type {
        Type::Pointer(Box::new(target))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Type::Arithmetic(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Arithmetic(a) if !a.is_float) || matches!(self, Type::Enum(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || self.is_pointer() || matches!(self, Type::Enum(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(_))
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Type::Void | Type::Function(_) => false,
            Type::Array { len: ArrayLen::Unknown, .. } => false,
            Type::StructUnion(h) => h.borrow().is_complete,
            _ => true,
        }
    }

    pub fn arith_info(&self) -> Option<Rc<ArithInfo>> {
        match self {
            Type::Arithmetic(a) => Some(a.clone()),
            Type::Enum(e) => Some(e.borrow().underlying.clone()),
            _ => None,
        }
    }

    /// Arrays decay to pointer-to-element in expression contexts; the
    /// original `Array` form is kept for `sizeof` and initializer
    /// handling, which must call this explicitly rather than relying on
    /// an implicit conversion baked into `Type` itself.
    pub fn decay(&self) -> Type {
        match self {
            Type::Array { element, .. } => Type::Pointer(element.clone()),
            other => other.clone(),
        }
    }

    /// Size in bytes; panics only on incomplete/function types, which
    /// callers must reject with a diagnostic before calling this (the
    /// Semantic Checker's `sizeof` rule does exactly that).
    pub fn size_of(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Arithmetic(a) => a.width,
            Type::Pointer(_) => 8,
            Type::Array { element, len: ArrayLen::Known(n) } => element.ty.size_of() * (*n as u32),
            Type::Array { len: ArrayLen::Unknown, .. } => 0,
            Type::Function(_) => 0,
            Type::StructUnion(h) => h.borrow().width,
            Type::Enum(e) => e.borrow().underlying.width,
        }
    }

    pub fn align_of(&self) -> u32 {
        match self {
            Type::Void => 1,
            Type::Arithmetic(a) => a.align,
            Type::Pointer(_) => 8,
            Type::Array { element, .. } => element.ty.align_of(),
            Type::Function(_) => 1,
            Type::StructUnion(h) => h.borrow().align,
            Type::Enum(e) => e.borrow().underlying.align,
        }
    }
}

/// Integer rank order used by promotion/UAC; `bool < char < short < int <
/// long < long long`, matching §4.5.
fn rank(info: &ArithInfo) -> u8 {
    info.rank
}

/// Promote any arithmetic type of rank <= int's rank to `int` if `int` can
/// represent all its values, else to `unsigned int`.
pub fn integer_promote(ty: &Type) -> Type {
    let Some(info) = ty.arith_info() else { return ty.clone() };
    if info.is_float {
        return ty.clone();
    }
    let int_info = int_type();
    if rank(&info) >= rank(&int_info) {
        return ty.clone();
    }
    // char/short (signed or unsigned) and bool always fit in int.
    Type::Arithmetic(int_info)
}

/// Usual arithmetic conversions between two arithmetic operands, per the
/// ladder in §4.5: long double > double > float > (promote then balance
/// integers by rank/signedness).
pub fn usual_arithmetic_conversions(a: &Type, b: &Type) -> Type {
    let (Some(ia), Some(ib)) = (a.arith_info(), b.arith_info()) else {
        return a.clone();
    };
    if ia.tag.contains(ArithTag::LONG_DOUBLE) || ib.tag.contains(ArithTag::LONG_DOUBLE) {
        return Type::Arithmetic(intern_arith(ArithTag::LONG_DOUBLE));
    }
    if ia.tag.contains(ArithTag::DOUBLE) || ib.tag.contains(ArithTag::DOUBLE) {
        return Type::Arithmetic(intern_arith(ArithTag::DOUBLE));
    }
    if ia.tag.contains(ArithTag::FLOAT) || ib.tag.contains(ArithTag::FLOAT) {
        return Type::Arithmetic(intern_arith(ArithTag::FLOAT));
    }
    let pa = integer_promote(a);
    let pb = integer_promote(b);
    let (Type::Arithmetic(pa), Type::Arithmetic(pb)) = (pa, pb) else {
        unreachable!("integer_promote always returns Arithmetic for non-float arithmetic input")
    };
    if pa.is_unsigned == pb.is_unsigned {
        return Type::Arithmetic(if rank(&pa) >= rank(&pb) { pa } else { pb });
    }
    let (unsigned, signed) = if pa.is_unsigned { (&pa, &pb) } else { (&pb, &pa) };
    if rank(unsigned) >= rank(signed) {
        return Type::Arithmetic(unsigned.clone());
    }
    if signed.width > unsigned.width {
        return Type::Arithmetic(signed.clone());
    }
    Type::Arithmetic(intern_arith(signed.tag | ArithTag::UNSIGNED))
}

/// Structural compatibility (not identity) per §4.5's rules. Struct/union
/// types are compatible only by identity (same handle).
pub fn compatible(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Void, Type::Void) => true,
        (Type::Arithmetic(x), Type::Arithmetic(y)) => Rc::ptr_eq(x, y),
        (Type::Pointer(x), Type::Pointer(y)) => x.quals == y.quals && compatible(&x.ty, &y.ty),
        (Type::Array { element: ex, len: lx }, Type::Array { element: ey, len: ly }) => {
            compatible(&ex.ty, &ey.ty)
                && match (lx, ly) {
                    (ArrayLen::Known(nx), ArrayLen::Known(ny)) => nx == ny,
                    _ => true,
                }
        }
        (Type::Function(fx), Type::Function(fy)) => {
            compatible(&fx.ret.ty, &fy.ret.ty)
                && fx.variadic == fy.variadic
                && fx.params.len() == fy.params.len()
                && fx.params.iter().zip(fy.params.iter()).all(|(px, py)| compatible(&px.ty.ty, &py.ty.ty))
        }
        (Type::StructUnion(x), Type::StructUnion(y)) => Rc::ptr_eq(x, y),
        (Type::Enum(x), Type::Enum(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Lay out a struct/union body's members in place: sequential offsets for
/// plain members, bit-field packing into storage units of the underlying
/// type, and anonymous-member splicing into the parent's member index.
///
/// `members_in` is the declaration-order list the parser collected; a
/// `None` name paired with a struct/union `QualifiedType` marks an
/// anonymous member whose own members get spliced into this body's index.
pub fn layout_struct_union(
    body: &mut StructUnionBody,
    members_in: Vec<(Option<String>, QualifiedType, Option<u8>)>,
) -> Result<(), String> {
    body.members.clear();
    body.member_index.clear();

    if body.is_struct {
        layout_struct(body, members_in)?;
    } else {
        layout_union(body, members_in)?;
    }
    body.is_complete = true;
    Ok(())
}

fn layout_struct(
    body: &mut StructUnionBody,
    members_in: Vec<(Option<String>, QualifiedType, Option<u8>)>,
) -> Result<(), String> {
    let mut offset: u32 = 0;
    let mut align: u32 = 1;
    // Bit-field packing state: current storage unit's starting offset,
    // its width in bytes, and the next free bit within it.
    let mut unit_offset: Option<u32> = None;
    let mut unit_width: u32 = 0;
    let mut next_bit: u32 = 0;

    let close_unit = |offset: &mut u32, unit_offset: &mut Option<u32>, unit_width: u32| {
        if let Some(start) = unit_offset.take() {
            *offset = start + unit_width;
        }
    };

    for (name, ty, bitwidth) in members_in {
        if let Some(width) = bitwidth {
            let unit_bits = ty.ty.size_of().max(1) * 8;
            let is_zero_width_unnamed = width == 0 && name.is_none();

            // A run of consecutive bit-fields may mix declared types — a
            // narrower field (e.g. `char b:3`) followed by a wider one
            // (e.g. `int c:5`) still shares the same storage unit as long
            // as the new field fits within its own type's bit width
            // counted from the run's start; only an actual straddle of
            // that boundary opens a fresh, realigned unit.
            let straddles = next_bit + width as u32 > unit_bits;
            let needs_new_unit = unit_offset.is_none() || straddles || is_zero_width_unnamed;

            if needs_new_unit {
                close_unit(&mut offset, &mut unit_offset, unit_width);
                offset = align_up(offset, ty.ty.align_of());
                if is_zero_width_unnamed {
                    unit_offset = None;
                    next_bit = 0;
                    unit_width = 0;
                    align = align.max(ty.ty.align_of());
                    continue;
                }
                unit_offset = Some(offset);
                next_bit = 0;
            }
            align = align.max(ty.ty.align_of());
            let bit_offset = next_bit as u8;
            next_bit += width as u32;
            unit_width = (next_bit + 7) / 8;
            if let Some(n) = &name {
                let idx = body.members.len();
                if body.member_index.insert(n.clone(), idx).is_some() {
                    return Err(format!("duplicate member '{n}'"));
                }
            }
            body.members.push(Member {
                name,
                offset: unit_offset.unwrap(),
                ty,
                bitfield: Some(BitField { width, bit_offset }),
            });
            continue;
        }

        close_unit(&mut offset, &mut unit_offset, unit_width);
        let member_align = ty.ty.align_of();
        offset = align_up(offset, member_align);
        align = align.max(member_align);
        let is_anon_aggregate = name.is_none() && matches!(ty.ty, Type::StructUnion(_));

        if is_anon_aggregate {
            if let Type::StructUnion(inner) = &ty.ty {
                let inner_borrow = inner.borrow();
                for inner_name in inner_borrow.member_index.keys() {
                    if body.member_index.contains_key(inner_name) {
                        return Err(format!("duplicate member '{inner_name}' via anonymous member"));
                    }
                }
                let base_offset = offset;
                let base_index = body.members.len();
                for m in inner_borrow.members.iter() {
                    body.members.push(Member {
                        name: m.name.clone(),
                        ty: m.ty.clone(),
                        offset: base_offset + m.offset,
                        bitfield: m.bitfield.clone(),
                    });
                }
                for (inner_name, inner_idx) in inner_borrow.member_index.iter() {
                    body.member_index.insert(inner_name.clone(), base_index + inner_idx);
                }
            }
            offset += ty.ty.size_of();
            continue;
        }

        let idx = body.members.len();
        if let Some(n) = &name {
            if body.member_index.insert(n.clone(), idx).is_some() {
                return Err(format!("duplicate member '{n}'"));
            }
        }
        let width = ty.ty.size_of();
        body.members.push(Member { name, ty, offset, bitfield: None });
        offset += width;
    }

    close_unit(&mut offset, &mut unit_offset, unit_width);
    body.align = align;
    body.width = align_up(offset, align);
    Ok(())
}

fn layout_union(
    body: &mut StructUnionBody,
    members_in: Vec<(Option<String>, QualifiedType, Option<u8>)>,
) -> Result<(), String> {
    let mut width = 0u32;
    let mut align = 1u32;
    for (name, ty, bitwidth) in members_in {
        align = align.max(ty.ty.align_of());
        let member_width = if let Some(w) = bitwidth {
            ty.ty.size_of().max((w as u32).div_ceil(8))
        } else {
            ty.ty.size_of()
        };
        width = width.max(member_width);
        let idx = body.members.len();
        if let Some(n) = &name {
            if body.member_index.insert(n.clone(), idx).is_some() {
                return Err(format!("duplicate member '{n}'"));
            }
        }
        body.members.push(Member {
            name,
            ty,
            offset: 0,
            bitfield: bitwidth.map(|w| BitField { width: w, bit_offset: 0 }),
        });
    }
    body.align = align;
    body.width = align_up(width, align);
    Ok(())
}

fn align_up(offset: u32, align: u32) -> u32 {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_types_are_interned() {
        let a = intern_arith(ArithTag::INT);
        let b = intern_arith(ArithTag::SIGNED | ArithTag::INT);
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn integer_promotion_widens_char_to_int() {
        let char_ty = Type::Arithmetic(intern_arith(ArithTag::SIGNED | ArithTag::CHAR));
        let promoted = integer_promote(&char_ty);
        assert_eq!(promoted, Type::Arithmetic(int_type()));
    }

    #[test]
    fn uac_is_commutative_for_every_pair() {
        let tags = [
            ArithTag::CHAR | ArithTag::SIGNED,
            ArithTag::INT | ArithTag::UNSIGNED,
            ArithTag::LONG | ArithTag::SIGNED,
            ArithTag::LONG | ArithTag::UNSIGNED,
            ArithTag::LONG_LONG | ArithTag::SIGNED,
            ArithTag::FLOAT,
            ArithTag::DOUBLE,
        ];
        for &ta in &tags {
            for &tb in &tags {
                let a = Type::Arithmetic(intern_arith(ta));
                let b = Type::Arithmetic(intern_arith(tb));
                assert_eq!(
                    usual_arithmetic_conversions(&a, &b),
                    usual_arithmetic_conversions(&b, &a),
                    "UAC not commutative for {ta:?}/{tb:?}"
                );
            }
        }
    }

    #[test]
    fn unsigned_int_beats_signed_char_in_uac() {
        let u = Type::Arithmetic(unsigned_int_type());
        let c = Type::Arithmetic(intern_arith(ArithTag::SIGNED | ArithTag::CHAR));
        assert_eq!(usual_arithmetic_conversions(&u, &c), Type::Arithmetic(unsigned_int_type()));
    }

    fn qt(ty: Type) -> QualifiedType {
        QualifiedType::unqualified(ty)
    }

    #[test]
    fn s3_simple_struct_layout() {
        let h = new_struct_union(true, None);
        layout_struct_union(
            &mut h.borrow_mut(),
            vec![
                (Some("a".into()), qt(Type::Arithmetic(char_type())), None),
                (Some("b".into()), qt(Type::Arithmetic(int_type())), None),
            ],
        )
        .unwrap();
        let b = h.borrow();
        assert_eq!(b.width, 8);
        assert_eq!(b.align, 4);
        assert_eq!(b.members[b.member_index["a"]].offset, 0);
        assert_eq!(b.members[b.member_index["b"]].offset, 4);
    }

    #[test]
    fn s3_bitfields_pack_into_one_unit() {
        let h = new_struct_union(true, None);
        layout_struct_union(
            &mut h.borrow_mut(),
            vec![
                (Some("a".into()), qt(Type::Arithmetic(char_type())), None),
                (Some("b".into()), qt(Type::Arithmetic(char_type())), Some(3)),
                (Some("c".into()), qt(Type::Arithmetic(int_type())), Some(5)),
            ],
        )
        .unwrap();
        let b = h.borrow();
        assert_eq!(b.width, 4);
    }

    #[test]
    fn union_layout_is_max_of_members() {
        let h = new_struct_union(false, None);
        layout_struct_union(
            &mut h.borrow_mut(),
            vec![
                (Some("a".into()), qt(Type::Arithmetic(char_type())), None),
                (Some("b".into()), qt(Type::Arithmetic(int_type())), None),
            ],
        )
        .unwrap();
        let b = h.borrow();
        assert_eq!(b.width, 4);
        assert_eq!(b.align, 4);
        assert!(b.members.iter().all(|m| m.offset == 0));
    }

    #[test]
    fn anonymous_member_splices_into_parent() {
        let inner = new_struct_union(true, None);
        layout_struct_union(
            &mut inner.borrow_mut(),
            vec![(Some("x".into()), qt(Type::Arithmetic(int_type())), None)],
        )
        .unwrap();
        let outer = new_struct_union(true, None);
        layout_struct_union(
            &mut outer.borrow_mut(),
            vec![(None, qt(Type::StructUnion(inner)), None)],
        )
        .unwrap();
        let b = outer.borrow();
        assert!(b.member_index.contains_key("x"));
    }

    #[test]
    fn pointer_compatibility_requires_matching_qualifiers() {
        let const_int = QualifiedType { ty: Type::Arithmetic(int_type()), quals: Qualifiers::CONST };
        let plain_int = qt(Type::Arithmetic(int_type()));
        let p1 = Type::pointer_to(const_int);
        let p2 = Type::pointer_to(plain_int);
        assert!(!compatible(&p1, &p2));
    }
}
