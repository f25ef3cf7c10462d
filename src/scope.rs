//! Scope tree and identifier/tag namespaces.
//!
//! Grounded on the teacher's `resolver.rs` table-and-parent-walk style
//! (`HashMap`-keyed bindings, lookup walking outward through a parent
//! chain), generalized from Seq's single flat word table to C's
//! File/Prototype/Block/Function scope kinds and the separate tag
//! namespace for `struct`/`union`/`enum` names.

use crate::types::QualifiedType;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    File,
    /// A function prototype's parameter list, when it does not also
    /// introduce the function body's block (e.g. a standalone
    /// declaration `int f(int x);`).
    Prototype,
    Block,
    /// The scope that owns label bindings; always a function's outermost
    /// scope, one level inside its Prototype/Block pairing.
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    None,
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    Object,
    Function,
    TypedefName,
    Enumerator,
    Label,
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: String,
    pub ty: QualifiedType,
    pub kind: IdentKind,
    pub linkage: Linkage,
    pub is_defined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Struct,
    Union,
    Enum,
}

#[derive(Debug)]
pub struct TagBinding {
    pub kind: TagKind,
    pub ty: crate::types::Type,
}

pub struct Scope {
    pub kind: ScopeKind,
    parent: Option<Weak<RefCell<Scope>>>,
    idents: HashMap<String, Rc<Identifier>>,
    tags: HashMap<String, Rc<TagBinding>>,
    /// Labels, populated only for `Function`-kind scopes; forward gotos
    /// reference entries here before they're defined.
    labels: HashMap<String, LabelState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelState {
    Referenced,
    Defined,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

impl Scope {
    pub fn new_root() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            kind: ScopeKind::File,
            parent: None,
            idents: HashMap::new(),
            tags: HashMap::new(),
            labels: HashMap::new(),
        }))
    }

    pub fn child(parent: &ScopeRef, kind: ScopeKind) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            kind,
            parent: Some(Rc::downgrade(parent)),
            idents: HashMap::new(),
            tags: HashMap::new(),
            labels: HashMap::new(),
        }))
    }

    pub fn parent(&self) -> Option<ScopeRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Insert binds into *this* scope only, per §4.5's File/Prototype/
    /// Block/Function split — callers choose the scope to insert into by
    /// holding the right `ScopeRef`, never by searching upward.
    pub fn declare(&mut self, ident: Identifier) -> Result<(), String> {
        if let Some(existing) = self.idents.get(&ident.name) {
            if !is_compatible_redeclaration(existing, &ident) {
                return Err(format!("redefinition of '{}'", ident.name));
            }
        }
        self.idents.insert(ident.name.clone(), Rc::new(ident));
        Ok(())
    }

    pub fn declare_tag(&mut self, name: String, binding: TagBinding) -> Result<(), String> {
        if self.tags.contains_key(&name) {
            return Err(format!("redefinition of tag '{name}'"));
        }
        self.tags.insert(name, Rc::new(binding));
        Ok(())
    }

    pub fn tag_here(&self, name: &str) -> Option<Rc<TagBinding>> {
        self.tags.get(name).cloned()
    }

    pub fn ident_here(&self, name: &str) -> Option<Rc<Identifier>> {
        self.idents.get(name).cloned()
    }
}

fn is_compatible_redeclaration(existing: &Identifier, new: &Identifier) -> bool {
    existing.kind == IdentKind::TypedefName
        && new.kind == IdentKind::TypedefName
        && existing.ty == new.ty
}

/// Look up `name` starting at `scope`, walking outward through parents;
/// returns the nearest enclosing binding, or `None`.
pub fn lookup_ident(scope: &ScopeRef, name: &str) -> Option<Rc<Identifier>> {
    let mut current = Some(Rc::clone(scope));
    while let Some(s) = current {
        if let Some(id) = s.borrow().ident_here(name) {
            return Some(id);
        }
        current = s.borrow().parent();
    }
    None
}

pub fn lookup_tag(scope: &ScopeRef, name: &str) -> Option<Rc<TagBinding>> {
    let mut current = Some(Rc::clone(scope));
    while let Some(s) = current {
        if let Some(t) = s.borrow().tag_here(name) {
            return Some(t);
        }
        current = s.borrow().parent();
    }
    None
}

/// Whether `name` is classified as a typedef-name in the current scope
/// chain — the parser consults this on every declaration/expression
/// decision, since a nested block can shadow a typedef with an ordinary
/// identifier.
pub fn is_typedef_name(scope: &ScopeRef, name: &str) -> bool {
    lookup_ident(scope, name)
        .map(|id| id.kind == IdentKind::TypedefName)
        .unwrap_or(false)
}

/// Walk up to the nearest enclosing `Function`-kind scope, which owns
/// the label namespace (labels live at function scope, not block scope).
pub fn function_scope(scope: &ScopeRef) -> Option<ScopeRef> {
    let mut current = Some(Rc::clone(scope));
    while let Some(s) = current {
        if s.borrow().kind == ScopeKind::Function {
            return Some(s);
        }
        current = s.borrow().parent();
    }
    None
}

pub fn reference_label(func_scope: &ScopeRef, name: &str) {
    let mut s = func_scope.borrow_mut();
    s.labels.entry(name.to_string()).or_insert(LabelState::Referenced);
}

pub fn define_label(func_scope: &ScopeRef, name: &str) -> Result<(), String> {
    let mut s = func_scope.borrow_mut();
    if s.labels.get(name) == Some(&LabelState::Defined) {
        return Err(format!("redefinition of label '{name}'"));
    }
    s.labels.insert(name.to_string(), LabelState::Defined);
    Ok(())
}

/// Called at function exit: every label that was referenced by a `goto`
/// but never defined is an error.
pub fn unresolved_labels(func_scope: &ScopeRef) -> Vec<String> {
    func_scope
        .borrow()
        .labels
        .iter()
        .filter(|(_, state)| **state == LabelState::Referenced)
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{int_type, Type};

    fn obj(name: &str) -> Identifier {
        Identifier {
            name: name.to_string(),
            ty: QualifiedType::unqualified(Type::Arithmetic(int_type())),
            kind: IdentKind::Object,
            linkage: Linkage::None,
            is_defined: true,
        }
    }

    fn typedef(name: &str) -> Identifier {
        Identifier {
            name: name.to_string(),
            ty: QualifiedType::unqualified(Type::Arithmetic(int_type())),
            kind: IdentKind::TypedefName,
            linkage: Linkage::None,
            is_defined: true,
        }
    }

    #[test]
    fn s4_nearest_enclosing_binding_wins() {
        let file = Scope::new_root();
        file.borrow_mut().declare(obj("x")).unwrap();
        let block = Scope::child(&file, ScopeKind::Block);
        assert_eq!(lookup_ident(&block, "x").unwrap().name, "x");

        block.borrow_mut().declare(obj("x")).unwrap();
        assert!(Rc::ptr_eq(&lookup_ident(&block, "x").unwrap(), &block.borrow().ident_here("x").unwrap()));
    }

    #[test]
    fn s4_redeclaration_in_same_scope_is_error() {
        let file = Scope::new_root();
        file.borrow_mut().declare(obj("x")).unwrap();
        assert!(file.borrow_mut().declare(obj("x")).is_err());
    }

    #[test]
    fn identical_typedef_redeclaration_is_allowed() {
        let file = Scope::new_root();
        file.borrow_mut().declare(typedef("T")).unwrap();
        assert!(file.borrow_mut().declare(typedef("T")).is_ok());
    }

    #[test]
    fn s5_typedef_classification_is_shadowed_by_nested_block() {
        let file = Scope::new_root();
        file.borrow_mut().declare(typedef("T")).unwrap();
        assert!(is_typedef_name(&file, "T"));

        let block = Scope::child(&file, ScopeKind::Block);
        block.borrow_mut().declare(obj("T")).unwrap();
        assert!(!is_typedef_name(&block, "T"));
    }

    #[test]
    fn labels_live_at_function_scope_not_block_scope() {
        let file = Scope::new_root();
        let func = Scope::child(&file, ScopeKind::Function);
        let block = Scope::child(&func, ScopeKind::Block);
        reference_label(&function_scope(&block).unwrap(), "done");
        assert_eq!(unresolved_labels(&func), vec!["done".to_string()]);
        define_label(&func, "done").unwrap();
        assert!(unresolved_labels(&func).is_empty());
    }

    #[test]
    fn duplicate_label_definition_is_error() {
        let file = Scope::new_root();
        let func = Scope::child(&file, ScopeKind::Function);
        define_label(&func, "l").unwrap();
        assert!(define_label(&func, "l").is_err());
    }
}
