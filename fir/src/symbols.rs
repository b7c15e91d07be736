use std::sync::Arc;

use cranelift_entity::entity_impl;

use crate::types::Ty;

/// A unique reference to a declared symbol in the current declaration tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);
entity_impl!(SymbolId, "sym");

/// A function signature as seen by the resolver: parameter types and return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub params: Vec<Ty>,
    pub return_ty: Ty,
}

/// What kind of declaration a symbol refers to. Stability of accesses (whether a real
/// dataflow variable may track the value) is derived from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    /// A function value parameter. Parameters are immutable bindings.
    ValueParameter,
    /// An immutable local binding.
    LocalVal,
    /// A mutable local binding. Capture by a closure makes it unstable: another
    /// invocation may write to it between any two observations.
    LocalVar { captured: bool },
    /// A member property, accessed through a receiver. Only `final` members are stable.
    Member { is_final: bool },
    /// An implicit `this` receiver binding.
    Receiver,
    /// A callable declaration.
    Function { signature: FunctionSignature },
}

/// Resolved information about a declared symbol.
#[derive(Debug, Clone)]
pub struct SymbolData {
    pub name: Arc<str>,
    pub kind: SymbolKind,
    /// The declared type of the symbol's value. For functions this is the return type.
    pub ty: Ty,
}

impl SymbolData {
    pub fn new(name: impl AsRef<str>, kind: SymbolKind, ty: Ty) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            kind,
            ty,
        }
    }

    /// Whether the symbol's value can be tracked by a real dataflow variable.
    ///
    /// Unstable symbols can change between two observations of the same access path, so
    /// facts about them must not survive past the expression that produced them.
    pub fn is_stable(&self) -> bool {
        match &self.kind {
            SymbolKind::ValueParameter | SymbolKind::LocalVal | SymbolKind::Receiver => true,
            SymbolKind::LocalVar { captured } => !captured,
            SymbolKind::Member { is_final } => *is_final,
            SymbolKind::Function { .. } => false,
        }
    }

    pub fn signature(&self) -> Option<&FunctionSignature> {
        match &self.kind {
            SymbolKind::Function { signature } => Some(signature),
            _ => None,
        }
    }
}
