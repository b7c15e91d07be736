use crate::{FxHashMap, symbols::SymbolId, types::Ty};

/// One implicit receiver currently in scope.
#[derive(Debug, Clone)]
pub struct ImplicitReceiverValue {
    pub symbol: SymbolId,
    original_ty: Ty,
    current_ty: Ty,
}

impl ImplicitReceiverValue {
    /// The declared type of the receiver, before any refinement.
    #[inline]
    pub fn original_type(&self) -> &Ty {
        &self.original_ty
    }

    /// The refined type currently in effect at this program point.
    #[inline]
    pub fn current_type(&self) -> &Ty {
        &self.current_ty
    }
}

/// The resolver's stack of implicit receivers.
///
/// The dataflow analyzer updates entries in place as refinements for a receiver appear
/// and disappear; everyone resolving an implicit receiver reads `current_type`.
#[derive(Debug, Default, Clone)]
pub struct ImplicitReceiverStack {
    entries: Vec<ImplicitReceiverValue>,
    index_by_symbol: FxHashMap<SymbolId, usize>,
}

impl ImplicitReceiverStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, symbol: SymbolId, ty: Ty) {
        self.index_by_symbol.insert(symbol, self.entries.len());
        self.entries.push(ImplicitReceiverValue {
            symbol,
            original_ty: ty.clone(),
            current_ty: ty,
        });
    }

    pub fn pop(&mut self) -> Option<SymbolId> {
        let entry = self.entries.pop()?;
        self.index_by_symbol.remove(&entry.symbol);
        Some(entry.symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImplicitReceiverValue> {
        self.entries.iter()
    }

    pub fn get(&self, symbol: SymbolId) -> Option<&ImplicitReceiverValue> {
        self.index_by_symbol.get(&symbol).map(|i| &self.entries[*i])
    }

    pub fn original_type(&self, symbol: SymbolId) -> Option<&Ty> {
        self.get(symbol).map(ImplicitReceiverValue::original_type)
    }

    pub fn current_type(&self, symbol: SymbolId) -> Option<&Ty> {
        self.get(symbol).map(ImplicitReceiverValue::current_type)
    }

    /// Install a refined type for the receiver bound to `symbol`.
    pub fn replace_current_type(&mut self, symbol: SymbolId, ty: Ty) {
        if let Some(index) = self.index_by_symbol.get(&symbol) {
            self.entries[*index].current_ty = ty;
        }
    }

    /// Drop any refinement for `symbol`, reinstating the declared type.
    pub fn reinstate_original_type(&mut self, symbol: SymbolId) {
        if let Some(index) = self.index_by_symbol.get(&symbol) {
            let entry = &mut self.entries[*index];
            entry.current_ty = entry.original_ty.clone();
        }
    }
}
