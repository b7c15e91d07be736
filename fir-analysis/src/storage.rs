use velac_fir::{ExprId, ExprKind, Fir, FxHashMap, SymbolId, SymbolKind, types::Ty};

use crate::{
    flow::Flow,
    variable::{DataFlowVariable, Identifier, RealVar, SyntheticVar},
};

/// Everything known about an interned real variable.
#[derive(Debug, Clone)]
pub struct RealVariableInfo {
    pub identifier: Identifier,
    /// The declared type of the underlying symbol.
    pub ty: Ty,
    pub is_receiver: bool,
}

/// Interns the dataflow variables of one top-level declaration.
///
/// Real variables are uniqued by [Identifier] (symbol plus receiver chain), synthetic
/// ones by the identity of the expression they decorate. Handles stay valid until
/// [VariableStorage::clear]; flows snapshot-ed into a
/// [DataFlowInfo](crate::DataFlowInfo) keep a clone of the storage so lookups outlive
/// the analysis.
#[derive(Debug, Clone, Default)]
pub struct VariableStorage {
    real_by_identifier: FxHashMap<Identifier, RealVar>,
    real_info: Vec<RealVariableInfo>,
    synthetic_by_expr: FxHashMap<ExprId, SyntheticVar>,
}

impl VariableStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all interned variables. Handles minted before this call must not be used
    /// against the storage afterwards.
    pub fn clear(&mut self) {
        self.real_by_identifier.clear();
        self.real_info.clear();
        self.synthetic_by_expr.clear();
    }

    pub fn info(&self, variable: RealVar) -> &RealVariableInfo {
        &self.real_info[variable.0 as usize]
    }

    pub fn is_receiver(&self, variable: RealVar) -> bool {
        self.info(variable).is_receiver
    }

    pub fn real_for_identifier(&self, identifier: &Identifier) -> Option<RealVar> {
        self.real_by_identifier.get(identifier).copied()
    }

    fn intern_real(&mut self, identifier: Identifier, ty: Ty) -> RealVar {
        if let Some(existing) = self.real_by_identifier.get(&identifier) {
            return *existing;
        }
        let variable = RealVar(self.real_info.len() as u32);
        self.real_info.push(RealVariableInfo {
            identifier: identifier.clone(),
            ty,
            is_receiver: identifier.is_receiver,
        });
        self.real_by_identifier.insert(identifier, variable);
        variable
    }

    /// The canonical real variable for the access `expr`, following the flow's alias map
    /// so facts land on the variable that owns them. `None` when any link of the access
    /// is not stable.
    pub fn get_or_create_real(&mut self, fir: &Fir, flow: &Flow, expr: ExprId) -> Option<RealVar> {
        self.real_for_access(fir, flow, expr, true)
    }

    /// As [Self::get_or_create_real], but without following the alias map. Used for the
    /// left-hand side of an assignment, whose aliasing is about to be replaced.
    pub fn get_or_create_real_without_unwrapping(
        &mut self,
        fir: &Fir,
        flow: &Flow,
        expr: ExprId,
    ) -> Option<RealVar> {
        self.real_for_access(fir, flow, expr, false)
    }

    /// The real variable for a direct (receiver-less) reference to `symbol`.
    pub fn get_or_create_real_for_symbol(
        &mut self,
        fir: &Fir,
        flow: &Flow,
        symbol: SymbolId,
        unwrap_alias: bool,
    ) -> Option<RealVar> {
        let data = fir.symbol(symbol);
        if !data.is_stable() {
            return None;
        }
        let identifier = Identifier {
            symbol,
            receiver: None,
            is_receiver: matches!(data.kind, SymbolKind::Receiver),
        };
        let variable = self.intern_real(identifier, data.ty.clone());
        Some(if unwrap_alias {
            flow.unwrap_variable(variable)
        } else {
            variable
        })
    }

    fn real_for_access(
        &mut self,
        fir: &Fir,
        flow: &Flow,
        expr: ExprId,
        unwrap_alias: bool,
    ) -> Option<RealVar> {
        let ExprKind::Access { symbol, receiver } = &fir.expr(expr).kind else {
            return None;
        };
        let receiver = match receiver {
            // Receiver links are always unwrapped: the facts of the chain live on the
            // canonical variables.
            Some(r) => Some(self.real_for_access(fir, flow, *r, true)?),
            None => None,
        };
        let data = fir.symbol(*symbol);
        if !data.is_stable() {
            return None;
        }
        let identifier = Identifier {
            symbol: *symbol,
            receiver,
            is_receiver: matches!(data.kind, SymbolKind::Receiver),
        };
        let variable = self.intern_real(identifier, data.ty.clone());
        Some(if unwrap_alias {
            flow.unwrap_variable(variable)
        } else {
            variable
        })
    }

    /// The synthetic variable decorating `expr`, minting it on first request.
    pub fn create_synthetic(&mut self, expr: ExprId) -> SyntheticVar {
        if let Some(existing) = self.synthetic_by_expr.get(&expr) {
            return *existing;
        }
        let variable = SyntheticVar(self.synthetic_by_expr.len() as u32);
        self.synthetic_by_expr.insert(expr, variable);
        variable
    }

    /// A real variable when the expression is a stable access, a synthetic one
    /// otherwise.
    pub fn get_or_create_variable(&mut self, fir: &Fir, flow: &Flow, expr: ExprId) -> DataFlowVariable {
        match self.real_for_access(fir, flow, expr, true) {
            Some(real) => DataFlowVariable::Real(real),
            None => DataFlowVariable::Synthetic(self.create_synthetic(expr)),
        }
    }

    /// Lookup-only variant of [Self::get_or_create_variable]: `None` when no variable
    /// was ever interned for the expression.
    pub fn get(&self, fir: &Fir, flow: &Flow, expr: ExprId) -> Option<DataFlowVariable> {
        if let Some(real) = self.lookup_real(fir, expr) {
            return Some(DataFlowVariable::Real(flow.unwrap_variable(real)));
        }
        self.synthetic_by_expr
            .get(&expr)
            .map(|s| DataFlowVariable::Synthetic(*s))
    }

    /// Lookup-only real variable for an access, without alias unwrapping. This is the
    /// entry point of the smartcast query, which reports the alias itself.
    pub fn get_real_without_unwrapping(&self, fir: &Fir, expr: ExprId) -> Option<RealVar> {
        self.lookup_real(fir, expr)
    }

    fn lookup_real(&self, fir: &Fir, expr: ExprId) -> Option<RealVar> {
        let ExprKind::Access { symbol, receiver } = &fir.expr(expr).kind else {
            return None;
        };
        let receiver = match receiver {
            Some(r) => Some(self.lookup_real(fir, *r)?),
            None => None,
        };
        let data = fir.symbol(*symbol);
        let identifier = Identifier {
            symbol: *symbol,
            receiver,
            is_receiver: matches!(data.kind, SymbolKind::Receiver),
        };
        self.real_for_identifier(&identifier)
    }

    /// Drop the interning for every real variable rooted at `symbol`, when its scope
    /// exits. Facts referring to the dropped variables become unreachable but are not
    /// erased from existing flows.
    pub fn remove_real(&mut self, symbol: SymbolId) {
        self.real_by_identifier
            .retain(|identifier, _| identifier.symbol != symbol);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use velac_fir::{FirBuilder, types::Ty};

    use super::*;

    #[test]
    fn real_variables_are_interned_per_identifier() {
        let mut b = FirBuilder::new();
        let x = b.param("x", Ty::nullable_any());
        let a1 = b.access(x);
        let a2 = b.access(x);
        let fir = b.finish();

        let mut storage = VariableStorage::new();
        let flow = Flow::new();
        let v1 = storage.get_or_create_real(&fir, &flow, a1).unwrap();
        let v2 = storage.get_or_create_real(&fir, &flow, a2).unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn qualified_chains_recurse_on_the_receiver() {
        let mut b = FirBuilder::new();
        let x = b.param("x", Ty::named("Box"));
        let field = b.member("value", true, Ty::nullable_any());
        let x_access = b.access(x);
        let chain = b.qualified_access(x_access, field);
        let fir = b.finish();

        let mut storage = VariableStorage::new();
        let flow = Flow::new();
        let v = storage.get_or_create_real(&fir, &flow, chain).unwrap();
        let receiver = storage.info(v).identifier.receiver.unwrap();
        assert_eq!(storage.info(receiver).identifier.symbol, x);
    }

    #[test]
    fn unstable_links_produce_no_real_variable() {
        let mut b = FirBuilder::new();
        let x = b.param("x", Ty::named("Box"));
        let open_field = b.member("value", false, Ty::nullable_any());
        let x_access = b.access(x);
        let chain = b.qualified_access(x_access, open_field);
        let captured = b.captured_var("c", Ty::nullable_any());
        let c_access = b.access(captured);
        let fir = b.finish();

        let mut storage = VariableStorage::new();
        let flow = Flow::new();
        assert_eq!(storage.get_or_create_real(&fir, &flow, chain), None);
        assert_eq!(storage.get_or_create_real(&fir, &flow, c_access), None);
        assert!(storage.get_or_create_variable(&fir, &flow, chain).is_synthetic());
    }

    #[test]
    fn synthetic_variables_are_memoized_on_expression_identity() {
        let mut b = FirBuilder::new();
        let x = b.param("x", Ty::nullable_any());
        let operand = b.access(x);
        let test = b.is_type(operand, Ty::string());
        let fir = b.finish();

        let mut storage = VariableStorage::new();
        let s1 = storage.create_synthetic(test);
        let s2 = storage.create_synthetic(test);
        assert_eq!(s1, s2);

        let flow = Flow::new();
        assert_eq!(
            storage.get(&fir, &flow, test),
            Some(DataFlowVariable::Synthetic(s1))
        );
    }

    #[test]
    fn removal_drops_interning_for_the_symbol() {
        let mut b = FirBuilder::new();
        let x = b.param("x", Ty::nullable_any());
        let access = b.access(x);
        let fir = b.finish();

        let mut storage = VariableStorage::new();
        let flow = Flow::new();
        storage.get_or_create_real(&fir, &flow, access).unwrap();
        storage.remove_real(x);
        assert_eq!(storage.get_real_without_unwrapping(&fir, access), None);
    }
}
