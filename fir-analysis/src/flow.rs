use velac_fir::types::Ty;

use crate::{
    statement::{Implication, TypeStatement},
    variable::{DataFlowVariable, RealVar},
};

/// A real variable together with the declared type it had when an alias to it was
/// recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct RealVariableAndType {
    pub variable: RealVar,
    pub original_ty: Ty,
}

/// The dataflow state at one CFG node.
///
/// All four components are persistent maps: [Flow::fork] is a cheap clone sharing
/// structure with the parent, so the per-branch flows of `when`, boolean operators and
/// safe calls cost O(1) until they diverge. The state itself is a dumb record; all
/// algebra over it lives in [LogicSystem](crate::LogicSystem).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flow {
    /// Accumulated type facts per real variable.
    pub(crate) approved_type_statements: im::HashMap<RealVar, TypeStatement>,
    /// Implications pending approval, keyed by their condition variable.
    pub(crate) logic_statements: im::HashMap<DataFlowVariable, im::Vector<Implication>>,
    /// "This local currently names the same value as that variable."
    pub(crate) direct_alias_map: im::HashMap<RealVar, RealVariableAndType>,
    /// Inverse of `direct_alias_map`, for invalidation on reassignment.
    pub(crate) backwards_alias_map: im::HashMap<RealVar, im::Vector<RealVar>>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child flow sharing structure with `self`, for divergent refinement.
    #[inline]
    pub fn fork(&self) -> Flow {
        self.clone()
    }

    pub fn approved_type_statement(&self, variable: RealVar) -> Option<&TypeStatement> {
        self.approved_type_statements.get(&variable)
    }

    pub fn implications_of(&self, variable: DataFlowVariable) -> impl Iterator<Item = &Implication> {
        self.logic_statements.get(&variable).into_iter().flatten()
    }

    pub fn direct_alias(&self, variable: RealVar) -> Option<&RealVariableAndType> {
        self.direct_alias_map.get(&variable)
    }

    /// Follow the alias map one step: the variable facts about `variable` are stored on.
    pub fn unwrap_variable(&self, variable: RealVar) -> RealVar {
        self.direct_alias_map
            .get(&variable)
            .map(|underlying| underlying.variable)
            .unwrap_or(variable)
    }

    /// Number of distinct variables with approved type facts. Diagnostics only.
    pub fn approved_len(&self) -> usize {
        self.approved_type_statements.len()
    }
}
