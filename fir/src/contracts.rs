//! Contract descriptions as the resolver's contract parser delivers them.
//!
//! The dataflow analyzer does not parse contracts; it consumes the already-classified
//! effect declarations attached to a callee symbol through a [ContractProvider].

use crate::{FxHashMap, symbols::SymbolId, types::Ty};

/// A constant reference appearing in a `returns(...)` effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantRef {
    /// `returns()` — the function returned at all.
    Wildcard,
    True,
    False,
    Null,
    NotNull,
}

/// A formal parameter reference inside a contract condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRef {
    Receiver,
    Param(usize),
}

/// The condition of a conditional effect, as a predicate over one formal parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractCondition {
    /// `param is T` (or `param !is T` when negated).
    IsInstance {
        parameter: ParamRef,
        ty: Ty,
        negated: bool,
    },
    /// `param == null` (or `param != null` when negated).
    IsNull { parameter: ParamRef, negated: bool },
    /// A boolean parameter used directly as the condition.
    BooleanParameter { parameter: ParamRef },
}

impl ContractCondition {
    pub fn parameter(&self) -> ParamRef {
        match self {
            Self::IsInstance { parameter, .. }
            | Self::IsNull { parameter, .. }
            | Self::BooleanParameter { parameter } => *parameter,
        }
    }
}

/// One effect declaration of a contract.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectDeclaration {
    /// `returns(value) implies condition`
    Conditional {
        value: ConstantRef,
        condition: ContractCondition,
    },
    /// For a function iterating a collection with a lambda: describes the elements for
    /// which the lambda returned `value` (e.g. the elements `filter` keeps).
    ForEachReturnValue { lambda: ParamRef, value: ConstantRef },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractDescription {
    pub effects: Vec<EffectDeclaration>,
}

impl ContractDescription {
    pub fn new(effects: Vec<EffectDeclaration>) -> Self {
        Self { effects }
    }

    pub fn conditional_effects(
        &self,
    ) -> impl Iterator<Item = (&ConstantRef, &ContractCondition)> {
        self.effects.iter().filter_map(|e| match e {
            EffectDeclaration::Conditional { value, condition } => Some((value, condition)),
            _ => None,
        })
    }

    pub fn for_each_return_value_effects(
        &self,
    ) -> impl Iterator<Item = (&ParamRef, &ConstantRef)> {
        self.effects.iter().filter_map(|e| match e {
            EffectDeclaration::ForEachReturnValue { lambda, value } => Some((lambda, value)),
            _ => None,
        })
    }
}

/// Source of contract descriptions, keyed by callee symbol.
pub trait ContractProvider {
    fn contract_description(&self, function: SymbolId) -> Option<&ContractDescription>;
}

/// Map-backed [ContractProvider] used by the resolver for declarations in scope.
#[derive(Default)]
pub struct ContractRegistry {
    descriptions: FxHashMap<SymbolId, ContractDescription>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: SymbolId, description: ContractDescription) {
        self.descriptions.insert(function, description);
    }
}

impl ContractProvider for ContractRegistry {
    fn contract_description(&self, function: SymbolId) -> Option<&ContractDescription> {
        self.descriptions.get(&function)
    }
}
