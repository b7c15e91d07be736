use smallvec::{SmallVec, smallvec};
use velac_fir::{FxHashMap, FxHashSet};

use crate::{
    flow::{Flow, RealVariableAndType},
    statement::{Implication, OperationStatement, Statement, TypeStatement},
    variable::{DataFlowVariable, RealVar},
};

/// Derived type facts, per variable.
pub type TypeStatements = FxHashMap<RealVar, TypeStatement>;

/// The algebra over [Flow]s.
///
/// Every operation either returns a new flow or a set of derived statements; none of
/// them read anything but their arguments. Receiver-stack maintenance is the analyzer's
/// business: mutating entry points hand back the type statements they installed so the
/// caller can push refinements for receiver variables.
#[derive(Debug, Default)]
pub struct LogicSystem;

impl LogicSystem {
    pub fn new() -> Self {
        Self
    }

    /// A child flow sharing structure with `flow`, for divergent refinement.
    #[inline]
    pub fn fork(&self, flow: &Flow) -> Flow {
        flow.fork()
    }

    /// Intersect the states of all predecessor paths: a fact survives only if every
    /// input carries it. No input at all means "nothing is known yet".
    pub fn join(&self, flows: &[Flow]) -> Flow {
        match flows {
            [] => Flow::new(),
            [single] => single.fork(),
            [first, rest @ ..] => {
                let mut result = Flow::new();
                'vars: for (variable, statement) in first.approved_type_statements.iter() {
                    let mut merged = statement.clone();
                    for flow in rest {
                        let Some(other) = flow.approved_type_statements.get(variable) else {
                            continue 'vars;
                        };
                        merged.exact_type.retain_intersection(&other.exact_type);
                        merged.exact_not_type.retain_intersection(&other.exact_not_type);
                    }
                    if !merged.is_empty() {
                        result.approved_type_statements.insert(*variable, merged);
                    }
                }
                for (variable, implications) in first.logic_statements.iter() {
                    let mut kept = im::Vector::new();
                    for implication in implications.iter() {
                        let everywhere = rest.iter().all(|flow| {
                            flow.logic_statements
                                .get(variable)
                                .is_some_and(|list| list.iter().any(|i| i == implication))
                        });
                        if everywhere {
                            kept.push_back(implication.clone());
                        }
                    }
                    if !kept.is_empty() {
                        result.logic_statements.insert(*variable, kept);
                    }
                }
                for (alias, underlying) in first.direct_alias_map.iter() {
                    let everywhere = rest
                        .iter()
                        .all(|flow| flow.direct_alias_map.get(alias) == Some(underlying));
                    if everywhere {
                        self.add_local_variable_alias(&mut result, *alias, underlying.clone());
                    }
                }
                result
            }
        }
    }

    /// Combine the states of sequentially composed sub-evaluations: every fact of any
    /// input holds afterwards.
    pub fn union(&self, flows: &[Flow]) -> Flow {
        match flows {
            [] => Flow::new(),
            [single] => single.fork(),
            [first, rest @ ..] => {
                let mut result = first.fork();
                for flow in rest {
                    for (variable, statement) in flow.approved_type_statements.iter() {
                        match result.approved_type_statements.get_mut(variable) {
                            Some(existing) => existing.merge(statement),
                            None => {
                                result
                                    .approved_type_statements
                                    .insert(*variable, statement.clone());
                            }
                        }
                    }
                    for implications in flow.logic_statements.values() {
                        for implication in implications.iter() {
                            self.add_implication(&mut result, implication.clone());
                        }
                    }
                    for (alias, underlying) in flow.direct_alias_map.iter() {
                        if result.direct_alias_map.get(alias).is_none() {
                            self.add_local_variable_alias(&mut result, *alias, underlying.clone());
                        }
                    }
                }
                result
            }
        }
    }

    /// "At least one of the inputs holds": per variable, the intersection of the exact
    /// type sets across all inputs; a variable missing from any input contributes
    /// nothing.
    pub fn or_type_statements(&self, inputs: &[TypeStatements]) -> TypeStatements {
        let Some((first, rest)) = inputs.split_first() else {
            return TypeStatements::default();
        };
        let mut result = TypeStatements::default();
        'vars: for (variable, statement) in first {
            let mut merged = statement.clone();
            for other in rest {
                let Some(o) = other.get(variable) else {
                    continue 'vars;
                };
                merged.exact_type.retain_intersection(&o.exact_type);
                merged.exact_not_type.retain_intersection(&o.exact_not_type);
            }
            if !merged.is_empty() {
                result.insert(*variable, merged);
            }
        }
        result
    }

    /// Install an approved type fact. Returns whether the flow learned anything new.
    pub fn add_type_statement(&self, flow: &mut Flow, statement: TypeStatement) -> bool {
        if statement.is_empty() {
            return false;
        }
        match flow.approved_type_statements.get_mut(&statement.variable) {
            Some(existing) => {
                if statement.is_implied_by(existing) {
                    false
                } else {
                    existing.merge(&statement);
                    true
                }
            }
            None => {
                flow.approved_type_statements
                    .insert(statement.variable, statement);
                true
            }
        }
    }

    /// Store a pending implication, unless it is trivial (empty effect) or tautological
    /// (the effect is already an approved fact, or restates its own condition).
    pub fn add_implication(&self, flow: &mut Flow, implication: Implication) {
        match &implication.effect {
            Statement::Type(ts) => {
                if ts.is_empty() {
                    return;
                }
                if flow
                    .approved_type_statements
                    .get(&ts.variable)
                    .is_some_and(|known| ts.is_implied_by(known))
                {
                    return;
                }
            }
            Statement::Operation(os) => {
                if *os == implication.condition {
                    return;
                }
            }
        }
        let variable = implication.condition.variable;
        let mut list = flow
            .logic_statements
            .get(&variable)
            .cloned()
            .unwrap_or_default();
        if list.iter().any(|existing| *existing == implication) {
            return;
        }
        log::trace!(target: "dataflow", "new implication: {implication}");
        list.push_back(implication);
        flow.logic_statements.insert(variable, list);
    }

    /// The transitive closure walk shared by all approval entry points: collects every
    /// operation statement derivable from `root` and the union of type effects along the
    /// way.
    fn collect_approved(
        &self,
        flow: &Flow,
        root: OperationStatement,
    ) -> (FxHashSet<OperationStatement>, TypeStatements) {
        let mut queue: SmallVec<[OperationStatement; 4]> = smallvec![root];
        let mut seen = FxHashSet::default();
        let mut types = TypeStatements::default();
        while let Some(statement) = queue.pop() {
            if !seen.insert(statement) {
                continue;
            }
            for implication in flow.implications_of(statement.variable) {
                if implication.condition.operation != statement.operation {
                    continue;
                }
                match &implication.effect {
                    Statement::Operation(next) => queue.push(*next),
                    Statement::Type(ts) => match types.get_mut(&ts.variable) {
                        Some(existing) => existing.merge(ts),
                        None => {
                            types.insert(ts.variable, ts.clone());
                        }
                    },
                }
            }
        }
        (seen, types)
    }

    /// The type facts derivable from `statement` under the flow's implications, without
    /// touching the flow.
    pub fn approve_operation_statement(
        &self,
        flow: &Flow,
        statement: OperationStatement,
    ) -> TypeStatements {
        self.collect_approved(flow, statement).1
    }

    /// As [Self::approve_operation_statement], accumulating into `destination`.
    pub fn approve_statements_to(
        &self,
        destination: &mut TypeStatements,
        flow: &Flow,
        statement: OperationStatement,
    ) {
        let (_, types) = self.collect_approved(flow, statement);
        for (variable, statement) in types {
            match destination.get_mut(&variable) {
                Some(existing) => existing.merge(&statement),
                None => {
                    destination.insert(variable, statement);
                }
            }
        }
    }

    /// The canonical "we just learned `statement`" primitive: derive its transitive
    /// effects and install them.
    ///
    /// With `should_fork_flow` the input is left untouched and a forked child carries
    /// the new facts; otherwise the returned flow is meant to replace the input.
    /// `should_remove_synthetics` garbage-collects implications whose condition
    /// references a synthetic variable consumed by this approval, so the synthetic
    /// cannot leak past the statement that produced it.
    pub fn approve_statements_inside_flow(
        &self,
        flow: &Flow,
        statement: OperationStatement,
        should_fork_flow: bool,
        should_remove_synthetics: bool,
    ) -> (Flow, TypeStatements) {
        log::trace!(target: "dataflow", "approving {statement}");
        let mut result = if should_fork_flow {
            self.fork(flow)
        } else {
            flow.clone()
        };
        let (seen, types) = self.collect_approved(flow, statement);
        for derived in types.values() {
            self.add_type_statement(&mut result, derived.clone());
        }
        if should_remove_synthetics {
            for consumed in &seen {
                if consumed.variable.is_synthetic() {
                    result.logic_statements.remove(&consumed.variable);
                }
            }
        }
        (result, types)
    }

    /// Re-key every implication conditioned on `from` onto `to`, passing each through
    /// `transform` (return `None` to drop one). With `should_remove_original_statements`
    /// the originals are removed, otherwise they stay alongside the translations.
    pub fn translate_variable_from_condition_in_statements(
        &self,
        flow: &mut Flow,
        from: DataFlowVariable,
        to: DataFlowVariable,
        should_remove_original_statements: bool,
        transform: impl Fn(Implication) -> Option<Implication>,
    ) {
        let originals = if should_remove_original_statements {
            flow.logic_statements.remove(&from)
        } else {
            flow.logic_statements.get(&from).cloned()
        };
        let Some(originals) = originals else {
            return;
        };
        for original in originals {
            let rekeyed = Implication {
                condition: OperationStatement {
                    variable: to,
                    operation: original.condition.operation,
                },
                effect: original.effect,
            };
            if let Some(transformed) = transform(rekeyed) {
                self.add_implication(flow, transformed);
            }
        }
    }

    /// [Self::translate_variable_from_condition_in_statements] with the originals
    /// removed: `to` takes over the conditions entirely.
    pub fn replace_variable_from_condition_in_statements(
        &self,
        flow: &mut Flow,
        from: DataFlowVariable,
        to: DataFlowVariable,
        transform: impl Fn(Implication) -> Option<Implication>,
    ) {
        self.translate_variable_from_condition_in_statements(flow, from, to, true, transform)
    }

    /// Record "`alias` currently names the same value as `underlying`".
    pub fn add_local_variable_alias(
        &self,
        flow: &mut Flow,
        alias: RealVar,
        underlying: RealVariableAndType,
    ) {
        if alias == underlying.variable {
            return;
        }
        let mut list = flow
            .backwards_alias_map
            .get(&underlying.variable)
            .cloned()
            .unwrap_or_default();
        if !list.contains(&alias) {
            list.push_back(alias);
        }
        flow.backwards_alias_map.insert(underlying.variable, list);
        flow.direct_alias_map.insert(alias, underlying);
    }

    pub fn remove_local_variable_alias(&self, flow: &mut Flow, alias: RealVar) {
        let Some(underlying) = flow.direct_alias_map.remove(&alias) else {
            return;
        };
        if let Some(list) = flow.backwards_alias_map.get(&underlying.variable) {
            let mut list = list.clone();
            list.retain(|a| *a != alias);
            if list.is_empty() {
                flow.backwards_alias_map.remove(&underlying.variable);
            } else {
                flow.backwards_alias_map.insert(underlying.variable, list);
            }
        }
    }

    /// A new value was stored into `variable`: break its alias, orphan every alias that
    /// pointed at it, and erase all accumulated facts and implications about it.
    pub fn record_new_assignment(&self, flow: &mut Flow, variable: RealVar) {
        self.remove_local_variable_alias(flow, variable);
        if let Some(aliases) = flow.backwards_alias_map.remove(&variable) {
            for alias in aliases {
                flow.direct_alias_map.remove(&alias);
            }
        }
        flow.approved_type_statements.remove(&variable);
        self.remove_all_about_variable(flow, DataFlowVariable::Real(variable));
    }

    fn remove_all_about_variable(&self, flow: &mut Flow, variable: DataFlowVariable) {
        flow.logic_statements.remove(&variable);
        let keys: SmallVec<[DataFlowVariable; 8]> = flow.logic_statements.keys().copied().collect();
        for key in keys {
            let Some(list) = flow.logic_statements.get(&key) else {
                continue;
            };
            let filtered: im::Vector<Implication> = list
                .iter()
                .filter(|i| i.effect.variable() != variable)
                .cloned()
                .collect();
            if filtered.len() != list.len() {
                if filtered.is_empty() {
                    flow.logic_statements.remove(&key);
                } else {
                    flow.logic_statements.insert(key, filtered);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use velac_fir::types::Ty;

    use super::*;
    use crate::{
        statement::Operation,
        variable::{RealVar, SyntheticVar},
    };

    fn real(n: u32) -> RealVar {
        RealVar(n)
    }

    fn synthetic(n: u32) -> SyntheticVar {
        SyntheticVar(n)
    }

    fn flow_with(statements: &[(RealVar, Ty)]) -> Flow {
        let logic = LogicSystem::new();
        let mut flow = Flow::new();
        for (variable, ty) in statements {
            logic.add_type_statement(&mut flow, TypeStatement::has_type(*variable, ty.clone()));
        }
        flow
    }

    #[test]
    fn join_of_a_single_flow_is_the_flow() {
        let logic = LogicSystem::new();
        let mut flow = flow_with(&[(real(0), Ty::string()), (real(1), Ty::int())]);
        logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(synthetic(0), Operation::EqTrue),
                TypeStatement::has_type(real(0), Ty::string()),
            ),
        );
        assert_eq!(logic.join(std::slice::from_ref(&flow)), flow);
    }

    #[test]
    fn join_is_commutative_in_facts() {
        let logic = LogicSystem::new();
        let a = flow_with(&[(real(0), Ty::string()), (real(1), Ty::int())]);
        let b = flow_with(&[(real(0), Ty::string()), (real(2), Ty::boolean())]);
        let ab = logic.join(&[a.clone(), b.clone()]);
        let ba = logic.join(&[b, a]);
        assert_eq!(ab, ba);
        // Only the shared fact survives.
        assert_eq!(ab.approved_len(), 1);
        assert!(ab.approved_type_statement(real(0)).is_some());
    }

    #[test]
    fn join_intersects_exact_type_sets() {
        let logic = LogicSystem::new();
        let mut a = Flow::new();
        let mut ts = TypeStatement::has_type(real(0), Ty::string());
        ts.exact_type.insert(Ty::any());
        logic.add_type_statement(&mut a, ts);
        let b = flow_with(&[(real(0), Ty::any())]);
        let joined = logic.join(&[a, b]);
        let ts = joined.approved_type_statement(real(0)).unwrap();
        assert!(ts.exact_type.contains(&Ty::any()));
        assert!(!ts.exact_type.contains(&Ty::string()));
    }

    #[test]
    fn union_accumulates_facts_from_all_inputs() {
        let logic = LogicSystem::new();
        let a = flow_with(&[(real(0), Ty::string())]);
        let b = flow_with(&[(real(1), Ty::int())]);
        let unioned = logic.union(&[a, b]);
        assert!(unioned.approved_type_statement(real(0)).is_some());
        assert!(unioned.approved_type_statement(real(1)).is_some());
    }

    #[test]
    fn approval_walks_operation_chains_to_fixpoint() {
        let logic = LogicSystem::new();
        let mut flow = Flow::new();
        // s0 == true => s1 != null, s1 != null => r0 : String
        logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(synthetic(0), Operation::EqTrue),
                OperationStatement::new(synthetic(1), Operation::NotEqNull),
            ),
        );
        logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(synthetic(1), Operation::NotEqNull),
                TypeStatement::has_type(real(0), Ty::string()),
            ),
        );
        let derived = logic
            .approve_operation_statement(&flow, OperationStatement::new(synthetic(0), Operation::EqTrue));
        assert!(derived[&real(0)].exact_type.contains(&Ty::string()));

        // The wrong truth value derives nothing.
        let derived = logic
            .approve_operation_statement(&flow, OperationStatement::new(synthetic(0), Operation::EqFalse));
        assert!(derived.is_empty());
    }

    #[test]
    fn approval_inside_flow_installs_and_collects_synthetics() {
        let logic = LogicSystem::new();
        let mut flow = Flow::new();
        logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(synthetic(0), Operation::EqTrue),
                TypeStatement::has_type(real(0), Ty::string()),
            ),
        );
        let (approved, derived) = logic.approve_statements_inside_flow(
            &flow,
            OperationStatement::new(synthetic(0), Operation::EqTrue),
            true,
            true,
        );
        assert!(derived.contains_key(&real(0)));
        assert!(
            approved.approved_type_statement(real(0)).unwrap().exact_type.contains(&Ty::string())
        );
        // The consumed synthetic's implications are gone, and the original is untouched.
        assert_eq!(approved.implications_of(synthetic(0).into()).count(), 0);
        assert_eq!(flow.implications_of(synthetic(0).into()).count(), 1);
    }

    #[test]
    fn or_intersects_per_variable() {
        let logic = LogicSystem::new();
        let mut left = TypeStatements::default();
        let mut ts = TypeStatement::has_type(real(0), Ty::string());
        ts.exact_type.insert(Ty::any());
        left.insert(real(0), ts);
        left.insert(real(1), TypeStatement::has_type(real(1), Ty::int()));
        let mut right = TypeStatements::default();
        right.insert(real(0), TypeStatement::has_type(real(0), Ty::any()));

        let combined = logic.or_type_statements(&[left, right]);
        // r1 is known on only one side, so nothing is known about it afterwards.
        assert!(!combined.contains_key(&real(1)));
        let ts = &combined[&real(0)];
        assert!(ts.exact_type.contains(&Ty::any()));
        assert!(!ts.exact_type.contains(&Ty::string()));
    }

    #[test]
    fn translation_rekeys_conditions() {
        let logic = LogicSystem::new();
        let mut flow = Flow::new();
        logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(synthetic(0), Operation::EqTrue),
                TypeStatement::has_type(real(0), Ty::string()),
            ),
        );
        logic.replace_variable_from_condition_in_statements(
            &mut flow,
            synthetic(0).into(),
            synthetic(1).into(),
            |implication| Some(implication.invert_condition()),
        );
        assert_eq!(flow.implications_of(synthetic(0).into()).count(), 0);
        let translated: Vec<_> = flow.implications_of(synthetic(1).into()).collect();
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0].condition.operation, Operation::EqFalse);
    }

    #[test]
    fn reassignment_erases_facts_aliases_and_implications() {
        let logic = LogicSystem::new();
        let mut flow = flow_with(&[(real(0), Ty::string())]);
        logic.add_local_variable_alias(
            &mut flow,
            real(1),
            RealVariableAndType {
                variable: real(0),
                original_ty: Ty::nullable_any(),
            },
        );
        logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(synthetic(0), Operation::EqTrue),
                TypeStatement::has_type(real(0), Ty::int()),
            ),
        );
        logic.record_new_assignment(&mut flow, real(0));
        assert_eq!(flow.approved_type_statement(real(0)), None);
        assert_eq!(flow.direct_alias(real(1)), None);
        assert_eq!(flow.implications_of(synthetic(0).into()).count(), 0);
    }
}
