//! Interpretation of contract effects at call sites.
//!
//! Three entry points: [DataFlowAnalyzer::process_contracts] installs implications for
//! the conditional effects of a completed call; the two `get_type_using_*` queries
//! evaluate effects without touching any flow, producing refined return types for the
//! resolver.

use smallvec::SmallVec;
use velac_fir::{
    ExprId, ExprKind,
    contracts::{ConstantRef, ContractCondition, ParamRef},
    types::Ty,
};

use crate::{
    analyzer::DataFlowAnalyzer,
    flow::Flow,
    logic::TypeStatements,
    statement::{Implication, Operation, OperationStatement, Statement, TypeStatement},
    variable::{DataFlowVariable, Identifier},
};

fn resolve_param(receiver: Option<ExprId>, args: &[ExprId], param: ParamRef) -> Option<ExprId> {
    match param {
        ParamRef::Receiver => receiver,
        ParamRef::Param(index) => args.get(index).copied(),
    }
}

fn operation_for_constant(constant: ConstantRef) -> Option<Operation> {
    match constant {
        ConstantRef::Wildcard => None,
        ConstantRef::True => Some(Operation::EqTrue),
        ConstantRef::False => Some(Operation::EqFalse),
        ConstantRef::Null => Some(Operation::EqNull),
        ConstantRef::NotNull => Some(Operation::NotEqNull),
    }
}

impl<'a> DataFlowAnalyzer<'a> {
    /// Interpret the conditional effects of `call`'s contract into the flow: for each
    /// `returns(constant) implies condition` effect, the condition's statements about
    /// the supplied arguments become implications keyed on the call result's operation
    /// status — or unconditional facts for a wildcard (`returns()`).
    pub(crate) fn process_contracts(&mut self, flow: &mut Flow, call: ExprId) {
        let ExprKind::Call { callee, receiver, args } = &self.fir().expr(call).kind else {
            return;
        };
        let Some(description) = self.contract_provider().contract_description(*callee) else {
            return;
        };
        log::debug!(target: "dataflow", "processing contract of call {call}");
        let call_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(call));
        for (value, condition) in description.conditional_effects() {
            let Some(actual) = resolve_param(*receiver, args, condition.parameter()) else {
                continue;
            };
            let argument_var = self.storage.get_or_create_variable(self.fir(), flow, actual);
            let mut statements: SmallVec<[Statement; 3]> = SmallVec::new();
            match condition {
                ContractCondition::IsInstance { ty, negated, .. } => {
                    if let Some(real) = argument_var.as_real() {
                        statements.push(if *negated {
                            TypeStatement::has_not_type(real, ty.clone()).into()
                        } else {
                            TypeStatement::has_type(real, ty.clone()).into()
                        });
                        if !*negated && !ty.is_nullable() {
                            statements
                                .push(OperationStatement::new(argument_var, Operation::NotEqNull).into());
                        }
                    }
                }
                ContractCondition::IsNull { negated, .. } => {
                    let operation = if *negated {
                        Operation::NotEqNull
                    } else {
                        Operation::EqNull
                    };
                    statements.push(OperationStatement::new(argument_var, operation).into());
                    if *negated {
                        if let Some(real) = argument_var.as_real() {
                            statements.push(TypeStatement::has_type(real, Ty::any()).into());
                        }
                    }
                }
                ContractCondition::BooleanParameter { .. } => {
                    statements.push(OperationStatement::new(argument_var, Operation::EqTrue).into());
                }
            }
            match operation_for_constant(*value) {
                // `returns()`: the call completed, so the condition holds outright.
                None => {
                    for statement in statements {
                        match statement {
                            Statement::Type(ts) => self.add_type_statement_and_update(flow, ts),
                            Statement::Operation(os) => {
                                *flow = self.approve_and_update_receivers(flow, os, false, true);
                            }
                        }
                    }
                }
                Some(operation) => {
                    for statement in statements {
                        self.logic.add_implication(
                            flow,
                            Implication::new(
                                OperationStatement::new(call_var, operation),
                                statement,
                            ),
                        );
                    }
                }
            }
        }
    }

    /// Evaluate the conditional effects of `call` statically against the argument
    /// types: an effect whose condition is already guaranteed by the static types maps
    /// its constant onto the declared return type.
    pub fn get_type_using_conditional_contracts(&self, call: ExprId) -> Option<Vec<Ty>> {
        let ExprKind::Call { callee, receiver, args } = &self.fir().expr(call).kind else {
            return None;
        };
        let description = self.contract_provider().contract_description(*callee)?;
        let declared = &self.fir().expr(call).ty;
        let mut result = Vec::new();
        for (value, condition) in description.conditional_effects() {
            let Some(actual) = resolve_param(*receiver, args, condition.parameter()) else {
                continue;
            };
            let argument_ty = &self.fir().expr(actual).ty;
            let satisfied = match condition {
                ContractCondition::IsInstance { ty, negated: false, .. } => {
                    self.type_context().is_subtype_of(argument_ty, ty)
                }
                // Static disjointness is not provable here.
                ContractCondition::IsInstance { negated: true, .. } => false,
                ContractCondition::IsNull { negated: true, .. } => !argument_ty.is_nullable(),
                ContractCondition::IsNull { negated: false, .. } => argument_ty.is_nullable_nothing(),
                ContractCondition::BooleanParameter { .. } => false,
            };
            if !satisfied {
                continue;
            }
            match value {
                ConstantRef::NotNull => result.push(declared.make_non_null()),
                ConstantRef::True | ConstantRef::False => result.push(Ty::boolean()),
                ConstantRef::Null => result.push(Ty::nullable_nothing()),
                ConstantRef::Wildcard => {}
            }
        }
        if result.is_empty() { None } else { Some(result) }
    }

    /// Narrow the element type of a collection-returning call from its
    /// for-each-return-value contract: at every return of the lambda argument, approve
    /// the return having the effect's expected value, collect the resulting refinement
    /// of the lambda parameter, and intersect the collected element types across all
    /// exits.
    pub fn get_type_using_contracts_for_collections(&self, call: ExprId) -> Option<Vec<Ty>> {
        let ExprKind::Call { callee, receiver, args } = &self.fir().expr(call).kind else {
            return None;
        };
        let description = self.contract_provider().contract_description(*callee)?;
        let declared = &self.fir().expr(call).ty;
        let mut result = Vec::new();
        for (lambda_param, value) in description.for_each_return_value_effects() {
            let Some(lambda_expr) = resolve_param(*receiver, args, *lambda_param) else {
                continue;
            };
            let ExprKind::AnonymousFunction { parameter: Some(parameter), .. } =
                &self.fir().expr(lambda_expr).kind
            else {
                continue;
            };
            let Some(expected) = operation_for_constant(*value) else {
                continue;
            };
            let identifier = Identifier {
                symbol: *parameter,
                receiver: None,
                is_receiver: false,
            };
            let Some(parameter_var) = self.storage.real_for_identifier(&identifier) else {
                continue;
            };
            let mut per_exit: Vec<TypeStatements> = Vec::new();
            for ret in self.fir().return_expressions_of_anonymous_function(lambda_expr) {
                if self.fir().expr(ret).ty.is_nothing() {
                    continue;
                }
                let Some(node) = self.node_for_expr.get(&ret) else {
                    continue;
                };
                let Some(flow) = self.flow_on_nodes.get(node) else {
                    continue;
                };
                let Some(return_var) = self.storage.get(self.fir(), flow, ret) else {
                    continue;
                };
                let derived = self
                    .logic
                    .approve_operation_statement(flow, OperationStatement::new(return_var, expected));
                let mut statement = flow
                    .approved_type_statement(parameter_var)
                    .cloned()
                    .unwrap_or_else(|| TypeStatement::new(parameter_var));
                if let Some(extra) = derived.get(&parameter_var) {
                    statement.merge(extra);
                }
                let mut map = TypeStatements::default();
                if !statement.is_empty() {
                    map.insert(parameter_var, statement);
                }
                per_exit.push(map);
            }
            if per_exit.is_empty() {
                continue;
            }
            let combined = self.logic.or_type_statements(&per_exit);
            let Some(statement) = combined.get(&parameter_var) else {
                continue;
            };
            // The call returns the iterable narrowed to the elements the effect kept.
            if declared.args.len() != 1 {
                continue;
            }
            let mut parts: Vec<Ty> = vec![declared.args[0].clone()];
            parts.extend(statement.exact_type.iter().cloned());
            let element = self.intersector().intersect(&parts);
            let mut refined = declared.clone();
            refined.args[0] = element;
            log::debug!(target: "dataflow", "collection contract refines {call} to {refined}");
            result.push(refined);
        }
        if result.is_empty() { None } else { Some(result) }
    }
}
