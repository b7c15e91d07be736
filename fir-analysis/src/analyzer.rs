#[cfg(test)]
mod tests;

use miette::Diagnostic;
use velac_fir::{
    ExprId, ExprKind, Fir, FirOperation, Function, FxHashMap, ImplicitReceiverStack,
    cfg::{ControlFlowGraph, NodeId, NodeKind, builder::GraphBuilder},
    contracts::ContractProvider,
    types::{Ty, TypeContext, TypeIntersector},
};

use crate::{
    config::DataFlowConfig,
    flow::{Flow, RealVariableAndType},
    logic::{LogicSystem, TypeStatements},
    statement::{Implication, Operation, OperationStatement, TypeStatement},
    storage::VariableStorage,
    variable::DataFlowVariable,
};

/// Internal fatal conditions of the analyzer. Everything else is a silent skip: a
/// refinement the engine cannot derive is simply not produced.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum DataFlowError {
    #[error("unsupported operation `{operation:?}` in type operator expression")]
    #[diagnostic(code(velac::dataflow::unsupported_type_operation))]
    UnsupportedTypeOperation { operation: FirOperation },
    #[error("unsupported operation `{operation:?}` in equality operator expression")]
    #[diagnostic(code(velac::dataflow::unsupported_equality_operation))]
    UnsupportedEqualityOperation { operation: FirOperation },
}

/// The dataflow facts of one analyzed declaration, snapshotted for downstream passes.
pub struct DataFlowInfo {
    pub variable_storage: VariableStorage,
    pub flow_on_nodes: FxHashMap<NodeId, Flow>,
}

/// The completed graph of a top-level declaration together with its dataflow snapshot.
pub struct ControlFlowGraphReference {
    pub graph: ControlFlowGraph,
    pub data_flow_info: DataFlowInfo,
}

/// The dataflow analyzer for smartcasts.
///
/// The resolver drives it with one `enter_*`/`exit_*` call per CFG-relevant syntactic
/// event; each handler asks the [GraphBuilder] for the node(s) just produced, joins the
/// predecessor flows into the node's flow, applies the event's refinement rules, and
/// stores the flow for later queries. [Self::get_type_using_smartcast_info] is the query
/// the resolver asks at every qualified-access use site.
///
/// The analyzer is single-threaded and synchronous; all state lives for one top-level
/// declaration and is reset when the graph builder reports the traversal is back at the
/// top level.
pub struct DataFlowAnalyzer<'a> {
    fir: &'a Fir,
    type_context: &'a dyn TypeContext,
    intersector: &'a dyn TypeIntersector,
    contract_provider: &'a dyn ContractProvider,
    config: DataFlowConfig,
    pub(crate) graph_builder: GraphBuilder,
    pub(crate) storage: VariableStorage,
    pub(crate) logic: LogicSystem,
    pub(crate) flow_on_nodes: FxHashMap<NodeId, Flow>,
    /// Condition variable of each `when` branch, keyed by the condition exit node.
    when_condition_variables: FxHashMap<NodeId, DataFlowVariable>,
    /// The primary node of each visited expression, for flow lookups by expression.
    pub(crate) node_for_expr: FxHashMap<ExprId, NodeId>,
    receiver_stack: ImplicitReceiverStack,
    ignore_function_calls: bool,
}

impl<'a> DataFlowAnalyzer<'a> {
    pub fn new(
        fir: &'a Fir,
        type_context: &'a dyn TypeContext,
        intersector: &'a dyn TypeIntersector,
        contract_provider: &'a dyn ContractProvider,
        config: DataFlowConfig,
    ) -> Self {
        Self {
            fir,
            type_context,
            intersector,
            contract_provider,
            config,
            graph_builder: GraphBuilder::new(),
            storage: VariableStorage::new(),
            logic: LogicSystem::new(),
            flow_on_nodes: FxHashMap::default(),
            when_condition_variables: FxHashMap::default(),
            node_for_expr: FxHashMap::default(),
            receiver_stack: ImplicitReceiverStack::new(),
            ignore_function_calls: false,
        }
    }

    #[inline]
    pub fn fir(&self) -> &'a Fir {
        self.fir
    }

    #[inline]
    pub(crate) fn type_context(&self) -> &'a dyn TypeContext {
        self.type_context
    }

    #[inline]
    pub(crate) fn intersector(&self) -> &'a dyn TypeIntersector {
        self.intersector
    }

    #[inline]
    pub(crate) fn contract_provider(&self) -> &'a dyn ContractProvider {
        self.contract_provider
    }

    /// The resolver's implicit receiver stack, with refinements applied.
    #[inline]
    pub fn receiver_stack(&self) -> &ImplicitReceiverStack {
        &self.receiver_stack
    }

    pub(crate) fn receiver_stack_mut(&mut self) -> &mut ImplicitReceiverStack {
        &mut self.receiver_stack
    }

    /// Run `f` with call processing suppressed. Used while analyzing overload
    /// candidates, whose calls must not contribute contract facts.
    pub fn with_ignore_function_calls<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = core::mem::replace(&mut self.ignore_function_calls, true);
        let result = f(self);
        self.ignore_function_calls = previous;
        result
    }

    // Flow bookkeeping

    pub(crate) fn flow_of(&self, node: NodeId) -> Flow {
        self.flow_on_nodes.get(&node).cloned().unwrap_or_default()
    }

    pub(crate) fn store_flow(&mut self, node: NodeId, flow: Flow) {
        self.flow_on_nodes.insert(node, flow);
    }

    /// The universal prelude of every handler: join the incoming flows of `node` and
    /// store the result as the node's flow.
    ///
    /// A dead node joins over all non-back predecessors; a live node joins over the
    /// predecessors whose edge participates in dataflow.
    fn merge_incoming_flow(&mut self, node: NodeId, update_receivers: bool, should_fork: bool) -> Flow {
        let graph = self.graph_builder.graph();
        let is_dead = graph.node(node).is_dead;
        let mut flows = Vec::new();
        for edge in graph.node(node).predecessors() {
            let usable = if is_dead {
                !edge.kind.is_back()
            } else {
                edge.kind.used_in_dfa()
            };
            if usable {
                if let Some(flow) = self.flow_on_nodes.get(&edge.node) {
                    flows.push(flow.clone());
                }
            }
        }
        log::trace!(target: "dataflow", "merging {} predecessor flows into {node}", flows.len());
        let mut flow = self.logic.join(&flows);
        if update_receivers {
            self.update_all_receivers(&flow);
        }
        if should_fork {
            flow = self.logic.fork(&flow);
        }
        if !is_dead || self.config.retains_dead_flows() {
            self.store_flow(node, flow.clone());
        }
        flow
    }

    /// Approve `statement` inside `flow` and push any refinement derived for an
    /// implicit-receiver variable into the receiver stack.
    pub(crate) fn approve_and_update_receivers(
        &mut self,
        flow: &Flow,
        statement: OperationStatement,
        should_fork_flow: bool,
        should_remove_synthetics: bool,
    ) -> Flow {
        let (result, derived) = self.logic.approve_statements_inside_flow(
            flow,
            statement,
            should_fork_flow,
            should_remove_synthetics,
        );
        self.update_receivers_for(&result, &derived);
        result
    }

    pub(crate) fn add_type_statement_and_update(&mut self, flow: &mut Flow, statement: TypeStatement) {
        let variable = statement.variable;
        if self.logic.add_type_statement(flow, statement) && self.storage.is_receiver(variable) {
            self.process_updated_receiver_variable(flow, variable);
        }
    }

    fn update_receivers_for(&mut self, flow: &Flow, derived: &TypeStatements) {
        for variable in derived.keys() {
            if self.storage.is_receiver(*variable) {
                self.process_updated_receiver_variable(flow, *variable);
            }
        }
    }

    // Functions

    pub fn enter_function(&mut self, function: &Function) {
        log::debug!(target: "dataflow", "entering function {}", self.fir.symbol(function.symbol).name);
        let node = self.graph_builder.enter_function(function);
        self.merge_incoming_flow(node, false, false);
        if let Some(receiver) = function.receiver {
            let ty = self.fir.symbol(receiver).ty.clone();
            self.receiver_stack.push(receiver, ty);
        }
    }

    /// Finish the function. At the top level the analyzer context is reset and the
    /// completed graph is handed back together with the dataflow snapshot.
    pub fn exit_function(&mut self, function: &Function) -> Option<ControlFlowGraphReference> {
        let (exit, graph) = self.graph_builder.exit_function();
        self.merge_incoming_flow(exit, false, false);
        if let Some(receiver) = function.receiver {
            let popped = self.receiver_stack.pop();
            debug_assert_eq!(popped, Some(receiver));
        }
        // Value parameters leave scope with the function.
        for parameter in &function.parameters {
            self.storage.remove_real(*parameter);
        }
        let graph = graph?;
        log::debug!(target: "dataflow", "function {} analyzed, {} nodes", self.fir.symbol(function.symbol).name, graph.len());
        let data_flow_info = DataFlowInfo {
            variable_storage: self.storage.clone(),
            flow_on_nodes: core::mem::take(&mut self.flow_on_nodes),
        };
        self.reset();
        Some(ControlFlowGraphReference { graph, data_flow_info })
    }

    pub fn enter_anonymous_function(&mut self, lambda: ExprId) {
        let node = self.graph_builder.enter_anonymous_function(lambda);
        self.merge_incoming_flow(node, false, true);
    }

    pub fn exit_anonymous_function(&mut self, lambda: ExprId) {
        let node = self.graph_builder.exit_anonymous_function(lambda);
        self.merge_incoming_flow(node, false, false);
    }

    /// Reset all per-declaration state. Called when the graph builder reports the
    /// traversal has returned to the top level.
    fn reset(&mut self) {
        self.storage.clear();
        self.flow_on_nodes.clear();
        self.when_condition_variables.clear();
        self.node_for_expr.clear();
    }

    // Plain expressions

    pub fn exit_literal(&mut self, expr: ExprId) {
        let node = self.graph_builder.exit_literal(expr);
        self.node_for_expr.insert(expr, node);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn exit_qualified_access(&mut self, expr: ExprId) {
        let node = self.graph_builder.exit_qualified_access(expr);
        self.node_for_expr.insert(expr, node);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn enter_block(&mut self, expr: ExprId) {
        let node = self.graph_builder.enter_block(expr);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn exit_block(&mut self, expr: ExprId) {
        let node = self.graph_builder.exit_block(expr);
        self.node_for_expr.insert(expr, node);
        self.merge_incoming_flow(node, false, false);
    }

    // Type tests and casts

    pub fn exit_type_operator(&mut self, expr: ExprId) -> Result<(), DataFlowError> {
        let ExprKind::TypeOperator { operation, operand, ty } = &self.fir.expr(expr).kind else {
            unreachable!("exit_type_operator on a non-type-operator expression");
        };
        let (operation, operand, ty) = (*operation, *operand, ty.clone());
        match operation {
            FirOperation::Is | FirOperation::NotIs | FirOperation::As | FirOperation::SafeAs => {}
            _ => return Err(DataFlowError::UnsupportedTypeOperation { operation }),
        }
        let node = self.graph_builder.exit_type_operator(expr);
        self.node_for_expr.insert(expr, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let operand_var = self.storage.get_or_create_variable(self.fir, &flow, operand);

        match operation {
            FirOperation::Is | FirOperation::NotIs => {
                let expr_var =
                    DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
                // The truth value under which the operand *is* of the tested type.
                let positive = Operation::from_boolean(operation == FirOperation::Is);
                if let Some(real) = operand_var.as_real() {
                    self.logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(expr_var, positive),
                            TypeStatement::has_type(real, ty.clone()),
                        ),
                    );
                    self.logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(expr_var, positive.invert()),
                            TypeStatement::has_not_type(real, ty.clone()),
                        ),
                    );
                    if !ty.is_nullable() {
                        self.logic.add_implication(
                            &mut flow,
                            Implication::new(
                                OperationStatement::new(expr_var, positive),
                                OperationStatement::new(operand_var, Operation::NotEqNull),
                            ),
                        );
                        self.logic.add_implication(
                            &mut flow,
                            Implication::new(
                                OperationStatement::new(expr_var, positive),
                                TypeStatement::has_type(real, Ty::any()),
                            ),
                        );
                    }
                    if operation == FirOperation::NotIs && ty.is_nullable_nothing() {
                        self.add_type_statement_and_update(
                            &mut flow,
                            TypeStatement::has_type(real, Ty::any()),
                        );
                    }
                }
            }
            FirOperation::As => {
                if let Some(real) = operand_var.as_real() {
                    self.add_type_statement_and_update(
                        &mut flow,
                        TypeStatement::has_type(real, ty.clone()),
                    );
                }
                if !ty.is_nullable() {
                    flow = self.approve_and_update_receivers(
                        &flow,
                        OperationStatement::new(operand_var, Operation::NotEqNull),
                        false,
                        true,
                    );
                }
            }
            FirOperation::SafeAs => {
                let expr_var =
                    DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
                if let Some(real) = operand_var.as_real() {
                    self.logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(expr_var, Operation::NotEqNull),
                            TypeStatement::has_type(real, ty.clone()),
                        ),
                    );
                    self.logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(expr_var, Operation::EqNull),
                            TypeStatement::has_not_type(real, ty.clone()),
                        ),
                    );
                    if !ty.is_nullable() {
                        self.logic.add_implication(
                            &mut flow,
                            Implication::new(
                                OperationStatement::new(expr_var, Operation::NotEqNull),
                                OperationStatement::new(operand_var, Operation::NotEqNull),
                            ),
                        );
                    }
                }
            }
            _ => unreachable!(),
        }
        self.store_flow(node, flow);
        Ok(())
    }

    // Equality

    pub fn exit_equality_operator(&mut self, expr: ExprId) -> Result<(), DataFlowError> {
        let ExprKind::Equality { operation, lhs, rhs } = &self.fir.expr(expr).kind else {
            unreachable!("exit_equality_operator on a non-equality expression");
        };
        let (operation, lhs, rhs) = (*operation, *lhs, *rhs);
        let is_eq = match operation {
            FirOperation::Eq | FirOperation::Identity => true,
            FirOperation::NotEq | FirOperation::NotIdentity => false,
            _ => return Err(DataFlowError::UnsupportedEqualityOperation { operation }),
        };
        let node = self.graph_builder.exit_equality_operator(expr);
        self.node_for_expr.insert(expr, node);
        let mut flow = self.merge_incoming_flow(node, false, false);

        let lhs_const = self.constant_of(lhs);
        let rhs_const = self.constant_of(rhs);
        match (lhs_const, rhs_const) {
            (Some(_), Some(_)) => {}
            (Some(velac_fir::ConstKind::Null), None) => {
                self.process_eq_null(&mut flow, expr, rhs, is_eq);
            }
            (None, Some(velac_fir::ConstKind::Null)) => {
                self.process_eq_null(&mut flow, expr, lhs, is_eq);
            }
            (Some(velac_fir::ConstKind::Boolean(value)), None) => {
                self.process_eq_boolean_const(&mut flow, expr, rhs, value, is_eq);
            }
            (None, Some(velac_fir::ConstKind::Boolean(value))) => {
                self.process_eq_boolean_const(&mut flow, expr, lhs, value, is_eq);
            }
            (Some(_), None) | (None, Some(_)) => {}
            (None, None) => self.process_eq(&mut flow, expr, lhs, rhs, operation),
        }
        self.store_flow(node, flow);
        Ok(())
    }

    fn constant_of(&self, expr: ExprId) -> Option<velac_fir::ConstKind> {
        match &self.fir.expr(expr).kind {
            ExprKind::Literal(kind) => Some(kind.clone()),
            _ => None,
        }
    }

    fn process_eq_null(&mut self, flow: &mut Flow, expr: ExprId, operand: ExprId, is_eq: bool) {
        let expr_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
        let operand_var = self.storage.get_or_create_variable(self.fir, flow, operand);
        // The truth value under which the operand is null.
        let null_when = Operation::from_boolean(is_eq);
        self.logic.add_implication(
            flow,
            Implication::new(
                OperationStatement::new(expr_var, null_when),
                OperationStatement::new(operand_var, Operation::EqNull),
            ),
        );
        self.logic.add_implication(
            flow,
            Implication::new(
                OperationStatement::new(expr_var, null_when.invert()),
                OperationStatement::new(operand_var, Operation::NotEqNull),
            ),
        );
        if let Some(real) = operand_var.as_real() {
            self.logic.add_implication(
                flow,
                Implication::new(
                    OperationStatement::new(expr_var, null_when.invert()),
                    TypeStatement::has_type(real, Ty::any()),
                ),
            );
        }
    }

    fn process_eq_boolean_const(
        &mut self,
        flow: &mut Flow,
        expr: ExprId,
        operand: ExprId,
        value: bool,
        is_eq: bool,
    ) {
        let expr_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
        let operand_var = self.storage.get_or_create_variable(self.fir, flow, operand);
        let should_invert = is_eq != value;
        self.logic.translate_variable_from_condition_in_statements(
            flow,
            operand_var,
            expr_var,
            false,
            |implication| {
                // Only boolean conditions transfer to the comparison's result.
                if !implication.condition.operation.is_boolean() {
                    return None;
                }
                Some(if should_invert {
                    implication.invert_condition()
                } else {
                    implication
                })
            },
        );
    }

    fn process_eq(
        &mut self,
        flow: &mut Flow,
        expr: ExprId,
        lhs: ExprId,
        rhs: ExprId,
        operation: FirOperation,
    ) {
        // Only reference identity of two known non-null values pins the operands' types
        // to each other; `==` may be an arbitrary `equals` implementation.
        if !matches!(operation, FirOperation::Identity | FirOperation::NotIdentity) {
            return;
        }
        let lhs_ty = self.fir.expr(lhs).ty.clone();
        let rhs_ty = self.fir.expr(rhs).ty.clone();
        if lhs_ty.is_nullable() || rhs_ty.is_nullable() {
            return;
        }
        let expr_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
        let positive = Operation::from_boolean(operation == FirOperation::Identity);
        let lhs_var = self.storage.get_or_create_variable(self.fir, flow, lhs);
        let rhs_var = self.storage.get_or_create_variable(self.fir, flow, rhs);
        if let Some(real) = lhs_var.as_real() {
            self.logic.add_implication(
                flow,
                Implication::new(
                    OperationStatement::new(expr_var, positive),
                    TypeStatement::has_type(real, rhs_ty),
                ),
            );
        }
        if let Some(real) = rhs_var.as_real() {
            self.logic.add_implication(
                flow,
                Implication::new(
                    OperationStatement::new(expr_var, positive),
                    TypeStatement::has_type(real, lhs_ty),
                ),
            );
        }
    }

    // `x!!`

    pub fn exit_check_not_null(&mut self, expr: ExprId) {
        let ExprKind::CheckNotNull { operand } = &self.fir.expr(expr).kind else {
            unreachable!("exit_check_not_null on a non-check expression");
        };
        let operand = *operand;
        let node = self.graph_builder.exit_check_not_null(expr);
        self.node_for_expr.insert(expr, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let operand_var = self.storage.get_or_create_variable(self.fir, &flow, operand);
        if let Some(real) = operand_var.as_real() {
            self.add_type_statement_and_update(&mut flow, TypeStatement::has_type(real, Ty::any()));
        }
        // Driving the null-check through the pending implications also derives the
        // facts of any enclosing safe-call chain.
        flow = self.approve_and_update_receivers(
            &flow,
            OperationStatement::new(operand_var, Operation::NotEqNull),
            false,
            true,
        );
        self.store_flow(node, flow);
    }

    // Safe calls

    pub fn enter_safe_call(&mut self, expr: ExprId) {
        let ExprKind::SafeCall { receiver, .. } = &self.fir.expr(expr).kind else {
            unreachable!("enter_safe_call on a non-safe-call expression");
        };
        let receiver = *receiver;
        let node = self.graph_builder.enter_safe_call(expr);
        // The selector only runs when the receiver was not null.
        let mut flow = self.merge_incoming_flow(node, false, true);
        let receiver_var = self.storage.get_or_create_variable(self.fir, &flow, receiver);
        if let Some(real) = receiver_var.as_real() {
            self.add_type_statement_and_update(&mut flow, TypeStatement::has_type(real, Ty::any()));
        }
        flow = self.approve_and_update_receivers(
            &flow,
            OperationStatement::new(receiver_var, Operation::NotEqNull),
            false,
            false,
        );
        self.store_flow(node, flow);
    }

    pub fn exit_safe_call(&mut self, expr: ExprId) {
        let ExprKind::SafeCall { receiver, .. } = &self.fir.expr(expr).kind else {
            unreachable!("exit_safe_call on a non-safe-call expression");
        };
        let receiver = *receiver;
        let node = self.graph_builder.exit_safe_call(expr);
        self.node_for_expr.insert(expr, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let expr_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
        let receiver_var = self.storage.get_or_create_variable(self.fir, &flow, receiver);
        // A non-null result can only have come from the branch where the receiver chain
        // was non-null.
        self.logic.add_implication(
            &mut flow,
            Implication::new(
                OperationStatement::new(expr_var, Operation::NotEqNull),
                OperationStatement::new(receiver_var, Operation::NotEqNull),
            ),
        );
        if let Some(real) = receiver_var.as_real() {
            self.logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(expr_var, Operation::NotEqNull),
                    TypeStatement::has_type(real, Ty::any()),
                ),
            );
        }
        self.store_flow(node, flow);
    }

    // `when`

    pub fn enter_when(&mut self, expr: ExprId) {
        let node = self.graph_builder.enter_when(expr);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn enter_when_branch_condition(&mut self, condition: ExprId) {
        let node = self.graph_builder.enter_when_branch_condition(condition);
        let mut flow = self.merge_incoming_flow(node, true, false);
        // Negative information from the previous branch's condition accumulates here.
        if let Some(variable) = self.previous_condition_variable(node) {
            flow = self.approve_and_update_receivers(
                &flow,
                OperationStatement::new(variable, Operation::EqFalse),
                true,
                true,
            );
        }
        self.store_flow(node, flow);
    }

    /// If the sole predecessor of `node` is a when-branch condition exit, take its
    /// condition variable.
    fn previous_condition_variable(&mut self, node: NodeId) -> Option<DataFlowVariable> {
        let graph = self.graph_builder.graph();
        let edges = graph.node(node).predecessors();
        let [edge] = edges else {
            return None;
        };
        if graph.node(edge.node).kind != NodeKind::WhenBranchConditionExit {
            return None;
        }
        self.when_condition_variables.remove(&edge.node)
    }

    pub fn exit_when_branch_condition(&mut self, condition: ExprId, body: ExprId) {
        let (cond_exit, result_enter) = self.graph_builder.exit_when_branch_condition(condition, body);
        let flow = self.merge_incoming_flow(cond_exit, false, false);
        let variable = self.storage.get_or_create_variable(self.fir, &flow, condition);
        self.when_condition_variables.insert(cond_exit, variable);
        // The branch body starts under the condition's truth.
        let branch_flow = self.approve_and_update_receivers(
            &flow,
            OperationStatement::new(variable, Operation::EqTrue),
            true,
            false,
        );
        self.store_flow(result_enter, branch_flow);
    }

    pub fn exit_when_branch_result(&mut self, body: ExprId) {
        let node = self.graph_builder.exit_when_branch_result(body);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn enter_when_else_branch(&mut self, body: ExprId) {
        let node = self.graph_builder.enter_when_else_branch(body);
        let mut flow = self.merge_incoming_flow(node, true, false);
        if let Some(variable) = self.previous_condition_variable(node) {
            flow = self.approve_and_update_receivers(
                &flow,
                OperationStatement::new(variable, Operation::EqFalse),
                true,
                true,
            );
        }
        self.store_flow(node, flow);
    }

    pub fn exit_when(&mut self, expr: ExprId) {
        let (exit, synthetic_else) = self.graph_builder.exit_when(expr);
        self.node_for_expr.insert(expr, exit);
        if let Some(synthetic_else) = synthetic_else {
            let mut flow = self.merge_incoming_flow(synthetic_else, false, false);
            if let Some(variable) = self.previous_condition_variable(synthetic_else) {
                flow = self.approve_and_update_receivers(
                    &flow,
                    OperationStatement::new(variable, Operation::EqFalse),
                    true,
                    true,
                );
            }
            self.store_flow(synthetic_else, flow);
        }
        self.merge_incoming_flow(exit, true, false);
    }

    // Boolean operators

    pub fn enter_binary_logic(&mut self, expr: ExprId) {
        let node = self.graph_builder.enter_binary_logic(expr);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn exit_left_binary_logic_argument(&mut self, expr: ExprId) {
        let ExprKind::BooleanOperator { is_and, left, .. } = &self.fir.expr(expr).kind else {
            unreachable!("exit_left_binary_logic_argument on a non-boolean-operator expression");
        };
        let (is_and, left) = (*is_and, *left);
        let (left_exit, right_enter) = self.graph_builder.exit_left_binary_logic_argument(expr);
        let flow = self.merge_incoming_flow(left_exit, false, true);
        let left_var = self.storage.get_or_create_variable(self.fir, &flow, left);
        // The right operand only runs when the left did not short-circuit.
        let right_flow = self.approve_and_update_receivers(
            &flow,
            OperationStatement::new(left_var, Operation::from_boolean(is_and)),
            true,
            false,
        );
        self.store_flow(right_enter, right_flow);
    }

    pub fn exit_binary_logic(&mut self, expr: ExprId) {
        let ExprKind::BooleanOperator { is_and, left, right } = &self.fir.expr(expr).kind else {
            unreachable!("exit_binary_logic on a non-boolean-operator expression");
        };
        let (is_and, left, right) = (*is_and, *left, *right);
        let (exit, left_exit, right_last) = self.graph_builder.exit_binary_logic(expr);
        self.node_for_expr.insert(expr, exit);
        let flow_left = self.flow_of(left_exit);
        let flow_right = self.flow_of(right_last);
        let mut flow = self.merge_incoming_flow(exit, false, false);

        let (left_edge_dead, right_edge_dead) = {
            let graph = self.graph_builder.graph();
            let edges = graph.node(exit).predecessors();
            let dead_of = |target: NodeId| {
                edges
                    .iter()
                    .find(|e| e.node == target)
                    .map(|e| e.kind.is_dead())
                    .unwrap_or(false)
            };
            (dead_of(left_exit), dead_of(right_last))
        };

        // Truth value of the whole operator when both operands were evaluated.
        let both_evaluated = Operation::from_boolean(is_and);
        let only_left_evaluated = both_evaluated.invert();

        if !left_edge_dead && right_edge_dead {
            // The right operand never completes, so reaching this point means the left
            // operand short-circuited.
            let left_var = self.storage.get_or_create_variable(self.fir, &flow, left);
            flow = self.approve_and_update_receivers(
                &flow,
                OperationStatement::new(left_var, only_left_evaluated),
                false,
                true,
            );
        } else {
            let left_var = self.storage.get_or_create_variable(self.fir, &flow, left);
            let right_var = self.storage.get_or_create_variable(self.fir, &flow, right);
            let operator_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));

            self.logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(operator_var, both_evaluated),
                    OperationStatement::new(left_var, both_evaluated),
                ),
            );
            self.logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(operator_var, both_evaluated),
                    OperationStatement::new(right_var, both_evaluated),
                ),
            );

            // Operator == bothEvaluated: both operands held, so everything either one
            // implies holds, as do the facts the right operand's evaluation approved
            // beyond the merged state.
            let mut approved_if_true = TypeStatements::default();
            self.logic.approve_statements_to(
                &mut approved_if_true,
                &flow_right,
                OperationStatement::new(left_var, both_evaluated),
            );
            self.logic.approve_statements_to(
                &mut approved_if_true,
                &flow_right,
                OperationStatement::new(right_var, both_evaluated),
            );
            for (variable, statement) in flow_right.approved_type_statements.iter() {
                let mut remainder = statement.clone();
                if let Some(base) = flow.approved_type_statement(*variable) {
                    remainder.exact_type.retain_difference(&base.exact_type);
                    remainder.exact_not_type.retain_difference(&base.exact_not_type);
                }
                if remainder.is_empty() {
                    continue;
                }
                match approved_if_true.get_mut(variable) {
                    Some(existing) => existing.merge(&remainder),
                    None => {
                        approved_if_true.insert(*variable, remainder);
                    }
                }
            }
            for statement in approved_if_true.into_values() {
                self.logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(operator_var, both_evaluated),
                        statement,
                    ),
                );
            }

            // Operator == onlyLeftEvaluated: one of the operands short-circuited, so
            // only facts derivable on both alternatives survive.
            let left_false = self.logic.approve_operation_statement(
                &flow_left,
                OperationStatement::new(left_var, only_left_evaluated),
            );
            let right_false = self.logic.approve_operation_statement(
                &flow_right,
                OperationStatement::new(right_var, only_left_evaluated),
            );
            let either = self.logic.or_type_statements(&[left_false, right_false]);
            for statement in either.into_values() {
                self.logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(operator_var, only_left_evaluated),
                        statement,
                    ),
                );
            }
        }
        self.update_all_receivers(&flow);
        self.store_flow(exit, flow);
    }

    // `!x`

    pub fn exit_boolean_not(&mut self, expr: ExprId) {
        let ExprKind::BooleanNot { operand } = &self.fir.expr(expr).kind else {
            unreachable!("exit_boolean_not on a non-negation expression");
        };
        let operand = *operand;
        let node = self.graph_builder.exit_boolean_not(expr);
        self.node_for_expr.insert(expr, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let operand_var = self.storage.get_or_create_variable(self.fir, &flow, operand);
        let expr_var = DataFlowVariable::Synthetic(self.storage.create_synthetic(expr));
        self.logic.replace_variable_from_condition_in_statements(
            &mut flow,
            operand_var,
            expr_var,
            |implication| Some(implication.invert_condition()),
        );
        self.store_flow(node, flow);
    }

    // Loops

    pub fn enter_while_loop(&mut self, expr: ExprId) {
        let ExprKind::While { condition, .. } = &self.fir.expr(expr).kind else {
            unreachable!("enter_while_loop on a non-while expression");
        };
        let condition = *condition;
        let (loop_enter, cond_enter) = self.graph_builder.enter_while_loop(expr, condition);
        self.merge_incoming_flow(loop_enter, false, false);
        self.merge_incoming_flow(cond_enter, true, false);
    }

    pub fn exit_while_loop_condition(&mut self, expr: ExprId) {
        let ExprKind::While { condition, body } = &self.fir.expr(expr).kind else {
            unreachable!("exit_while_loop_condition on a non-while expression");
        };
        let (condition, body) = (*condition, *body);
        let (cond_exit, body_enter) = self.graph_builder.exit_while_loop_condition(condition, body);
        let flow = self.merge_incoming_flow(cond_exit, false, false);
        let variable = self.storage.get_or_create_variable(self.fir, &flow, condition);
        let body_flow = self.approve_and_update_receivers(
            &flow,
            OperationStatement::new(variable, Operation::EqTrue),
            true,
            false,
        );
        self.store_flow(body_enter, body_flow);
    }

    pub fn exit_while_loop(&mut self, expr: ExprId) {
        let (body_exit, exit) = self.graph_builder.exit_while_loop(expr);
        self.merge_incoming_flow(body_exit, false, false);
        self.merge_incoming_flow(exit, false, false);
        self.exit_common_loop(exit);
    }

    pub fn enter_do_while_loop(&mut self, expr: ExprId) {
        let ExprKind::DoWhile { body, .. } = &self.fir.expr(expr).kind else {
            unreachable!("enter_do_while_loop on a non-do-while expression");
        };
        let body = *body;
        let (loop_enter, body_enter) = self.graph_builder.enter_do_while_loop(expr, body);
        self.merge_incoming_flow(loop_enter, false, false);
        self.merge_incoming_flow(body_enter, true, false);
    }

    pub fn enter_do_while_loop_condition(&mut self, expr: ExprId) {
        let ExprKind::DoWhile { condition, .. } = &self.fir.expr(expr).kind else {
            unreachable!("enter_do_while_loop_condition on a non-do-while expression");
        };
        let condition = *condition;
        let (body_exit, cond_enter) = self.graph_builder.enter_do_while_loop_condition(expr, condition);
        self.merge_incoming_flow(body_exit, false, false);
        self.merge_incoming_flow(cond_enter, false, false);
    }

    pub fn exit_do_while_loop(&mut self, expr: ExprId) {
        let ExprKind::DoWhile { condition, .. } = &self.fir.expr(expr).kind else {
            unreachable!("exit_do_while_loop on a non-do-while expression");
        };
        let condition = *condition;
        let (cond_exit, exit) = self.graph_builder.exit_do_while_loop(condition);
        self.merge_incoming_flow(cond_exit, false, false);
        self.merge_incoming_flow(exit, false, false);
        self.exit_common_loop(exit);
    }

    /// When the loop exit is reached only through the condition's false edge, the
    /// condition's falsity is a fact there. Any `break` predecessor suppresses this.
    fn exit_common_loop(&mut self, exit: NodeId) {
        let single_alive = {
            let graph = self.graph_builder.graph();
            let mut alive = graph
                .node(exit)
                .predecessors()
                .iter()
                .filter(|e| !e.kind.is_dead());
            match (alive.next(), alive.next()) {
                (Some(edge), None) => {
                    (graph.node(edge.node).kind == NodeKind::LoopConditionExit)
                        .then_some(graph.node(edge.node).fir)
                }
                _ => None,
            }
        };
        let mut flow = self.flow_of(exit);
        if let Some(condition) = single_alive {
            if let Some(variable) = self.storage.get(self.fir, &flow, condition) {
                flow = self.approve_and_update_receivers(
                    &flow,
                    OperationStatement::new(variable, Operation::EqFalse),
                    false,
                    true,
                );
            }
        }
        self.update_all_receivers(&flow);
        self.store_flow(exit, flow);
    }

    // Jumps

    pub fn exit_jump(&mut self, expr: ExprId) {
        let ExprKind::Jump { kind, .. } = &self.fir.expr(expr).kind else {
            unreachable!("exit_jump on a non-jump expression");
        };
        let kind = *kind;
        let node = self.graph_builder.exit_jump(expr, kind);
        self.merge_incoming_flow(node, false, false);
    }

    // Try

    pub fn enter_try(&mut self, expr: ExprId) {
        let ExprKind::Try { body, .. } = &self.fir.expr(expr).kind else {
            unreachable!("enter_try on a non-try expression");
        };
        let body = *body;
        let (try_enter, main_enter) = self.graph_builder.enter_try(expr, body);
        self.merge_incoming_flow(try_enter, false, false);
        self.merge_incoming_flow(main_enter, false, true);
    }

    pub fn exit_try_main_block(&mut self, body: ExprId) {
        let node = self.graph_builder.exit_try_main_block(body);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn enter_catch_clause(&mut self, body: ExprId) {
        let node = self.graph_builder.enter_catch_clause(body);
        self.merge_incoming_flow(node, true, true);
    }

    pub fn exit_catch_clause(&mut self, body: ExprId) {
        let node = self.graph_builder.exit_catch_clause(body);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn enter_finally(&mut self, body: ExprId) {
        let node = self.graph_builder.enter_finally(body);
        self.merge_incoming_flow(node, true, false);
    }

    pub fn exit_finally(&mut self, body: ExprId) {
        let node = self.graph_builder.exit_finally(body);
        self.merge_incoming_flow(node, false, false);
    }

    pub fn exit_try(&mut self, expr: ExprId) {
        let node = self.graph_builder.exit_try(expr);
        self.node_for_expr.insert(expr, node);
        self.merge_incoming_flow(node, true, false);
    }

    // Variable declarations and assignments

    pub fn exit_variable_declaration(&mut self, expr: ExprId) {
        let ExprKind::Declaration { symbol, initializer } = &self.fir.expr(expr).kind else {
            unreachable!("exit_variable_declaration on a non-declaration expression");
        };
        let (symbol, initializer) = (*symbol, *initializer);
        let node = self.graph_builder.exit_variable_declaration(expr);
        let mut flow = self.merge_incoming_flow(node, false, false);
        if let Some(initializer) = initializer {
            self.exit_variable_initialization(&mut flow, symbol, initializer, false);
        }
        self.store_flow(node, flow);
    }

    pub fn exit_variable_assignment(&mut self, expr: ExprId) {
        let ExprKind::Assignment { target, value } = &self.fir.expr(expr).kind else {
            unreachable!("exit_variable_assignment on a non-assignment expression");
        };
        let (target, value) = (*target, *value);
        let node = self.graph_builder.exit_variable_assignment(expr);
        let mut flow = self.merge_incoming_flow(node, false, false);
        self.exit_variable_initialization(&mut flow, target, value, true);
        self.store_flow(node, flow);
    }

    fn exit_variable_initialization(
        &mut self,
        flow: &mut Flow,
        symbol: velac_fir::SymbolId,
        initializer: ExprId,
        is_assignment: bool,
    ) {
        // The left-hand side must not be unwrapped: its aliasing is being replaced.
        let Some(property_var) =
            self.storage
                .get_or_create_real_for_symbol(self.fir, flow, symbol, false)
        else {
            return;
        };
        if is_assignment {
            self.logic.record_new_assignment(flow, property_var);
        }
        match self.storage.get_or_create_variable(self.fir, flow, initializer) {
            DataFlowVariable::Real(initializer_var) => {
                self.logic.add_local_variable_alias(
                    flow,
                    property_var,
                    RealVariableAndType {
                        variable: initializer_var,
                        original_ty: self.fir.expr(initializer).ty.clone(),
                    },
                );
            }
            DataFlowVariable::Synthetic(synthetic) => {
                // The initializer's facts are re-keyed onto the variable: the synthetic
                // is consumed here and must not leak past this statement.
                self.logic.translate_variable_from_condition_in_statements(
                    flow,
                    synthetic.into(),
                    property_var.into(),
                    true,
                    Some,
                );
            }
        }
        if is_assignment {
            let initializer_ty = self.fir.expr(initializer).ty.clone();
            if !initializer_ty.is_nullable() {
                self.add_type_statement_and_update(
                    flow,
                    TypeStatement::has_type(property_var, initializer_ty),
                );
            }
        }
    }

    // Queries

    /// The refined types of a qualified access at the current program point, or `None`
    /// when no refinement is known. The list begins with the aliased variable's declared
    /// type (if the access is an alias) and continues with the accumulated exact types;
    /// the resolver intersects them with the declared type.
    pub fn get_type_using_smartcast_info(&self, expr: ExprId) -> Option<Vec<Ty>> {
        let node = self.graph_builder.last_node()?;
        let flow = self.flow_on_nodes.get(&node)?;
        let mut variable = self.storage.get_real_without_unwrapping(self.fir, expr)?;
        let mut result = Vec::new();
        if let Some(underlying) = flow.direct_alias(variable) {
            result.push(underlying.original_ty.clone());
            variable = underlying.variable;
        }
        if let Some(statement) = flow.approved_type_statement(variable) {
            result.extend(statement.exact_type.iter().cloned());
        }
        if result.is_empty() {
            log::trace!(target: "dataflow", "no smartcast info for {expr}");
            None
        } else {
            log::trace!(target: "dataflow", "smartcast info for {expr}: {} types", result.len());
            Some(result)
        }
    }

    /// Drop the CFG subgraph and flows produced for a call whose resolution is being
    /// retried.
    pub fn drop_subgraph_from_call(&mut self, call: ExprId) {
        for node in self.graph_builder.drop_subgraph_from_call(call) {
            self.flow_on_nodes.remove(&node);
            self.when_condition_variables.remove(&node);
        }
    }

    /// The expressions whose values an anonymous function can produce.
    pub fn return_expressions_of_anonymous_function(&self, lambda: ExprId) -> Vec<ExprId> {
        self.fir.return_expressions_of_anonymous_function(lambda)
    }

    // Calls (contract handling lives in the contracts module)

    pub fn enter_call(&mut self, call: ExprId) {
        self.graph_builder.enter_call(call);
    }

    pub fn exit_function_call(&mut self, call: ExprId) {
        let (node, union_node) = self.graph_builder.exit_function_call(call);
        self.node_for_expr.insert(call, node);
        if let Some(union_node) = union_node {
            // Sequentially composed argument evaluations: all of their facts hold.
            let flows: Vec<Flow> = {
                let graph = self.graph_builder.graph();
                graph
                    .node(union_node)
                    .predecessors()
                    .iter()
                    .filter(|e| e.kind.used_in_dfa())
                    .filter_map(|e| self.flow_on_nodes.get(&e.node).cloned())
                    .collect()
            };
            let union_flow = self.logic.union(&flows);
            self.store_flow(union_node, union_flow);
        }
        let mut flow = self.merge_incoming_flow(node, false, false);
        if self.ignore_function_calls {
            self.store_flow(node, flow);
            return;
        }
        if self.config.processes_contracts() {
            self.process_contracts(&mut flow, call);
        }
        self.store_flow(node, flow);
    }

    #[inline]
    pub(crate) fn is_ignoring_function_calls(&self) -> bool {
        self.ignore_function_calls
    }
}
