//! Incremental CFG construction driven by the resolver's enter/exit events.
//!
//! The builder owns one [ControlFlowGraph] per top-level declaration and a stack of
//! "last created node" positions, one per active function scope. Each event creates the
//! node(s) for the construct, links them from the current position, and leaves the
//! position on the node subsequent statements continue from. Edges out of a jump node's
//! sequential position are dead; node deadness follows from edge deadness.

use cranelift_entity::EntityRef;
use smallvec::SmallVec;

use super::{ControlFlowGraph, EdgeKind, NodeId, NodeKind};
use crate::expr::{ExprId, Function, JumpKind};

struct FunctionContext {
    exit: NodeId,
    is_anonymous: bool,
}

struct LoopContext {
    back_target: NodeId,
    exit: NodeId,
    /// Where `continue` jumps. Unknown for a do-while until its condition is entered.
    continue_target: Option<NodeId>,
    pending_continues: SmallVec<[NodeId; 2]>,
}

struct WhenContext {
    exit: NodeId,
    last_condition_exit: Option<NodeId>,
    entered_else: bool,
}

struct TryContext {
    main_enter: NodeId,
    exit: NodeId,
    main_exit: Option<NodeId>,
    catch_exits: SmallVec<[NodeId; 2]>,
    has_finally: bool,
}

struct CallContext {
    call: ExprId,
    first_node: NodeId,
    prev_last: NodeId,
    lambda_exits: SmallVec<[NodeId; 1]>,
}

#[derive(Default)]
pub struct GraphBuilder {
    graph: ControlFlowGraph,
    last_nodes: Vec<NodeId>,
    function_stack: Vec<FunctionContext>,
    loop_stack: Vec<LoopContext>,
    when_stack: Vec<WhenContext>,
    binary_stack: Vec<NodeId>,
    safe_call_stack: Vec<NodeId>,
    try_stack: Vec<TryContext>,
    call_stack: Vec<CallContext>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn graph(&self) -> &ControlFlowGraph {
        &self.graph
    }

    /// The most recently positioned node, if any function is being traversed.
    #[inline]
    pub fn last_node(&self) -> Option<NodeId> {
        self.last_nodes.last().copied()
    }

    /// True when no declaration traversal is in progress.
    #[inline]
    pub fn is_top_level(&self) -> bool {
        self.function_stack.is_empty()
    }

    fn current_last(&self) -> NodeId {
        *self
            .last_nodes
            .last()
            .expect("graph builder has no active function scope")
    }

    fn set_last(&mut self, node: NodeId) {
        *self
            .last_nodes
            .last_mut()
            .expect("graph builder has no active function scope") = node;
    }

    /// The kind of a sequential edge out of `from`: dead once a jump has occurred.
    fn sequential_edge_kind(&self, from: NodeId) -> EdgeKind {
        let node = self.graph.node(from);
        if node.kind == NodeKind::Jump || node.is_dead {
            EdgeKind::DeadForward
        } else {
            EdgeKind::Forward
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        let kind = self.sequential_edge_kind(from);
        self.graph.add_edge(from, to, kind);
        self.graph.refresh_deadness(to);
    }

    fn add_simple_node(&mut self, kind: NodeKind, fir: ExprId) -> NodeId {
        let node = self.graph.add_node(kind, fir);
        let last = self.current_last();
        self.link(last, node);
        self.set_last(node);
        log::trace!(target: "dataflow-graph", "created {node} ({kind:?}) after {last}");
        node
    }

    // Functions

    pub fn enter_function(&mut self, function: &Function) -> NodeId {
        debug_assert!(self.function_stack.is_empty(), "nested named functions use their own builder");
        let enter = self.graph.add_node(NodeKind::FunctionEnter, function.body);
        let exit = self.graph.add_node(NodeKind::FunctionExit, function.body);
        self.function_stack.push(FunctionContext {
            exit,
            is_anonymous: false,
        });
        self.last_nodes.push(enter);
        enter
    }

    /// Finish the function. At the top level this also yields the completed graph and
    /// resets the builder for the next declaration.
    pub fn exit_function(&mut self) -> (NodeId, Option<ControlFlowGraph>) {
        let ctx = self.function_stack.pop().expect("no function to exit");
        debug_assert!(!ctx.is_anonymous);
        let last = self.last_nodes.pop().expect("unbalanced function traversal");
        let kind = self.sequential_edge_kind(last);
        self.graph.add_edge(last, ctx.exit, kind);
        self.graph.refresh_deadness(ctx.exit);
        if self.function_stack.is_empty() {
            let graph = core::mem::take(&mut self.graph);
            (ctx.exit, Some(graph))
        } else {
            (ctx.exit, None)
        }
    }

    pub fn enter_anonymous_function(&mut self, lambda: ExprId) -> NodeId {
        let pre = self.current_last();
        let enter = self.graph.add_node(NodeKind::AnonymousFunctionEnter, lambda);
        self.link(pre, enter);
        let exit = self.graph.add_node(NodeKind::AnonymousFunctionExit, lambda);
        self.function_stack.push(FunctionContext {
            exit,
            is_anonymous: true,
        });
        self.last_nodes.push(enter);
        enter
    }

    pub fn exit_anonymous_function(&mut self, _lambda: ExprId) -> NodeId {
        let ctx = self.function_stack.pop().expect("no anonymous function to exit");
        debug_assert!(ctx.is_anonymous);
        let last = self.last_nodes.pop().expect("unbalanced lambda traversal");
        let kind = self.sequential_edge_kind(last);
        self.graph.add_edge(last, ctx.exit, kind);
        self.graph.refresh_deadness(ctx.exit);
        // The enclosing position is untouched: the lambda body is not on the caller's
        // sequential path. Its exit feeds the enclosing call's argument union instead.
        if let Some(call) = self.call_stack.last_mut() {
            call.lambda_exits.push(ctx.exit);
        }
        ctx.exit
    }

    // Plain expression events

    pub fn exit_literal(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::Literal, expr)
    }

    pub fn exit_qualified_access(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::QualifiedAccess, expr)
    }

    pub fn exit_type_operator(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::TypeOperator, expr)
    }

    pub fn exit_equality_operator(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::EqualityOperator, expr)
    }

    pub fn exit_check_not_null(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::CheckNotNull, expr)
    }

    pub fn exit_boolean_not(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::BooleanNot, expr)
    }

    pub fn exit_variable_declaration(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::VariableDeclaration, expr)
    }

    pub fn exit_variable_assignment(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::VariableAssignment, expr)
    }

    pub fn enter_block(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::BlockEnter, expr)
    }

    pub fn exit_block(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::BlockExit, expr)
    }

    // Jumps

    pub fn exit_jump(&mut self, expr: ExprId, kind: JumpKind) -> NodeId {
        let node = self.add_simple_node(NodeKind::Jump, expr);
        let edge = if self.graph.node(node).is_dead {
            EdgeKind::DeadForward
        } else {
            EdgeKind::Forward
        };
        match kind {
            JumpKind::Return => {
                let exit = self
                    .function_stack
                    .last()
                    .expect("return outside of a function")
                    .exit;
                self.graph.add_edge(node, exit, edge);
                self.graph.refresh_deadness(exit);
            }
            JumpKind::Break => {
                if let Some(ctx) = self.loop_stack.last() {
                    let exit = ctx.exit;
                    self.graph.add_edge(node, exit, edge);
                    self.graph.refresh_deadness(exit);
                }
            }
            JumpKind::Continue => {
                if let Some(ctx) = self.loop_stack.last_mut() {
                    match ctx.continue_target {
                        Some(target) => {
                            self.graph.add_edge(node, target, EdgeKind::Back);
                        }
                        None => ctx.pending_continues.push(node),
                    }
                }
            }
        }
        node
    }

    // When

    pub fn enter_when(&mut self, when: ExprId) -> NodeId {
        let node = self.add_simple_node(NodeKind::WhenEnter, when);
        let exit = self.graph.add_node(NodeKind::WhenExit, when);
        self.when_stack.push(WhenContext {
            exit,
            last_condition_exit: None,
            entered_else: false,
        });
        node
    }

    pub fn enter_when_branch_condition(&mut self, condition: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::WhenBranchConditionEnter, condition)
    }

    pub fn exit_when_branch_condition(&mut self, condition: ExprId, body: ExprId) -> (NodeId, NodeId) {
        let cond_exit = self.add_simple_node(NodeKind::WhenBranchConditionExit, condition);
        let ctx = self.when_stack.last_mut().expect("no when in progress");
        ctx.last_condition_exit = Some(cond_exit);
        let result_enter = self.graph.add_node(NodeKind::WhenBranchResultEnter, body);
        self.link(cond_exit, result_enter);
        self.set_last(result_enter);
        (cond_exit, result_enter)
    }

    pub fn exit_when_branch_result(&mut self, body: ExprId) -> NodeId {
        let result_exit = self.add_simple_node(NodeKind::WhenBranchResultExit, body);
        let ctx = self.when_stack.last().expect("no when in progress");
        let exit = ctx.exit;
        let last_condition_exit = ctx.last_condition_exit;
        let kind = self.sequential_edge_kind(result_exit);
        self.graph.add_edge(result_exit, exit, kind);
        // Position for the next branch: the false path of this branch's condition.
        if let Some(lce) = last_condition_exit {
            self.set_last(lce);
        }
        result_exit
    }

    pub fn enter_when_else_branch(&mut self, body: ExprId) -> NodeId {
        let ctx = self.when_stack.last_mut().expect("no when in progress");
        ctx.entered_else = true;
        self.add_simple_node(NodeKind::WhenBranchResultEnter, body)
    }

    pub fn exit_when(&mut self, when: ExprId) -> (NodeId, Option<NodeId>) {
        let ctx = self.when_stack.pop().expect("no when in progress");
        let synthetic_else = if ctx.entered_else {
            None
        } else {
            match ctx.last_condition_exit {
                Some(lce) => {
                    let se = self.graph.add_node(NodeKind::WhenSyntheticElse, when);
                    self.link(lce, se);
                    let kind = self.sequential_edge_kind(se);
                    self.graph.add_edge(se, ctx.exit, kind);
                    Some(se)
                }
                None => {
                    let last = self.current_last();
                    self.link(last, ctx.exit);
                    None
                }
            }
        };
        self.graph.refresh_deadness(ctx.exit);
        self.set_last(ctx.exit);
        (ctx.exit, synthetic_else)
    }

    // Loops

    pub fn enter_while_loop(&mut self, loop_expr: ExprId, condition: ExprId) -> (NodeId, NodeId) {
        let loop_enter = self.add_simple_node(NodeKind::LoopEnter, loop_expr);
        let cond_enter = self.add_simple_node(NodeKind::LoopConditionEnter, condition);
        let exit = self.graph.add_node(NodeKind::LoopExit, loop_expr);
        self.loop_stack.push(LoopContext {
            back_target: cond_enter,
            exit,
            continue_target: Some(cond_enter),
            pending_continues: SmallVec::new(),
        });
        (loop_enter, cond_enter)
    }

    pub fn exit_while_loop_condition(&mut self, condition: ExprId, body: ExprId) -> (NodeId, NodeId) {
        let cond_exit = self.add_simple_node(NodeKind::LoopConditionExit, condition);
        let exit = self.loop_stack.last().expect("no loop in progress").exit;
        let kind = self.sequential_edge_kind(cond_exit);
        self.graph.add_edge(cond_exit, exit, kind);
        let body_enter = self.graph.add_node(NodeKind::LoopBlockEnter, body);
        self.link(cond_exit, body_enter);
        self.set_last(body_enter);
        (cond_exit, body_enter)
    }

    pub fn exit_while_loop(&mut self, loop_expr: ExprId) -> (NodeId, NodeId) {
        let body_exit = self.add_simple_node(NodeKind::LoopBlockExit, loop_expr);
        let ctx = self.loop_stack.pop().expect("no loop in progress");
        let back = if self.graph.node(body_exit).is_dead {
            EdgeKind::DeadBack
        } else {
            EdgeKind::Back
        };
        self.graph.add_edge(body_exit, ctx.back_target, back);
        self.graph.refresh_deadness(ctx.exit);
        self.set_last(ctx.exit);
        (body_exit, ctx.exit)
    }

    pub fn enter_do_while_loop(&mut self, loop_expr: ExprId, body: ExprId) -> (NodeId, NodeId) {
        let loop_enter = self.add_simple_node(NodeKind::LoopEnter, loop_expr);
        let body_enter = self.add_simple_node(NodeKind::LoopBlockEnter, body);
        let exit = self.graph.add_node(NodeKind::LoopExit, loop_expr);
        self.loop_stack.push(LoopContext {
            back_target: body_enter,
            exit,
            continue_target: None,
            pending_continues: SmallVec::new(),
        });
        (loop_enter, body_enter)
    }

    pub fn enter_do_while_loop_condition(&mut self, loop_expr: ExprId, condition: ExprId) -> (NodeId, NodeId) {
        let body_exit = self.add_simple_node(NodeKind::LoopBlockExit, loop_expr);
        let cond_enter = self.add_simple_node(NodeKind::LoopConditionEnter, condition);
        let ctx = self.loop_stack.last_mut().expect("no loop in progress");
        ctx.continue_target = Some(cond_enter);
        for pending in core::mem::take(&mut ctx.pending_continues) {
            self.graph.add_edge(pending, cond_enter, EdgeKind::Forward);
        }
        self.graph.refresh_deadness(cond_enter);
        (body_exit, cond_enter)
    }

    pub fn exit_do_while_loop(&mut self, condition: ExprId) -> (NodeId, NodeId) {
        let cond_exit = self.add_simple_node(NodeKind::LoopConditionExit, condition);
        let ctx = self.loop_stack.pop().expect("no loop in progress");
        let back = if self.graph.node(cond_exit).is_dead {
            EdgeKind::DeadBack
        } else {
            EdgeKind::Back
        };
        self.graph.add_edge(cond_exit, ctx.back_target, back);
        let kind = self.sequential_edge_kind(cond_exit);
        self.graph.add_edge(cond_exit, ctx.exit, kind);
        self.graph.refresh_deadness(ctx.exit);
        self.set_last(ctx.exit);
        (cond_exit, ctx.exit)
    }

    // Boolean operators

    pub fn enter_binary_logic(&mut self, expr: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::BooleanOperatorEnter, expr)
    }

    pub fn exit_left_binary_logic_argument(&mut self, expr: ExprId) -> (NodeId, NodeId) {
        let left_exit = self.add_simple_node(NodeKind::LeftOperandExit, expr);
        let right_enter = self.graph.add_node(NodeKind::RightOperandEnter, expr);
        self.link(left_exit, right_enter);
        self.set_last(right_enter);
        self.binary_stack.push(left_exit);
        (left_exit, right_enter)
    }

    pub fn exit_binary_logic(&mut self, expr: ExprId) -> (NodeId, NodeId, NodeId) {
        let right_last = self.current_last();
        let exit = self.graph.add_node(NodeKind::BooleanOperatorExit, expr);
        let kind = self.sequential_edge_kind(right_last);
        self.graph.add_edge(right_last, exit, kind);
        let left_exit = self.binary_stack.pop().expect("no boolean operator in progress");
        // Short-circuit path.
        let kind = self.sequential_edge_kind(left_exit);
        self.graph.add_edge(left_exit, exit, kind);
        self.graph.refresh_deadness(exit);
        self.set_last(exit);
        (exit, left_exit, right_last)
    }

    // Safe calls

    pub fn enter_safe_call(&mut self, expr: ExprId) -> NodeId {
        let receiver_exit = self.current_last();
        let enter = self.add_simple_node(NodeKind::SafeCallEnter, expr);
        self.safe_call_stack.push(receiver_exit);
        enter
    }

    pub fn exit_safe_call(&mut self, expr: ExprId) -> NodeId {
        let node = self.add_simple_node(NodeKind::SafeCallExit, expr);
        let receiver_exit = self.safe_call_stack.pop().expect("no safe call in progress");
        // The receiver-was-null bypass.
        let kind = self.sequential_edge_kind(receiver_exit);
        self.graph.add_edge(receiver_exit, node, kind);
        self.graph.refresh_deadness(node);
        node
    }

    // Calls

    pub fn enter_call(&mut self, call: ExprId) {
        self.call_stack.push(CallContext {
            call,
            first_node: self.graph.next_node(),
            prev_last: self.current_last(),
            lambda_exits: SmallVec::new(),
        });
    }

    pub fn exit_function_call(&mut self, call: ExprId) -> (NodeId, Option<NodeId>) {
        let ctx = self.call_stack.pop().expect("exit_function_call without enter_call");
        debug_assert_eq!(ctx.call, call);
        let union = if ctx.lambda_exits.is_empty() {
            None
        } else {
            let union = self.graph.add_node(NodeKind::CallArgumentsUnion, call);
            let last = self.current_last();
            self.link(last, union);
            for lambda_exit in &ctx.lambda_exits {
                self.graph.add_edge(*lambda_exit, union, EdgeKind::DfgForward);
            }
            self.set_last(union);
            Some(union)
        };
        let node = self.add_simple_node(NodeKind::FunctionCall, call);
        (node, union)
    }

    /// Remove every node created for `call` since the matching [Self::enter_call],
    /// restoring the position the call started from. Used when resolution of the call is
    /// retried and its subgraph must be rebuilt.
    pub fn drop_subgraph_from_call(&mut self, call: ExprId) -> Vec<NodeId> {
        let ctx = self.call_stack.pop().expect("drop_subgraph_from_call without enter_call");
        assert_eq!(ctx.call, call, "mismatched call subgraph");
        let first = ctx.first_node.index();
        let end = self.graph.next_node().index();
        let mut dropped = Vec::with_capacity(end - first);
        for index in first..end {
            let id = NodeId::new(index);
            self.graph.detach_node(id);
            dropped.push(id);
        }
        self.set_last(ctx.prev_last);
        log::debug!(target: "dataflow-graph", "dropped {} nodes for retried call {call}", dropped.len());
        dropped
    }

    // Try

    pub fn enter_try(&mut self, try_expr: ExprId, body: ExprId) -> (NodeId, NodeId) {
        let try_enter = self.add_simple_node(NodeKind::TryEnter, try_expr);
        let main_enter = self.add_simple_node(NodeKind::TryMainEnter, body);
        let exit = self.graph.add_node(NodeKind::TryExit, try_expr);
        self.try_stack.push(TryContext {
            main_enter,
            exit,
            main_exit: None,
            catch_exits: SmallVec::new(),
            has_finally: false,
        });
        (try_enter, main_enter)
    }

    pub fn exit_try_main_block(&mut self, body: ExprId) -> NodeId {
        let node = self.add_simple_node(NodeKind::TryMainExit, body);
        self.try_stack.last_mut().expect("no try in progress").main_exit = Some(node);
        node
    }

    pub fn enter_catch_clause(&mut self, body: ExprId) -> NodeId {
        let main_enter = self.try_stack.last().expect("no try in progress").main_enter;
        let node = self.graph.add_node(NodeKind::CatchClauseEnter, body);
        // Any point of the main block may throw; the catch only sees the entry state.
        self.graph.add_edge(main_enter, node, EdgeKind::Forward);
        self.graph.refresh_deadness(node);
        self.set_last(node);
        node
    }

    pub fn exit_catch_clause(&mut self, body: ExprId) -> NodeId {
        let node = self.add_simple_node(NodeKind::CatchClauseExit, body);
        self.try_stack
            .last_mut()
            .expect("no try in progress")
            .catch_exits
            .push(node);
        node
    }

    pub fn enter_finally(&mut self, body: ExprId) -> NodeId {
        let node = self.graph.add_node(NodeKind::FinallyEnter, body);
        let ctx = self.try_stack.last_mut().expect("no try in progress");
        ctx.has_finally = true;
        let main_exit = ctx.main_exit;
        let catch_exits: SmallVec<[NodeId; 2]> = ctx.catch_exits.clone();
        // TODO: union the flows at each throw point into the finally block entry; for
        // now only the normal exits feed it.
        if let Some(main_exit) = main_exit {
            let kind = self.sequential_edge_kind(main_exit);
            self.graph.add_edge(main_exit, node, kind);
        }
        for catch_exit in catch_exits {
            let kind = self.sequential_edge_kind(catch_exit);
            self.graph.add_edge(catch_exit, node, kind);
        }
        self.graph.refresh_deadness(node);
        self.set_last(node);
        node
    }

    pub fn exit_finally(&mut self, body: ExprId) -> NodeId {
        self.add_simple_node(NodeKind::FinallyExit, body)
    }

    pub fn exit_try(&mut self, try_expr: ExprId) -> NodeId {
        let ctx = self.try_stack.pop().expect("no try in progress");
        if ctx.has_finally {
            let last = self.current_last();
            self.link(last, ctx.exit);
        } else {
            if let Some(main_exit) = ctx.main_exit {
                let kind = self.sequential_edge_kind(main_exit);
                self.graph.add_edge(main_exit, ctx.exit, kind);
            }
            for catch_exit in ctx.catch_exits {
                let kind = self.sequential_edge_kind(catch_exit);
                self.graph.add_edge(catch_exit, ctx.exit, kind);
            }
        }
        self.graph.refresh_deadness(ctx.exit);
        self.set_last(ctx.exit);
        ctx.exit
    }
}
