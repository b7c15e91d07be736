//! Control-flow graph for one top-level declaration.
//!
//! The graph is produced incrementally by [builder::GraphBuilder] as the resolver
//! traverses the declaration tree; the dataflow analyzer attaches flow state to nodes
//! and reads predecessor edges through [ControlFlowGraph].

pub mod builder;

use cranelift_entity::{PrimaryMap, entity_impl};
use smallvec::SmallVec;

use crate::expr::ExprId;

/// A unique reference to a CFG node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

/// What program event a node stands for. One kind per analyzer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    FunctionEnter,
    FunctionExit,
    AnonymousFunctionEnter,
    AnonymousFunctionExit,
    BlockEnter,
    BlockExit,
    Literal,
    QualifiedAccess,
    TypeOperator,
    EqualityOperator,
    CheckNotNull,
    BooleanOperatorEnter,
    LeftOperandExit,
    RightOperandEnter,
    BooleanOperatorExit,
    BooleanNot,
    WhenEnter,
    WhenBranchConditionEnter,
    WhenBranchConditionExit,
    WhenBranchResultEnter,
    WhenBranchResultExit,
    WhenSyntheticElse,
    WhenExit,
    LoopEnter,
    LoopConditionEnter,
    LoopConditionExit,
    LoopBlockEnter,
    LoopBlockExit,
    LoopExit,
    TryEnter,
    TryMainEnter,
    TryMainExit,
    CatchClauseEnter,
    CatchClauseExit,
    FinallyEnter,
    FinallyExit,
    TryExit,
    SafeCallEnter,
    SafeCallExit,
    CallArgumentsUnion,
    FunctionCall,
    VariableDeclaration,
    VariableAssignment,
    Jump,
}

/// Classification of a control-flow edge.
///
/// `used_in_dfa` selects the edges the dataflow join follows; `used_in_cfa` the ones
/// reachability diagnostics follow. Dead edges mark paths that can only be reached after
/// a non-local exit; back edges close loops and are never followed by the dataflow join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// An ordinary edge, used by both dataflow and reachability.
    Forward,
    /// Used by reachability only (e.g. the structural edge out of a lambda body).
    CfgForward,
    /// Used by dataflow only (e.g. a lambda exit feeding a call-arguments union).
    DfgForward,
    /// A forward edge on an unreachable path.
    DeadForward,
    /// A loop back edge.
    Back,
    /// A loop back edge on an unreachable path.
    DeadBack,
}

impl EdgeKind {
    #[inline]
    pub const fn used_in_dfa(&self) -> bool {
        matches!(self, Self::Forward | Self::DfgForward)
    }

    #[inline]
    pub const fn used_in_cfa(&self) -> bool {
        matches!(self, Self::Forward | Self::CfgForward | Self::Back)
    }

    #[inline]
    pub const fn is_dead(&self) -> bool {
        matches!(self, Self::DeadForward | Self::DeadBack)
    }

    #[inline]
    pub const fn is_back(&self) -> bool {
        matches!(self, Self::Back | Self::DeadBack)
    }
}

/// An edge endpoint paired with its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub node: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub kind: NodeKind,
    /// The syntactic element this node was created for. Function enter/exit nodes
    /// reference the function body.
    pub fir: ExprId,
    /// Whether every path into this node passes through a non-local exit.
    pub is_dead: bool,
    /// Whether the node was detached by a dropped call subgraph.
    pub is_detached: bool,
    predecessors: SmallVec<[Edge; 2]>,
    successors: SmallVec<[Edge; 2]>,
}

impl CfgNode {
    #[inline]
    pub fn predecessors(&self) -> &[Edge] {
        &self.predecessors
    }

    #[inline]
    pub fn successors(&self) -> &[Edge] {
        &self.successors
    }
}

#[derive(Default)]
pub struct ControlFlowGraph {
    nodes: PrimaryMap<NodeId, CfgNode>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, kind: NodeKind, fir: ExprId) -> NodeId {
        self.nodes.push(CfgNode {
            kind,
            fir,
            is_dead: false,
            is_detached: false,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
        })
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &CfgNode)> {
        self.nodes.iter().filter(|(_, n)| !n.is_detached)
    }

    /// The next node id that `add_node` would return. Used to delimit subgraphs.
    pub fn next_node(&self) -> NodeId {
        self.nodes.next_key()
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.nodes[from].successors.push(Edge { node: to, kind });
        self.nodes[to].predecessors.push(Edge { node: from, kind });
    }

    /// Recompute deadness of `id` from its incoming edges: a node with predecessors is
    /// dead when no incoming edge is live.
    pub fn refresh_deadness(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        if node.predecessors.is_empty() {
            return;
        }
        let dead = node.predecessors.iter().all(|e| e.kind.is_dead());
        self.nodes[id].is_dead = dead;
    }

    /// Detach `id` from the graph, removing it from the edge lists of its neighbors.
    pub fn detach_node(&mut self, id: NodeId) {
        let preds = core::mem::take(&mut self.nodes[id].predecessors);
        let succs = core::mem::take(&mut self.nodes[id].successors);
        for edge in preds {
            self.nodes[edge.node].successors.retain(|e| e.node != id);
        }
        for edge in succs {
            self.nodes[edge.node].predecessors.retain(|e| e.node != id);
        }
        self.nodes[id].is_detached = true;
    }
}
