//! Front-end IR for the Vela compiler.
//!
//! This crate holds everything the resolver and the dataflow analyzer share: the
//! expression/symbol arenas ([Fir], [FirBuilder]), the semantic type model
//! ([types::Ty]) with subtyping and intersection seams, the control-flow graph and its
//! event-driven [cfg::builder::GraphBuilder], the contract description model, and the
//! implicit-receiver stack.

pub use hashbrown;
pub use smallvec::{SmallVec, smallvec};

pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub type FxHashSet<K> = hashbrown::HashSet<K, rustc_hash::FxBuildHasher>;
pub use rustc_hash::{FxBuildHasher, FxHasher};

pub mod cfg;
pub mod contracts;
mod expr;
mod receivers;
mod symbols;
pub mod types;

pub use self::{
    expr::{
        Catch, ConstKind, Expr, ExprId, ExprKind, Fir, FirBuilder, FirOperation, Function,
        JumpKind, WhenBranch,
    },
    receivers::{ImplicitReceiverStack, ImplicitReceiverValue},
    symbols::{FunctionSignature, SymbolData, SymbolId, SymbolKind},
    types::{Ty, TyCtor, TypeContext, TypeEnvironment, TypeIntersector},
};
