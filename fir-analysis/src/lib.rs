//! Dataflow and smartcast analysis for the Vela compiler front end.
//!
//! The resolver drives a [DataFlowAnalyzer] event-by-event while traversing a
//! declaration; the analyzer maintains a [Flow] of facts and implications per CFG node
//! and answers smartcast queries from them. See `velac-fir` for the IR, graph builder
//! and collaborator seams the analyzer consumes.

mod analyzer;
mod config;
mod contracts;
mod flow;
mod logic;
mod receivers;
mod statement;
mod storage;
mod variable;

pub use self::{
    analyzer::{ControlFlowGraphReference, DataFlowAnalyzer, DataFlowError, DataFlowInfo},
    config::DataFlowConfig,
    flow::{Flow, RealVariableAndType},
    logic::{LogicSystem, TypeStatements},
    statement::{Implication, Operation, OperationStatement, Statement, TypeSet, TypeStatement},
    storage::{RealVariableInfo, VariableStorage},
    variable::{DataFlowVariable, Identifier, RealVar, SyntheticVar},
};
