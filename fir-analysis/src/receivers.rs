//! Bridge between refined receiver variables and the resolver's receiver stack.
//!
//! Whenever a flow operation installs or drops type facts for a variable standing for an
//! implicit receiver, the corresponding stack entry is updated in place: the refined
//! type is the intersection of the accumulated exact types with the declared type, and
//! when the refinement disappears the declared type is reinstated.

use velac_fir::types::Ty;

use crate::{
    analyzer::DataFlowAnalyzer,
    flow::Flow,
    variable::{Identifier, RealVar},
};

impl<'a> DataFlowAnalyzer<'a> {
    /// Recompute the stack entry for `variable`, which must stand for an implicit
    /// receiver.
    pub(crate) fn process_updated_receiver_variable(&mut self, flow: &Flow, variable: RealVar) {
        let info = self.storage.info(variable);
        if !info.is_receiver {
            return;
        }
        let symbol = info.identifier.symbol;
        let Some(original) = self.receiver_stack().original_type(symbol).cloned() else {
            return;
        };
        match flow.approved_type_statement(variable) {
            Some(statement) if !statement.exact_type.is_empty() => {
                let mut parts: Vec<Ty> = statement.exact_type.iter().cloned().collect();
                parts.push(original);
                let refined = self.intersector().intersect(&parts);
                log::trace!(target: "dataflow", "receiver {variable} refined to {refined}");
                self.receiver_stack_mut().replace_current_type(symbol, refined);
            }
            _ => {
                log::trace!(target: "dataflow", "receiver {variable} back to its declared type");
                self.receiver_stack_mut().reinstate_original_type(symbol);
            }
        }
    }

    /// Recompute every receiver entry against `flow`. Called at merge points whose
    /// incoming refinements may differ from the previous program point.
    pub(crate) fn update_all_receivers(&mut self, flow: &Flow) {
        let symbols: Vec<_> = self.receiver_stack().iter().map(|entry| entry.symbol).collect();
        for symbol in symbols {
            let identifier = Identifier {
                symbol,
                receiver: None,
                is_receiver: true,
            };
            // A receiver that was never accessed has no variable and no refinement.
            if let Some(variable) = self.storage.real_for_identifier(&identifier) {
                self.process_updated_receiver_variable(flow, variable);
            }
        }
    }
}
