/// Configuration for the dataflow analyzer.
#[derive(Debug, Clone)]
pub struct DataFlowConfig {
    /// Indicates whether contract effects of called functions are interpreted.
    process_contracts: bool,
    /// Indicates whether flows computed for dead nodes are kept for diagnostics.
    retain_dead_flows: bool,
}

impl Default for DataFlowConfig {
    fn default() -> Self {
        Self {
            process_contracts: true,
            retain_dead_flows: true,
        }
    }
}

impl DataFlowConfig {
    /// Get a new, default configuration
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub const fn processes_contracts(&self) -> bool {
        self.process_contracts
    }

    #[inline(always)]
    pub const fn retains_dead_flows(&self) -> bool {
        self.retain_dead_flows
    }

    /// Set whether contract effects are interpreted at call sites. Disabling this
    /// reduces the analysis to the syntactic refinement rules only.
    pub fn set_process_contracts(&mut self, yes: bool) -> &mut Self {
        self.process_contracts = yes;
        self
    }

    /// Set whether flows of dead nodes are retained after the merge that computed them.
    pub fn set_retain_dead_flows(&mut self, yes: bool) -> &mut Self {
        self.retain_dead_flows = yes;
        self
    }
}
