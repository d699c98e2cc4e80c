use derive_builder::Builder;

use crate::bdd::Bdd;
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::synthesis::heuristic::HeuristicKind;
use crate::synthesis::module::ModuleBank;
use crate::synthesis::search::SearchEngine;
use crate::synthesis::target::TargetType;

#[derive(Clone, Debug, Builder)]
pub struct SearchParams {
    pub seed: i64,
    pub heuristic: HeuristicKind,
    /// The first target is where every plan starts.
    pub targets: Vec<TargetType>,
    /// Hoists allowed along one plan; `None` is unbounded.
    #[builder(default)]
    pub max_reordered: Option<usize>,
    /// Plans popped before the search gives up and reports what it has.
    #[builder(default)]
    pub max_expansions: Option<usize>,
}

impl SearchParams {
    /// A search over the full module bank of every configured target.
    pub fn build<'a>(&self, bdd: Bdd, solver: &'a SolverToolbox) -> Result<SearchEngine<'a>, SynapseError> {
        let bank = ModuleBank::new(&self.targets);
        self.build_with(bdd, bank, solver)
    }

    pub fn build_with<'a>(
        &self,
        bdd: Bdd,
        bank: ModuleBank,
        solver: &'a SolverToolbox,
    ) -> Result<SearchEngine<'a>, SynapseError> {
        if self.targets.is_empty() || bank.is_empty() {
            return Err(SynapseError::EmptySearch);
        }
        Ok(SearchEngine::new(self, bdd, bank, solver))
    }
}
