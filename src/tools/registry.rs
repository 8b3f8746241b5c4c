//! Tool registry
//!
//! Explicit table of the tools reachable through the runtime. Built-in
//! tools:
//! - symptom_analyzer: symptom extraction and candidate conditions
//! - risk_calculator: cardiovascular risk score
//! - drug_interactions: pairwise interaction check
//! - literature_search: ranked literature lookup (deep searches are deferred)
//! - specialist_directory: specialty for conditions and red flags
//! - reasoning: reasoning backend (not idempotent)

use crate::backend::ReasoningBackend;
use crate::tools::implementations::{
    DrugInteractionChecker, LiteratureSearch, ReasoningTool, RiskCalculator,
    SpecialistDirectory, SymptomAnalyzer,
};
use crate::tools::types::{Tool, ToolSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Tool registry
#[derive(Clone, Default)]
pub struct ToolRegistry {
    /// Map of tool id to implementation
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool, reasoning served by `backend`
    pub fn with_builtin(backend: Arc<dyn ReasoningBackend>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SymptomAnalyzer::new()));
        registry.register(Arc::new(RiskCalculator::new()));
        registry.register(Arc::new(DrugInteractionChecker::new()));
        registry.register(Arc::new(LiteratureSearch::new()));
        registry.register(Arc::new(SpecialistDirectory::new()));
        registry.register(Arc::new(ReasoningTool::new(backend)));
        registry
    }

    /// Register a tool, replacing any tool with the same id
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().id, tool);
    }

    /// Get tool by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// All tool ids, sorted
    pub fn tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Ids of tools safe to retry automatically
    pub fn idempotent_tools(&self) -> Vec<String> {
        self.specs()
            .into_iter()
            .filter(|spec| spec.idempotent)
            .map(|spec| spec.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TemplateBackend;
    use crate::tools::implementations::{
        DRUG_INTERACTIONS, LITERATURE_SEARCH, REASONING, RISK_CALCULATOR, SPECIALIST_DIRECTORY,
        SYMPTOM_ANALYZER,
    };

    fn builtin() -> ToolRegistry {
        ToolRegistry::with_builtin(Arc::new(TemplateBackend::new()))
    }

    #[test]
    fn test_registry_creation() {
        let registry = builtin();
        assert_eq!(registry.len(), 6);
        assert!(!registry.is_empty());
        assert!(ToolRegistry::new().is_empty());
    }

    #[test]
    fn test_all_tools_registered() {
        let registry = builtin();
        for id in [
            SYMPTOM_ANALYZER,
            RISK_CALCULATOR,
            DRUG_INTERACTIONS,
            LITERATURE_SEARCH,
            SPECIALIST_DIRECTORY,
            REASONING,
        ] {
            assert!(registry.contains(id), "{} missing", id);
            assert_eq!(registry.get(id).unwrap().spec().id, id);
        }
    }

    #[test]
    fn test_idempotent_tools() {
        let idempotent = builtin().idempotent_tools();
        assert_eq!(idempotent.len(), 5);
        assert!(!idempotent.contains(&REASONING.to_string()));
    }
}
