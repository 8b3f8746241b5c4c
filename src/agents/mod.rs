//! Agent set
//!
//! Closed set of reasoning units dispatched through an explicit table.
//! Agents read the session context and call tools; they never write
//! context themselves. Their findings come back as a delta that the
//! orchestrator merges after the task returns.

pub mod diagnosis;
pub mod research;
pub mod router;
pub mod treatment;
pub mod triage;
pub mod types;

pub use diagnosis::DiagnosisAgent;
pub use research::ResearchAgent;
pub use router::SpecialistRouterAgent;
pub use treatment::TreatmentAgent;
pub use triage::TriageAgent;
pub use types::{AgentInput, AgentOutput, AgentResult, AgentStep, Suspension};

use crate::backend::Reasoning;
use crate::context::SessionContext;
use crate::errors::{EngineError, Result};
use crate::tools::implementations::REASONING;
use crate::tools::{ToolInvocation, ToolRuntime};
use crate::types::AgentKind;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Tools that must be available before the agent is dispatched
    fn required_tools(&self) -> &'static [&'static str];

    async fn handle(
        &self,
        ctx: &SessionContext,
        input: &AgentInput,
        tools: &ToolRuntime,
    ) -> Result<AgentStep>;

    /// Continue a suspended task from its checkpoint
    async fn resume(
        &self,
        _ctx: &SessionContext,
        input: &AgentInput,
        _suspension: &Suspension,
        _tools: &ToolRuntime,
    ) -> Result<AgentStep> {
        Err(EngineError::InvalidResume {
            task_id: input.task_id.clone(),
            reason: format!("{} tasks never suspend", self.kind()),
        })
    }
}

/// Dispatch table from agent kind to implementation
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the five built-in agents
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TriageAgent::new()));
        registry.register(Arc::new(DiagnosisAgent::new()));
        registry.register(Arc::new(TreatmentAgent::new()));
        registry.register(Arc::new(ResearchAgent::new()));
        registry.register(Arc::new(SpecialistRouterAgent::new()));
        registry
    }

    /// Register an agent, replacing the current one of the same kind
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn get(&self, kind: AgentKind) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no agent registered for {}", kind)))
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Tool calls made during one agent step
#[derive(Debug, Default)]
pub(crate) struct ToolTrail {
    used: Vec<String>,
}

impl ToolTrail {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_used(used: Vec<String>) -> Self {
        Self { used }
    }

    /// Invoke through the runtime and record the tool id
    pub(crate) async fn invoke(
        &mut self,
        tools: &ToolRuntime,
        tool_id: &str,
        params: Value,
    ) -> Result<ToolInvocation> {
        let invocation = tools.invoke(tool_id, params, None).await?;
        if !self.used.iter().any(|t| t == tool_id) {
            self.used.push(tool_id.to_string());
        }
        Ok(invocation)
    }

    /// Narrative and confidence from the reasoning backend
    pub(crate) async fn reason(
        &mut self,
        tools: &ToolRuntime,
        agent: AgentKind,
        prompt: String,
        context: Value,
    ) -> Result<Reasoning> {
        let invocation = self
            .invoke(
                tools,
                REASONING,
                json!({"agent": agent, "prompt": prompt, "context": context}),
            )
            .await?;
        let reasoning: Reasoning = serde_json::from_value(invocation.output().clone())?;
        Ok(Reasoning::new(reasoning.text, reasoning.confidence))
    }

    pub(crate) fn into_used(self) -> Vec<String> {
        self.used
    }
}

/// Compact JSON view of the context handed to the reasoning backend
pub(crate) fn reasoning_context(ctx: &SessionContext) -> Value {
    json!({
        "age": ctx.patient.age,
        "sex": ctx.patient.sex,
        "symptoms": ctx.symptom_list(),
        "red_flags": ctx.findings.red_flags,
        "conditions": ctx.findings.conditions(),
        "medications": ctx.patient.current_medications,
        "history": ctx.patient.medical_history,
    })
}
