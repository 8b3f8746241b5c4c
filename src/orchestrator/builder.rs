//! Orchestrator construction

use super::engine::Orchestrator;
use crate::agents::{Agent, AgentRegistry};
use crate::audit::{AuditDispatcher, AuditSink, TracingAuditSink};
use crate::backend::{self, ReasoningBackend};
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::store::{ConsultationStore, MemoryStore};
use crate::tools::{Tool, ToolRegistry, ToolRuntime};
use std::sync::Arc;

/// Assembles an [`Orchestrator`]
///
/// Defaults: in-memory store, tracing audit sink, the backend selected in
/// configuration, the built-in tools and the five built-in agents.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ConsultationStore>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    backend: Option<Arc<dyn ReasoningBackend>>,
    tools: Vec<Arc<dyn Tool>>,
    agents: Vec<Arc<dyn Agent>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConsultationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Add a tool, replacing a built-in one with the same id
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add an agent, replacing the built-in one of the same kind
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Build the orchestrator; must run inside a tokio runtime
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => backend::from_config(&self.config.backend)?,
        };
        let mut registry = ToolRegistry::with_builtin(backend);
        for tool in self.tools {
            registry.register(tool);
        }
        let tools = Arc::new(ToolRuntime::from_config(registry, &self.config));

        let mut agents = AgentRegistry::with_defaults();
        for agent in self.agents {
            agents.register(agent);
        }

        let store: Arc<dyn ConsultationStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let sink: Arc<dyn AuditSink> = match self.audit_sink {
            Some(sink) => sink,
            None => Arc::new(TracingAuditSink),
        };
        let audit = AuditDispatcher::new(sink);

        Ok(Orchestrator::from_parts(
            self.config,
            agents,
            tools,
            store,
            audit,
        ))
    }
}
