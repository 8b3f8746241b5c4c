//! Research: ranked literature results
//!
//! Requests for a comprehensive or systematic review start a deep search.
//! The quick results found so far go into the partial delta and the task
//! suspends until the deep search is fetched on resume.

use super::types::{AgentInput, AgentOutput, AgentResult, AgentStep, Suspension};
use super::{reasoning_context, Agent, ToolTrail};
use crate::context::{Findings, SessionContext};
use crate::errors::{EngineError, Result};
use crate::tools::implementations::{LITERATURE_SEARCH, REASONING};
use crate::tools::ToolRuntime;
use crate::types::AgentKind;
use async_trait::async_trait;
use serde_json::{json, Value};

const DEEP_MARKERS: &[&str] = &["comprehensive", "systematic", "in-depth", "in depth"];
/// Results needed for full confidence
const SATURATION: f64 = 3.0;

#[derive(Debug, Default)]
pub struct ResearchAgent;

impl ResearchAgent {
    pub fn new() -> Self {
        Self
    }

    pub fn wants_deep_search(message: &str) -> bool {
        let lower = message.to_lowercase();
        DEEP_MARKERS.iter().any(|m| lower.contains(m))
    }

    fn query(ctx: &SessionContext, message: &str) -> String {
        let mut query = message.to_string();
        for condition in ctx.findings.conditions().iter().take(3) {
            query.push(' ');
            query.push_str(condition);
        }
        for symptom in ctx.findings.symptoms.iter().take(3) {
            query.push(' ');
            query.push_str(symptom);
        }
        query
    }

    fn citations(out: &Value) -> Vec<String> {
        out.get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .map(|r| {
                        format!(
                            "{} ({}, {})",
                            r["title"].as_str().unwrap_or("untitled"),
                            r["journal"].as_str().unwrap_or("unknown journal"),
                            r["year"]
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn confidence(backend: f64, results: usize) -> f64 {
        backend * (0.5 + 0.5 * (results as f64 / SATURATION).min(1.0))
    }

    async fn finish(
        ctx: &SessionContext,
        input: &AgentInput,
        tools: &ToolRuntime,
        mut trail: ToolTrail,
        citations: Vec<String>,
        deep: bool,
    ) -> Result<AgentStep> {
        let reasoning = trail
            .reason(
                tools,
                AgentKind::Research,
                format!("{}\n{} sources found", input.message, citations.len()),
                reasoning_context(ctx),
            )
            .await?;

        let content = if citations.is_empty() {
            format!("No matching literature was found. {}", reasoning.text)
        } else {
            format!(
                "Relevant literature: {}. {}",
                citations
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("[{}] {}", i + 1, c))
                    .collect::<Vec<_>>()
                    .join(" "),
                reasoning.text
            )
        };

        let mut findings = Findings::new();
        findings.literature.extend(citations.iter().cloned());

        let result = AgentResult::new(
            AgentKind::Research,
            content,
            Self::confidence(reasoning.confidence, citations.len()),
            AgentOutput::Research {
                results: citations,
                deep,
            },
        )
        .with_findings(findings)
        .with_next_steps(vec![
            "Discuss the evidence with your clinician".to_string(),
        ])
        .with_tools(trail.into_used());

        Ok(AgentStep::Complete(result))
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Research
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &[LITERATURE_SEARCH, REASONING]
    }

    async fn handle(
        &self,
        ctx: &SessionContext,
        input: &AgentInput,
        tools: &ToolRuntime,
    ) -> Result<AgentStep> {
        let mut trail = ToolTrail::new();
        let query = Self::query(ctx, &input.message);

        let quick = trail
            .invoke(tools, LITERATURE_SEARCH, json!({"query": query}))
            .await?;
        let quick_citations = Self::citations(quick.output());

        if !Self::wants_deep_search(&input.message) {
            return Self::finish(ctx, input, tools, trail, quick_citations, false).await;
        }

        let pending = trail
            .invoke(tools, LITERATURE_SEARCH, json!({"query": query, "deep": true}))
            .await?;
        let job_id = pending
            .output()
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ToolInvocation {
                tool: LITERATURE_SEARCH.to_string(),
                message: "deep search returned no job id".to_string(),
            })?
            .to_string();

        let mut partial = Findings::new();
        partial.literature.extend(quick_citations);

        Ok(AgentStep::Suspend(Suspension {
            reason: "awaiting deep literature search".to_string(),
            state: json!({"job_id": job_id, "query": query}),
            partial,
            tools_used: trail.into_used(),
        }))
    }

    async fn resume(
        &self,
        ctx: &SessionContext,
        input: &AgentInput,
        suspension: &Suspension,
        tools: &ToolRuntime,
    ) -> Result<AgentStep> {
        let field = |name: &str| {
            suspension
                .state
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| EngineError::InvalidResume {
                    task_id: input.task_id.clone(),
                    reason: format!("checkpoint state is missing {}", name),
                })
        };
        let job_id = field("job_id")?;
        let query = field("query")?;

        let mut trail = ToolTrail::from_used(suspension.tools_used.clone());
        let done = trail
            .invoke(
                tools,
                LITERATURE_SEARCH,
                json!({"query": query, "job_id": job_id}),
            )
            .await?;
        let citations = Self::citations(done.output());
        Self::finish(ctx, input, tools, trail, citations, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use crate::types::{MessageType, PatientContext};

    #[test]
    fn test_deep_markers() {
        assert!(ResearchAgent::wants_deep_search("I want a Comprehensive review"));
        assert!(ResearchAgent::wants_deep_search("systematic evidence please"));
        assert!(!ResearchAgent::wants_deep_search("any papers on angina?"));
    }

    #[test]
    fn test_confidence_saturates() {
        assert!((ResearchAgent::confidence(0.8, 0) - 0.4).abs() < 1e-9);
        assert!((ResearchAgent::confidence(0.8, 3) - 0.8).abs() < 1e-9);
        assert!((ResearchAgent::confidence(0.8, 6) - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_quick_search_completes() {
        let ctx = SessionContext::new(PatientContext::new());
        let input = AgentInput::new("t", "c", "papers on angina and chest pain", MessageType::Research);
        let step = ResearchAgent::new()
            .handle(&ctx, &input, &test_support::runtime())
            .await
            .unwrap();
        let AgentStep::Complete(result) = step else {
            panic!("quick search should complete");
        };
        assert!(!result.findings.literature.is_empty());
        assert!(matches!(result.output, AgentOutput::Research { deep: false, .. }));
    }

    #[tokio::test]
    async fn test_deep_search_suspends_then_resumes() {
        let tools = test_support::runtime();
        let ctx = SessionContext::new(PatientContext::new());
        let input = AgentInput::new(
            "t",
            "c",
            "comprehensive review of pneumonia treatment",
            MessageType::Research,
        );
        let agent = ResearchAgent::new();

        let AgentStep::Suspend(suspension) = agent.handle(&ctx, &input, &tools).await.unwrap() else {
            panic!("deep search should suspend");
        };
        assert!(suspension.state["job_id"].is_string());
        assert_eq!(suspension.tools_used, vec![LITERATURE_SEARCH.to_string()]);

        let AgentStep::Complete(result) = agent
            .resume(&ctx, &input, &suspension, &tools)
            .await
            .unwrap()
        else {
            panic!("resume should complete");
        };
        assert!(matches!(result.output, AgentOutput::Research { deep: true, .. }));
        assert!(result.tools_used.contains(&REASONING.to_string()));
    }

    #[tokio::test]
    async fn test_resume_with_bad_state() {
        let suspension = Suspension {
            reason: "x".to_string(),
            state: json!({}),
            partial: Findings::new(),
            tools_used: vec![],
        };
        let ctx = SessionContext::new(PatientContext::new());
        let input = AgentInput::new("t", "c", "x", MessageType::Research);
        let err = ResearchAgent::new()
            .resume(&ctx, &input, &suspension, &test_support::runtime())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidResume { .. }));
    }
}
