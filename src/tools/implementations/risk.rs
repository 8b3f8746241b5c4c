//! risk_calculator: simplified cardiovascular risk score

use super::RISK_CALCULATOR;
use crate::errors::{EngineError, Result};
use crate::tools::types::{Tool, ToolSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct RiskInput {
    age: Option<u32>,
    #[serde(default)]
    sex: Option<String>,
    systolic_bp: Option<u32>,
    cholesterol: Option<u32>,
    hdl_cholesterol: Option<u32>,
    #[serde(default)]
    smoker: bool,
    #[serde(default)]
    diabetic: bool,
}

#[derive(Debug, Default)]
pub struct RiskCalculator;

impl RiskCalculator {
    pub fn new() -> Self {
        Self
    }

    fn score(input: &RiskInput) -> i32 {
        let mut score = 0;
        if input.age.unwrap_or(50) > 55 {
            score += 2;
        }
        if input.systolic_bp.unwrap_or(120) > 140 {
            score += 2;
        }
        if input.cholesterol.unwrap_or(200) > 240 {
            score += 1;
        }
        if input.hdl_cholesterol.unwrap_or(50) < 40 {
            score += 1;
        }
        if input.smoker {
            score += 2;
        }
        if input.diabetic {
            score += 2;
        }
        if input
            .sex
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("female"))
            .unwrap_or(false)
        {
            score -= 1;
        }
        score
    }

    fn level(percentage: i32) -> &'static str {
        match percentage {
            p if p < 10 => "low",
            p if p < 20 => "moderate",
            p if p < 30 => "high",
            _ => "very_high",
        }
    }
}

#[async_trait]
impl Tool for RiskCalculator {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            RISK_CALCULATOR,
            "Estimate cardiovascular risk from age, blood pressure, lipids, smoking and diabetes",
            json!({
                "type": "object",
                "properties": {
                    "age": {"type": "integer"},
                    "sex": {"type": "string"},
                    "systolic_bp": {"type": "integer"},
                    "cholesterol": {"type": "integer"},
                    "hdl_cholesterol": {"type": "integer"},
                    "smoker": {"type": "boolean"},
                    "diabetic": {"type": "boolean"}
                }
            }),
            true,
        )
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let input: RiskInput = serde_json::from_value(params).map_err(|e| {
            EngineError::ToolInvocation {
                tool: RISK_CALCULATOR.to_string(),
                message: format!("invalid parameters: {}", e),
            }
        })?;

        let score = Self::score(&input);
        let percentage = (score * 5).clamp(0, 99);

        Ok(json!({
            "score": score,
            "percentage": percentage,
            "risk_level": Self::level(percentage),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_high_risk_profile() {
        let out = RiskCalculator::new()
            .call(json!({
                "age": 64,
                "systolic_bp": 150,
                "smoker": true,
                "diabetic": true
            }))
            .await
            .unwrap();
        assert_eq!(out["score"], 8);
        assert_eq!(out["percentage"], 40);
        assert_eq!(out["risk_level"], "very_high");
    }

    #[tokio::test]
    async fn test_defaults_are_low() {
        let out = RiskCalculator::new()
            .call(json!({"age": 30, "sex": "female"}))
            .await
            .unwrap();
        assert_eq!(out["score"], -1);
        assert_eq!(out["percentage"], 0);
        assert_eq!(out["risk_level"], "low");
    }

    #[tokio::test]
    async fn test_rejects_malformed_params() {
        let err = RiskCalculator::new()
            .call(json!({"age": "old"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolInvocation { .. }));
    }
}
