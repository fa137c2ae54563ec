//! Generative judge: weighted-criteria evaluation of one output and ranked
//! comparison of several.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::capabilities::{parse_arguments, to_value, unknown_operation};
use crate::models::{
    ComparisonRequest, ComparisonResponse, ComparisonResult, CoreError, CoreResult,
    EvaluationCriteria, EvaluationRequest, JudgeResponse, ModuleManifest, Score,
};
use crate::providers::GenerativeProvider;
use crate::registry::{CapabilityHandler, ModuleEntrypoint, ModuleServices};
use crate::tools::json::parse_model_json;

pub const MODULE_NAME: &str = "llm_judge";
pub const HANDLER_NAME: &str = "judge_workflow";

const OPERATIONS: &[&str] = &["execute", "execute_comparison"];

pub fn default_criteria() -> Vec<EvaluationCriteria> {
    vec![
        EvaluationCriteria::new("accuracy", 0.3, "Factual accuracy and correctness"),
        EvaluationCriteria::new("relevance", 0.25, "Relevance to the task"),
        EvaluationCriteria::new("completeness", 0.2, "Completeness of the response"),
        EvaluationCriteria::new("clarity", 0.15, "Clarity and coherence"),
        EvaluationCriteria::new("quality", 0.1, "Overall quality"),
    ]
}

pub fn entrypoint(
    services: &ModuleServices,
    _manifest: &ModuleManifest,
) -> CoreResult<ModuleEntrypoint> {
    let workflow = JudgeWorkflow::new(services.providers().generative.clone());
    Ok(ModuleEntrypoint::new()
        .with_handler(HANDLER_NAME, Arc::new(workflow))
        .with_export(HANDLER_NAME))
}

#[derive(Clone)]
pub struct JudgeWorkflow {
    generative: Arc<dyn GenerativeProvider>,
}

impl JudgeWorkflow {
    pub fn new(generative: Arc<dyn GenerativeProvider>) -> Self {
        Self { generative }
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> CoreResult<JudgeResponse> {
        let criteria = criteria_or_default(request.criteria.as_deref());
        let prompt = evaluation_prompt(request, &criteria)?;
        let reply = self.ask(&prompt).await?;

        Ok(JudgeResponse {
            overall_score: number(&reply, "overall_score"),
            scores: scores(&reply, &criteria),
            reasoning: text(&reply, "reasoning"),
            strengths: strings(&reply, "strengths"),
            weaknesses: strings(&reply, "weaknesses"),
            recommendations: strings(&reply, "recommendations"),
            evaluation_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub async fn compare(&self, request: &ComparisonRequest) -> CoreResult<ComparisonResponse> {
        if request.outputs.len() < 2 {
            return Err(CoreError::invalid_input(
                "At least 2 outputs required for comparison",
            ));
        }

        let criteria = criteria_or_default(request.criteria.as_deref());
        let prompt = comparison_prompt(request, &criteria);
        let reply = self.ask(&prompt).await?;

        let results = reply
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|result| ComparisonResult {
                output_index: index(result, "output_index"),
                overall_score: number(result, "overall_score"),
                scores: scores(result, &criteria),
                reasoning: text(result, "reasoning"),
                rank: request
                    .rank
                    .then(|| u32::try_from(index(result, "rank")).unwrap_or(u32::MAX)),
            })
            .collect();

        Ok(ComparisonResponse {
            results,
            best_output_index: index(&reply, "best_output_index"),
            summary: text(&reply, "summary"),
            comparison_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn ask(&self, prompt: &str) -> CoreResult<Value> {
        let reply = self.generative.generate(prompt).await?;
        let parsed = parse_model_json(&reply).map_err(|error| {
            CoreError::parse_failure(format!("judge reply is not valid JSON: {error}"))
        })?;
        if !parsed.is_object() {
            return Err(CoreError::parse_failure("judge reply is not a JSON object"));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl CapabilityHandler for JudgeWorkflow {
    fn operations(&self) -> &'static [&'static str] {
        OPERATIONS
    }

    async fn invoke(
        &self,
        operation: &str,
        arguments: Option<Map<String, Value>>,
    ) -> CoreResult<Value> {
        match operation {
            "execute" => {
                let request: EvaluationRequest = parse_arguments(operation, arguments)?;
                to_value(&self.evaluate(&request).await?)
            }
            "execute_comparison" => {
                let request: ComparisonRequest = parse_arguments(operation, arguments)?;
                to_value(&self.compare(&request).await?)
            }
            _ => Err(unknown_operation(MODULE_NAME, operation)),
        }
    }
}

fn criteria_or_default(criteria: Option<&[EvaluationCriteria]>) -> Vec<EvaluationCriteria> {
    match criteria {
        Some(criteria) if !criteria.is_empty() => criteria.to_vec(),
        _ => default_criteria(),
    }
}

fn criteria_lines(criteria: &[EvaluationCriteria]) -> String {
    criteria
        .iter()
        .map(|criterion| {
            format!(
                "- {} (weight: {}): {}",
                criterion.name,
                criterion.weight,
                criterion.description.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn evaluation_prompt(
    request: &EvaluationRequest,
    criteria: &[EvaluationCriteria],
) -> CoreResult<String> {
    let mut prompt = format!(
        "You are an expert judge evaluating content. Evaluate the following content based on the criteria provided.\n\n\
         Task Description: {}\n\n\
         Evaluation Criteria:\n{}\n\n\
         Content to Evaluate:\n{}\n",
        request
            .task_description
            .as_deref()
            .unwrap_or("General content evaluation"),
        criteria_lines(criteria),
        request.content,
    );

    if let Some(reference) = &request.reference {
        prompt.push_str(&format!("\nReference Content (for comparison):\n{reference}\n"));
    }
    if let Some(context) = &request.context {
        let rendered = serde_json::to_string_pretty(context).map_err(|error| {
            CoreError::invalid_input(format!("evaluation context is not serializable: {error}"))
        })?;
        prompt.push_str(&format!("\nAdditional Context:\n{rendered}\n"));
    }

    prompt.push_str(
        r#"
Please provide:
1. A score (0.0-1.0) for each criteria
2. Reasoning for each score
3. Overall score (weighted average)
4. Strengths identified
5. Weaknesses identified
6. Recommendations for improvement

Respond in JSON format with this structure:
{
    "scores": [
        {"criteria": "accuracy", "score": 0.85, "reasoning": "...", "weight": 0.3}
    ],
    "overall_score": 0.82,
    "reasoning": "Overall evaluation reasoning...",
    "strengths": ["strength1", "strength2"],
    "weaknesses": ["weakness1", "weakness2"],
    "recommendations": ["recommendation1", "recommendation2"]
}
"#,
    );
    Ok(prompt)
}

fn comparison_prompt(request: &ComparisonRequest, criteria: &[EvaluationCriteria]) -> String {
    let outputs = request
        .outputs
        .iter()
        .enumerate()
        .map(|(index, output)| format!("Output {}:\n{output}", index + 1))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an expert judge comparing multiple outputs. Evaluate and compare the following outputs based on the criteria provided.\n\n\
         Task Description: {}\n\n\
         Evaluation Criteria:\n{}\n\n\
         Outputs to Compare:\n{outputs}\n\n\
         Please evaluate each output and provide:\n\
         1. A score (0.0-1.0) for each criteria for each output\n\
         2. Reasoning for each output\n\
         3. Overall score for each output\n\
         4. Ranking (if requested)\n\
         5. Summary comparison\n\n\
         Respond in JSON format with this structure:\n\
         {{\n    \"results\": [\n        {{\"output_index\": 0, \"overall_score\": 0.85, \"scores\": [{{\"criteria\": \"accuracy\", \"score\": 0.9, \"reasoning\": \"...\", \"weight\": 0.3}}], \"reasoning\": \"...\", \"rank\": 1}}\n    ],\n    \"best_output_index\": 0,\n    \"summary\": \"Summary of comparison...\"\n}}\n",
        request
            .task_description
            .as_deref()
            .unwrap_or("General content comparison"),
        criteria_lines(criteria),
    )
}

/// Weight comes from the matching requested criterion, then the reply, then 1.0.
fn scores(value: &Value, criteria: &[EvaluationCriteria]) -> Vec<Score> {
    let Some(entries) = value.get("scores").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .map(|entry| {
            let name = entry
                .get("criteria")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let weight = criteria
                .iter()
                .find(|criterion| criterion.name == name)
                .map(|criterion| criterion.weight)
                .or_else(|| entry.get("weight").and_then(Value::as_f64))
                .unwrap_or(1.0);
            Score {
                score: number(entry, "score"),
                reasoning: text(entry, "reasoning"),
                criteria: name,
                weight,
            }
        })
        .collect()
}

fn number(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::Number(number)) => number.as_f64().unwrap_or_default(),
        Some(Value::String(raw)) => raw.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

fn index(value: &Value, key: &str) -> usize {
    let raw = number(value, key);
    if raw.is_finite() && raw > 0.0 {
        raw as usize
    } else {
        0
    }
}

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn strings(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
