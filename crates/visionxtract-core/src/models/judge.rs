use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl EvaluationCriteria {
    pub fn new(name: &str, weight: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            weight,
            description: Some(description.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub criteria: String,
    pub score: f64,
    pub reasoning: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub content: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub criteria: Option<Vec<EvaluationCriteria>>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgeResponse {
    pub overall_score: f64,
    pub scores: Vec<Score>,
    pub reasoning: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub evaluation_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRequest {
    pub outputs: Vec<String>,
    #[serde(default)]
    pub criteria: Option<Vec<EvaluationCriteria>>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default = "crate::models::face::default_true")]
    pub rank: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub output_index: usize,
    pub overall_score: f64,
    pub scores: Vec<Score>,
    pub reasoning: String,
    #[serde(default)]
    pub rank: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResponse {
    pub results: Vec<ComparisonResult>,
    pub best_output_index: usize,
    pub summary: String,
    pub comparison_id: String,
}

fn default_weight() -> f64 {
    1.0
}
