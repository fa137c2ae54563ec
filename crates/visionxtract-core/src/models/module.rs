use serde::Deserialize;

/// Optional per-module `config.yaml`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ModuleManifest {
    #[serde(default)]
    pub module: ModuleSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub task: TaskSection,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ModuleSection {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AgentSection {
    pub name: Option<String>,
    pub model: Option<String>,
    pub app_name: Option<String>,
    pub max_events: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TaskSection {
    #[serde(default)]
    pub steps: Vec<String>,
    pub prompt_template: Option<String>,
}

impl ModuleManifest {
    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid manifest with every section defaulted.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}
