/// Task handed to a decision process: prompt text plus the ordered tool names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskDescription {
    pub prompt: String,
    pub steps: Vec<String>,
}

/// Builds a [`TaskDescription`] that enumerates the required steps in order.
///
/// A custom template may use `{ordered_steps}` and any registered variable.
#[derive(Clone, Debug, Default)]
pub struct TaskPrompt {
    objective: String,
    parameters: Vec<(String, String)>,
    variables: Vec<(String, String)>,
    steps: Vec<(String, String)>,
    notes: Vec<String>,
    template: Option<String>,
}

impl TaskPrompt {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }

    pub fn parameter(mut self, label: &str, value: impl Into<String>) -> Self {
        self.parameters.push((label.to_string(), value.into()));
        self
    }

    pub fn variable(mut self, name: &str, value: impl Into<String>) -> Self {
        self.variables.push((name.to_string(), value.into()));
        self
    }

    pub fn step(mut self, tool: &str, instruction: impl Into<String>) -> Self {
        self.steps.push((tool.to_string(), instruction.into()));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn template(mut self, template: Option<String>) -> Self {
        self.template = template;
        self
    }

    pub fn build(self) -> TaskDescription {
        let ordered_steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, (_, instruction))| format!("{}. {instruction}", index + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = match &self.template {
            Some(template) => self
                .variables
                .iter()
                .fold(
                    template.replace("{ordered_steps}", &ordered_steps),
                    |prompt, (name, value)| prompt.replace(&format!("{{{name}}}"), value),
                ),
            None => {
                let mut lines = vec![self.objective.clone(), String::new()];
                lines.push("Task parameters:".to_string());
                lines.extend(
                    self.parameters
                        .iter()
                        .map(|(label, value)| format!("- {label}: {value}")),
                );
                lines.push(String::new());
                lines.push("You MUST execute ALL of these steps in order:".to_string());
                lines.push(ordered_steps);
                lines.push(String::new());
                lines.extend(self.notes.iter().cloned());
                lines.push(format!(
                    "You must complete ALL {} steps to finish the task.",
                    self.steps.len()
                ));
                lines.join("\n")
            }
        };

        TaskDescription {
            prompt,
            steps: self.steps.into_iter().map(|(tool, _)| tool).collect(),
        }
    }
}
