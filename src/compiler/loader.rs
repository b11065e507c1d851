use anyhow::{Result, Context as AnyhowContext};
use std::fs;
use std::path::Path;
use crate::dsl::FlowPlan;

pub fn load_plan_from_yaml(file_path: impl AsRef<Path>) -> Result<FlowPlan> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path.display()))?;

    parse_plan(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path.display()))
}

pub fn parse_plan(yaml: &str) -> Result<FlowPlan> {
    let plan: FlowPlan = serde_yaml::from_str(yaml)?;
    Ok(plan)
}
