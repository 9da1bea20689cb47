//! The static (parsed, pre-execution) shape of a `*.laq.yaml` workflow
//! file. Nothing here executes anything; see `lacquer_engine` for that.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The only workflow schema version this engine accepts. A workflow
/// declaring any other `version` is rejected at parse time.
pub const SUPPORTED_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub version: String,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub inputs: HashMap<String, InputDef>,
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub agents: HashMap<String, AgentDef>,
    pub workflow: WorkflowBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowBody {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDef {
    #[serde(rename = "type")]
    pub ty: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// `on_error` policy for a step. Default is [`OnError::Fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Fail,
    Continue,
    Skip,
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Fail
    }
}

/// The body of a step: exactly one kind. Deserialized with `serde`'s
/// untagged representation so the YAML stays flat (a step has `agent` +
/// `prompt`, or `uses` + `with`, or `action` + `parameters`, or `run`,
/// never a wrapper tag), with validation of "at most one kind" done
/// separately in [`crate::workflow::validator`] since serde's untagged
/// matching alone can't express that constraint precisely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepBody {
    Agent {
        agent: String,
        prompt: String,
        #[serde(default)]
        tools: Vec<String>,
    },
    Block {
        uses: String,
        #[serde(default, rename = "with")]
        with_inputs: HashMap<String, serde_json::Value>,
    },
    Action {
        action: String,
        #[serde(default)]
        parameters: HashMap<String, serde_json::Value>,
    },
    Script {
        run: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(flatten)]
    pub body: StepBody,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_step_body() {
        let yaml = r#"
id: greet
agent: writer
prompt: "hello"
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(step.body, StepBody::Agent { .. }));
        assert_eq!(step.on_error, OnError::Fail);
    }

    #[test]
    fn parses_block_step_body() {
        let yaml = r#"
id: sum
uses: ./blocks/add
with:
  a: 1
  b: 2
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        match step.body {
            StepBody::Block { uses, with_inputs } => {
                assert_eq!(uses, "./blocks/add");
                assert_eq!(with_inputs.len(), 2);
            }
            other => panic!("expected Block body, got {other:?}"),
        }
    }
}
