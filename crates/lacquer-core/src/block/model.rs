//! The static shape of a `block.laq.yaml` file, plus the cache metadata
//! the registry keeps alongside it (see `lacquer_blocks::registry`).

use super::super::workflow::{InputDef, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRuntime {
    Native,
    Bash,
    Docker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDef {
    #[serde(rename = "type")]
    pub ty: crate::workflow::InputType,
    #[serde(default)]
    pub description: Option<String>,
}

/// The runtime-specific body of a block. Untagged like `StepBody`, for
/// the same reason: the YAML carries no explicit discriminant beyond
/// the `runtime` field, and the body shape follows from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockBody {
    Script {
        script: String,
    },
    Container {
        image: String,
        #[serde(default)]
        command: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Native {
        workflow: Box<Workflow>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub runtime: BlockRuntime,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, InputDef>,
    #[serde(default)]
    pub outputs: HashMap<String, OutputDef>,
    #[serde(flatten)]
    pub body: BlockBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bash_block() {
        let yaml = r#"
name: add
runtime: bash
inputs:
  a:
    type: number
    required: true
  b:
    type: number
    required: true
outputs:
  sum:
    type: number
script: |
  echo "{\"sum\": $(( $(jq .inputs.a) + $(jq .inputs.b) )) }"
"#;
        let block: Block = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(block.runtime, BlockRuntime::Bash);
        assert!(matches!(block.body, BlockBody::Script { .. }));
        assert_eq!(block.inputs.len(), 2);
    }
}
