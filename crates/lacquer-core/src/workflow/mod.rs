//! The static workflow model and the parser/validator that turn
//! `*.laq.yaml` text into it.

mod model;
mod parser;
mod validator;

pub use model::{
    AgentDef, InputDef, InputType, OnError, Step, StepBody, Workflow, WorkflowBody,
    WorkflowMetadata, SUPPORTED_VERSION,
};
pub use parser::{parse_file, parse_str, referenced_step_ids};
