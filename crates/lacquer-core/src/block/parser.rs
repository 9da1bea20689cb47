use super::model::{Block, BlockBody, BlockRuntime};
use crate::error::{LacquerError, Result};
use std::path::Path;

pub fn parse_str(yaml: &str, source_name: &str) -> Result<Block> {
    let block: Block = serde_yaml::from_str(yaml).map_err(|e| LacquerError::ParseError {
        file: source_name.to_string(),
        message: e.to_string(),
        source: Some(e),
    })?;
    validate_runtime_body(&block, source_name)?;
    Ok(block)
}

pub fn parse_file(path: &Path) -> Result<Block> {
    let text = std::fs::read_to_string(path)?;
    parse_str(&text, &path.display().to_string())
}

/// A block's declared `runtime` must agree with the body shape parsed
/// from the rest of the document (a `bash` block has a `script`, a
/// `docker` block has an `image`, a `native` block has a `workflow`).
fn validate_runtime_body(block: &Block, source_name: &str) -> Result<()> {
    let mismatch = match (block.runtime, &block.body) {
        (BlockRuntime::Bash, BlockBody::Script { .. }) => false,
        (BlockRuntime::Docker, BlockBody::Container { .. }) => false,
        (BlockRuntime::Native, BlockBody::Native { .. }) => false,
        _ => true,
    };
    if mismatch {
        return Err(LacquerError::SchemaError {
            file: source_name.to_string(),
            message: format!(
                "block '{}' declares runtime {:?} but its body doesn't match",
                block.name, block.runtime
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_runtime_body_mismatch() {
        let yaml = r#"
name: bad
runtime: docker
script: "echo hi"
"#;
        let err = parse_str(yaml, "block.laq.yaml").unwrap_err();
        assert!(matches!(err, LacquerError::SchemaError { .. }));
    }

    #[test]
    fn accepts_matching_bash_block() {
        let yaml = r#"
name: ok
runtime: bash
script: "echo hi"
"#;
        assert!(parse_str(yaml, "block.laq.yaml").is_ok());
    }
}
