//! JSON tree commands.
//!
//! Runs the state tree operations on files, for checking what a request
//! would do against a saved state:
//!
//! ```bash
//! # Fields of request.json that differ from state.json
//! launchlink diff ~/state.json request.json
//!
//! # Union of two trees (arrays de-duplicated)
//! launchlink merge defaults.json overrides.json
//!
//! # Leaves a request would need confirmed
//! launchlink leaves request.json
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::state::tree::{self, Tree};

/// Reads a JSON object from a file. `~` is expanded.
pub fn read_tree(file_path: &str) -> Result<Tree> {
    let path = shellexpand::tilde(file_path);
    let content = fs::read_to_string(Path::new(path.as_ref()))
        .with_context(|| format!("Failed to read {}", file_path))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as JSON", file_path))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} does not contain a JSON object", file_path),
    }
}

/// Prints the fields of `new_path` that differ from `old_path`.
pub fn diff(old_path: &str, new_path: &str) -> Result<()> {
    let out = tree::diff(&read_tree(old_path)?, &read_tree(new_path)?);
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Prints `a` merged with `b`.
pub fn merge(a_path: &str, b_path: &str) -> Result<()> {
    let out = tree::merge(&read_tree(a_path)?, &read_tree(b_path)?);
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Prints the leaf count of a file's tree.
pub fn leaves(file_path: &str) -> Result<()> {
    println!("{}", tree::leaf_count(&read_tree(file_path)?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, value: &serde_json::Value) -> String {
        let path = dir.path().join(name);
        fs::write(&path, value.to_string()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_read_tree() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "state.json", &json!({"a": {"b": 1}}));
        let tree = read_tree(&path).unwrap();
        assert_eq!(tree::leaf_count(&tree), 1);
    }

    #[test]
    fn test_read_tree_rejects_non_objects() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "list.json", &json!([1, 2]));
        assert!(read_tree(&path).is_err());
        assert!(read_tree(&dir.path().join("missing.json").to_string_lossy()).is_err());
    }

    #[test]
    fn test_commands_run_on_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.json", &json!({"car": "red", "tags": ["x"]}));
        let b = write(&dir, "b.json", &json!({"car": "blue", "tags": ["y"]}));
        diff(&a, &b).unwrap();
        merge(&a, &b).unwrap();
        leaves(&a).unwrap();
    }
}
