//! Repository inspection tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::base::Tool;

/// Tool to list directories and read files under a repository root.
///
/// Paths are resolved relative to the root and may not escape it; a
/// traversal attempt is an execution error, not a silent clamp.
pub struct RepoTool {
    root: PathBuf,
}

impl RepoTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `rel` against the root and reject escapes.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("repository root {}", self.root.display()))?;
        let target = root
            .join(rel)
            .canonicalize()
            .with_context(|| format!("path {:?}", rel))?;
        if !target.starts_with(&root) {
            bail!("path {:?} escapes the repository root", rel);
        }
        Ok(target)
    }
}

#[async_trait]
impl Tool for RepoTool {
    fn name(&self) -> &str {
        "repo"
    }

    fn description(&self) -> &str {
        "Interact with the repository. Use this to list directories and read files."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the repository root",
                    "default": "."
                },
                "contents": {
                    "type": "boolean",
                    "description": "Read the file at path instead of listing it",
                    "default": false
                }
            }
        })
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>) -> Result<String> {
        let path = match params.get("path") {
            None => ".",
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.as_str(),
            Some(serde_json::Value::String(_)) => ".",
            Some(other) => bail!("parameter 'path' must be a string, got {}", other),
        };
        let contents = match params.get("contents") {
            None => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(other) => bail!("parameter 'contents' must be a boolean, got {}", other),
        };

        let target = self.resolve(path)?;

        if contents {
            let content = tokio::fs::read_to_string(&target)
                .await
                .with_context(|| format!("read {:?}", path))?;
            let response = serde_json::json!({ "path": path, "content": content });
            return Ok(response.to_string());
        }

        let mut dir = tokio::fs::read_dir(&target)
            .await
            .with_context(|| format!("list {:?}", path))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let response = serde_json::json!({ "path": path, "entries": entries });
        Ok(response.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, RepoTool) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        fs::write(dir.path().join("README.md"), "# readme\n").unwrap();
        let tool = RepoTool::new(dir.path());
        (dir, tool)
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_list_root_sorted_with_dir_suffix() {
        let (_dir, tool) = fixture();
        let output = tool.execute(HashMap::new()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["path"], ".");
        let entries: Vec<&str> = parsed["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(entries, ["README.md", "src/"]);
    }

    #[tokio::test]
    async fn test_read_file_contents() {
        let (_dir, tool) = fixture();
        let output = tool
            .execute(params(&[
                ("path", serde_json::json!("src/lib.rs")),
                ("contents", serde_json::json!(true)),
            ]))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["path"], "src/lib.rs");
        assert_eq!(parsed["content"], "pub fn f() {}\n");
    }

    #[tokio::test]
    async fn test_missing_path_is_error() {
        let (_dir, tool) = fixture();
        let err = tool
            .execute(params(&[("path", serde_json::json!("no/such/file"))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no/such/file"));
    }

    #[tokio::test]
    async fn test_traversal_outside_root_rejected() {
        let (_dir, tool) = fixture();
        let result = tool
            .execute(params(&[
                ("path", serde_json::json!("../../etc/passwd")),
                ("contents", serde_json::json!(true)),
            ]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wrong_param_type_fails_fast() {
        let (_dir, tool) = fixture();
        let err = tool
            .execute(params(&[("contents", serde_json::json!("yes"))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'contents' must be a boolean"));
    }
}
