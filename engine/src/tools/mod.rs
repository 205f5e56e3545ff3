pub mod filesystem;

pub use filesystem::FilesystemTool;

use std::path::PathBuf;
use tracing::{debug, warn};

/// The fixed tool set offered to the model
pub const TOOL_NAMES: [&str; 5] = [
    "write_file",
    "read_file",
    "modify_file",
    "list_dir",
    "delete_file",
];

/// Registry of the file tools available to the tool-augmented client.
///
/// Bound to one application's artifact directory. The set is closed: a name
/// outside `TOOL_NAMES` yields a synthetic error result instead of failing.
pub struct ToolRegistry {
    fs: FilesystemTool,
}

impl ToolRegistry {
    pub fn new(workspace: PathBuf) -> anyhow::Result<Self> {
        Ok(Self {
            fs: FilesystemTool::new(workspace)?,
        })
    }

    pub fn workspace(&self) -> &std::path::Path {
        self.fs.workspace()
    }

    /// Dispatch a tool call by name, parsing arguments from JSON.
    ///
    /// Returns the tool output as a string. Errors are returned as text so the
    /// model can see them and self-correct.
    pub async fn dispatch(&self, name: &str, arguments_json: &str) -> String {
        debug!("Dispatching tool '{}'", name);

        if !TOOL_NAMES.contains(&name) {
            return unknown_tool(name);
        }

        let args: serde_json::Value = match serde_json::from_str(arguments_json) {
            Ok(v) => v,
            Err(e) => {
                return format!("ERROR: Failed to parse arguments JSON: {}", e);
            }
        };

        let arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or_default();

        let result = match name {
            "read_file" => self.fs.read_file(arg("path")).await,
            "write_file" => self.fs.write_file(arg("path"), arg("content")).await,
            "modify_file" => {
                self.fs
                    .modify_file(arg("path"), arg("old_content"), arg("new_content"))
                    .await
            }
            "list_dir" => self.fs.list_dir(arg("path")).await,
            "delete_file" => self.fs.delete_file(arg("path")).await,
            other => return unknown_tool(other),
        };

        match result {
            Ok(output) => output,
            Err(e) => format!("ERROR: {}", e),
        }
    }

    /// System prompt describing the project task and the tool protocol.
    pub fn system_prompt(&self) -> String {
        [
            "You are a senior front-end engineer building a Vue 3 + Vite project.",
            "The project root is your working directory. Create every file the project needs, including package.json with \"build\": \"vite build\", index.html, vite.config.js and src/main.js.",
            "",
            "IMPORTANT RULES:",
            "1. To call a tool, your ENTIRE response must be ONLY the JSON object, with no text before or after.",
            "2. Call one tool per response and wait for its result.",
            "3. When the project is complete, reply with a short plain-text summary and no JSON.",
            "4. Paths are relative to the project root. Never touch node_modules, dist, .git or .env.",
            "",
            "Tool call format:",
            r#"{"function": "tool_name", "arguments": {"arg1": "value1"}}"#,
            "",
            "Available tools:",
            "",
            "## write_file",
            "Create or overwrite a file (parent directories are created).",
            r#"Arguments: {"path": "src/App.vue", "content": "file contents"}"#,
            "",
            "## read_file",
            "Read a file.",
            r#"Arguments: {"path": "src/App.vue"}"#,
            "",
            "## modify_file",
            "Replace one exact, unique snippet of a file.",
            r#"Arguments: {"path": "src/App.vue", "old_content": "exact old text", "new_content": "replacement"}"#,
            "",
            "## list_dir",
            "List a directory.",
            r#"Arguments: {"path": "src"}"#,
            "",
            "## delete_file",
            "Delete a file. Core files (package.json, index.html, vite config, src/main.*) cannot be deleted.",
            r#"Arguments: {"path": "src/components/Unused.vue"}"#,
        ]
        .join("\n")
    }
}

fn unknown_tool(name: &str) -> String {
    warn!("Model requested unknown tool: {}", name);
    format!(
        "Error: there is no tool called {}. Available tools: {}",
        name,
        TOOL_NAMES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unknown_tool_returns_synthetic_result() {
        let temp = TempDir::new().unwrap();
        let registry = ToolRegistry::new(temp.path().to_path_buf()).unwrap();

        let output = registry.dispatch("run_command", r#"{"command": "rm -rf /"}"#).await;
        assert!(output.starts_with("Error: there is no tool called run_command"));
    }

    #[tokio::test]
    async fn test_dispatch_write_then_read() {
        let temp = TempDir::new().unwrap();
        let registry = ToolRegistry::new(temp.path().to_path_buf()).unwrap();

        let out = registry
            .dispatch("write_file", r#"{"path": "src/App.vue", "content": "<template/>"}"#)
            .await;
        assert!(out.starts_with("Wrote"));

        let out = registry
            .dispatch("read_file", r#"{"path": "src/App.vue"}"#)
            .await;
        assert_eq!(out, "<template/>");
    }

    #[tokio::test]
    async fn test_bad_arguments_are_reported() {
        let temp = TempDir::new().unwrap();
        let registry = ToolRegistry::new(temp.path().to_path_buf()).unwrap();

        let out = registry.dispatch("read_file", "not json").await;
        assert!(out.starts_with("ERROR: Failed to parse arguments JSON"));

        let out = registry.dispatch("read_file", r#"{"path": "missing.vue"}"#).await;
        assert!(out.starts_with("ERROR:"));
    }

    #[test]
    fn test_system_prompt_lists_every_tool() {
        let temp = TempDir::new().unwrap();
        let registry = ToolRegistry::new(temp.path().to_path_buf()).unwrap();
        let prompt = registry.system_prompt();
        for name in TOOL_NAMES {
            assert!(prompt.contains(&format!("## {}", name)));
        }
    }
}
