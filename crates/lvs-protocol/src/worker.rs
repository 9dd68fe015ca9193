//! Worker pool payloads.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unit of work posted to the worker pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTask {
    /// File contents.
    pub text: String,
    /// Path of the file the text came from, relative to the served root.
    pub file_name: String,
    /// Mark the element under the cursor.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub should_highlight: bool,
    /// Editor cursor, zero-based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<CursorPosition>,
    /// Parameters the worker re-initializes with before running this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitParams>,
}

impl WorkerTask {
    /// Task for `text` read from `file_name`.
    pub fn new(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Re-initialize the receiving worker with `init` first.
    #[must_use]
    pub fn with_init(mut self, init: InitParams) -> Self {
        self.init = Some(init);
        self
    }
}

/// Zero-based editor cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub character: u32,
}

/// Parameters every worker receives once during the init handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    /// Interpreter used for server-side scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<PathBuf>,
    /// Interpreter configuration file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    /// Working directory for script execution.
    pub cwd: PathBuf,
}

/// Result produced by a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerResult {
    /// Validation report plus the body to patch in.
    Report(WorkerReport),
    /// The worker had nothing to say about the task.
    Ignore {
        /// Always `true`.
        ignore: bool,
    },
}

impl WorkerResult {
    /// The `{ignore: true}` result.
    pub fn ignore() -> Self {
        Self::Ignore { ignore: true }
    }
}

/// Validation report for one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    /// Problems found in the file; empty when the markup is well formed.
    pub report: Vec<ValidationIssue>,
    /// Body markup to hot patch into clients.
    pub body: String,
    /// File the report belongs to.
    pub file_name: String,
}

/// Single validation problem, one-based line and column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.line, self.column, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_wire_names() {
        let task = WorkerTask {
            cursor_position: Some(CursorPosition {
                line: 3,
                character: 7,
            }),
            should_highlight: true,
            ..WorkerTask::new("index.html", "<p></p>")
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["fileName"], "index.html");
        assert_eq!(value["shouldHighlight"], true);
        assert_eq!(value["cursorPosition"]["character"], 7);
        assert!(value.get("init").is_none());
    }

    #[test]
    fn test_result_shapes() {
        let ignore: WorkerResult = serde_json::from_str(r#"{"ignore":true}"#).unwrap();
        assert_eq!(ignore, WorkerResult::ignore());

        let report: WorkerResult = serde_json::from_str(
            r#"{"report":[{"line":1,"column":4,"message":"unclosed <div>"}],"body":"<div>","fileName":"a.html"}"#,
        )
        .unwrap();
        let WorkerResult::Report(report) = report else {
            panic!("expected report");
        };
        assert_eq!(report.file_name, "a.html");
        assert_eq!(report.report[0].to_string(), "1:4 unclosed <div>");
    }
}
