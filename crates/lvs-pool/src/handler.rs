//! Task handlers run inside worker threads.

use std::path::{Path, PathBuf};
use std::process::Command;

use lvs_protocol::{InitParams, ValidationIssue, WorkerReport, WorkerResult, WorkerTask};

use crate::validate;
use crate::worker::WorkerContext;

/// Work executed by a pool worker.
///
/// One handler instance lives in each worker thread, so implementations may
/// keep per-worker state without synchronization.
pub trait TaskHandler: Send + 'static {
    /// Handshake; called once before any task.
    fn init(&mut self, params: &InitParams) -> Result<(), String>;

    /// Process one task.
    fn handle(&mut self, task: &WorkerTask) -> WorkerResult;
}

/// Extensions validated as plain markup.
const MARKUP_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

/// Extensions rendered through the configured interpreter first.
const SCRIPT_EXTENSIONS: &[&str] = &["php"];

/// Validates markup and extracts the body for hot patching.
///
/// Server-side script files are first run through the interpreter named in
/// the init parameters; their output is then validated like markup.
#[derive(Debug)]
pub struct MarkupValidator {
    scratch_dir: PathBuf,
    params: Option<InitParams>,
}

impl MarkupValidator {
    /// Handler writing script inputs below the pool scratch directory.
    pub fn new(context: &WorkerContext) -> Self {
        Self {
            scratch_dir: context.scratch_dir.join(format!("worker-{}", context.index)),
            params: None,
        }
    }

    fn render_script(&self, task: &WorkerTask) -> Result<String, String> {
        let Some(params) = &self.params else {
            return Err("worker not initialized".to_owned());
        };
        let Some(exec_path) = &params.exec_path else {
            return Err("no interpreter configured for server-side scripts".to_owned());
        };

        let file_name = Path::new(&task.file_name)
            .file_name()
            .map_or_else(|| "script".into(), std::ffi::OsStr::to_os_string);
        let input = self.scratch_dir.join(file_name);
        std::fs::write(&input, &task.text).map_err(|e| e.to_string())?;

        let mut command = Command::new(exec_path);
        if let Some(config_path) = &params.config_path {
            command.arg("-c").arg(config_path);
        }
        let output = command
            .arg(&input)
            .current_dir(&params.cwd)
            .output()
            .map_err(|e| format!("{}: {e}", exec_path.display()))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_owned());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TaskHandler for MarkupValidator {
    fn init(&mut self, params: &InitParams) -> Result<(), String> {
        std::fs::create_dir_all(&self.scratch_dir).map_err(|e| e.to_string())?;
        self.params = Some(params.clone());
        Ok(())
    }

    fn handle(&mut self, task: &WorkerTask) -> WorkerResult {
        let extension = Path::new(&task.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let text = if MARKUP_EXTENSIONS.contains(&extension.as_str()) {
            task.text.clone()
        } else if SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
            match self.render_script(task) {
                Ok(rendered) => rendered,
                Err(message) => {
                    return WorkerResult::Report(WorkerReport {
                        report: vec![ValidationIssue {
                            line: 1,
                            column: 1,
                            message,
                        }],
                        body: String::new(),
                        file_name: task.file_name.clone(),
                    });
                }
            }
        } else {
            return WorkerResult::ignore();
        };

        let report = validate::validate(&text);

        let marked = match (task.should_highlight, task.cursor_position) {
            (true, Some(cursor)) => validate::highlight(&text, cursor),
            _ => None,
        };
        let source = marked.as_deref().unwrap_or(&text);

        WorkerResult::Report(WorkerReport {
            report,
            body: validate::extract_body(source).to_owned(),
            file_name: task.file_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvs_protocol::CursorPosition;

    fn handler(dir: &Path) -> MarkupValidator {
        let mut handler = MarkupValidator::new(&WorkerContext {
            index: 0,
            scratch_dir: dir.to_path_buf(),
        });
        handler
            .init(&InitParams {
                cwd: dir.to_path_buf(),
                ..InitParams::default()
            })
            .unwrap();
        handler
    }

    #[test]
    fn test_non_markup_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let result = handler(dir.path()).handle(&WorkerTask::new("app.js", "let a = 1;"));
        assert_eq!(result, WorkerResult::ignore());
    }

    #[test]
    fn test_markup_report_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let result = handler(dir.path()).handle(&WorkerTask::new(
            "index.html",
            "<html><body><div><span></div></body></html>",
        ));
        let WorkerResult::Report(report) = result else {
            panic!("expected report");
        };
        assert_eq!(report.file_name, "index.html");
        assert_eq!(report.body, "<div><span></div>");
        assert_eq!(report.report.len(), 1);
        assert!(report.report[0].message.contains("<span>"));
    }

    #[test]
    fn test_highlight_applies_to_body() {
        let dir = tempfile::tempdir().unwrap();
        let task = WorkerTask {
            should_highlight: true,
            cursor_position: Some(CursorPosition {
                line: 0,
                character: 14,
            }),
            ..WorkerTask::new("index.html", "<body><h1>a</h1><p>b</p></body>")
        };
        let WorkerResult::Report(report) = handler(dir.path()).handle(&task) else {
            panic!("expected report");
        };
        assert_eq!(report.body, "<h1 data-lvs-highlight>a</h1><p>b</p>");
    }

    #[test]
    fn test_script_without_interpreter_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let WorkerResult::Report(report) =
            handler(dir.path()).handle(&WorkerTask::new("index.php", "<?php echo 1; ?>"))
        else {
            panic!("expected report");
        };
        assert!(report.body.is_empty());
        assert!(report.report[0].message.contains("interpreter"));
    }
}
