//! Turns classified changes and worker results into sync instructions.

use std::path::Path;
use std::sync::Arc;

use lvs_pool::{PoolEvent, WorkerPool};
use lvs_protocol::{SyncInstruction, WorkerReport, WorkerResult, WorkerTask};
use tokio::sync::mpsc;

use super::classify::{ChangeEvent, ChangeKind};
use super::debouncer::FsOp;
use crate::inject::Site;
use crate::sync::ClientRegistry;

/// Extensions the worker pool can hot patch.
const HOT_EXTENSIONS: [&str; 4] = ["html", "htm", "xhtml", "php"];

/// How changes are announced.
#[derive(Clone, Copy, Debug)]
pub struct ReloadPolicy {
    /// Refresh stylesheets in place instead of reloading.
    pub inject_css: bool,
    /// Stylesheet refreshes skip the on-page notice.
    pub css_silent: bool,
    /// Hot patch markup through the worker pool.
    pub hot: bool,
    /// Navigate clients to changed markup nobody displays.
    pub navigate: bool,
}

impl Default for ReloadPolicy {
    fn default() -> Self {
        Self {
            inject_css: true,
            css_silent: false,
            hot: true,
            navigate: false,
        }
    }
}

/// Routes changes to clients.
pub struct Orchestrator {
    clients: Arc<ClientRegistry>,
    site: Site,
    policy: ReloadPolicy,
    pool: Option<WorkerPool>,
    live_workers: usize,
}

impl Orchestrator {
    /// Orchestrator without a worker pool; markup changes always reload.
    pub fn new(clients: Arc<ClientRegistry>, site: Site, policy: ReloadPolicy) -> Self {
        Self {
            clients,
            site,
            policy,
            pool: None,
            live_workers: 0,
        }
    }

    /// Hot patch through `pool`, which runs `workers` threads.
    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPool, workers: usize) -> Self {
        self.pool = Some(pool);
        self.live_workers = workers;
        self
    }

    /// Handle one change.
    pub async fn on_change(&mut self, change: &ChangeEvent) {
        tracing::debug!(path = %change.path.display(), kind = ?change.kind, op = ?change.op, "File changed");

        if change.op == FsOp::Removed {
            self.broadcast(&SyncInstruction::Reload);
            return;
        }

        match change.kind {
            ChangeKind::Stylesheet if self.policy.inject_css => {
                self.broadcast(&SyncInstruction::RefreshStylesheet {
                    silent: self.policy.css_silent,
                });
            }
            ChangeKind::Markup => self.on_markup_change(&change.path).await,
            ChangeKind::Stylesheet | ChangeKind::Other => self.broadcast(&SyncInstruction::Reload),
        }
    }

    async fn on_markup_change(&self, path: &Path) {
        let Some(file) = self.site.file_id(path) else {
            self.broadcast(&SyncInstruction::Reload);
            return;
        };
        let displayed = self.clients.is_displayed(&file);

        if displayed && let Some(pool) = self.hot_pool(path) {
            match tokio::fs::read_to_string(path).await {
                Ok(text) => {
                    tracing::debug!(%file, "Posting hot patch task");
                    pool.post(WorkerTask::new(file, text));
                    return;
                }
                Err(e) => tracing::debug!(%file, error = %e, "Could not read changed file"),
            }
        }

        if self.policy.navigate && !displayed {
            self.broadcast(&SyncInstruction::Navigate(format!("/{file}")));
        } else {
            self.broadcast(&SyncInstruction::Reload);
        }
    }

    /// Pool to hot patch `path` with, if hot patching applies.
    fn hot_pool(&self, path: &Path) -> Option<&WorkerPool> {
        if !self.policy.hot || self.live_workers == 0 {
            return None;
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)?;
        if !HOT_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        self.pool.as_ref().filter(|pool| !pool.is_terminating())
    }

    /// Handle one pool event.
    pub fn on_pool_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Result {
                result: WorkerResult::Report(report),
                ..
            } => self.on_report(report),
            PoolEvent::Result {
                worker,
                result: WorkerResult::Ignore { .. },
            } => tracing::trace!(worker, "Worker ignored task"),
            PoolEvent::WorkerFailed { worker, reason } => {
                self.live_workers = self.live_workers.saturating_sub(1);
                tracing::debug!(worker, %reason, live = self.live_workers, "Worker lost");
            }
        }
    }

    fn on_report(&self, report: WorkerReport) {
        let WorkerReport {
            report,
            body,
            file_name,
        } = report;

        // A report without a body means the file could not be rendered.
        if !body.is_empty() || report.is_empty() {
            let sent = self
                .clients
                .send_to_file(&file_name, &SyncInstruction::BodyPatch { html: body, hot: true });
            tracing::debug!(file = %file_name, clients = sent, "Sent body patch");
        }

        if !report.is_empty() {
            let messages = report.iter().map(ToString::to_string).collect();
            self.clients
                .send_to_file(&file_name, &SyncInstruction::Messages(messages));
        }
    }

    fn broadcast(&self, instruction: &SyncInstruction) {
        let sent = self.clients.broadcast(instruction);
        tracing::debug!(instruction = instruction.kind(), clients = sent, "Broadcast");
    }

    /// Run until the change stream ends.
    pub async fn run(
        mut self,
        mut changes: mpsc::UnboundedReceiver<ChangeEvent>,
        mut pool_events: Option<mpsc::UnboundedReceiver<PoolEvent>>,
    ) {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(change) => self.on_change(&change).await,
                    None => break,
                },
                Some(event) = next_event(&mut pool_events) => self.on_pool_event(event),
            }
        }
        tracing::debug!("Change stream closed");
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<PoolEvent>>) -> Option<PoolEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use lvs_config::DotfilesPolicy;
    use lvs_pool::{MarkupValidator, PoolConfig};
    use lvs_protocol::ValidationIssue;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        dir: tempfile::TempDir,
        clients: Arc<ClientRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("index.html"), "<body><p>a</p></body>").unwrap();
            Self {
                dir,
                clients: Arc::new(ClientRegistry::new()),
            }
        }

        fn client(&self, file: Option<&str>) -> UnboundedReceiver<SyncInstruction> {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = self.clients.register(tx);
            if let Some(file) = file {
                self.clients.set_file(id, file);
            }
            rx
        }

        fn orchestrator(&self, policy: ReloadPolicy) -> Orchestrator {
            let site = Site::new(self.dir.path(), DotfilesPolicy::Ignore, None);
            Orchestrator::new(Arc::clone(&self.clients), site, policy)
        }

        fn change(&self, name: &str, op: FsOp) -> ChangeEvent {
            ChangeEvent::new(self.dir.path().join(name), op)
        }
    }

    fn drain(rx: &mut UnboundedReceiver<SyncInstruction>) -> Vec<SyncInstruction> {
        let mut out = Vec::new();
        while let Ok(instruction) = rx.try_recv() {
            out.push(instruction);
        }
        out
    }

    #[tokio::test]
    async fn test_stylesheet_change_refreshes_css() {
        let fixture = Fixture::new();
        let mut a = fixture.client(Some("index.html"));
        let mut b = fixture.client(None);
        let mut orchestrator = fixture.orchestrator(ReloadPolicy {
            css_silent: true,
            ..ReloadPolicy::default()
        });

        orchestrator
            .on_change(&fixture.change("main.css", FsOp::Modified))
            .await;

        let expected = vec![SyncInstruction::RefreshStylesheet { silent: true }];
        assert_eq!(drain(&mut a), expected);
        assert_eq!(drain(&mut b), expected);
    }

    #[tokio::test]
    async fn test_stylesheet_reloads_without_css_injection() {
        let fixture = Fixture::new();
        let mut a = fixture.client(None);
        let mut orchestrator = fixture.orchestrator(ReloadPolicy {
            inject_css: false,
            ..ReloadPolicy::default()
        });

        orchestrator
            .on_change(&fixture.change("main.css", FsOp::Modified))
            .await;
        assert_eq!(drain(&mut a), vec![SyncInstruction::Reload]);
    }

    #[tokio::test]
    async fn test_removed_and_other_files_reload() {
        let fixture = Fixture::new();
        let mut a = fixture.client(None);
        let mut orchestrator = fixture.orchestrator(ReloadPolicy::default());

        orchestrator
            .on_change(&fixture.change("main.css", FsOp::Removed))
            .await;
        orchestrator
            .on_change(&fixture.change("app.js", FsOp::Modified))
            .await;
        assert_eq!(
            drain(&mut a),
            vec![SyncInstruction::Reload, SyncInstruction::Reload]
        );
    }

    #[tokio::test]
    async fn test_markup_without_pool_reloads() {
        let fixture = Fixture::new();
        let mut a = fixture.client(Some("index.html"));
        let mut orchestrator = fixture.orchestrator(ReloadPolicy::default());

        orchestrator
            .on_change(&fixture.change("index.html", FsOp::Modified))
            .await;
        assert_eq!(drain(&mut a), vec![SyncInstruction::Reload]);
    }

    #[tokio::test]
    async fn test_navigate_to_markup_nobody_displays() {
        let fixture = Fixture::new();
        let mut a = fixture.client(Some("index.html"));
        let mut orchestrator = fixture.orchestrator(ReloadPolicy {
            navigate: true,
            ..ReloadPolicy::default()
        });

        orchestrator
            .on_change(&fixture.change("about.html", FsOp::Created))
            .await;
        assert_eq!(
            drain(&mut a),
            vec![SyncInstruction::Navigate("/about.html".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_hot_patch_round_trip() {
        let fixture = Fixture::new();
        let mut viewer = fixture.client(Some("/index.html"));
        let mut other = fixture.client(Some("about.html"));

        let (pool, mut events) = WorkerPool::spawn(
            PoolConfig {
                workers: 1,
                rate_limit: Duration::ZERO,
                ..PoolConfig::default()
            },
            MarkupValidator::new,
        )
        .unwrap();
        let mut orchestrator = fixture
            .orchestrator(ReloadPolicy::default())
            .with_pool(pool.clone(), 1);

        orchestrator
            .on_change(&fixture.change("index.html", FsOp::Modified))
            .await;
        assert!(drain(&mut viewer).is_empty());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        orchestrator.on_pool_event(event);

        assert_eq!(
            drain(&mut viewer),
            vec![SyncInstruction::BodyPatch {
                html: "<p>a</p>".to_owned(),
                hot: true
            }]
        );
        assert!(drain(&mut other).is_empty());
        pool.terminate().await;
    }

    #[tokio::test]
    async fn test_report_sends_messages() {
        let fixture = Fixture::new();
        let mut viewer = fixture.client(Some("index.html"));
        let mut orchestrator = fixture.orchestrator(ReloadPolicy::default());

        orchestrator.on_pool_event(PoolEvent::Result {
            worker: 0,
            result: WorkerResult::Report(WorkerReport {
                report: vec![ValidationIssue {
                    line: 2,
                    column: 5,
                    message: "unclosed <span>".to_owned(),
                }],
                body: "<span>".to_owned(),
                file_name: "index.html".to_owned(),
            }),
        });

        assert_eq!(
            drain(&mut viewer),
            vec![
                SyncInstruction::BodyPatch {
                    html: "<span>".to_owned(),
                    hot: true
                },
                SyncInstruction::Messages(vec!["2:5 unclosed <span>".to_owned()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_render_sends_only_messages() {
        let fixture = Fixture::new();
        let mut viewer = fixture.client(Some("page.php"));
        let mut orchestrator = fixture.orchestrator(ReloadPolicy::default());

        orchestrator.on_pool_event(PoolEvent::Result {
            worker: 0,
            result: WorkerResult::Report(WorkerReport {
                report: vec![ValidationIssue {
                    line: 1,
                    column: 1,
                    message: "no interpreter".to_owned(),
                }],
                body: String::new(),
                file_name: "page.php".to_owned(),
            }),
        });

        assert_eq!(
            drain(&mut viewer),
            vec![SyncInstruction::Messages(vec!["1:1 no interpreter".to_owned()])]
        );
    }

    #[tokio::test]
    async fn test_lost_workers_disable_hot_patching() {
        let fixture = Fixture::new();
        let mut viewer = fixture.client(Some("index.html"));
        let (pool, _events) = WorkerPool::spawn(
            PoolConfig {
                workers: 1,
                rate_limit: Duration::ZERO,
                ..PoolConfig::default()
            },
            MarkupValidator::new,
        )
        .unwrap();
        let mut orchestrator = fixture
            .orchestrator(ReloadPolicy::default())
            .with_pool(pool.clone(), 1);

        orchestrator.on_pool_event(PoolEvent::WorkerFailed {
            worker: 0,
            reason: "panicked".to_owned(),
        });
        orchestrator
            .on_change(&fixture.change("index.html", FsOp::Modified))
            .await;
        assert_eq!(drain(&mut viewer), vec![SyncInstruction::Reload]);
        pool.terminate().await;
    }

    #[tokio::test]
    async fn test_run_stops_with_change_stream() {
        let fixture = Fixture::new();
        let mut a = fixture.client(None);
        let orchestrator = fixture.orchestrator(ReloadPolicy::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(orchestrator.run(rx, None));

        tx.send(ChangeEvent::new(PathBuf::from("/elsewhere/x.js"), FsOp::Modified))
            .unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(drain(&mut a), vec![SyncInstruction::Reload]);
    }
}
