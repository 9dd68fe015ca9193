//! Applies sync instructions to a [`Page`].

use lvs_protocol::SyncInstruction;

use crate::page::{Page, PatchFailure};

/// What the connection loop should do after an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Keep going.
    Continue,
    /// The page navigated away or reloaded; stop driving it.
    Left,
    /// Start forwarding console output.
    RemoteLogs,
}

/// Applies instructions and owns the cached body used for hot patches.
pub struct Dispatcher<P> {
    page: P,
    on_patch_failure: PatchFailure,
    cached_body: Option<String>,
    stylesheet_stamp: u64,
    remote_logs: bool,
}

impl<P: Page> Dispatcher<P> {
    pub fn new(page: P, on_patch_failure: PatchFailure) -> Self {
        Self {
            page,
            on_patch_failure,
            cached_body: None,
            stylesheet_stamp: 0,
            remote_logs: false,
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    pub fn into_page(self) -> P {
        self.page
    }

    /// Whether console output is forwarded to the server.
    pub fn remote_logs(&self) -> bool {
        self.remote_logs
    }

    /// Remember the current body as the base for the next hot patch.
    pub fn cache_body(&mut self) {
        self.cached_body = Some(self.page.body().render());
    }

    pub fn apply(&mut self, instruction: SyncInstruction) -> Applied {
        tracing::debug!(kind = instruction.kind(), "Applying instruction");
        match instruction {
            SyncInstruction::Reload => {
                self.page.reload();
                Applied::Left
            }
            SyncInstruction::Navigate(url) => {
                self.page.navigate(&url);
                Applied::Left
            }
            SyncInstruction::RefreshStylesheet { silent } => {
                self.stylesheet_stamp += 1;
                self.page.refresh_stylesheets(self.stylesheet_stamp);
                if !silent {
                    self.page.show_banner("Stylesheets refreshed", false);
                }
                Applied::Continue
            }
            SyncInstruction::BodyPatch { html, hot: false } => {
                match self.page.replace_body(&html) {
                    Ok(()) => self.cached_body = Some(html),
                    Err(e) => return self.patch_failed(&e.to_string()),
                }
                Applied::Continue
            }
            SyncInstruction::BodyPatch { html, hot: true } => self.hot_patch(html),
            SyncInstruction::Messages(list) if list.is_empty() => {
                self.page.hide_banner();
                Applied::Continue
            }
            SyncInstruction::Messages(list) => {
                self.page.show_banner(&list.join("\n"), true);
                Applied::Continue
            }
            SyncInstruction::Message(text) => {
                self.page.show_banner(&text, false);
                Applied::Continue
            }
            SyncInstruction::Connected => Applied::Continue,
            SyncInstruction::InitRemoteLogs => {
                self.remote_logs = true;
                Applied::RemoteLogs
            }
        }
    }

    fn hot_patch(&mut self, html: String) -> Applied {
        if self.cached_body.as_deref() == Some(html.as_str()) {
            tracing::trace!("Body unchanged, skipping patch");
            return Applied::Continue;
        }
        match self.page.body().patch(&html) {
            Ok(stats) => {
                tracing::debug!(
                    updated = stats.updated,
                    replaced = stats.replaced,
                    inserted = stats.inserted,
                    removed = stats.removed,
                    "Body patched"
                );
                self.cached_body = Some(html);
                Applied::Continue
            }
            Err(e) => self.patch_failed(&e.to_string()),
        }
    }

    fn patch_failed(&mut self, reason: &str) -> Applied {
        tracing::debug!(reason, "Body patch failed");
        match self.on_patch_failure {
            PatchFailure::Banner => {
                self.page
                    .show_banner(&format!("Live update failed: {reason}"), true);
                Applied::Continue
            }
            PatchFailure::Reload => {
                self.page.reload();
                Applied::Left
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::MAX_DEPTH;
    use crate::page::{Banner, DocumentPage};
    use pretty_assertions::assert_eq;

    fn dispatcher(body: &str, policy: PatchFailure) -> Dispatcher<DocumentPage> {
        let page = DocumentPage::new(body, vec!["/index.html".to_owned()]).unwrap();
        let mut dispatcher = Dispatcher::new(page, policy);
        dispatcher.cache_body();
        dispatcher
    }

    fn too_deep() -> String {
        format!(
            "{}{}",
            "<div>".repeat(MAX_DEPTH + 1),
            "</div>".repeat(MAX_DEPTH + 1)
        )
    }

    #[test]
    fn test_hot_patch_preserves_focus() {
        let mut dispatcher = dispatcher(
            r#"<input id="name" /><p>old</p>"#,
            PatchFailure::Banner,
        );
        let page = dispatcher.page_mut();
        let input = page.document().element_by_id("name").unwrap();
        page.body().focus(input);

        let applied = dispatcher.apply(SyncInstruction::BodyPatch {
            html: r#"<input id="name" /><p>x</p>"#.to_owned(),
            hot: true,
        });

        assert_eq!(applied, Applied::Continue);
        let doc = dispatcher.page().document();
        assert_eq!(doc.focused(), Some(input));
        assert_eq!(doc.render(), r#"<input id="name"><p>x</p>"#);
    }

    #[test]
    fn test_direct_replace_drops_focus() {
        let mut dispatcher = dispatcher(r#"<input id="name" />"#, PatchFailure::Banner);
        let input = dispatcher.page().document().element_by_id("name").unwrap();
        dispatcher.page_mut().body().focus(input);

        dispatcher.apply(SyncInstruction::BodyPatch {
            html: "<main>new</main>".to_owned(),
            hot: false,
        });
        let doc = dispatcher.page().document();
        assert_eq!(doc.render(), "<main>new</main>");
        assert_eq!(doc.focused(), None);
    }

    #[test]
    fn test_patch_failure_shows_banner() {
        let mut dispatcher = dispatcher("<p>a</p>", PatchFailure::Banner);
        let applied = dispatcher.apply(SyncInstruction::BodyPatch {
            html: too_deep(),
            hot: true,
        });
        assert_eq!(applied, Applied::Continue);
        let page = dispatcher.page();
        assert_eq!(page.reloads, 0);
        assert!(page.banner.as_ref().is_some_and(|b| b.persistent));
        assert_eq!(page.document().render(), "<p>a</p>");
    }

    #[test]
    fn test_patch_failure_reloads_when_configured() {
        let mut dispatcher = dispatcher("<p>a</p>", PatchFailure::Reload);
        let applied = dispatcher.apply(SyncInstruction::BodyPatch {
            html: too_deep(),
            hot: true,
        });
        assert_eq!(applied, Applied::Left);
        assert_eq!(dispatcher.page().reloads, 1);
    }

    #[test]
    fn test_navigation_and_reload_leave_page() {
        let mut dispatcher = dispatcher("<p>a</p>", PatchFailure::Banner);
        assert_eq!(
            dispatcher.apply(SyncInstruction::Navigate("/about.html".to_owned())),
            Applied::Left
        );
        assert_eq!(dispatcher.apply(SyncInstruction::Reload), Applied::Left);
        let page = dispatcher.page();
        assert_eq!(page.navigations, vec!["/about.html".to_owned()]);
        assert_eq!(page.reloads, 1);
    }

    #[test]
    fn test_messages_banner_lifecycle() {
        let mut dispatcher = dispatcher("<p>a</p>", PatchFailure::Banner);
        dispatcher.apply(SyncInstruction::Messages(vec![
            "1:1 bad".to_owned(),
            "2:2 worse".to_owned(),
        ]));
        assert_eq!(
            dispatcher.page().banner,
            Some(Banner {
                text: "1:1 bad\n2:2 worse".to_owned(),
                persistent: true
            })
        );

        dispatcher.apply(SyncInstruction::Messages(Vec::new()));
        assert_eq!(dispatcher.page().banner, None);
    }

    #[test]
    fn test_silent_stylesheet_refresh() {
        let mut dispatcher = dispatcher(
            r#"<link rel="stylesheet" href="s.css" />"#,
            PatchFailure::Banner,
        );
        dispatcher.apply(SyncInstruction::RefreshStylesheet { silent: true });
        assert_eq!(dispatcher.page().banner, None);
        dispatcher.apply(SyncInstruction::RefreshStylesheet { silent: false });
        assert!(dispatcher.page().banner.is_some());

        let doc = dispatcher.page().document();
        let link = doc.elements_by_name("link")[0];
        assert_eq!(doc.attribute(link, "href"), Some("s.css?__lvs=2"));
    }

    #[test]
    fn test_init_remote_logs() {
        let mut dispatcher = dispatcher("", PatchFailure::Banner);
        assert!(!dispatcher.remote_logs());
        assert_eq!(
            dispatcher.apply(SyncInstruction::InitRemoteLogs),
            Applied::RemoteLogs
        );
        assert!(dispatcher.remote_logs());
        assert_eq!(dispatcher.apply(SyncInstruction::Connected), Applied::Continue);
    }
}
