//! Colored terminal output.

use console::{Style, Term};

/// Writes status lines to stderr.
pub(crate) struct Output {
    term: Term,
    green: Style,
    yellow: Style,
    red: Style,
    cyan_bold: Style,
    dim: Style,
}

impl Output {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
            green: Style::new().green(),
            yellow: Style::new().yellow(),
            red: Style::new().red(),
            cyan_bold: Style::new().cyan().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Address the server listens on.
    pub(crate) fn serving(&self, url: &str) {
        let _ = self.term.write_line(&format!(
            "Serving at {}",
            self.cyan_bold.apply_to(url)
        ));
    }

    /// Aligned `label  value` line.
    pub(crate) fn field(&self, label: &str, value: &str) {
        let _ = self
            .term
            .write_line(&format!("  {} {value}", self.dim.apply_to(format!("{label:<12}"))));
    }

    /// Feature switch, green when on.
    pub(crate) fn toggle(&self, label: &str, enabled: bool) {
        let state = if enabled {
            self.green.apply_to("on")
        } else {
            self.yellow.apply_to("off")
        };
        let _ = self
            .term
            .write_line(&format!("  {} {state}", self.dim.apply_to(format!("{label:<12}"))));
    }

    pub(crate) fn error(&self, msg: &str) {
        let _ = self.term.write_line(&self.red.apply_to(msg).to_string());
    }
}
