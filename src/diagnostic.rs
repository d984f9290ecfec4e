use crate::span::Span;

/// A model-file diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    fn report<'a>(
        &'a self,
        filename: &'a str,
    ) -> ariadne::Report<'a, (&'a str, std::ops::Range<usize>)> {
        use ariadne::{Color, Label, Report, ReportKind};

        let (kind, color) = match self.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.range()))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }
        if let Some(help) = &self.help {
            report = report.with_help(help);
        }
        report.finish()
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::Source;

        if let Err(e) = self
            .report(filename)
            .eprint((filename, Source::from(source)))
        {
            eprintln!("error: {} ({})", self.message, e);
        }
    }

    /// Render the diagnostic into a string, e.g. for logging or tests.
    pub fn render_to_string(&self, filename: &str, source: &str) -> String {
        use ariadne::Source;

        let mut buf = Vec::new();
        match self
            .report(filename)
            .write((filename, Source::from(source)), &mut buf)
        {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => self.message.clone(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", level, self.message)
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_construction() {
        let d = Diagnostic::error("unknown block kind".to_string(), Span::new(10, 15));
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "unknown block kind");
        assert_eq!(d.span.start, 10);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn chained_builders() {
        let d = Diagnostic::warning("unused input".to_string(), Span::new(0, 5))
            .with_note("note 1".to_string())
            .with_help("remove the [input.age] section".to_string())
            .with_note("note 2".to_string());
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.notes, vec!["note 1", "note 2"]);
        assert!(d.help.is_some());
        assert_eq!(d.to_string(), "warning: unused input");
    }

    #[test]
    fn render_to_string_mentions_message() {
        let source = "[block.head]\nkind = \"bogus\"\n";
        let d = Diagnostic::error("unknown block kind 'bogus'".to_string(), Span::new(20, 27))
            .with_help("expected one of: dense, embedding".to_string());
        let text = d.render_to_string("model.toml", source);
        assert!(text.contains("unknown block kind 'bogus'"));
        assert!(text.contains("model.toml"));
    }

    #[test]
    fn render_does_not_panic() {
        let source = "[input.a]\nshape = [1]\n";
        let diagnostics = vec![
            Diagnostic::warning("w1".to_string(), Span::new(0, 9)),
            Diagnostic::error("e1".to_string(), Span::new(10, 15)),
        ];
        render_diagnostics(&diagnostics, "model.toml", source);
    }
}
