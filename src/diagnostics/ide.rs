//! Compiler-style per-mutant diagnostics for editors and CI annotations.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::mutation_point::MutationPoint;

/// Which mutant outcomes are reported as IDE diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeDiagnosticsKind {
    /// Report nothing.
    #[default]
    None,
    /// Report surviving mutants only.
    Survived,
    /// Report killed mutants only.
    Killed,
    /// Report every mutant.
    All,
}

/// Receives one notification per executed mutant.
pub trait IdeDiagnostics: Send + Sync {
    /// Record the outcome for `point`.
    fn report(&self, point: &MutationPoint, killed: bool);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIdeDiagnostics;

impl IdeDiagnostics for NullIdeDiagnostics {
    fn report(&self, _point: &MutationPoint, _killed: bool) {}
}

/// Writes `file:line:col: warning: Survived: ... [mutator]` lines.
pub struct NormalIdeDiagnostics {
    kind: IdeDiagnosticsKind,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl NormalIdeDiagnostics {
    /// Report to stderr.
    pub fn new(kind: IdeDiagnosticsKind) -> Self {
        Self::with_writer(kind, Box::new(std::io::stderr()))
    }

    /// Report to an arbitrary writer.
    pub fn with_writer(kind: IdeDiagnosticsKind, writer: Box<dyn Write + Send>) -> Self {
        Self {
            kind,
            sink: Mutex::new(writer),
        }
    }

    fn wants(&self, killed: bool) -> bool {
        match self.kind {
            IdeDiagnosticsKind::None => false,
            IdeDiagnosticsKind::Survived => !killed,
            IdeDiagnosticsKind::Killed => killed,
            IdeDiagnosticsKind::All => true,
        }
    }
}

impl IdeDiagnostics for NormalIdeDiagnostics {
    fn report(&self, point: &MutationPoint, killed: bool) {
        if !self.wants(killed) {
            return;
        }
        // Points without a location cannot be anchored in an editor.
        let Some(location) = point.location() else {
            return;
        };
        let verdict = if killed { "Killed" } else { "Survived" };
        let line = format!(
            "{}:{}:{}: warning: {}: {} [{}]\n",
            location.file,
            location.line,
            location.column,
            verdict,
            point.mutator().diagnostics(),
            point.mutator().id()
        );
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(line.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::SourceLocation;
    use crate::mutation_point::tests::sample_point;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .expect("buffer mutex should lock")
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("buffer mutex should lock")).to_string()
        }
    }

    #[test]
    fn survived_kind_reports_only_survivors() {
        let buffer = SharedBuffer::default();
        let ide = NormalIdeDiagnostics::with_writer(
            IdeDiagnosticsKind::Survived,
            Box::new(buffer.clone()),
        );
        let point = sample_point(Some(SourceLocation::new("sum.c", 4, 11)));

        ide.report(&point, true);
        assert!(buffer.text().is_empty());

        ide.report(&point, false);
        let text = buffer.text();
        assert!(text.starts_with("sum.c:4:11: warning: Survived: Replaced + with -"));
        assert!(text.trim_end().ends_with("[add_to_sub]"));
    }

    #[test]
    fn points_without_location_are_not_reported() {
        let buffer = SharedBuffer::default();
        let ide =
            NormalIdeDiagnostics::with_writer(IdeDiagnosticsKind::All, Box::new(buffer.clone()));
        ide.report(&sample_point(None), false);
        assert!(buffer.text().is_empty());
    }
}
