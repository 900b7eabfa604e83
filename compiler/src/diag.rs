// diag.rs — Unified diagnostics model
//
// Provides the diagnostic types shared by every compile step, the renderer
// for source locations (with include chains), and the collector used to run
// independent checks to completion and merge their failures.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::SourceLoc;

// ── Diagnostic kind ──────────────────────────────────────────────────────

/// A stable diagnostic category (e.g. `TypeError`, `ScopeNameError`).
///
/// Kinds are `&'static str` constants defined in the `kinds` module. The
/// kind is rendered as the message prefix, so tooling can match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagKind(pub &'static str);

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod kinds {
    use super::DiagKind;

    pub const PARSE_ERROR: DiagKind = DiagKind("ParseError");
    pub const INCLUDE_ERROR: DiagKind = DiagKind("IncludeError");
    pub const TYPE_ERROR: DiagKind = DiagKind("TypeError");
    pub const DUPLICATE_NAME: DiagKind = DiagKind("DuplicateNameError");
    pub const DUPLICATE_BINDING: DiagKind = DiagKind("DuplicateBinding");
    pub const DUPLICATE_CALL: DiagKind = DiagKind("DuplicateCallError");
    pub const SCOPE_NAME: DiagKind = DiagKind("ScopeNameError");
    pub const REFERENCE: DiagKind = DiagKind("ReferenceError");
    pub const NO_SUCH_OUTPUT: DiagKind = DiagKind("NoSuchOutputError");
    pub const ARGUMENT: DiagKind = DiagKind("ArgumentError");
    pub const ARGUMENT_NOT_SUPPLIED: DiagKind = DiagKind("ArgumentNotSuppliedError");
    pub const TYPE_MISMATCH: DiagKind = DiagKind("TypeMismatchError");
    pub const CYCLIC_DEPENDENCY: DiagKind = DiagKind("CyclicDependencyError");
    pub const RECURSIVE_CALL: DiagKind = DiagKind("RecursiveCallError");
    pub const CONFLICTING_MODIFIERS: DiagKind = DiagKind("ConflictingModifiers");
    pub const UNSUPPORTED_TAG: DiagKind = DiagKind("UnsupportedTagError");
    pub const PREFLIGHT_BINDING: DiagKind = DiagKind("PreflightBindingError");
    pub const PREFLIGHT_OUTPUT: DiagKind = DiagKind("PreflightOutputError");
    pub const RETAIN_PARAM: DiagKind = DiagKind("RetainParamError");
    pub const INCONSISTENT_MAP_CALL: DiagKind = DiagKind("InconsistentMapCallError");
    pub const UNUSED_INPUT: DiagKind = DiagKind("UnusedInputError");
    pub const OUT_NAME: DiagKind = DiagKind("OutName");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLoc {
    pub loc: SourceLoc,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any step.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub level: DiagLevel,
    pub loc: SourceLoc,
    pub message: String,
    pub related: Vec<RelatedLoc>,
}

impl Diagnostic {
    pub fn new(
        kind: DiagKind,
        level: DiagLevel,
        loc: SourceLoc,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            level,
            loc,
            message: message.into(),
            related: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic.
    pub fn error(kind: DiagKind, loc: &SourceLoc, message: impl Into<String>) -> Self {
        Self::new(kind, DiagLevel::Error, loc.clone(), message)
    }

    /// Attach a related location, rendered after the message.
    pub fn with_related(mut self, loc: SourceLoc, label: impl Into<String>) -> Self {
        self.related.push(RelatedLoc {
            loc,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MRO {}: {}", self.kind, self.message)?;
        for rel in &self.related {
            write!(
                f,
                ".\n  {} at {}\n",
                rel.label,
                render_loc(&rel.loc, "        ")
            )?;
        }
        write!(f, "\n    at {}", render_loc(&self.loc, "        "))
    }
}

// ── Location rendering ───────────────────────────────────────────────────

/// Render a location as `file:line`, followed by the include chain that
/// reached the file. Nested chains are indented one level deeper.
pub fn render_loc(loc: &SourceLoc, indent: &str) -> String {
    let file = match &loc.file {
        Some(file) if !(file.full_path.is_empty() && file.included_from.is_empty()) => file,
        _ => return format!("line {}", loc.line),
    };
    match file.included_from.as_slice() {
        [] => format!("{}:{}", file.full_path, loc.line),
        [parent] => format!(
            "{}:{}\n{}    included from {}",
            file.full_path,
            loc.line,
            indent,
            render_loc(parent, indent)
        ),
        parents => {
            let deeper = format!("{indent}    ");
            let mut out = format!("{}:{} included from:", file.full_path, loc.line);
            for (i, parent) in parents.iter().enumerate() {
                out.push_str(&format!(
                    "\n{}[{}] {}",
                    deeper,
                    i,
                    render_loc(parent, &deeper)
                ));
            }
            out
        }
    }
}

// ── Collector ────────────────────────────────────────────────────────────

/// An ordered list of diagnostics accumulated across independent checks.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Keep the value of a successful check, or record its failures.
    pub fn absorb<T>(&mut self, result: Result<T, Diagnostics>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(errs) => {
                self.extend(errs);
                None
            }
        }
    }

    /// Run every check and flatten their failures into one aggregate.
    pub fn collect_all<T, I>(results: I) -> Result<Vec<T>, Diagnostics>
    where
        I: IntoIterator<Item = Result<T, Diagnostics>>,
    {
        let mut errs = Diagnostics::new();
        let mut out = Vec::new();
        for r in results {
            if let Some(v) = errs.absorb(r) {
                out.push(v);
            }
        }
        errs.into_result(out)
    }

    /// `Ok(value)` unless an error-level diagnostic was recorded.
    /// Warnings are dropped; use `take_warnings` first to keep them.
    pub fn into_result<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.has_errors() {
            Err(self)
        } else {
            Ok(value)
        }
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    /// Remove and return the warning-level diagnostics.
    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        let (warnings, rest): (Vec<_>, Vec<_>) =
            self.items.drain(..).partition(|d| !d.is_error());
        self.items = rest;
        warnings
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self { items: vec![diag] }
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, "\n\t")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceFile;
    use std::sync::Arc;

    fn file(path: &str, parents: Vec<SourceLoc>) -> Arc<SourceFile> {
        Arc::new(SourceFile {
            file_name: path.to_string(),
            full_path: path.to_string(),
            included_from: parents,
        })
    }

    fn loc(line: usize, f: &Arc<SourceFile>) -> SourceLoc {
        SourceLoc {
            line,
            file: Some(f.clone()),
        }
    }

    #[test]
    fn display_bare_line() {
        let d = Diagnostic::error(
            kinds::TYPE_ERROR,
            &SourceLoc::at_line(4),
            "undefined type 'foo'",
        );
        assert_eq!(
            format!("{d}"),
            "MRO TypeError: undefined type 'foo'\n    at line 4"
        );
    }

    #[test]
    fn render_single_include() {
        let top = file("top.mro", vec![]);
        let lib = file("lib.mro", vec![loc(2, &top)]);
        assert_eq!(
            render_loc(&loc(7, &lib), "        "),
            "lib.mro:7\n            included from top.mro:2"
        );
    }

    #[test]
    fn render_multiple_parents() {
        let a = file("a.mro", vec![]);
        let b = file("b.mro", vec![]);
        let common = file("common.mro", vec![loc(1, &a), loc(3, &b)]);
        assert_eq!(
            render_loc(&loc(5, &common), ""),
            "common.mro:5 included from:\n    [0] a.mro:1\n    [1] b.mro:3"
        );
    }

    #[test]
    fn related_location_rendered() {
        let top = file("top.mro", vec![]);
        let d = Diagnostic::error(
            kinds::DUPLICATE_NAME,
            &loc(9, &top),
            "stage 'FOO' was already declared when encountered again",
        )
        .with_related(loc(2, &top), "Previous declaration");
        assert_eq!(
            format!("{d}"),
            "MRO DuplicateNameError: stage 'FOO' was already declared when encountered again.\n  Previous declaration at top.mro:2\n\n    at top.mro:9"
        );
    }

    #[test]
    fn collect_all_flattens_failures() {
        let l = SourceLoc::at_line(1);
        let results: Vec<Result<u32, Diagnostics>> = vec![
            Ok(1),
            Err(Diagnostic::error(kinds::TYPE_ERROR, &l, "a").into()),
            Ok(3),
            Err(Diagnostic::error(kinds::SCOPE_NAME, &l, "b").into()),
        ];
        let errs = Diagnostics::collect_all(results).unwrap_err();
        assert_eq!(errs.len(), 2);
        let kinds: Vec<_> = errs.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![kinds::TYPE_ERROR, kinds::SCOPE_NAME]);
    }

    #[test]
    fn warnings_do_not_fail() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new(
            kinds::OUT_NAME,
            DiagLevel::Warning,
            SourceLoc::at_line(1),
            "w",
        ));
        assert!(!diags.has_errors());
        assert_eq!(diags.take_warnings().len(), 1);
        assert!(diags.into_result(()).is_ok());
    }

    #[test]
    fn joined_with_newline_tab() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error(kinds::TYPE_ERROR, &SourceLoc::at_line(1), "a"));
        diags.push(Diagnostic::error(kinds::TYPE_ERROR, &SourceLoc::at_line(2), "b"));
        assert_eq!(
            diags.to_string(),
            "MRO TypeError: a\n    at line 1\n\tMRO TypeError: b\n    at line 2"
        );
    }
}
