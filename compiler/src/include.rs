// include.rs — Source loading and `@include` resolution
//
// Reads a root file and everything it includes, builds one `SourceFile` per
// distinct path (recording every include directive that reached it) and
// merges the parsed declarations, included files first.
//
// Preconditions: none.
// Postconditions: each file is read and parsed exactly once; every
//   `SourceLoc` in the merged tree points at its file's shared record.
// Failure modes: `LoadError::Io` when the root cannot be read;
//   `LoadError::Syntax` for unreadable includes, include cycles, parse
//   errors, or more than one top-level call across files.
// Side effects: reads files from disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::{Ast, SourceFile, SourceLoc};
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::lexer::include_directives;
use crate::parser::{anonymous_file, parse};

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Syntax(Diagnostics),
}

// ── Loaded program ─────────────────────────────────────────────────────────

/// The text of one loaded file, kept for provenance.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub path: String,
    pub text: String,
}

/// A merged syntax tree plus the texts it was parsed from, in load order.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub ast: Ast,
    pub sources: Vec<SourceText>,
}

impl Loaded {
    /// Parse a single in-memory source. Include directives are kept in the
    /// tree but not followed.
    pub fn from_source(text: &str) -> Result<Self, LoadError> {
        let ast = parse(text, anonymous_file()).map_err(LoadError::Syntax)?;
        Ok(Self {
            ast,
            sources: vec![SourceText {
                path: String::new(),
                text: text.to_string(),
            }],
        })
    }
}

// ── Discovery ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

struct Node {
    /// As written by the includer (or on the command line).
    name: String,
    path: PathBuf,
    text: String,
    /// `(includer, line)` of every directive naming this file.
    parents: Vec<(usize, usize)>,
}

#[derive(Default)]
struct Loader {
    nodes: Vec<Node>,
    index: HashMap<PathBuf, usize>,
    state: Vec<Visit>,
    /// Children before parents.
    post_order: Vec<usize>,
    errs: Diagnostics,
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())].matches('\n').count() + 1
}

/// A location in a file whose include chain is not known yet.
fn bare_loc(node: &Node, line: usize) -> SourceLoc {
    SourceLoc {
        line,
        file: Some(Arc::new(SourceFile {
            file_name: node.name.clone(),
            full_path: node.path.display().to_string(),
            included_from: Vec::new(),
        })),
    }
}

fn key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Loader {
    fn add(&mut self, name: String, path: PathBuf, text: String) -> usize {
        let i = self.nodes.len();
        self.index.insert(key(&path), i);
        self.nodes.push(Node {
            name,
            path,
            text,
            parents: Vec::new(),
        });
        self.state.push(Visit::Active);
        i
    }

    fn visit(&mut self, i: usize) {
        let dir = self.nodes[i]
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let directives = include_directives(&self.nodes[i].text);
        for (name, offset) in directives {
            let line = line_of(&self.nodes[i].text, offset);
            let path = dir.join(&name);
            if let Some(&j) = self.index.get(&key(&path)) {
                self.nodes[j].parents.push((i, line));
                if self.state[j] == Visit::Active {
                    self.errs.push(Diagnostic::error(
                        kinds::PARSE_ERROR,
                        &bare_loc(&self.nodes[i], line),
                        format!(
                            "include cycle: {} includes {}, which is still being loaded",
                            self.nodes[i].name, name
                        ),
                    ));
                }
                continue;
            }
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    self.errs.push(Diagnostic::error(
                        kinds::INCLUDE_ERROR,
                        &bare_loc(&self.nodes[i], line),
                        format!("cannot read included file {}: {e}", path.display()),
                    ));
                    continue;
                }
            };
            let j = self.add(name, path, text);
            self.nodes[j].parents.push((i, line));
            self.visit(j);
        }
        self.state[i] = Visit::Done;
        self.post_order.push(i);
    }

    /// Build each file's shared record, includers before the files they
    /// include so that parent locations are complete.
    fn source_files(&self) -> Vec<Arc<SourceFile>> {
        let mut files: Vec<Option<Arc<SourceFile>>> = vec![None; self.nodes.len()];
        for &i in self.post_order.iter().rev() {
            let node = &self.nodes[i];
            let included_from = node
                .parents
                .iter()
                .map(|&(p, line)| SourceLoc {
                    line,
                    file: files[p].clone(),
                })
                .collect();
            files[i] = Some(Arc::new(SourceFile {
                file_name: node.name.clone(),
                full_path: node.path.display().to_string(),
                included_from,
            }));
        }
        files.into_iter().map(Option::unwrap_or_default).collect()
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

/// Load `path` and every file it includes.
pub fn load(path: &Path) -> Result<Loaded, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut loader = Loader::default();
    let root = loader.add(path.display().to_string(), path.to_path_buf(), text);
    loader.visit(root);
    if loader.errs.has_errors() {
        return Err(LoadError::Syntax(loader.errs));
    }

    let files = loader.source_files();
    let mut errs = Diagnostics::new();
    let mut ast = Ast::default();
    let mut sources = Vec::with_capacity(loader.nodes.len());
    for &i in &loader.post_order {
        let node = &loader.nodes[i];
        sources.push(SourceText {
            path: node.path.display().to_string(),
            text: node.text.clone(),
        });
        let Some(parsed) = errs.absorb(parse(&node.text, files[i].clone())) else {
            continue;
        };
        if let (Some(_), Some(extra)) = (&ast.call, &parsed.call) {
            errs.push(Diagnostic::error(
                kinds::DUPLICATE_CALL,
                &extra.loc,
                "cannot have more than one top-level call",
            ));
        }
        ast.merge(parsed);
    }
    errs.into_result(Loaded { ast, sources })
        .map_err(LoadError::Syntax)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::render_loc;

    /// A scratch directory unique to one test.
    fn scratch(test: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mroc-{}-{}", std::process::id(), test));
        let _ = fs::remove_dir_all(&dir);
        for (name, text) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        dir
    }

    #[test]
    fn includes_load_first_and_once() {
        let dir = scratch(
            "once",
            &[
                ("main.mro", "@include \"lib/a.mro\"\n@include \"lib/b.mro\"\nfiletype main;\n"),
                ("lib/a.mro", "@include \"common.mro\"\nfiletype a;\n"),
                ("lib/b.mro", "\n@include \"common.mro\"\nfiletype b;\n"),
                ("lib/common.mro", "filetype common;\n"),
            ],
        );
        let loaded = load(&dir.join("main.mro")).unwrap();
        let names: Vec<_> = loaded.ast.user_types.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(names, vec!["common", "a", "b", "main"]);
        assert_eq!(loaded.sources.len(), 4);

        let common = &loaded.ast.user_types[0].loc;
        let file = common.file.as_ref().unwrap();
        assert_eq!(file.file_name, "common.mro");
        let lines: Vec<_> = file.included_from.iter().map(|l| l.line).collect();
        assert_eq!(lines, vec![1, 2]);
        assert!(render_loc(common, "").contains("included from:"));
    }

    #[test]
    fn include_cycle_is_a_parse_error() {
        let dir = scratch(
            "cycle",
            &[
                ("a.mro", "@include \"b.mro\"\n"),
                ("b.mro", "@include \"a.mro\"\n"),
            ],
        );
        let Err(LoadError::Syntax(errs)) = load(&dir.join("a.mro")) else {
            panic!("expected an include cycle");
        };
        let d = errs.iter().next().unwrap();
        assert_eq!(d.kind, kinds::PARSE_ERROR);
        assert!(d.message.starts_with("include cycle: b.mro includes a.mro"), "{}", d.message);
    }

    #[test]
    fn missing_files() {
        let dir = scratch("missing", &[("main.mro", "@include \"nope.mro\"\n")]);
        let Err(LoadError::Syntax(errs)) = load(&dir.join("main.mro")) else {
            panic!("expected an include error");
        };
        assert_eq!(errs.iter().next().unwrap().kind, kinds::INCLUDE_ERROR);

        let err = load(&dir.join("absent.mro")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().starts_with("cannot read "));
    }

    #[test]
    fn second_top_level_call_across_files() {
        let lib = "stage S(in int a, src py \"s\")\ncall S(a = 1)\n";
        let dir = scratch(
            "calls",
            &[
                ("main.mro", "@include \"lib.mro\"\ncall S(a = 2)\n"),
                ("lib.mro", lib),
            ],
        );
        let Err(LoadError::Syntax(errs)) = load(&dir.join("main.mro")) else {
            panic!("expected a duplicate call");
        };
        let d = errs.iter().next().unwrap();
        assert_eq!(d.kind, kinds::DUPLICATE_CALL);
        assert_eq!(d.loc.line, 2);
    }
}
