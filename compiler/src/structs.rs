// structs.rs — Type declarations
//
// Registers user file types and struct declarations with the type
// registry, and the implicit output struct of every stage and pipeline
// (named after the callable, one field per output).
//
// Preconditions: the registry holds the builtin types.
// Postconditions: every declared type is registered; struct members have
//   their file classification cached.
// Failure modes: `DuplicateNameError` for conflicting registrations,
//   duplicate fields, or file fields sharing an output name; `TypeError`
//   for unknown member types or a struct that contains itself.
// Side effects: none.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::*;
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::params::{compile_param_list, out_filename};
use crate::registry::{TypeLookup, TypeRegistry};
use crate::types::{FileKind, StructMember, StructType};

/// The file kind of a struct with the given member kinds. A struct
/// holding any file is a directory.
fn struct_kind(kinds: impl IntoIterator<Item = FileKind>) -> FileKind {
    match kinds.into_iter().max().unwrap_or_default() {
        FileKind::IsFile => FileKind::IsDirectory,
        k => k,
    }
}

fn struct_type(id: &str, params: &Params, loc: &SourceLoc, registry: &TypeRegistry) -> StructType {
    let members: Vec<StructMember> = params
        .iter()
        .map(|p| StructMember {
            id: p.id.clone(),
            tname: p.tname.clone(),
            help: p.help.clone(),
            out_name: p.out_name.clone(),
        })
        .collect();
    let kind = struct_kind(
        members
            .iter()
            .filter_map(|m| registry.get(&m.tname))
            .map(|t| t.file_kind()),
    );
    StructType::new(id, members, kind, loc.clone())
}

// ── Declared types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Todo,
    Active,
    Done,
}

struct StructRegistrar<'a> {
    decls: &'a [StructDecl],
    index: HashMap<&'a str, usize>,
    state: Vec<Visit>,
    registry: &'a mut TypeRegistry,
    errs: Diagnostics,
}

impl<'a> StructRegistrar<'a> {
    /// Register `decls[i]` after every struct it contains.
    fn visit(&mut self, i: usize) {
        if self.state[i] != Visit::Todo {
            return;
        }
        self.state[i] = Visit::Active;
        let decls = self.decls;
        let decl = &decls[i];
        for m in decl.members.iter() {
            let Some(&j) = self.index.get(m.tname.tname.as_str()) else {
                continue;
            };
            if self.state[j] == Visit::Active {
                self.errs.push(Diagnostic::error(
                    kinds::TYPE_ERROR,
                    &m.loc,
                    format!(
                        "struct {} cannot contain itself (field {} has type {})",
                        decls[j].id, m.id, m.tname
                    ),
                ));
                continue;
            }
            self.visit(j);
        }
        let st = struct_type(&decl.id, &decl.members, &decl.loc, self.registry);
        if let Err(d) = self.registry.add_struct_type(Arc::new(st)) {
            self.errs.push(d);
        }
        self.state[i] = Visit::Done;
    }
}

/// Register file types and structs, then check each struct's members.
pub fn register_types(ast: &mut Ast, registry: &mut TypeRegistry) -> Diagnostics {
    let mut errs = Diagnostics::new();
    for t in &ast.user_types {
        if let Err(d) = registry.add_user_type(&t.id, &t.loc) {
            errs.push(d);
        }
    }

    let mut index = HashMap::new();
    for (i, decl) in ast.structs.iter().enumerate() {
        index.entry(decl.id.as_str()).or_insert(i);
    }
    let mut registrar = StructRegistrar {
        decls: &ast.structs,
        index,
        state: vec![Visit::Todo; ast.structs.len()],
        registry: &mut *registry,
        errs,
    };
    for i in 0..ast.structs.len() {
        registrar.visit(i);
    }
    let mut errs = registrar.errs;

    for decl in &mut ast.structs {
        errs.extend(check_struct_members(decl, registry));
    }
    errs
}

fn check_struct_members(decl: &mut StructDecl, registry: &TypeRegistry) -> Diagnostics {
    let id = &decl.id;
    let mut errs = compile_param_list(&mut decl.members, registry, |field| {
        format!("field '{field}' of struct {id} was already declared when encountered again")
    });

    let mut names: HashMap<String, &Param> = HashMap::new();
    for m in decl.members.iter() {
        let Some(name) = out_filename(m) else {
            continue;
        };
        if let Some(prev) = names.get(&name) {
            errs.push(
                Diagnostic::error(
                    kinds::DUPLICATE_NAME,
                    &m.loc,
                    format!(
                        "struct {} has conflicting output file name {} for fields {} and {}",
                        decl.id, name, prev.id, m.id
                    ),
                )
                .with_related(prev.loc.clone(), "Previous declaration"),
            );
        } else {
            names.insert(name, m);
        }
    }
    errs
}

// ── Callable output structs ─────────────────────────────────────────────────

/// Register the output struct of every stage and pipeline. Run after the
/// callables' parameters are compiled.
pub fn register_callable_structs(ast: &Ast, registry: &mut TypeRegistry) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let outputs = ast
        .stages
        .iter()
        .map(|s| (&s.id, &s.out_params, &s.loc))
        .chain(ast.pipelines.iter().map(|p| (&p.id, &p.out_params, &p.loc)));
    for (id, outs, loc) in outputs {
        let st = struct_type(id, outs, loc, registry);
        if let Err(d) = registry.add_struct_type(Arc::new(st)) {
            errs.push(d);
        }
    }
    errs
}
