// resolve.rs — Reference resolution inside a pipeline
//
// Resolves `self.param.field` and `CALL.output.field` references to the
// type they evaluate to, taking the fan-out mode of the referenced call
// into account, and projects field paths through structs, arrays and maps.
//
// Preconditions: `Ast::index_callables` has run; parameter types are known
//   to the `TypeLookup`.
// Postconditions: none (pure lookups).
// Failure modes: unresolvable references produce a `RefError` carrying the
//   diagnostic kind to report (`ScopeNameError`, `NoSuchOutputError`, ...).
// Side effects: none.

use std::fmt;

use crate::ast::*;
use crate::diag::{kinds, DiagKind, Diagnostic};
use crate::map_call::CallMode;
use crate::registry::TypeLookup;
use crate::types::{Type, TypeError, TypeId};

// ── Public types ────────────────────────────────────────────────────────────

/// A reference that could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RefError {
    pub kind: DiagKind,
    pub message: String,
}

impl RefError {
    fn new(kind: DiagKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn into_diagnostic(self, loc: &SourceLoc) -> Diagnostic {
        Diagnostic::error(self.kind, loc, self.message)
    }
}

impl fmt::Display for RefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<RefError> for TypeError {
    fn from(e: RefError) -> Self {
        TypeError::new(e.to_string())
    }
}

/// Everything needed to resolve references: the program, the enclosing
/// pipeline (absent for the top-level call) and the type table.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub ast: &'a Ast,
    pub pipeline: Option<&'a Pipeline>,
    pub lookup: &'a dyn TypeLookup,
}

impl<'a> Scope<'a> {
    pub fn new(ast: &'a Ast, pipeline: Option<&'a Pipeline>, lookup: &'a dyn TypeLookup) -> Self {
        Self {
            ast,
            pipeline,
            lookup,
        }
    }

    /// The call with alias `id` in the enclosing pipeline.
    pub fn call(&self, id: &str) -> Option<&'a CallStm> {
        self.pipeline?.calls.iter().find(|c| c.id == id)
    }

    /// The type of `r`, including the extra dimension added when the
    /// referenced call is mapped.
    pub fn ref_type(&self, r: &RefExp) -> Result<TypeId, RefError> {
        let (tid, call) = self.output_type(r)?;
        match call {
            Some(call) => apply_mode(tid, call.mode, r),
            None => Ok(tid),
        }
    }

    /// The type of `r` as declared, before any fan-out of the referenced
    /// call is applied, together with that call.
    pub fn output_type(&self, r: &RefExp) -> Result<(TypeId, Option<&'a CallStm>), RefError> {
        let Some(pipeline) = self.pipeline else {
            return Err(RefError::new(
                kinds::REFERENCE,
                "this binding cannot be resolved outside of a stage or pipeline.",
            ));
        };
        match r.kind {
            RefKind::SelfRef => {
                let Some(param) = pipeline.in_params.get(&r.id) else {
                    return Err(RefError::new(
                        kinds::SCOPE_NAME,
                        format!(
                            "'{}' is not an input parameter of pipeline '{}'",
                            r.id, pipeline.id
                        ),
                    ));
                };
                let tid = field_type(self.lookup, &param.tname, &r.output_id)
                    .map_err(|e| RefError::new(kinds::TYPE_ERROR, e.to_string()))?;
                Ok((tid, None))
            }
            RefKind::Call => {
                let Some(call) = self.call(&r.id) else {
                    return Err(RefError::new(
                        kinds::SCOPE_NAME,
                        format!("'{}' is not called in pipeline '{}'", r.id, pipeline.id),
                    ));
                };
                let Some(callee) = self.ast.callable(&call.decl_id) else {
                    return Err(RefError::new(
                        kinds::SCOPE_NAME,
                        format!("'{}' is not defined in this scope", call.decl_id),
                    ));
                };
                if r.output_id.is_empty() {
                    return Ok((TypeId::scalar(callee.id()), Some(call)));
                }
                let (out, rest) = match r.output_id.split_once('.') {
                    Some((out, rest)) => (out, rest),
                    None => (r.output_id.as_str(), ""),
                };
                let Some(param) = callee.out_params().get(out) else {
                    return Err(RefError::new(
                        kinds::NO_SUCH_OUTPUT,
                        format!("'{}' is not an output parameter of '{}'", out, callee.id()),
                    ));
                };
                let tid = field_type(self.lookup, &param.tname, rest)
                    .map_err(|e| RefError::new(kinds::TYPE_ERROR, e.to_string()))?;
                Ok((tid, Some(call)))
            }
        }
    }

    /// The resolved `Type` of `r`.
    pub fn ref_type_value(&self, r: &RefExp) -> Result<std::sync::Arc<Type>, RefError> {
        let tid = self.ref_type(r)?;
        self.lookup
            .get(&tid)
            .ok_or_else(|| RefError::new(kinds::TYPE_ERROR, format!("Unknown type {tid}")))
    }
}

/// Add the dimension a mapped call wraps around each of its outputs.
pub fn apply_mode(mut tid: TypeId, mode: CallMode, r: &RefExp) -> Result<TypeId, RefError> {
    match mode {
        CallMode::Array | CallMode::Null => {
            tid.array_dim += 1;
            Ok(tid)
        }
        CallMode::Map => {
            if tid.map_dim > 0 {
                return Err(RefError::new(
                    kinds::TYPE_ERROR,
                    format!("{r} would be a map of maps, which is not supported"),
                ));
            }
            tid.map_dim = tid.array_dim + 1;
            tid.array_dim = 0;
            Ok(tid)
        }
        CallMode::Single | CallMode::Unknown => Ok(tid),
    }
}

// ── Field projection ────────────────────────────────────────────────────────

/// The type of `path` (dotted field names) evaluated against a value of
/// type `tid`. Projecting through an array or map projects every element.
pub fn field_type(lookup: &dyn TypeLookup, tid: &TypeId, path: &str) -> Result<TypeId, TypeError> {
    if path.is_empty() {
        return Ok(tid.clone());
    }
    if tid.array_dim > 0 {
        let mut inner = field_type(lookup, &TypeId::new(tid.tname.clone(), 0, tid.map_dim), path)?;
        inner.array_dim += tid.array_dim;
        return Ok(inner);
    }
    if tid.map_dim > 0 {
        let mut inner = field_type(lookup, &TypeId::scalar(tid.tname.clone()), path)?;
        if inner.map_dim != 0 {
            return Err(TypeError::new("invalid projection through nested maps"));
        }
        inner.map_dim = tid.map_dim + inner.array_dim;
        inner.array_dim = 0;
        return Ok(inner);
    }
    let st = match lookup.get(tid).as_deref() {
        Some(Type::Struct(st)) => st.clone(),
        _ => return Err(TypeError::new(format!("type {tid} is not a struct"))),
    };
    let (field, rest) = path.split_once('.').unwrap_or((path, ""));
    let Some(member) = st.member(field) else {
        return Err(TypeError::new(format!(
            "no field {} in struct {} (evaluating {})",
            field, st.id, path
        )));
    };
    field_type(lookup, &member.tname, rest)
        .map_err(|e| TypeError::wrap(format!("field {field}"), e))
}
