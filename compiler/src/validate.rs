// validate.rs — Expression validity against an expected type
//
// Checks that a bound expression (literal, reference, split, or disabled
// wrapper) can produce a value of the expected parameter type. Also holds
// the file name legality checks shared by output names and map keys.
//
// Preconditions: references in the expression have already been resolved
//   once by the caller, which reports their scope errors with proper kinds.
// Postconditions: none (pure checks).
// Failure modes: returns a chained `TypeError` naming the first offending
//   element, field or key.
// Side effects: none.

use std::collections::BTreeMap;

use crate::ast::*;
use crate::resolve::Scope;
use crate::types::{Builtin, FileKind, Type, TypeError, TypeId};

/// Whether `exp` may be bound where a value of type `t` is expected.
pub fn is_valid_expression(t: &Type, exp: &Exp, scope: &Scope<'_>) -> Result<(), TypeError> {
    match &exp.kind {
        ExpKind::Null => Ok(()),
        ExpKind::Split(s) => is_valid_split(t, &s.value, scope),
        ExpKind::Disabled(d) => is_valid_expression(t, &d.value, scope),
        ExpKind::Ref(r) => {
            let tid = scope.ref_type(r)?;
            is_valid_bound_type(t, &tid, scope)
        }
        _ => is_valid_literal(t, exp, scope),
    }
}

/// A split binds each element of a collection, so every element must be
/// valid for `t`.
fn is_valid_split(t: &Type, value: &Exp, scope: &Scope<'_>) -> Result<(), TypeError> {
    match &value.kind {
        ExpKind::Null => Ok(()),
        ExpKind::Array(items) => {
            for (i, e) in items.iter().enumerate() {
                is_valid_expression(t, e, scope)
                    .map_err(|err| TypeError::binding(format!("split element {i}"), err))?;
            }
            Ok(())
        }
        ExpKind::Map(_, entries) => {
            for (k, e) in entries {
                is_valid_expression(t, e, scope)
                    .map_err(|err| TypeError::binding(format!("split key {k}"), err))?;
            }
            Ok(())
        }
        ExpKind::Ref(r) => {
            let tid = scope.ref_type(r)?;
            let elem = if tid.array_dim > 0 {
                tid.with_array_dim(tid.array_dim - 1)
            } else if tid.map_dim > 0 {
                TypeId::new(tid.tname.clone(), tid.map_dim - 1, 0)
            } else {
                return Err(TypeError::new(format!(
                    "binding is not a collection: {r} has type {tid}"
                )));
            };
            is_valid_bound_type(t, &elem, scope)
        }
        ExpKind::Disabled(d) => is_valid_split(t, &d.value, scope),
        _ => Err(TypeError::new(format!(
            "cannot split over a {} value",
            value.kind_name()
        ))),
    }
}

/// Whether a reference resolving to `tid` may be bound to `t`.
fn is_valid_bound_type(t: &Type, tid: &TypeId, scope: &Scope<'_>) -> Result<(), TypeError> {
    let incompatible = |e| TypeError::wrap("ReferenceError: incompatible types", e);
    let bound = || {
        scope
            .lookup
            .get(tid)
            .ok_or_else(|| TypeError::new(format!("Unknown type {tid}")))
    };
    match t {
        Type::Builtin(_) | Type::UserFile(_) | Type::Struct(_) => {
            if tid.array_dim > 0 {
                return Err(TypeError::new(format!(
                    "ReferenceError: binding is an array; expected {t}"
                )));
            }
            if tid.map_dim > 0 && !matches!(t, Type::Builtin(Builtin::Map)) {
                return Err(TypeError::new(format!(
                    "ReferenceError: binding is a map; expected {t}"
                )));
            }
            let bound = bound()?;
            t.is_assignable_from(&bound, scope.lookup)
                .map_err(incompatible)
        }
        Type::Array { dim, .. } => {
            if tid.array_dim < 1 {
                return Err(TypeError::new("ReferenceError: binding is not an array."));
            }
            if tid.array_dim != *dim {
                return Err(TypeError::new(format!(
                    "ReferenceError: bound array dimension mismatch ({}, expected {}).",
                    tid.array_dim, dim
                )));
            }
            let bound = bound()?;
            t.is_assignable_from(&bound, scope.lookup)
                .map_err(incompatible)
        }
        Type::TypedMap { .. } => {
            let bound = bound()?;
            let struct_value = matches!(bound.as_ref(), Type::Struct(_));
            if !struct_value && (tid.map_dim == 0 || tid.array_dim > 0) {
                return Err(TypeError::new("ReferenceError: binding is not a typed map."));
            }
            t.is_assignable_from(&bound, scope.lookup)
                .map_err(incompatible)
        }
        Type::Null => Err(TypeError::new(format!("cannot bind {tid} to null"))),
    }
}

fn is_valid_literal(t: &Type, exp: &Exp, scope: &Scope<'_>) -> Result<(), TypeError> {
    match t {
        Type::Builtin(b) => is_valid_builtin_literal(*b, exp),
        Type::UserFile(name) => match &exp.kind {
            ExpKind::Str(_) | ExpKind::Null => Ok(()),
            _ => Err(TypeError::new(format!(
                "cannot assign {} to {}",
                exp.kind_name(),
                name
            ))),
        },
        Type::Struct(st) => {
            let ExpKind::Map(_, entries) = &exp.kind else {
                return Err(TypeError::new(format!(
                    "cannot assign {} to struct {}",
                    exp.kind_name(),
                    st.id
                )));
            };
            for m in &st.members {
                let Some(value) = entries.get(&m.id) else {
                    return Err(TypeError::new(format!(
                        "missing value for struct field {}",
                        m.id
                    )));
                };
                let mt = scope.lookup.get(&m.tname).ok_or_else(|| {
                    TypeError::new(format!("Unknown type {}", m.tname))
                })?;
                is_valid_expression(&mt, value, scope)
                    .map_err(|e| TypeError::binding(format!("field {}", m.id), e))?;
            }
            match entries.keys().find(|k| st.member(k).is_none()) {
                Some(k) => Err(TypeError::new(format!("unexpected field {k}"))),
                None => Ok(()),
            }
        }
        Type::Array { elem, dim } => {
            let ExpKind::Array(items) = &exp.kind else {
                return Err(TypeError::new(format!(
                    "BindingError: cannot assign {} to {}",
                    exp.kind_name(),
                    t
                )));
            };
            let inner = if *dim > 1 {
                Type::Array {
                    elem: elem.clone(),
                    dim: dim - 1,
                }
            } else {
                elem.as_ref().clone()
            };
            for (i, e) in items.iter().enumerate() {
                is_valid_expression(&inner, e, scope)
                    .map_err(|err| TypeError::binding(format!("BindingError: array element {i}"), err))?;
            }
            Ok(())
        }
        Type::TypedMap { elem } => match &exp.kind {
            ExpKind::Map(MapKind::Struct, _) => {
                Err(TypeError::new("cannot assign struct literal to map"))
            }
            ExpKind::Map(MapKind::Map, entries) => {
                for (k, e) in entries {
                    is_valid_expression(elem, e, scope)
                        .map_err(|err| TypeError::binding(format!("map key {k}"), err))?;
                }
                if t.file_kind() == FileKind::IsDirectory {
                    for k in entries.keys() {
                        is_legal_unix_filename(k)
                            .map_err(|reason| TypeError::wrap(format!("key {k}"), reason))?;
                    }
                }
                Ok(())
            }
            _ => Err(TypeError::new(format!(
                "cannot assign {} to {}",
                exp.kind_name(),
                t
            ))),
        },
        Type::Null => Err(TypeError::new(format!(
            "cannot assign {} to null",
            exp.kind_name()
        ))),
    }
}

fn is_valid_builtin_literal(b: Builtin, exp: &Exp) -> Result<(), TypeError> {
    match &exp.kind {
        ExpKind::Str(_) => match b {
            Builtin::String | Builtin::File | Builtin::Path => Ok(()),
            _ => Err(TypeError::new(format!("cannot assign string to {}", b.name()))),
        },
        ExpKind::Int(_) => match b {
            Builtin::Int | Builtin::Float => Ok(()),
            _ => Err(TypeError::new(format!("cannot assign int to {}", b.name()))),
        },
        ExpKind::Float(x) => match b {
            Builtin::Float => Ok(()),
            Builtin::Int if x.fract() == 0.0 => Ok(()),
            Builtin::Int => Err(TypeError::new(format!("cannot assign {x} to an integer"))),
            _ => Err(TypeError::new(format!("cannot assign float to {}", b.name()))),
        },
        ExpKind::Bool(_) => match b {
            Builtin::Bool => Ok(()),
            _ => Err(TypeError::new(format!("cannot assign bool to {}", b.name()))),
        },
        ExpKind::Map(kind, entries) => {
            let what = if *kind == MapKind::Struct { "struct" } else { "map" };
            if b != Builtin::Map {
                return Err(TypeError::new(format!(
                    "cannot assign {what} literal to {}",
                    b.name()
                )));
            }
            match first_ref(entries) {
                Some(r) => Err(TypeError::new(format!(
                    "{what} literal cannot be assigned to untyped map: contains reference to {r}"
                ))),
                None => Ok(()),
            }
        }
        ExpKind::Array(_) => Err(TypeError::new(format!(
            "cannot assign array literal to {}",
            b.name()
        ))),
        _ => Err(TypeError::new(format!(
            "cannot assign {} to {}",
            exp.kind_name(),
            b.name()
        ))),
    }
}

fn first_ref(entries: &BTreeMap<String, Exp>) -> Option<String> {
    entries
        .values()
        .flat_map(|e| e.find_refs())
        .next()
        .map(|r| r.to_string())
}

// ── File names ──────────────────────────────────────────────────────────────

/// Whether `name` is usable as a file name on Unix file systems.
pub fn is_legal_unix_filename(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::new("empty string"));
    }
    if name.len() > 255 {
        return Err(TypeError::new("too long"));
    }
    if name == "." || name == ".." {
        return Err(TypeError::new("reserved name"));
    }
    if name.contains('/') {
        return Err(TypeError::new("'/' is not allowed in filenames"));
    }
    if name.contains('\0') {
        return Err(TypeError::new("null characters are not allowed in filenames"));
    }
    Ok(())
}

const WINDOWS_DEVICES: [&str; 4] = ["CON", "PRN", "AUX", "NUL"];

/// The part of `name` before the first `.`.
fn stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Whether `name` is a reserved device name on Windows (`CON`, `COM1`,
/// `lpt3.txt`, ...).
pub fn is_windows_device_name(name: &str) -> bool {
    let stem = stem(name).to_ascii_uppercase();
    if WINDOWS_DEVICES.contains(&stem.as_str()) {
        return true;
    }
    match stem.strip_prefix("COM").or_else(|| stem.strip_prefix("LPT")) {
        Some(n) => n.len() == 1 && n.as_bytes()[0].is_ascii_digit(),
        None => false,
    }
}

/// Whether `name` is usable as a file name on Windows file systems.
pub fn is_legal_windows_filename(name: &str) -> Result<(), TypeError> {
    if name.chars().count() > 128 {
        return Err(TypeError::new("too long"));
    }
    if let Some(c) = name
        .chars()
        .find(|&c| matches!(c, '|' | '/' | '\\' | '<' | '>' | '?' | '*' | ':' | '"') || c.is_control())
    {
        return Err(TypeError::new(format!("'{c}' is not a legal character")));
    }
    if name.ends_with(' ') {
        return Err(TypeError::new("name cannot end with space"));
    }
    if name.ends_with('.') {
        return Err(TypeError::new("name cannot end with ."));
    }
    if is_windows_device_name(name) {
        return Err(TypeError::new(format!(
            "{} conflicts with a reserved windows device name",
            stem(name)
        )));
    }
    Ok(())
}
