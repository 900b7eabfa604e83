// params.rs — Parameter lists and stage declarations
//
// Compiles ordered parameter lists (duplicate ids, type existence, cached
// file classification), checks output file names for portability, and
// compiles the per-stage parts that only involve parameters: split
// parameters, resources and retained outputs.
//
// Preconditions: every user file type and struct is registered.
// Postconditions: each `Param` has `file_kind` and `complex` set; stage
//   retains are deduplicated and sorted by id.
// Failure modes: `DuplicateNameError`, `TypeError`, `OutName`,
//   `ArgumentError` (resources), `RetainParamError`. Portability problems
//   follow the enforcement level and may be warnings.
// Side effects: none.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ast::*;
use crate::config::{CompileOptions, EnforcementLevel};
use crate::diag::{kinds, DiagKind, Diagnostic, Diagnostics};
use crate::registry::TypeLookup;
use crate::types::{FILE, MAP, PATH};
use crate::validate::{is_legal_unix_filename, is_legal_windows_filename, is_windows_device_name};

/// A diagnostic for a check whose severity depends on the enforcement
/// level, or `None` when the level disables the check.
pub fn enforced(
    level: EnforcementLevel,
    kind: DiagKind,
    loc: &SourceLoc,
    message: impl Into<String>,
) -> Option<Diagnostic> {
    level
        .diag_level()
        .map(|l| Diagnostic::new(kind, l, loc.clone(), message))
}

// ── Parameter lists ─────────────────────────────────────────────────────────

/// Check ids and types of a parameter list and cache each parameter's
/// file classification.
pub fn compile_params(params: &mut Params, lookup: &dyn TypeLookup) -> Diagnostics {
    compile_param_list(params, lookup, |id| {
        format!("parameter '{id}' was already declared when encountered again")
    })
}

/// `compile_params` with a caller-chosen duplicate-id message.
pub fn compile_param_list(
    params: &mut Params,
    lookup: &dyn TypeLookup,
    duplicate: impl Fn(&str) -> String,
) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let mut seen: HashMap<String, SourceLoc> = HashMap::new();
    for param in params.iter_mut() {
        if let Some(prev) = seen.get(&param.id) {
            errs.push(
                Diagnostic::error(kinds::DUPLICATE_NAME, &param.loc, duplicate(&param.id))
                    .with_related(prev.clone(), "Previous declaration"),
            );
        } else {
            seen.insert(param.id.clone(), param.loc.clone());
        }

        match lookup.get(&param.tname) {
            Some(t) => {
                param.file_kind = t.file_kind();
                param.complex = t.is_complex();
            }
            None => errs.push(Diagnostic::error(
                kinds::TYPE_ERROR,
                &param.loc,
                format!("undefined type '{}'", param.tname),
            )),
        }
    }
    errs
}

/// Compile an output parameter list, including its file name checks.
pub fn compile_out_params(params: &mut Params, lookup: &dyn TypeLookup, opts: &CompileOptions) -> Diagnostics {
    let mut errs = compile_params(params, lookup);
    for param in params.iter() {
        if let Some(name) = &param.out_name {
            if let Err(e) = is_legal_unix_filename(name) {
                errs.push(Diagnostic::error(
                    kinds::OUT_NAME,
                    &param.loc,
                    format!("illegal filename {name:?}: {e}"),
                ));
                continue;
            }
        }
        if let Some(d) = check_portable_filename(param, opts.enforcement) {
            errs.push(d);
        }
    }
    errs
}

/// Warn about output names that will not survive being copied to a
/// Windows file system.
fn check_portable_filename(param: &Param, level: EnforcementLevel) -> Option<Diagnostic> {
    if !param.file_kind.is_file_like() {
        return None;
    }
    let message = match &param.out_name {
        Some(name) => match is_legal_windows_filename(name) {
            Ok(()) => return None,
            Err(e) => format!(
                "out file name {:?} for parameter {} is not legal under Microsoft Windows \
                 operating systems and may cause issues for users who export their results \
                 to such filesystems: {}",
                name, param.id, e
            ),
        },
        None if is_windows_device_name(&param.id) => format!(
            "parameter {}, which is a file output, conflicts with a 'device file' name on \
             Microsoft Windows, and will cause issues for users on such filesystems",
            param.id
        ),
        None => return None,
    };
    enforced(level, kinds::OUT_NAME, &param.loc, message)
}

/// The file name a file-typed output is written to, or `None` for values
/// that are not files.
pub fn out_filename(param: &Param) -> Option<String> {
    if !param.file_kind.is_file_like() {
        return None;
    }
    if let Some(name) = &param.out_name {
        return Some(name.clone());
    }
    if param.complex || param.tname.tname == FILE || param.tname.tname == PATH {
        return Some(param.id.clone());
    }
    Some(format!("{}.{}", param.id, param.tname.tname))
}

// ── Stages ──────────────────────────────────────────────────────────────────

/// Compile everything about a stage that does not involve calls.
pub fn compile_stage(stage: &mut Stage, lookup: &dyn TypeLookup, opts: &CompileOptions) -> Diagnostics {
    let mut errs = compile_params(&mut stage.in_params, lookup);
    errs.extend(compile_out_params(&mut stage.out_params, lookup, opts));

    if let Some(split) = &mut stage.split {
        errs.extend(compile_params(&mut split.in_params, lookup));
        for p in split.in_params.iter() {
            if stage.in_params.contains(&p.id) {
                if let Some(d) = enforced(
                    opts.enforcement,
                    kinds::DUPLICATE_NAME,
                    &p.loc,
                    format!("'{}' appears as both a stage and split input", p.id),
                ) {
                    errs.push(d);
                }
            }
        }
        errs.extend(compile_out_params(&mut split.out_params, lookup, opts));
        for p in split.out_params.iter() {
            if stage.out_params.contains(&p.id) {
                errs.push(Diagnostic::error(
                    kinds::DUPLICATE_NAME,
                    &p.loc,
                    format!(
                        "parameter name '{}' of stage {} is used for both chunk and stage outs",
                        p.id, stage.id
                    ),
                ));
            }
        }
    }

    errs.extend(compile_resources(&stage.resources));
    let (retain, retain_errs) = compile_stage_retains(stage);
    stage.retain = retain;
    errs.extend(retain_errs);
    errs
}

fn compile_resources(resources: &[Resource]) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let mut seen = HashSet::new();
    for r in resources {
        if !seen.insert(r.key.as_str()) {
            errs.push(Diagnostic::error(
                kinds::DUPLICATE_NAME,
                &r.loc,
                format!("resource '{}' was already specified", r.key),
            ));
            continue;
        }
        let ok = match (r.key.as_str(), &r.value) {
            ("threads" | "mem_gb" | "vmem_gb", ResourceValue::Int(_) | ResourceValue::Float(_)) => true,
            ("special", ResourceValue::Str(_)) => true,
            ("volatile", ResourceValue::Word(w)) => w == "strict",
            ("threads" | "mem_gb" | "vmem_gb" | "special" | "volatile", _) => false,
            (key, _) => {
                errs.push(Diagnostic::error(
                    kinds::ARGUMENT,
                    &r.loc,
                    format!("unknown resource '{key}'"),
                ));
                continue;
            }
        };
        if !ok {
            let expected = match r.key.as_str() {
                "special" => "a string",
                "volatile" => "strict",
                _ => "a number",
            };
            errs.push(Diagnostic::error(
                kinds::ARGUMENT,
                &r.loc,
                format!("resource '{}' must be {}", r.key, expected),
            ));
        }
    }
    errs
}

/// Validate retained outputs; returns them deduplicated and sorted.
fn compile_stage_retains(stage: &Stage) -> (Vec<RetainId>, Diagnostics) {
    let mut errs = Diagnostics::new();
    let mut ids: BTreeMap<String, RetainId> = BTreeMap::new();
    for r in &stage.retain {
        match stage.out_params.get(&r.id) {
            None => errs.push(Diagnostic::error(
                kinds::RETAIN_PARAM,
                &r.loc,
                format!(
                    "stage {} does not have an out parameter named {} to retain.",
                    stage.id, r.id
                ),
            )),
            Some(out) if !out.file_kind.is_file_like() && out.tname.tname != MAP => {
                errs.push(Diagnostic::error(
                    kinds::RETAIN_PARAM,
                    &r.loc,
                    format!("out parameter {} of {} is not of file type.", r.id, stage.id),
                ))
            }
            Some(_) => {
                ids.entry(r.id.clone()).or_insert_with(|| r.clone());
            }
        }
    }
    (ids.into_values().collect(), errs)
}
