// bindings.rs — Binding compiler
//
// Matches the bindings of a call (or of a pipeline's return statement)
// against the declared parameters of its target: expands `*` wildcards,
// type-checks every bound expression, and checks coverage. Also compiles
// call modifiers, pipeline retains and the unused-input check.
//
// Preconditions: parameter lists are compiled; call modes are resolved by
//   `map_call` so references to mapped calls have their fan-out dimension.
// Postconditions: returned binding lists contain no wildcard; each bound
//   id is a declared parameter whose type accepts the bound expression.
// Failure modes: `ArgumentError`, `DuplicateBinding`, `TypeMismatchError`,
//   `ArgumentNotSuppliedError`, reference errors from `resolve`, and the
//   modifier errors (`ConflictingModifiers`, `UnsupportedTagError`,
//   `PreflightBindingError`, `PreflightOutputError`).
// Side effects: none.

use std::collections::HashSet;

use crate::ast::*;
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::resolve::Scope;
use crate::types::{Builtin, Type, TypeError, TypeId, BOOL};
use crate::validate::is_valid_expression;

pub const DISABLED: &str = "disabled";
pub const LOCAL: &str = "local";
pub const PREFLIGHT: &str = "preflight";
pub const VOLATILE: &str = "volatile";

const WILDCARD: &str = "*";

// ── Bindings ────────────────────────────────────────────────────────────────

/// Compile `bindings` against `params`.
///
/// With `check_coverage`, every parameter must end up bound; missing ones
/// are reported at `loc`. The returned list has wildcards expanded and the
/// legacy `CALL` to `CALL.default` rewrite applied.
pub fn compile_bindings(
    bindings: &BindStms,
    scope: &Scope<'_>,
    params: &Params,
    check_coverage: bool,
    loc: &SourceLoc,
) -> Result<BindStms, Diagnostics> {
    let mut errs = Diagnostics::new();
    let explicit: HashSet<&str> = bindings
        .iter()
        .filter(|b| b.id != WILDCARD)
        .map(|b| b.id.as_str())
        .collect();

    let mut expanded = Vec::with_capacity(bindings.len());
    for b in bindings.iter() {
        if b.id == WILDCARD {
            match expand_wildcard(b, scope, params, &explicit) {
                Ok(list) => expanded.extend(list),
                Err(d) => errs.push(d),
            }
        } else {
            expanded.push(b.clone());
        }
    }

    let mut bound: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(expanded.len());
    for mut b in expanded {
        if !bound.insert(b.id.clone()) {
            errs.push(Diagnostic::error(
                kinds::DUPLICATE_BINDING,
                &b.loc,
                format!("'{}' already bound in this call", b.id),
            ));
        }
        if let Err(d) = compile_binding(&mut b, scope, params) {
            errs.push(d);
        }
        out.push(b);
    }

    if check_coverage {
        for p in params.iter() {
            if !bound.contains(&p.id) {
                errs.push(Diagnostic::error(
                    kinds::ARGUMENT_NOT_SUPPLIED,
                    loc,
                    format!("no argument supplied for parameter '{}'", p.id),
                ));
            }
        }
    }
    errs.into_result(BindStms::new(out))
}

/// One synthetic binding per field of the wildcard's source that the
/// target declares and that is not bound explicitly.
fn expand_wildcard(
    b: &BindStm,
    scope: &Scope<'_>,
    params: &Params,
    explicit: &HashSet<&str>,
) -> Result<Vec<BindStm>, Diagnostic> {
    let synthetic = |id: &str, r: RefExp| BindStm {
        id: id.to_string(),
        exp: Exp::reference(r, b.exp.loc.clone()),
        loc: b.loc.clone(),
    };
    let ExpKind::Ref(r) = &b.exp.kind else {
        return Err(Diagnostic::error(
            kinds::ARGUMENT,
            &b.loc,
            format!("cannot expand * from a {} expression", b.exp.kind_name()),
        ));
    };

    if r.kind == RefKind::SelfRef && r.id.is_empty() {
        let Some(pipeline) = scope.pipeline else {
            return Err(Diagnostic::error(
                kinds::REFERENCE,
                &b.loc,
                "this binding cannot be resolved outside of a stage or pipeline.",
            ));
        };
        return Ok(pipeline
            .in_params
            .iter()
            .filter(|p| params.contains(&p.id) && !explicit.contains(p.id.as_str()))
            .map(|p| synthetic(&p.id, RefExp::self_ref(p.id.clone(), "")))
            .collect());
    }

    let t = scope
        .ref_type_value(r)
        .map_err(|e| e.into_diagnostic(&b.loc))?;
    let Type::Struct(st) = t.as_ref() else {
        return Err(Diagnostic::error(
            kinds::TYPE_MISMATCH,
            &b.loc,
            format!("cannot expand * from {r} of non-struct type {}", t.id()),
        ));
    };
    Ok(st
        .members
        .iter()
        .filter(|m| params.contains(&m.id) && !explicit.contains(m.id.as_str()))
        .map(|m| {
            let output_id = if r.output_id.is_empty() {
                m.id.clone()
            } else {
                format!("{}.{}", r.output_id, m.id)
            };
            synthetic(
                &m.id,
                RefExp {
                    kind: r.kind,
                    id: r.id.clone(),
                    output_id,
                },
            )
        })
        .collect())
}

fn compile_binding(b: &mut BindStm, scope: &Scope<'_>, params: &Params) -> Result<(), Diagnostic> {
    let Some(param) = params.get(&b.id) else {
        return Err(Diagnostic::error(
            kinds::ARGUMENT,
            &b.loc,
            format!("'{}' is not a valid parameter", b.id),
        ));
    };
    for r in b.exp.find_refs() {
        scope.ref_type(r).map_err(|e| e.into_diagnostic(&b.loc))?;
    }
    // Unknown types were reported with the parameter list.
    let Some(t) = scope.lookup.get(&param.tname) else {
        return Ok(());
    };
    let err = match is_valid_expression(&t, &b.exp, scope) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if let Some(fallback) = default_output(&b.exp) {
        if !t.is_complex() && is_valid_expression(&t, &fallback, scope).is_ok() {
            b.exp = fallback;
            return Ok(());
        }
    }
    Err(Diagnostic::error(
        kinds::TYPE_MISMATCH,
        &b.loc,
        TypeError::wrap(
            format!("expected type {} for parameter '{}'", param.tname, b.id),
            err,
        )
        .to_string(),
    ))
}

/// `CALL.default` for a bare `CALL` reference.
fn default_output(exp: &Exp) -> Option<Exp> {
    match &exp.kind {
        ExpKind::Ref(r) if r.kind == RefKind::Call && r.output_id.is_empty() => Some(
            Exp::reference(RefExp::call(r.id.clone(), "default"), exp.loc.clone()),
        ),
        _ => None,
    }
}

// ── Modifiers ───────────────────────────────────────────────────────────────

fn modifier_params(loc: &SourceLoc) -> Params {
    Params::new(
        [DISABLED, LOCAL, PREFLIGHT, VOLATILE]
            .into_iter()
            .map(|id| Param::new(id, TypeId::scalar(BOOL), loc.clone()))
            .collect(),
    )
}

/// Compile the `using (...)` modifiers of `call`, folding the boolean ones
/// into its flags and resolving its disable condition.
fn compile_modifiers(call: &mut CallStm, scope: &Scope<'_>, callee: Callable<'_>) -> Diagnostics {
    let mut errs = Diagnostics::new();
    if !call.modifiers.bindings.is_empty() {
        let params = modifier_params(&call.loc);
        match compile_bindings(&call.modifiers.bindings, scope, &params, false, &call.loc) {
            Ok(b) => call.modifiers.bindings = b,
            Err(e) => return e,
        }
    }

    let mut flags = [
        (LOCAL, call.modifiers.local),
        (PREFLIGHT, call.modifiers.preflight),
        (VOLATILE, call.modifiers.volatile),
    ];
    for (id, flag) in flags.iter_mut() {
        let Some(b) = call.modifiers.bindings.get(*id) else {
            continue;
        };
        // Already set by a keyword on the call.
        if *flag {
            errs.push(Diagnostic::error(
                kinds::CONFLICTING_MODIFIERS,
                &call.loc,
                "Cannot specify modifiers in more than one way.",
            ));
        }
        match b.exp.kind {
            ExpKind::Bool(v) => *flag = v,
            _ => errs.push(Diagnostic::error(
                kinds::ARGUMENT,
                &b.loc,
                format!("the {id} modifier must be bound to a literal bool, not {}", b.exp.kind_name()),
            )),
        }
    }
    let [(_, local), (_, preflight), (_, volatile)] = flags;
    call.modifiers.local = local;
    call.modifiers.preflight = preflight;
    call.modifiers.volatile = volatile;

    call.disabled = call
        .modifiers
        .bindings
        .get(DISABLED)
        .and_then(|b| match &b.exp.kind {
            ExpKind::Bool(false) | ExpKind::Null => None,
            _ => Some(b.exp.clone()),
        });

    if !callee.is_stage() {
        for (tag, set) in [(LOCAL, local), (PREFLIGHT, preflight), (VOLATILE, volatile)] {
            if set {
                errs.push(Diagnostic::error(
                    kinds::UNSUPPORTED_TAG,
                    &call.loc,
                    format!("Pipeline '{}' cannot be called with '{tag}' tag", call.decl_id),
                ));
            }
        }
    }

    if preflight {
        if call.disabled.is_some() {
            errs.push(Diagnostic::error(
                kinds::UNSUPPORTED_TAG,
                &call.loc,
                "Preflight stages cannot be declared disabled.",
            ));
        }
        let binds_outputs = call
            .bindings
            .iter()
            .chain(call.modifiers.bindings.iter())
            .filter(|b| b.exp.find_refs().iter().any(|r| r.kind == RefKind::Call));
        for _ in binds_outputs {
            errs.push(Diagnostic::error(
                kinds::PREFLIGHT_BINDING,
                &call.loc,
                format!(
                    "Preflight stage '{}' cannot have input parameter bound to output \
                     parameter of another stage or pipeline",
                    call.id
                ),
            ));
        }
        if !callee.out_params().is_empty() {
            errs.push(Diagnostic::error(
                kinds::PREFLIGHT_OUTPUT,
                &call.loc,
                format!("Preflight stage '{}' cannot have any output parameters", call.id),
            ));
        }
    }
    errs
}

/// Compile one call's modifiers and bindings. Returns the compiled copy.
pub fn compile_call(call: &CallStm, scope: &Scope<'_>) -> Result<CallStm, Diagnostics> {
    let Some(callee) = scope.ast.callable(&call.decl_id) else {
        let mut errs = Diagnostics::new();
        errs.push(Diagnostic::error(
            kinds::SCOPE_NAME,
            &call.loc,
            format!("'{}' is not defined in this scope", call.decl_id),
        ));
        return Err(errs);
    };
    let mut out = call.clone();
    let mut errs = compile_modifiers(&mut out, scope, callee);
    if let Some(b) = errs.absorb(compile_bindings(
        &call.bindings,
        scope,
        callee.in_params(),
        true,
        &call.loc,
    )) {
        out.bindings = b;
    }
    errs.into_result(out)
}

/// Compile the top-level call, which has no enclosing pipeline.
pub fn compile_top_call(call: &CallStm, scope: &Scope<'_>) -> Result<CallStm, Diagnostics> {
    let mut errs = Diagnostics::new();
    let compiled = errs.absorb(compile_call(call, scope));
    if call.modifiers.bindings.get(DISABLED).is_some() {
        errs.push(Diagnostic::error(
            kinds::UNSUPPORTED_TAG,
            &call.loc,
            "Top-level call cannot be disabled.",
        ));
    }
    if call.modifiers.preflight
        || matches!(
            call.modifiers.bindings.get(PREFLIGHT).map(|b| &b.exp.kind),
            Some(ExpKind::Bool(true))
        )
    {
        errs.push(Diagnostic::error(
            kinds::UNSUPPORTED_TAG,
            &call.loc,
            "Top-level call cannot be preflight.",
        ));
    }
    if call.is_map || call.bindings.iter().any(|b| b.exp.has_split()) {
        errs.push(Diagnostic::error(
            kinds::UNSUPPORTED_TAG,
            &call.loc,
            "Top-level call cannot be a map call.",
        ));
    }
    match compiled {
        Some(c) => errs.into_result(c),
        None => Err(errs),
    }
}

// ── Pipeline-wide checks ────────────────────────────────────────────────────

/// Compile the return statement of the scope's pipeline.
pub fn compile_returns(scope: &Scope<'_>) -> Result<BindStms, Diagnostics> {
    let Some(pipeline) = scope.pipeline else {
        return Ok(BindStms::default());
    };
    compile_bindings(
        &pipeline.ret.bindings,
        scope,
        &pipeline.out_params,
        true,
        &pipeline.ret.loc,
    )
}

/// Every retained value of a pipeline must be a file or a map.
pub fn compile_pipeline_retains(scope: &Scope<'_>) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let Some(pipeline) = scope.pipeline else {
        return errs;
    };
    for exp in &pipeline.retain {
        let ExpKind::Ref(r) = &exp.kind else {
            errs.push(Diagnostic::error(
                kinds::RETAIN_PARAM,
                &exp.loc,
                format!("cannot retain a {} expression", exp.kind_name()),
            ));
            continue;
        };
        match scope.ref_type_value(r) {
            Err(e) => errs.push(e.into_diagnostic(&exp.loc)),
            Ok(t) => {
                if !t.file_kind().is_file_like() && !matches!(t.as_ref(), Type::Builtin(Builtin::Map)) {
                    errs.push(Diagnostic::error(
                        kinds::RETAIN_PARAM,
                        &exp.loc,
                        format!("parameter {} of {} is not of file type.", r.output_id, r.id),
                    ));
                }
            }
        }
    }
    errs
}

/// Every input of `pipeline` must be read by some call binding or
/// modifier binding.
pub fn check_unused_inputs(pipeline: &Pipeline) -> Diagnostics {
    let used: HashSet<&str> = pipeline
        .calls
        .iter()
        .flat_map(|c| c.bindings.iter().chain(c.modifiers.bindings.iter()))
        .flat_map(|b| b.exp.find_refs())
        .filter(|r| r.kind == RefKind::SelfRef)
        .map(|r| r.id.as_str())
        .collect();
    let mut errs = Diagnostics::new();
    for p in pipeline.in_params.iter() {
        if !used.contains(p.id.as_str()) {
            errs.push(Diagnostic::error(
                kinds::UNUSED_INPUT,
                &p.loc,
                format!("no calls use pipeline input parameter '{}'", p.id),
            ));
        }
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::params::{compile_out_params, compile_params};
    use crate::parser::parse_str;
    use crate::registry::TypeRegistry;
    use crate::structs::{register_callable_structs, register_types};

    const DECLS: &str = r#"
filetype txt;
struct Pair(int x, int y)
stage A(in int a, in int b, in int c, out int default, out Pair pair, out txt f, src py "a")
stage B(in int y, src py "b")
stage P(in int a, src py "p")
"#;

    fn setup(src: &str) -> (Ast, TypeRegistry) {
        let mut ast = parse_str(&format!("{DECLS}{src}")).unwrap();
        assert!(ast.index_callables().is_empty());
        let mut reg = TypeRegistry::new();
        assert!(register_types(&mut ast, &mut reg).is_empty());
        let opts = CompileOptions::default();
        for s in &mut ast.stages {
            compile_params(&mut s.in_params, &reg);
            compile_out_params(&mut s.out_params, &reg, &opts);
        }
        for p in &mut ast.pipelines {
            compile_params(&mut p.in_params, &reg);
            compile_out_params(&mut p.out_params, &reg, &opts);
        }
        register_callable_structs(&ast, &mut reg);
        (ast, reg)
    }

    fn call_errors(src: &str, call_idx: usize) -> Vec<String> {
        let (ast, reg) = setup(src);
        let pipeline = &ast.pipelines[0];
        let scope = Scope::new(&ast, Some(pipeline), &reg);
        match compile_call(&pipeline.calls[call_idx], &scope) {
            Ok(_) => Vec::new(),
            Err(errs) => errs.iter().map(|d| format!("{}: {}", d.kind, d.message)).collect(),
        }
    }

    fn compiled(src: &str, call_idx: usize) -> CallStm {
        let (ast, reg) = setup(src);
        let pipeline = &ast.pipelines[0];
        let scope = Scope::new(&ast, Some(pipeline), &reg);
        compile_call(&pipeline.calls[call_idx], &scope).unwrap()
    }

    #[test]
    fn wildcard_self_covers_declared_inputs_only() {
        let errs = call_errors(
            "pipeline W(in int a, in int b, in int z) { call A(* = self) return () }",
            0,
        );
        assert_eq!(
            errs,
            vec!["ArgumentNotSuppliedError: no argument supplied for parameter 'c'"]
        );
        let call = compiled(
            "pipeline W(in int a, in int b) { call A(c = 3, * = self) return () }",
            0,
        );
        let ids: Vec<&str> = call.bindings.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(call.bindings.get("a").unwrap().exp.to_string(), "self.a");
    }

    #[test]
    fn wildcard_struct_fields() {
        let call = compiled(
            "pipeline W(in int a, in int b, in int c) {\n\
             call A(a = self.a, b = self.b, c = self.c)\n\
             call B(* = A.pair)\n\
             return () }",
            1,
        );
        assert_eq!(call.bindings.get("y").unwrap().exp.to_string(), "A.pair.y");
        assert_eq!(call.bindings.len(), 1);
    }

    #[test]
    fn unknown_and_duplicate_bindings() {
        let errs = call_errors(
            "pipeline W(in int a) { call B(y = 1, y = 2, q = 3) return () }",
            0,
        );
        assert_eq!(
            errs,
            vec![
                "DuplicateBinding: 'y' already bound in this call",
                "ArgumentError: 'q' is not a valid parameter",
            ]
        );
    }

    #[test]
    fn type_mismatch_wraps_cause() {
        let errs = call_errors(r#"pipeline W() { call B(y = "s") return () }"#, 0);
        assert_eq!(
            errs,
            vec!["TypeMismatchError: expected type int for parameter 'y': cannot assign string to int"]
        );
    }

    #[test]
    fn bare_call_reference_falls_back_to_default() {
        let call = compiled(
            "pipeline W() {\n\
             call A(a = 1, b = 2, c = 3)\n\
             call B(y = A)\n\
             return () }",
            1,
        );
        assert_eq!(call.bindings.get("y").unwrap().exp.to_string(), "A.default");
    }

    #[test]
    fn modifiers() {
        let errs = call_errors(
            "pipeline W() { call local P(a = 1) using (local = true) return () }",
            0,
        );
        assert_eq!(
            errs,
            vec!["ConflictingModifiers: Cannot specify modifiers in more than one way."]
        );

        let call = compiled(
            "pipeline W(in bool skip) { call P(a = 1) using (disabled = self.skip, volatile = true) return () }",
            0,
        );
        assert!(call.modifiers.volatile);
        assert_eq!(call.disabled.map(|e| e.to_string()), Some("self.skip".to_string()));

        let call = compiled(
            "pipeline W() { call P(a = 1) using (disabled = false) return () }",
            0,
        );
        assert!(call.disabled.is_none());
    }

    #[test]
    fn modifier_forms_combine_on_different_flags() {
        let call = compiled(
            "pipeline W() { call local P(a = 1) using (volatile = true) return () }",
            0,
        );
        assert!(call.modifiers.local);
        assert!(call.modifiers.volatile);

        let errs = call_errors(
            "pipeline W() { call volatile P(a = 1) using (local = true, volatile = false) return () }",
            0,
        );
        assert_eq!(
            errs,
            vec!["ConflictingModifiers: Cannot specify modifiers in more than one way."]
        );
    }

    #[test]
    fn preflight_rules() {
        let errs = call_errors(
            "pipeline W() {\n\
             call B(y = 1)\n\
             call preflight A(a = 1, b = 2, c = B.x)\n\
             return () }",
            1,
        );
        assert!(errs.contains(
            &"PreflightBindingError: Preflight stage 'A' cannot have input parameter bound to \
              output parameter of another stage or pipeline"
                .to_string()
        ));
        assert!(errs.contains(
            &"PreflightOutputError: Preflight stage 'A' cannot have any output parameters"
                .to_string()
        ));
    }

    #[test]
    fn unused_inputs_collected() {
        let (ast, _) = setup("pipeline W(in int a, in int b, in int c) { call P(a = self.b) return () }");
        let errs: Vec<String> = check_unused_inputs(&ast.pipelines[0])
            .iter()
            .map(|d| d.message.clone())
            .collect();
        assert_eq!(
            errs,
            vec![
                "no calls use pipeline input parameter 'a'",
                "no calls use pipeline input parameter 'c'",
            ]
        );
    }

    #[test]
    fn returns_and_retains() {
        let (ast, reg) = setup(
            "pipeline W(out txt f, out int n) {\n\
             call A(a = 1, b = 2, c = 3)\n\
             return (f = A.f)\n\
             retain (A.f, A.default) }",
        );
        let scope = Scope::new(&ast, Some(&ast.pipelines[0]), &reg);
        let errs = compile_returns(&scope).unwrap_err();
        assert_eq!(
            errs.iter().map(|d| d.message.as_str()).collect::<Vec<_>>(),
            vec!["no argument supplied for parameter 'n'"]
        );
        let errs = compile_pipeline_retains(&scope);
        assert_eq!(
            errs.iter().map(|d| d.message.as_str()).collect::<Vec<_>>(),
            vec!["parameter default of A is not of file type."]
        );
    }

    #[test]
    fn references_outside_pipeline() {
        let (ast, reg) = setup("call B(y = self.q)");
        let scope = Scope::new(&ast, None, &reg);
        let errs = compile_top_call(ast.call.as_ref().unwrap(), &scope).unwrap_err();
        assert_eq!(
            errs.iter().next().map(|d| d.message.as_str()),
            Some("this binding cannot be resolved outside of a stage or pipeline.")
        );
    }
}
