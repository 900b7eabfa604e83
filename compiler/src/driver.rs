// driver.rs — Compilation state and pass orchestration
//
// Holds the program and type registry while the passes rewrite them, runs
// the minimal set of passes for a given terminal PassId, and packages the
// result with the provenance of its sources.
//
// Preconditions: the syntax tree is fully loaded (includes merged).
// Postconditions: on success every pipeline's calls are compiled, sorted and
//   specialized, and the registry is frozen into a `TypeTable`.
// Failure modes: any pass emitting error-level diagnostics stops the run
//   after that pass; `CompileError` carries everything reported so far.
// Side effects: with `verbose`, reports each pass and its time on stderr.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::ast::{Ast, CallStm, Pipeline, SourceLoc};
use crate::bindings;
use crate::config::CompileOptions;
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::disabled;
use crate::graph::{self, CallGraph};
use crate::include::{self, LoadError, Loaded, SourceText};
use crate::map_call;
use crate::params;
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::{TypeLookup, TypeRegistry, TypeTable};
use crate::resolve::Scope;
use crate::structs;

// ── Provenance ─────────────────────────────────────────────────────────────

/// SHA-256 of one loaded source text.
#[derive(Debug, Clone)]
pub struct SourceHash {
    pub path: String,
    pub sha256: [u8; 32],
}

impl SourceHash {
    pub fn hex(&self) -> String {
        bytes_to_hex(&self.sha256)
    }
}

/// Provenance metadata for cache keys and reproducibility checks.
///
/// `sources`: one hash per loaded file, in load order.
/// `program_hash`: SHA-256 over every source text in load order.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub sources: Vec<SourceHash>,
    pub program_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the program hash (64 characters).
    pub fn program_hash_hex(&self) -> String {
        bytes_to_hex(&self.program_hash)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Hash every loaded source.
pub fn compute_provenance(sources: &[SourceText]) -> Provenance {
    use sha2::{Digest, Sha256};

    let digest = |text: &str| {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        hash
    };

    let program_hash = {
        let mut hasher = Sha256::new();
        for s in sources {
            hasher.update(s.text.as_bytes());
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        hash
    };

    Provenance {
        sources: sources
            .iter()
            .map(|s| SourceHash {
                path: s.path.clone(),
                sha256: digest(&s.text),
            })
            .collect(),
        program_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State and results ──────────────────────────────────────────────────────

/// Everything the passes read and rewrite, plus accumulated diagnostics.
pub struct CompilationState {
    pub ast: Ast,
    pub registry: TypeRegistry,
    pub graphs: Vec<CallGraph>,
    pub types: Option<TypeTable>,
    pub diagnostics: Diagnostics,
    pub has_error: bool,
}

impl CompilationState {
    pub fn new(ast: Ast) -> Self {
        Self {
            ast,
            registry: TypeRegistry::new(),
            graphs: Vec::new(),
            types: None,
            diagnostics: Diagnostics::new(),
            has_error: false,
        }
    }
}

/// A program that passed every requested check.
#[derive(Debug)]
pub struct CompiledProgram {
    pub ast: Ast,
    pub types: TypeTable,
    /// One per pipeline, in declaration order; empty when call compilation
    /// was not requested.
    pub graphs: Vec<CallGraph>,
    pub warnings: Vec<Diagnostic>,
    pub provenance: Provenance,
}

// ── Error types ────────────────────────────────────────────────────────────

/// Pass execution stopped on error-level diagnostics.
#[derive(Debug)]
pub struct PassError {
    pub failing_pass: PassId,
}

#[derive(Debug, thiserror::Error)]
#[error("{diagnostics}")]
pub struct CompileError {
    pub failing_pass: PassId,
    /// Errors and warnings from every pass that ran.
    pub diagnostics: Diagnostics,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl DriverError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::Load(LoadError::Io { .. }) => 2,
            _ => 1,
        }
    }
}

// ── Pass bookkeeping ───────────────────────────────────────────────────────

fn report(pass_id: PassId, elapsed: Duration, verbose: bool) {
    if verbose {
        eprintln!(
            "mroc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

/// Accumulate a pass's diagnostics; fail if any is an error.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Diagnostics,
    elapsed: Duration,
    verbose: bool,
) -> Result<(), PassError> {
    let is_err = diags.has_errors();
    state.diagnostics.extend(diags);
    report(pass_id, elapsed, verbose);
    if is_err {
        state.has_error = true;
        return Err(PassError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Passes ─────────────────────────────────────────────────────────────────

fn index_callables(ast: &mut Ast) -> Diagnostics {
    let mut errs = Diagnostics::new();
    for (kind, id, loc, prev) in ast.index_callables() {
        errs.push(
            Diagnostic::error(
                kinds::DUPLICATE_NAME,
                &loc,
                format!("{kind} '{id}' was already declared when encountered again"),
            )
            .with_related(prev, "Previous declaration"),
        );
    }
    errs
}

fn compile_params(ast: &mut Ast, registry: &mut TypeRegistry, opts: &CompileOptions) -> Diagnostics {
    let mut errs = Diagnostics::new();
    for stage in &mut ast.stages {
        errs.extend(params::compile_stage(stage, &*registry, opts));
    }
    for pipeline in &mut ast.pipelines {
        errs.extend(params::compile_params(&mut pipeline.in_params, &*registry));
        errs.extend(params::compile_out_params(
            &mut pipeline.out_params,
            &*registry,
            opts,
        ));
    }
    errs.extend(structs::register_callable_structs(ast, registry));
    errs
}

/// Call aliases are unique and every callee exists.
fn check_call_names(pipeline: &Pipeline, ast: &Ast) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let mut seen: HashMap<&str, &SourceLoc> = HashMap::new();
    for call in &pipeline.calls {
        if let Some(prev) = seen.get(call.id.as_str()) {
            errs.push(
                Diagnostic::error(
                    kinds::DUPLICATE_CALL,
                    &call.loc,
                    format!("'{}' was already called when encountered again", call.id),
                )
                .with_related((*prev).clone(), "Previous call"),
            );
        } else {
            seen.insert(&call.id, &call.loc);
        }
        if ast.callable(&call.decl_id).is_none() {
            errs.push(Diagnostic::error(
                kinds::SCOPE_NAME,
                &call.loc,
                format!("'{}' is not defined in this scope", call.decl_id),
            ));
        }
    }
    errs
}

/// Resolve fan-out then compile the bindings of every call in pipeline `i`.
fn compile_pipeline_calls(ast: &mut Ast, registry: &TypeRegistry, i: usize) -> Diagnostics {
    let mut errs = check_call_names(&ast.pipelines[i], ast);
    if errs.has_errors() {
        return errs;
    }

    let infos = map_call::analyze_pipeline(Scope::new(ast, Some(&ast.pipelines[i]), registry));
    let Some(infos) = errs.absorb(infos) else {
        return errs;
    };
    map_call::apply(&mut ast.pipelines[i], infos);

    let compiled: Vec<Result<CallStm, Diagnostics>> = {
        let pipeline = &ast.pipelines[i];
        let scope = Scope::new(ast, Some(pipeline), registry);
        pipeline
            .calls
            .iter()
            .map(|c| bindings::compile_call(c, &scope))
            .collect()
    };
    for (slot, result) in ast.pipelines[i].calls.iter_mut().zip(compiled) {
        if let Some(call) = errs.absorb(result) {
            *slot = call;
        }
    }
    errs
}

fn compile_calls(ast: &mut Ast, registry: &TypeRegistry) -> Diagnostics {
    let mut errs = graph::check_recursion(ast);
    for i in 0..ast.pipelines.len() {
        errs.extend(compile_pipeline_calls(ast, registry, i));
    }
    errs
}

fn sort_calls(ast: &mut Ast, graphs: &mut Vec<CallGraph>) -> Diagnostics {
    let mut errs = Diagnostics::new();
    graphs.clear();
    for pipeline in &mut ast.pipelines {
        if let Some(g) = errs.absorb(graph::sort_pipeline(pipeline)) {
            graphs.push(g);
        }
    }
    errs
}

fn check_pipelines(ast: &mut Ast, registry: &TypeRegistry) -> Diagnostics {
    let mut errs = Diagnostics::new();
    for i in 0..ast.pipelines.len() {
        errs.extend(bindings::check_unused_inputs(&ast.pipelines[i]));
        let returns = {
            let scope = Scope::new(ast, Some(&ast.pipelines[i]), registry);
            errs.extend(bindings::compile_pipeline_retains(&scope));
            bindings::compile_returns(&scope)
        };
        if let Some(b) = errs.absorb(returns) {
            ast.pipelines[i].ret.bindings = b;
        }
    }
    errs
}

fn specialize(ast: &mut Ast) -> Diagnostics {
    let mut errs = Diagnostics::new();
    for pipeline in &mut ast.pipelines {
        errs.extend(disabled::specialize_pipeline(pipeline));
    }
    errs
}

fn compile_top_call(ast: &mut Ast, registry: &TypeRegistry) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let compiled = match &ast.call {
        Some(call) => bindings::compile_top_call(call, &Scope::new(ast, None, registry)),
        None => return errs,
    };
    if let Some(call) = errs.absorb(compiled) {
        ast.call = Some(call);
    }
    errs
}

// ── Runner ─────────────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Preconditions: `state.ast` is loaded and `state.registry` holds only
///   builtins.
/// Postconditions: artifacts of every pass in `required_passes(terminal)`
///   are in `state`, or `state.has_error` is set.
/// Failure modes: the first pass producing error-level diagnostics.
/// Side effects: verbose pass timing on stderr.
pub fn run_passes(
    state: &mut CompilationState,
    terminal: PassId,
    opts: &CompileOptions,
) -> Result<(), PassError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::IndexCallables => index_callables(&mut state.ast),
            PassId::RegisterTypes => structs::register_types(&mut state.ast, &mut state.registry),
            PassId::CompileParams => compile_params(&mut state.ast, &mut state.registry, opts),
            PassId::CompileCalls => compile_calls(&mut state.ast, &state.registry),
            PassId::SortCalls => sort_calls(&mut state.ast, &mut state.graphs),
            PassId::CheckPipelines => check_pipelines(&mut state.ast, &state.registry),
            PassId::Specialize => specialize(&mut state.ast),
            PassId::CompileTopCall => compile_top_call(&mut state.ast, &state.registry),
            PassId::Freeze => {
                let registry = std::mem::take(&mut state.registry);
                state.types = Some(registry.freeze());
                Diagnostics::new()
            }
        };
        finish_pass(state, pass_id, diags, t.elapsed(), opts.verbose)?;
    }
    Ok(())
}

// ── Entry points ───────────────────────────────────────────────────────────

/// Compile a loaded program up to `terminal`.
pub fn compile(
    loaded: Loaded,
    terminal: PassId,
    opts: &CompileOptions,
) -> Result<CompiledProgram, CompileError> {
    let provenance = compute_provenance(&loaded.sources);
    let mut state = CompilationState::new(loaded.ast);
    if let Err(e) = run_passes(&mut state, terminal, opts) {
        return Err(CompileError {
            failing_pass: e.failing_pass,
            diagnostics: state.diagnostics,
        });
    }
    let CompilationState {
        ast,
        registry,
        graphs,
        types,
        mut diagnostics,
        ..
    } = state;
    Ok(CompiledProgram {
        ast,
        types: types.unwrap_or_else(|| registry.freeze()),
        graphs,
        warnings: diagnostics.take_warnings(),
        provenance,
    })
}

/// Parse and fully compile an in-memory source.
pub fn compile_source(source: &str, opts: &CompileOptions) -> Result<CompiledProgram, DriverError> {
    let loaded = Loaded::from_source(source)?;
    Ok(compile(loaded, PassId::Freeze, opts)?)
}

/// Load `path` with its includes and compile up to `terminal`.
pub fn compile_file(
    path: &Path,
    terminal: PassId,
    opts: &CompileOptions,
) -> Result<CompiledProgram, DriverError> {
    let t = Instant::now();
    let loaded = include::load(path)?;
    if opts.verbose {
        eprintln!(
            "mroc: load complete, {:.1}ms ({} files)",
            t.elapsed().as_secs_f64() * 1000.0,
            loaded.sources.len()
        );
    }
    Ok(compile(loaded, terminal, opts)?)
}

// ── Argument files ─────────────────────────────────────────────────────────

/// Check a JSON object of arguments against the inputs of the top-level
/// call's callable.
pub fn validate_args(program: &CompiledProgram, args: &serde_json::Value) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let Some(call) = &program.ast.call else {
        errs.push(Diagnostic::error(
            kinds::ARGUMENT,
            &SourceLoc::default(),
            "no top-level call to check arguments against",
        ));
        return errs;
    };
    let Some(callee) = program.ast.callable(&call.decl_id) else {
        return errs;
    };
    let Some(values) = args.as_object() else {
        errs.push(Diagnostic::error(
            kinds::ARGUMENT,
            &call.loc,
            "arguments must be a JSON object",
        ));
        return errs;
    };
    for param in callee.in_params().iter() {
        let Some(value) = values.get(&param.id) else {
            errs.push(Diagnostic::error(
                kinds::ARGUMENT_NOT_SUPPLIED,
                &param.loc,
                format!("argument '{}' was not supplied", param.id),
            ));
            continue;
        };
        let Some(t) = program.types.get(&param.tname) else {
            continue;
        };
        if let Err(e) = t.is_valid_json(value, &program.types) {
            errs.push(Diagnostic::error(
                kinds::TYPE_MISMATCH,
                &param.loc,
                format!("argument '{}': {e}", param.id),
            ));
        }
    }
    for key in values.keys() {
        if !callee.in_params().contains(key) {
            errs.push(Diagnostic::error(
                kinds::ARGUMENT,
                &call.loc,
                format!("'{key}' is not a valid parameter"),
            ));
        }
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExpKind;
    use crate::map_call::CallMode;

    const STAGES: &str = r#"
filetype txt;
stage PRODUCE(in int n, out txt f, out int[] xs, src py "p")
stage CONSUME(in txt f, in int x, out txt g, src py "c")
"#;

    fn compile_ok(body: &str) -> CompiledProgram {
        let src = format!("{STAGES}{body}");
        match compile_source(&src, &CompileOptions::default()) {
            Ok(p) => p,
            Err(e) => panic!("compile failed:\n{e}"),
        }
    }

    fn compile_err(body: &str) -> CompileError {
        let src = format!("{STAGES}{body}");
        match compile_source(&src, &CompileOptions::default()) {
            Ok(_) => panic!("expected a compile error"),
            Err(DriverError::Compile(e)) => e,
            Err(e) => panic!("expected a compile error, got {e}"),
        }
    }

    fn messages(e: &CompileError) -> Vec<String> {
        e.diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.kind, d.message))
            .collect()
    }

    #[test]
    fn calls_sorted_and_mapped() {
        let p = compile_ok(
            r#"
pipeline P(in int n, out txt[] gs)
{
    call CONSUME(f = PRODUCE.f, x = split PRODUCE.xs)
    call PRODUCE(n = self.n)
    return (gs = CONSUME.g)
}
"#,
        );
        let pipeline = &p.ast.pipelines[0];
        let ids: Vec<_> = pipeline.calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["PRODUCE", "CONSUME"]);
        assert_eq!(pipeline.calls[1].mode, CallMode::Array);
        assert_eq!(p.graphs.len(), 1);
        assert_eq!(p.graphs[0].to_string(), "pipeline P:\n  PRODUCE\n  CONSUME <- PRODUCE\n");
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn disabled_calls_specialized() {
        let p = compile_ok(
            r#"
pipeline P(in int n, in bool skip, out txt g)
{
    call PRODUCE(n = self.n) using (disabled = self.skip)
    call CONSUME(f = PRODUCE.f, x = self.n)
    return (g = CONSUME.g)
}
"#,
        );
        let consume = &p.ast.pipelines[0].calls[1];
        let f = consume.bindings.get("f").unwrap();
        assert!(matches!(f.exp.kind, ExpKind::Disabled(_)), "{}", f.exp);
        assert_eq!(f.exp.to_string(), "disabled(self.skip, PRODUCE.f)");
    }

    #[test]
    fn duplicate_declarations_stop_early() {
        let e = compile_err("stage PRODUCE(in int n, src py \"again\")\n");
        assert_eq!(e.failing_pass, PassId::IndexCallables);
        assert_eq!(
            messages(&e),
            vec!["DuplicateNameError: stage 'PRODUCE' was already declared when encountered again"]
        );
    }

    #[test]
    fn call_names_checked_per_pipeline() {
        let e = compile_err(
            r#"
pipeline P(in int n, out txt g)
{
    call PRODUCE(n = self.n)
    call PRODUCE(n = self.n)
    call MISSING()
    return (g = PRODUCE.f)
}
"#,
        );
        assert_eq!(e.failing_pass, PassId::CompileCalls);
        assert_eq!(
            messages(&e),
            vec![
                "DuplicateCallError: 'PRODUCE' was already called when encountered again",
                "ScopeNameError: 'MISSING' is not defined in this scope",
            ]
        );
    }

    #[test]
    fn unused_inputs_reported_after_sorting() {
        let e = compile_err(
            r#"
pipeline P(in int n, in int spare, out txt f)
{
    call PRODUCE(n = self.n)
    return (f = PRODUCE.f)
}
"#,
        );
        assert_eq!(e.failing_pass, PassId::CheckPipelines);
        assert_eq!(
            messages(&e),
            vec!["UnusedInputError: no calls use pipeline input parameter 'spare'"]
        );
    }

    #[test]
    fn types_only_stops_before_calls() {
        let loaded = Loaded::from_source(&format!(
            "{STAGES}pipeline P(in int n, out txt g) {{ call NOPE() return (g = NOPE.g) }}"
        ))
        .unwrap();
        let p = compile(loaded, PassId::CompileParams, &CompileOptions::default()).unwrap();
        assert!(p.graphs.is_empty());
        assert!(p.types.named().any(|(name, _)| name == "PRODUCE"));
    }

    #[test]
    fn provenance_hashes_sources() {
        let p = compile_ok("");
        assert_eq!(p.provenance.sources.len(), 1);
        assert_eq!(p.provenance.sources[0].hex().len(), 64);
        assert_eq!(p.provenance.program_hash_hex().len(), 64);
        let again = compile_ok("");
        assert_eq!(again.provenance.program_hash, p.provenance.program_hash);
        assert_eq!(p.provenance.compiler_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn argument_files_checked_against_top_call() {
        let p = compile_ok(
            "pipeline P(in int n, out txt f)\n{\n    call PRODUCE(n = self.n)\n    return (f = PRODUCE.f)\n}\ncall P(n = 1)\n",
        );
        assert!(validate_args(&p, &serde_json::json!({"n": 3})).is_empty());

        let errs = validate_args(&p, &serde_json::json!({"n": "three", "m": 1}));
        let msgs: Vec<_> = errs.iter().map(|d| d.kind).collect();
        assert_eq!(msgs, vec![kinds::TYPE_MISMATCH, kinds::ARGUMENT]);

        let errs = validate_args(&p, &serde_json::json!({}));
        assert_eq!(errs.iter().next().unwrap().kind, kinds::ARGUMENT_NOT_SUPPLIED);
    }

    #[test]
    fn io_errors_exit_with_two() {
        let err = compile_file(
            Path::new("/nonexistent/mroc/input.mro"),
            PassId::Freeze,
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
