// emit.rs — Textual and JSON views of a compiled program
//
// Preconditions: the program compiled up to the target's terminal pass.
// Postconditions: output is deterministic for a given program.
// Failure modes: none (serialization of owned strings cannot fail).
// Side effects: none.

use serde::Serialize;

use crate::ast::{BindStms, CallStm, Pipeline};
use crate::driver::CompiledProgram;
use crate::graph::CallGraph;
use crate::pass::PassId;
use crate::types::FileKind;

/// What the CLI prints after a successful compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Emit {
    /// Nothing; the exit status is the result.
    #[default]
    Check,
    Types,
    Order,
    Json,
}

impl Emit {
    /// The last pass this target needs.
    pub fn terminal(self) -> PassId {
        match self {
            Emit::Types => PassId::CompileParams,
            Emit::Check | Emit::Order | Emit::Json => PassId::Freeze,
        }
    }
}

pub fn render(program: &CompiledProgram, emit: Emit) -> String {
    match emit {
        Emit::Check => String::new(),
        Emit::Types => emit_types(program),
        Emit::Order => emit_order(program),
        Emit::Json => emit_json(program),
    }
}

// ── types ──────────────────────────────────────────────────────────────────

/// One line per named type: `name kind`, in name order.
pub fn emit_types(program: &CompiledProgram) -> String {
    let width = program
        .types
        .named()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for (name, t) in program.types.named() {
        out.push_str(&format!("{name:<width$}  {}\n", t.file_kind()));
    }
    out
}

// ── order ──────────────────────────────────────────────────────────────────

fn call_line(call: &CallStm, deps: &[&str]) -> String {
    let mut line = format!("  {} [{}]", call.id, call.mode);
    if let Some(src) = &call.source {
        line.push_str(&format!(" over {src}"));
    }
    if !deps.is_empty() {
        line.push_str(&format!(" <- {}", deps.join(", ")));
    }
    line
}

/// Each pipeline's calls in execution order with their fan-out mode.
pub fn emit_order(program: &CompiledProgram) -> String {
    let mut out = String::new();
    for (pipeline, graph) in program.ast.pipelines.iter().zip(&program.graphs) {
        out.push_str(&format!("pipeline {}:\n", pipeline.id));
        for (i, call) in pipeline.calls.iter().enumerate() {
            out.push_str(&call_line(call, &graph.direct_names(i)));
            out.push('\n');
        }
    }
    if let Some(call) = &program.ast.call {
        out.push_str(&format!("call {}\n", call.decl_id));
    }
    out
}

// ── json ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonProgram<'a> {
    compiler_version: &'a str,
    program_hash: String,
    sources: Vec<JsonSource<'a>>,
    types: Vec<JsonType<'a>>,
    pipelines: Vec<JsonPipeline<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    call: Option<JsonCall<'a>>,
}

#[derive(Serialize)]
struct JsonSource<'a> {
    path: &'a str,
    sha256: String,
}

#[derive(Serialize)]
struct JsonType<'a> {
    name: &'a str,
    files: FileKind,
}

#[derive(Serialize)]
struct JsonPipeline<'a> {
    id: &'a str,
    calls: Vec<JsonCall<'a>>,
    returns: Vec<JsonBinding<'a>>,
    retain: Vec<String>,
}

#[derive(Serialize)]
struct JsonCall<'a> {
    id: &'a str,
    callable: &'a str,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disabled: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<&'a str>,
    bindings: Vec<JsonBinding<'a>>,
}

#[derive(Serialize)]
struct JsonBinding<'a> {
    id: &'a str,
    value: String,
}

fn json_bindings(bindings: &BindStms) -> Vec<JsonBinding<'_>> {
    bindings
        .iter()
        .map(|b| JsonBinding {
            id: &b.id,
            value: b.exp.to_string(),
        })
        .collect()
}

fn json_call<'a>(call: &'a CallStm, depends_on: Vec<&'a str>) -> JsonCall<'a> {
    JsonCall {
        id: &call.id,
        callable: &call.decl_id,
        mode: call.mode.to_string(),
        source: call.source.as_ref().map(ToString::to_string),
        disabled: call.disabled.as_ref().map(ToString::to_string),
        depends_on,
        bindings: json_bindings(&call.bindings),
    }
}

fn json_pipeline<'a>(pipeline: &'a Pipeline, graph: Option<&'a CallGraph>) -> JsonPipeline<'a> {
    JsonPipeline {
        id: &pipeline.id,
        calls: pipeline
            .calls
            .iter()
            .enumerate()
            .map(|(i, c)| json_call(c, graph.map(|g| g.direct_names(i)).unwrap_or_default()))
            .collect(),
        returns: json_bindings(&pipeline.ret.bindings),
        retain: pipeline.retain.iter().map(ToString::to_string).collect(),
    }
}

/// A pretty-printed JSON document describing the whole program.
pub fn emit_json(program: &CompiledProgram) -> String {
    let doc = JsonProgram {
        compiler_version: program.provenance.compiler_version,
        program_hash: program.provenance.program_hash_hex(),
        sources: program
            .provenance
            .sources
            .iter()
            .map(|s| JsonSource {
                path: &s.path,
                sha256: s.hex(),
            })
            .collect(),
        types: program
            .types
            .named()
            .map(|(name, t)| JsonType {
                name,
                files: t.file_kind(),
            })
            .collect(),
        pipelines: program
            .ast
            .pipelines
            .iter()
            .enumerate()
            .map(|(i, p)| json_pipeline(p, program.graphs.get(i)))
            .collect(),
        call: program.ast.call.as_ref().map(|c| json_call(c, Vec::new())),
    };
    let mut out = serde_json::to_string_pretty(&doc).unwrap_or_default();
    out.push('\n');
    out
}
