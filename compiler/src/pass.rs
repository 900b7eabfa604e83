// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (loading and parsing happen before
// the runner), their dependency edges, and the artifacts they produce. Used
// by the driver to compute the minimal pass subset for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    IndexCallables,
    RegisterTypes,
    CompileParams,
    CompileCalls,
    SortCalls,
    CheckPipelines,
    Specialize,
    CompileTopCall,
    Freeze,
}

/// Machine-readable artifact identifiers. Each maps to state held by the
/// driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Callables,     // Ast callable index
    Types,         // TypeRegistry (declared types)
    Params,        // compiled Params + callable output structs
    Calls,         // compiled CallStm bindings, modes, sources
    Graphs,        // Vec<CallGraph>, calls in dependency order
    Returns,       // compiled ReturnStm bindings
    Specialized,   // disabled-call references rewritten
    TopCall,       // compiled top-level CallStm
    TypeTable,     // frozen TypeTable
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Postconditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::IndexCallables => PassDescriptor {
            name: "index_callables",
            inputs: &[],
            outputs: &[ArtifactId::Callables],
            invariants: "stage and pipeline ids are unique",
        },
        PassId::RegisterTypes => PassDescriptor {
            name: "register_types",
            inputs: &[],
            outputs: &[ArtifactId::Types],
            invariants: "file types and structs registered, struct members typed",
        },
        PassId::CompileParams => PassDescriptor {
            name: "compile_params",
            inputs: &[PassId::IndexCallables, PassId::RegisterTypes],
            outputs: &[ArtifactId::Params],
            invariants: "parameter types resolved, output structs registered",
        },
        PassId::CompileCalls => PassDescriptor {
            name: "compile_calls",
            inputs: &[PassId::CompileParams],
            outputs: &[ArtifactId::Calls],
            invariants: "no recursion, every call typed, map modes resolved",
        },
        PassId::SortCalls => PassDescriptor {
            name: "sort_calls",
            inputs: &[PassId::CompileCalls],
            outputs: &[ArtifactId::Graphs],
            invariants: "calls follow their dependencies in every pipeline",
        },
        PassId::CheckPipelines => PassDescriptor {
            name: "check_pipelines",
            inputs: &[PassId::SortCalls],
            outputs: &[ArtifactId::Returns],
            invariants: "inputs used, returns typed, retains file-like",
        },
        PassId::Specialize => PassDescriptor {
            name: "specialize",
            inputs: &[PassId::CheckPipelines],
            outputs: &[ArtifactId::Specialized],
            invariants: "no reference reads a disabled call directly",
        },
        PassId::CompileTopCall => PassDescriptor {
            name: "compile_top_call",
            inputs: &[PassId::CompileParams],
            outputs: &[ArtifactId::TopCall],
            invariants: "top-level call typed, not disabled, preflight or mapped",
        },
        PassId::Freeze => PassDescriptor {
            name: "freeze",
            inputs: &[PassId::Specialize, PassId::CompileTopCall],
            outputs: &[ArtifactId::TypeTable],
            invariants: "type table immutable",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 9] = [
    PassId::IndexCallables,
    PassId::RegisterTypes,
    PassId::CompileParams,
    PassId::CompileCalls,
    PassId::SortCalls,
    PassId::CheckPipelines,
    PassId::Specialize,
    PassId::CompileTopCall,
    PassId::Freeze,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
