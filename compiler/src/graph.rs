// graph.rs — Call dependency graph for MRO pipelines
//
// Builds, for one pipeline, the dependencies between its calls (a call
// depends on every call whose output it reads), closes them transitively,
// and reorders the calls so dependencies come first while unconstrained
// calls keep their declaration order. Also detects pipelines that call
// themselves, directly or through other pipelines.
//
// Preconditions: call aliases within the pipeline are unique.
// Postconditions: `sort_pipeline` leaves `pipeline.calls` in dependency
//   order and returns the graph indexed by that order.
// Failure modes: `CyclicDependencyError` for a call bound to its own
//   output or a transitive cycle; `RecursiveCallError` for recursive
//   pipelines.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use crate::ast::*;
use crate::diag::{kinds, Diagnostic, Diagnostics};

// ── Public types ────────────────────────────────────────────────────────────

/// Position of a call in its pipeline's call list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CallIdx(pub u32);

impl CallIdx {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Dependencies between the calls of one pipeline. Calls live in a flat
/// arena; edges are arena indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallGraph {
    pub pipeline: String,
    /// Call aliases, indexed by `CallIdx`.
    pub calls: Vec<String>,
    /// Calls whose outputs each call reads directly.
    pub direct: Vec<BTreeSet<CallIdx>>,
    /// Transitive closure of `direct`, filled by `close`.
    pub all: Vec<BTreeSet<CallIdx>>,
}

impl CallGraph {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The aliases `idx` depends on directly, in arena order.
    pub fn direct_names(&self, idx: usize) -> Vec<&str> {
        self.direct[idx]
            .iter()
            .map(|d| self.calls[d.index()].as_str())
            .collect()
    }
}

impl fmt::Display for CallGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline {}:", self.pipeline)?;
        for (i, id) in self.calls.iter().enumerate() {
            let deps = self.direct_names(i);
            if deps.is_empty() {
                writeln!(f, "  {id}")?;
            } else {
                writeln!(f, "  {id} <- {}", deps.join(", "))?;
            }
        }
        Ok(())
    }
}

// ── Direct dependencies ─────────────────────────────────────────────────────

/// Record the calls each call of `pipeline` reads from. References to
/// aliases that are not called here are skipped; they are reported when
/// bindings are compiled.
pub fn build_call_graph(pipeline: &Pipeline) -> Result<CallGraph, Diagnostics> {
    let index: HashMap<&str, CallIdx> = pipeline
        .calls
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), CallIdx(i as u32)))
        .collect();
    let mut errs = Diagnostics::new();
    let mut direct = vec![BTreeSet::new(); pipeline.calls.len()];
    for (i, call) in pipeline.calls.iter().enumerate() {
        let bindings = call.bindings.iter().chain(call.modifiers.bindings.iter());
        for b in bindings {
            for r in b.exp.find_refs() {
                if r.kind != RefKind::Call {
                    continue;
                }
                let Some(&dep) = index.get(r.id.as_str()) else {
                    continue;
                };
                if dep.index() == i {
                    errs.push(Diagnostic::error(
                        kinds::CYCLIC_DEPENDENCY,
                        &b.exp.loc,
                        format!(
                            "Call {} input bound to its own output in pipeline {}.",
                            call.id, pipeline.id
                        ),
                    ));
                    continue;
                }
                direct[i].insert(dep);
            }
        }
    }
    let graph = CallGraph {
        pipeline: pipeline.id.clone(),
        calls: pipeline.calls.iter().map(|c| c.id.clone()).collect(),
        all: direct.clone(),
        direct,
    };
    errs.into_result(graph)
}

// ── Transitive closure ──────────────────────────────────────────────────────

/// Extend `graph.all` one level at a time until nothing new is found.
/// A call that reaches itself is a cycle.
pub fn close(graph: &mut CallGraph, locs: &[SourceLoc]) -> Result<(), Diagnostics> {
    loop {
        let mut errs = Diagnostics::new();
        let mut extra: Vec<(usize, Vec<CallIdx>)> = Vec::new();
        for (src, deps) in graph.all.iter().enumerate() {
            match missing_deps(graph, src, deps) {
                Ok(missing) if !missing.is_empty() => extra.push((src, missing)),
                Ok(_) => {}
                Err((dep, trans)) => errs.push(Diagnostic::error(
                    kinds::CYCLIC_DEPENDENCY,
                    &locs.get(src).cloned().unwrap_or_default(),
                    format!(
                        "Call depends transitively on itself ({} -> ... -> {} -> {}) in pipeline {}.",
                        graph.calls[src],
                        graph.calls[dep.index()],
                        graph.calls[trans.index()],
                        graph.pipeline
                    ),
                )),
            }
        }
        if !errs.is_empty() {
            return Err(errs);
        }
        if extra.is_empty() {
            return Ok(());
        }
        for (src, missing) in extra {
            graph.all[src].extend(missing);
        }
    }
}

/// Dependencies of `src`'s dependencies not yet in `deps`, or the edge
/// that leads back to `src`.
fn missing_deps(
    graph: &CallGraph,
    src: usize,
    deps: &BTreeSet<CallIdx>,
) -> Result<Vec<CallIdx>, (CallIdx, CallIdx)> {
    let mut missing = Vec::new();
    for &dep in deps {
        for &trans in &graph.all[dep.index()] {
            if deps.contains(&trans) {
                continue;
            }
            if trans.index() == src {
                return Err((dep, trans));
            }
            missing.push(trans);
        }
    }
    Ok(missing)
}

// ── Stable sort ─────────────────────────────────────────────────────────────

/// Arena indices in dependency order. A call that depends on a later call
/// moves to just after the last such call; everything else keeps its
/// relative order. `graph.all` must be closed and acyclic.
pub fn stable_order(graph: &CallGraph) -> Vec<usize> {
    let mut order: Vec<usize> = (0..graph.len()).collect();
    let mut check = 0;
    while check + 1 < order.len() {
        let deps = &graph.all[order[check]];
        if deps.is_empty() {
            check += 1;
            continue;
        }
        let last_dep = order[check + 1..]
            .iter()
            .rposition(|&j| deps.contains(&CallIdx(j as u32)));
        match last_dep {
            Some(m) => order[check..=check + m + 1].rotate_left(1),
            None => check += 1,
        }
    }
    order
}

/// The graph with its arena permuted to `order`.
fn reindex(graph: &CallGraph, order: &[usize]) -> CallGraph {
    let mut new_pos = vec![0u32; order.len()];
    for (new, &old) in order.iter().enumerate() {
        new_pos[old] = new as u32;
    }
    let remap = |set: &BTreeSet<CallIdx>| -> BTreeSet<CallIdx> {
        set.iter().map(|d| CallIdx(new_pos[d.index()])).collect()
    };
    CallGraph {
        pipeline: graph.pipeline.clone(),
        calls: order.iter().map(|&i| graph.calls[i].clone()).collect(),
        direct: order.iter().map(|&i| remap(&graph.direct[i])).collect(),
        all: order.iter().map(|&i| remap(&graph.all[i])).collect(),
    }
}

/// Check `pipeline` for dependency cycles and put its calls in dependency
/// order.
pub fn sort_pipeline(pipeline: &mut Pipeline) -> Result<CallGraph, Diagnostics> {
    let mut graph = build_call_graph(pipeline)?;
    let locs: Vec<SourceLoc> = pipeline.calls.iter().map(|c| c.loc.clone()).collect();
    close(&mut graph, &locs)?;
    let order = stable_order(&graph);
    let mut slots: Vec<Option<CallStm>> = pipeline.calls.drain(..).map(Some).collect();
    pipeline.calls = order.iter().filter_map(|&i| slots[i].take()).collect();
    Ok(reindex(&graph, &order))
}

// ── Recursion ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Todo,
    Active,
    Done,
}

/// Report every pipeline that calls itself, directly or through other
/// pipelines.
pub fn check_recursion(ast: &Ast) -> Diagnostics {
    let index: HashMap<&str, usize> = ast
        .pipelines
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.as_str(), i))
        .collect();
    let mut state = vec![Visit::Todo; ast.pipelines.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut errs = Diagnostics::new();
    for i in 0..ast.pipelines.len() {
        visit_pipeline(ast, &index, i, &mut state, &mut stack, &mut errs);
    }
    errs
}

fn visit_pipeline(
    ast: &Ast,
    index: &HashMap<&str, usize>,
    i: usize,
    state: &mut [Visit],
    stack: &mut Vec<usize>,
    errs: &mut Diagnostics,
) {
    if state[i] != Visit::Todo {
        return;
    }
    state[i] = Visit::Active;
    stack.push(i);
    let pipeline = &ast.pipelines[i];
    for call in &pipeline.calls {
        let Some(&j) = index.get(call.decl_id.as_str()) else {
            continue;
        };
        if j == i {
            errs.push(Diagnostic::error(
                kinds::RECURSIVE_CALL,
                &call.loc,
                format!("Pipeline {} calls itself.", pipeline.id),
            ));
        } else if state[j] == Visit::Active {
            let start = stack.iter().position(|&k| k == j).unwrap_or(0);
            let path: Vec<&str> = stack[start..]
                .iter()
                .chain(std::iter::once(&j))
                .map(|&k| ast.pipelines[k].id.as_str())
                .collect();
            errs.push(Diagnostic::error(
                kinds::RECURSIVE_CALL,
                &call.loc,
                format!(
                    "Pipeline {} calls itself through {}.",
                    ast.pipelines[j].id,
                    path.join(" -> ")
                ),
            ));
        } else {
            visit_pipeline(ast, index, j, state, stack, errs);
        }
    }
    stack.pop();
    state[i] = Visit::Done;
}

// ── Tests ───────────────────────────────────────────────────────────────────
