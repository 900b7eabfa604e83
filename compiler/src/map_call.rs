// map_call.rs — Fan-out analysis for mapped calls
//
// Determines, for every call in a pipeline, whether it runs once or once
// per element of the collections bound with `split`, and merges the split
// sources of one call into a single consistent source. A reference to the
// output of another mapped call inherits that call's source, so chains of
// mapped calls share one fan-out.
//
// Preconditions: the pipeline's parameters are compiled and call targets
//   exist (unresolvable references degrade to an unknown source).
// Postconditions: every call gets a `CallMode`; every mapped call and each
//   of its split expressions carry the merged `MapCallSource`.
// Failure modes: inconsistent split sources and `map call` without any
//   split binding produce `InconsistentMapCallError`.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use crate::ast::*;
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::resolve::Scope;

// ── Public types ────────────────────────────────────────────────────────────

/// How many times a call runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CallMode {
    /// Once.
    #[default]
    Single,
    /// Once per element of an array.
    Array,
    /// Once per key of a map.
    Map,
    /// Split over something whose shape is not known.
    Unknown,
    /// Split over `null`; never runs.
    Null,
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallMode::Single => "simple",
            CallMode::Array => "array",
            CallMode::Map => "map",
            CallMode::Unknown => "unknown",
            CallMode::Null => "null",
        };
        f.write_str(s)
    }
}

/// The collection a mapped call iterates over.
#[derive(Debug, Clone, PartialEq)]
pub enum MapCallSource {
    /// An array literal of known length.
    Array(usize),
    /// A map literal with known keys.
    Map(BTreeSet<String>),
    /// A `null` literal.
    Null,
    /// A pipeline input or call output whose size is only known at run
    /// time.
    Ref { target: RefExp, mode: CallMode },
    /// Several distinct sources bound to one call.
    Set(MapCallSet),
    /// Not yet known (for example while the referenced call is still being
    /// analyzed).
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapCallSet {
    /// The most informative member, used for the mode and for checks.
    pub master: Box<MapCallSource>,
    pub sources: Vec<MapCallSource>,
}

impl MapCallSource {
    pub fn mode(&self) -> CallMode {
        match self {
            MapCallSource::Array(_) => CallMode::Array,
            MapCallSource::Map(_) => CallMode::Map,
            MapCallSource::Null => CallMode::Null,
            MapCallSource::Ref { mode, .. } => *mode,
            MapCallSource::Set(set) => set.master.mode(),
            MapCallSource::Pending => CallMode::Unknown,
        }
    }

    /// Whether the length (or key set) is known at compile time.
    pub fn known_length(&self) -> bool {
        match self {
            MapCallSource::Array(_) | MapCallSource::Map(_) | MapCallSource::Null => true,
            MapCallSource::Set(set) => set.master.known_length(),
            MapCallSource::Ref { .. } | MapCallSource::Pending => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MapCallSource::Pending)
    }

    fn is_empty(&self) -> bool {
        match self {
            MapCallSource::Array(n) => *n == 0,
            MapCallSource::Map(keys) => keys.is_empty(),
            MapCallSource::Null => true,
            _ => false,
        }
    }

    fn master(&self) -> &MapCallSource {
        match self {
            MapCallSource::Set(set) => &set.master,
            other => other,
        }
    }

    fn members(&self) -> Vec<MapCallSource> {
        match self {
            MapCallSource::Set(set) => set.sources.clone(),
            other => vec![other.clone()],
        }
    }

    /// Combine the sources of two split bindings of the same call.
    ///
    /// Fails when both have known shapes that disagree. A pending source
    /// merges with anything.
    pub fn merge(self, other: MapCallSource) -> Result<MapCallSource, String> {
        if self == other || other.is_pending() {
            return Ok(self);
        }
        if self.is_pending() {
            return Ok(other);
        }
        let (a, b) = (self.master(), other.master());
        let (ma, mb) = (a.mode(), b.mode());
        if ma != mb && ma != CallMode::Null && mb != CallMode::Null {
            return Err("cannot split over both arrays and maps".to_string());
        }
        if a.known_length() && b.known_length() {
            check_consistent(a, b)?;
        } else if *a == MapCallSource::Null {
            return Ok(other);
        } else if *b == MapCallSource::Null {
            return Ok(self);
        }

        let master = [a, b]
            .into_iter()
            .find(|s| s.known_length() && **s != MapCallSource::Null)
            .or_else(|| [a, b].into_iter().find(|s| s.known_length()))
            .unwrap_or(a)
            .clone();
        let mut sources = self.members();
        for s in other.members() {
            if !sources.contains(&s) {
                sources.push(s);
            }
        }
        if sources.len() == 1 {
            return Ok(master);
        }
        Ok(MapCallSource::Set(MapCallSet {
            master: Box::new(master),
            sources,
        }))
    }
}

fn check_consistent(a: &MapCallSource, b: &MapCallSource) -> Result<(), String> {
    match (a, b) {
        (MapCallSource::Null, MapCallSource::Null) => Ok(()),
        (MapCallSource::Null, x) | (x, MapCallSource::Null) => {
            if x.is_empty() {
                Ok(())
            } else {
                Err(format!("{} was not empty", x.mode()))
            }
        }
        (MapCallSource::Array(n), MapCallSource::Array(m)) => {
            if n == m {
                Ok(())
            } else {
                Err(format!("array length mismatch {n} vs {m}"))
            }
        }
        (MapCallSource::Map(ka), MapCallSource::Map(kb)) => {
            if ka.len() != kb.len() {
                return Err(format!("map length mismatch {} vs {}", ka.len(), kb.len()));
            }
            match ka.difference(kb).chain(kb.difference(ka)).next() {
                Some(k) => Err(format!("map key missing {k:?}")),
                None => Ok(()),
            }
        }
        _ => Err("cannot split over both arrays and maps".to_string()),
    }
}

impl fmt::Display for MapCallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapCallSource::Array(n) => write!(f, "array[{n}]"),
            MapCallSource::Map(keys) => {
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                write!(f, "map{{{}}}", keys.join(","))
            }
            MapCallSource::Null => f.write_str("null"),
            MapCallSource::Ref { target, .. } => write!(f, "{target}"),
            MapCallSource::Set(set) => {
                for (i, s) in set.sources.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{s}")?;
                }
                Ok(())
            }
            MapCallSource::Pending => f.write_str("unknown"),
        }
    }
}

// ── Pipeline analysis ───────────────────────────────────────────────────────

/// The resolved fan-out of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapCallInfo {
    pub mode: CallMode,
    pub source: Option<MapCallSource>,
}

#[derive(Debug, Clone)]
enum State {
    Todo,
    Active,
    Done(MapCallInfo),
}

struct Analyzer<'a> {
    scope: Scope<'a>,
    pipeline: &'a Pipeline,
    states: Vec<State>,
    errs: Diagnostics,
}

/// Resolve the fan-out of every call in the scope's pipeline, in call
/// order.
pub fn analyze_pipeline(scope: Scope<'_>) -> Result<Vec<MapCallInfo>, Diagnostics> {
    let Some(pipeline) = scope.pipeline else {
        return Ok(Vec::new());
    };
    let mut analyzer = Analyzer {
        scope,
        pipeline,
        states: vec![State::Todo; pipeline.calls.len()],
        errs: Diagnostics::new(),
    };
    let infos: Vec<MapCallInfo> = (0..pipeline.calls.len())
        .map(|i| analyzer.analyze(i))
        .collect();
    analyzer.errs.into_result(infos)
}

impl<'a> Analyzer<'a> {
    fn analyze(&mut self, idx: usize) -> MapCallInfo {
        match &self.states[idx] {
            State::Done(info) => return info.clone(),
            State::Active => {
                return MapCallInfo {
                    mode: CallMode::Unknown,
                    source: Some(MapCallSource::Pending),
                }
            }
            State::Todo => {}
        }
        self.states[idx] = State::Active;

        let pipeline = self.pipeline;
        let call = &pipeline.calls[idx];
        let mut merged: Option<MapCallSource> = None;
        for split in call_splits(call) {
            let src = self.source_of(&split.value);
            merged = match merged {
                None => Some(src),
                Some(prev) => match prev.clone().merge(src) {
                    Ok(m) => Some(m),
                    Err(cause) => {
                        self.errs.push(inconsistent(call, pipeline, &cause));
                        Some(prev)
                    }
                },
            };
        }
        if call.is_map && merged.is_none() {
            self.errs.push(inconsistent(
                call,
                pipeline,
                "map call has no split inputs",
            ));
        }

        let info = MapCallInfo {
            mode: merged.as_ref().map_or(CallMode::Single, MapCallSource::mode),
            source: merged,
        };
        self.states[idx] = State::Done(info.clone());
        info
    }

    fn source_of(&mut self, exp: &Exp) -> MapCallSource {
        match &exp.kind {
            ExpKind::Array(items) => MapCallSource::Array(items.len()),
            ExpKind::Map(_, entries) => MapCallSource::Map(entries.keys().cloned().collect()),
            ExpKind::Null => MapCallSource::Null,
            ExpKind::Disabled(d) => self.source_of(&d.value),
            ExpKind::Ref(r) => {
                let Ok((tid, call)) = self.scope.output_type(r) else {
                    return MapCallSource::Pending;
                };
                if let Some(idx) = call.and_then(|c| self.call_index(&c.id)) {
                    let info = self.analyze(idx);
                    match info.mode {
                        CallMode::Array | CallMode::Map | CallMode::Null => {
                            return info.source.unwrap_or(MapCallSource::Pending)
                        }
                        CallMode::Unknown => return MapCallSource::Pending,
                        CallMode::Single => {}
                    }
                }
                let mode = if tid.array_dim > 0 {
                    CallMode::Array
                } else if tid.map_dim > 0 {
                    CallMode::Map
                } else {
                    return MapCallSource::Pending;
                };
                MapCallSource::Ref {
                    target: r.clone(),
                    mode,
                }
            }
            _ => MapCallSource::Pending,
        }
    }

    fn call_index(&self, id: &str) -> Option<usize> {
        self.pipeline.calls.iter().position(|c| c.id == id)
    }
}

fn inconsistent(call: &CallStm, pipeline: &Pipeline, cause: &str) -> Diagnostic {
    let alias = if call.id != call.decl_id {
        format!(" as {}", call.id)
    } else {
        String::new()
    };
    Diagnostic::error(
        kinds::INCONSISTENT_MAP_CALL,
        &call.loc,
        format!(
            "inconsistent split inputs in call to {}{} in pipeline {}\nCause: {}",
            call.decl_id, alias, pipeline.id, cause
        ),
    )
}

// ── Split expressions ───────────────────────────────────────────────────────

/// Every split expression bound to a call, including modifier bindings.
/// Splits nested inside a split value are not visited.
pub fn call_splits(call: &CallStm) -> Vec<&SplitExp> {
    let mut out = Vec::new();
    for b in call.bindings.iter().chain(call.modifiers.bindings.iter()) {
        collect_splits(&b.exp, &mut out);
    }
    out
}

fn collect_splits<'a>(exp: &'a Exp, out: &mut Vec<&'a SplitExp>) {
    match &exp.kind {
        ExpKind::Split(s) => out.push(s),
        ExpKind::Array(items) => items.iter().for_each(|e| collect_splits(e, out)),
        ExpKind::Map(_, entries) => entries.values().for_each(|e| collect_splits(e, out)),
        ExpKind::Disabled(d) => {
            collect_splits(&d.disabled, out);
            collect_splits(&d.value, out);
        }
        _ => {}
    }
}

fn set_split_sources(exp: &mut Exp, source: &Option<MapCallSource>) {
    match &mut exp.kind {
        ExpKind::Split(s) => s.source = source.clone(),
        ExpKind::Array(items) => items.iter_mut().for_each(|e| set_split_sources(e, source)),
        ExpKind::Map(_, entries) => entries
            .values_mut()
            .for_each(|e| set_split_sources(e, source)),
        ExpKind::Disabled(d) => {
            set_split_sources(&mut d.disabled, source);
            set_split_sources(&mut d.value, source);
        }
        _ => {}
    }
}

/// Record analysis results on the calls of `pipeline` and on each of
/// their split expressions.
pub fn apply(pipeline: &mut Pipeline, infos: Vec<MapCallInfo>) {
    for (call, info) in pipeline.calls.iter_mut().zip(infos) {
        call.mode = info.mode;
        let bindings = call
            .bindings
            .list
            .iter_mut()
            .chain(call.modifiers.bindings.list.iter_mut());
        for b in bindings {
            set_split_sources(&mut b.exp, &info.source);
        }
        call.source = info.source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ks: &[&str]) -> MapCallSource {
        MapCallSource::Map(ks.iter().map(|k| k.to_string()).collect())
    }

    fn array_ref(id: &str) -> MapCallSource {
        MapCallSource::Ref {
            target: RefExp::self_ref(id, ""),
            mode: CallMode::Array,
        }
    }

    #[test]
    fn equal_sources_merge() {
        let a = MapCallSource::Array(3);
        assert_eq!(a.clone().merge(MapCallSource::Array(3)), Ok(a));
    }

    #[test]
    fn array_length_mismatch() {
        let err = MapCallSource::Array(2)
            .merge(MapCallSource::Array(3))
            .unwrap_err();
        assert_eq!(err, "array length mismatch 2 vs 3");
    }

    #[test]
    fn map_keys_checked() {
        assert_eq!(
            keys(&["a"]).merge(keys(&["a", "b"])).unwrap_err(),
            "map length mismatch 1 vs 2"
        );
        assert_eq!(
            keys(&["a", "b"]).merge(keys(&["a", "c"])).unwrap_err(),
            "map key missing \"b\""
        );
        assert!(keys(&["a", "b"]).merge(keys(&["b", "a"])).is_ok());
    }

    #[test]
    fn arrays_and_maps_do_not_mix() {
        assert_eq!(
            MapCallSource::Array(1).merge(keys(&["a"])).unwrap_err(),
            "cannot split over both arrays and maps"
        );
        let map_ref = MapCallSource::Ref {
            target: RefExp::self_ref("m", ""),
            mode: CallMode::Map,
        };
        assert!(array_ref("x").merge(map_ref).is_err());
    }

    #[test]
    fn null_against_known_sources() {
        assert!(MapCallSource::Null.merge(MapCallSource::Array(0)).is_ok());
        assert_eq!(
            MapCallSource::Array(2).merge(MapCallSource::Null).unwrap_err(),
            "array was not empty"
        );
        assert_eq!(
            MapCallSource::Null.merge(keys(&["k"])).unwrap_err(),
            "map was not empty"
        );
        assert_eq!(MapCallSource::Null.merge(array_ref("x")), Ok(array_ref("x")));
    }

    #[test]
    fn pending_merges_with_anything() {
        assert_eq!(
            MapCallSource::Pending.merge(MapCallSource::Array(4)),
            Ok(MapCallSource::Array(4))
        );
        assert_eq!(keys(&["a"]).merge(MapCallSource::Pending), Ok(keys(&["a"])));
    }

    #[test]
    fn known_length_becomes_master() {
        let merged = array_ref("x").merge(MapCallSource::Array(2)).unwrap();
        let MapCallSource::Set(set) = &merged else {
            panic!("expected a set, got {merged:?}");
        };
        assert_eq!(*set.master, MapCallSource::Array(2));
        assert_eq!(set.sources.len(), 2);
        assert_eq!(merged.mode(), CallMode::Array);
        assert!(merged.known_length());
        let again = merged.clone().merge(MapCallSource::Array(3)).unwrap_err();
        assert_eq!(again, "array length mismatch 2 vs 3");
        assert_eq!(merged.to_string(), "self.x & array[2]");
    }
}
