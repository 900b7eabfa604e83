// ast.rs — Syntax tree for MRO sources
//
// Declarations (file types, structs, stages, pipelines, the top-level call)
// and the expression tree bound to call parameters. Every node carries a
// `SourceLoc` whose file records the include chain that reached it.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::map_call::{CallMode, MapCallSource};
use crate::types::{FileKind, TypeId};

// ── Source locations ─────────────────────────────────────────────────────

/// One loaded source file and the locations of every `@include` that
/// reached it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFile {
    pub file_name: String,
    pub full_path: String,
    pub included_from: Vec<SourceLoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLoc {
    pub line: usize,
    pub file: Option<Arc<SourceFile>>,
}

impl SourceLoc {
    /// A location with no file, rendered as `line N`.
    pub fn at_line(line: usize) -> Self {
        Self { line, file: None }
    }
}

// ── Parameters ───────────────────────────────────────────────────────────

/// An input or output parameter, or a struct member.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub id: String,
    pub tname: TypeId,
    pub help: Option<String>,
    /// Explicit output file name (outputs and struct members only).
    pub out_name: Option<String>,
    pub loc: SourceLoc,
    /// Cached by the parameter compiler.
    pub file_kind: FileKind,
    /// Struct, array or map typed. Cached by the parameter compiler.
    pub complex: bool,
}

impl Param {
    pub fn new(id: impl Into<String>, tname: TypeId, loc: SourceLoc) -> Self {
        Self {
            id: id.into(),
            tname,
            help: None,
            out_name: None,
            loc,
            file_kind: FileKind::NotFile,
            complex: false,
        }
    }
}

/// An ordered parameter list with an id-keyed index. The index keeps the
/// first declaration of a repeated id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub list: Vec<Param>,
    table: HashMap<String, usize>,
}

impl Params {
    pub fn new(list: Vec<Param>) -> Self {
        let mut table = HashMap::with_capacity(list.len());
        for (i, p) in list.iter().enumerate() {
            table.entry(p.id.clone()).or_insert(i);
        }
        Self { list, table }
    }

    pub fn get(&self, id: &str) -> Option<&Param> {
        self.table.get(id).map(|&i| &self.list[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.contains_key(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.list.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Param> {
        self.list.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

// ── Declarations ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub value: String,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserType {
    pub id: String,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub id: String,
    pub members: Params,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Src {
    pub lang: String,
    pub path: String,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitParams {
    pub in_params: Params,
    pub out_params: Params,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Word(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub key: String,
    pub value: ResourceValue,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetainId {
    pub id: String,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub id: String,
    pub in_params: Params,
    pub out_params: Params,
    pub src: Src,
    pub split: Option<SplitParams>,
    pub resources: Vec<Resource>,
    pub retain: Vec<RetainId>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStm {
    pub bindings: BindStms,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub id: String,
    pub in_params: Params,
    pub out_params: Params,
    pub calls: Vec<CallStm>,
    pub ret: ReturnStm,
    /// Each entry is a reference expression.
    pub retain: Vec<Exp>,
    pub loc: SourceLoc,
}

// ── Calls and bindings ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BindStm {
    /// Parameter id, or `*` for a wildcard.
    pub id: String,
    pub exp: Exp,
    pub loc: SourceLoc,
}

/// Ordered bindings plus an id-keyed index (first occurrence wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindStms {
    pub list: Vec<BindStm>,
    table: HashMap<String, usize>,
}

impl BindStms {
    pub fn new(list: Vec<BindStm>) -> Self {
        let mut table = HashMap::with_capacity(list.len());
        for (i, b) in list.iter().enumerate() {
            table.entry(b.id.clone()).or_insert(i);
        }
        Self { list, table }
    }

    pub fn get(&self, id: &str) -> Option<&BindStm> {
        self.table.get(id).map(|&i| &self.list[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BindStm> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Modifiers {
    pub local: bool,
    pub preflight: bool,
    pub volatile: bool,
    /// `using (...)` bindings on the call.
    pub bindings: BindStms,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStm {
    /// Alias, unique within the enclosing pipeline.
    pub id: String,
    /// Target callable.
    pub decl_id: String,
    pub bindings: BindStms,
    pub modifiers: Modifiers,
    /// Declared with `map call`.
    pub is_map: bool,
    /// Resolved fan-out mode.
    pub mode: CallMode,
    /// Resolved fan-out source; set for every mapped call after analysis.
    pub source: Option<MapCallSource>,
    /// Resolved disable condition, if any.
    pub disabled: Option<Exp>,
    pub loc: SourceLoc,
}

// ── Expressions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// `{"key": value}`
    Map,
    /// `{field: value}`
    Struct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    SelfRef,
    Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefExp {
    pub kind: RefKind,
    /// Pipeline parameter or call alias.
    pub id: String,
    /// Dotted output and field path; empty for a bare reference.
    pub output_id: String,
}

impl RefExp {
    pub fn call(id: impl Into<String>, output_id: impl Into<String>) -> Self {
        Self {
            kind: RefKind::Call,
            id: id.into(),
            output_id: output_id.into(),
        }
    }

    pub fn self_ref(id: impl Into<String>, output_id: impl Into<String>) -> Self {
        Self {
            kind: RefKind::SelfRef,
            id: id.into(),
            output_id: output_id.into(),
        }
    }
}

impl fmt::Display for RefExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RefKind::SelfRef => write!(f, "self.{}", self.id)?,
            RefKind::Call => write!(f, "{}", self.id)?,
        }
        if !self.output_id.is_empty() {
            write!(f, ".{}", self.output_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitExp {
    pub value: Exp,
    /// The merged source of the call this split belongs to.
    pub source: Option<MapCallSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisabledExp {
    pub disabled: Exp,
    pub value: Exp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Exp>),
    Map(MapKind, BTreeMap<String, Exp>),
    Ref(RefExp),
    Split(Box<SplitExp>),
    Disabled(Box<DisabledExp>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exp {
    pub kind: ExpKind,
    pub loc: SourceLoc,
}

impl Exp {
    pub fn new(kind: ExpKind, loc: SourceLoc) -> Self {
        Self { kind, loc }
    }

    pub fn null(loc: SourceLoc) -> Self {
        Self::new(ExpKind::Null, loc)
    }

    pub fn reference(r: RefExp, loc: SourceLoc) -> Self {
        Self::new(ExpKind::Ref(r), loc)
    }

    /// Short name of the expression's shape, used in messages.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExpKind::Null => "null",
            ExpKind::Bool(_) => "bool",
            ExpKind::Int(_) => "int",
            ExpKind::Float(_) => "float",
            ExpKind::Str(_) => "string",
            ExpKind::Array(_) => "array",
            ExpKind::Map(MapKind::Map, _) => "map",
            ExpKind::Map(MapKind::Struct, _) => "struct",
            ExpKind::Ref(_) => "reference",
            ExpKind::Split(_) => "split",
            ExpKind::Disabled(_) => "disabled",
        }
    }

    /// Structural equality, ignoring source locations.
    pub fn same_value(&self, other: &Exp) -> bool {
        match (&self.kind, &other.kind) {
            (ExpKind::Array(a), ExpKind::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value(y))
            }
            (ExpKind::Map(ka, a), ExpKind::Map(kb, b)) => {
                ka == kb
                    && a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((k1, v1), (k2, v2))| k1 == k2 && v1.same_value(v2))
            }
            (ExpKind::Split(a), ExpKind::Split(b)) => a.value.same_value(&b.value),
            (ExpKind::Disabled(a), ExpKind::Disabled(b)) => {
                a.disabled.same_value(&b.disabled) && a.value.same_value(&b.value)
            }
            (a, b) => a == b,
        }
    }

    /// Every reference in the expression, depth first.
    pub fn find_refs(&self) -> Vec<&RefExp> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a RefExp>) {
        match &self.kind {
            ExpKind::Ref(r) => out.push(r),
            ExpKind::Array(items) => items.iter().for_each(|e| e.collect_refs(out)),
            ExpKind::Map(_, entries) => entries.values().for_each(|e| e.collect_refs(out)),
            ExpKind::Split(s) => s.value.collect_refs(out),
            ExpKind::Disabled(d) => {
                d.disabled.collect_refs(out);
                d.value.collect_refs(out);
            }
            _ => {}
        }
    }

    /// Whether any part of the expression is a `split`.
    pub fn has_split(&self) -> bool {
        match &self.kind {
            ExpKind::Split(_) => true,
            ExpKind::Array(items) => items.iter().any(Exp::has_split),
            ExpKind::Map(_, entries) => entries.values().any(Exp::has_split),
            ExpKind::Disabled(d) => d.value.has_split(),
            _ => false,
        }
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExpKind::Null => f.write_str("null"),
            ExpKind::Bool(b) => write!(f, "{b}"),
            ExpKind::Int(i) => write!(f, "{i}"),
            ExpKind::Float(x) => write!(f, "{x}"),
            ExpKind::Str(s) => match serde_json::to_string(s) {
                Ok(quoted) => f.write_str(&quoted),
                Err(_) => Err(fmt::Error),
            },
            ExpKind::Array(items) => {
                f.write_str("[")?;
                for (i, e) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
            ExpKind::Map(kind, entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match kind {
                        MapKind::Map => write!(f, "{k:?}: {v}")?,
                        MapKind::Struct => write!(f, "{k}: {v}")?,
                    }
                }
                f.write_str("}")
            }
            ExpKind::Ref(r) => write!(f, "{r}"),
            ExpKind::Split(s) => write!(f, "split {}", s.value),
            ExpKind::Disabled(d) => write!(f, "disabled({}, {})", d.disabled, d.value),
        }
    }
}

// ── Program ──────────────────────────────────────────────────────────────

/// A borrowed view of a stage or a pipeline.
#[derive(Debug, Clone, Copy)]
pub enum Callable<'a> {
    Stage(&'a Stage),
    Pipeline(&'a Pipeline),
}

impl<'a> Callable<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Callable::Stage(s) => &s.id,
            Callable::Pipeline(p) => &p.id,
        }
    }

    pub fn in_params(&self) -> &'a Params {
        match self {
            Callable::Stage(s) => &s.in_params,
            Callable::Pipeline(p) => &p.in_params,
        }
    }

    pub fn out_params(&self) -> &'a Params {
        match self {
            Callable::Stage(s) => &s.out_params,
            Callable::Pipeline(p) => &p.out_params,
        }
    }

    pub fn loc(&self) -> &'a SourceLoc {
        match self {
            Callable::Stage(s) => &s.loc,
            Callable::Pipeline(p) => &p.loc,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Callable::Stage(_) => "stage",
            Callable::Pipeline(_) => "pipeline",
        }
    }

    pub fn is_stage(&self) -> bool {
        matches!(self, Callable::Stage(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallableRef {
    Stage(usize),
    Pipeline(usize),
}

/// A whole program: the merged declarations of every loaded file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    pub files: Vec<Arc<SourceFile>>,
    pub includes: Vec<Include>,
    pub user_types: Vec<UserType>,
    pub structs: Vec<StructDecl>,
    pub stages: Vec<Stage>,
    pub pipelines: Vec<Pipeline>,
    pub call: Option<CallStm>,
    callables: HashMap<String, CallableRef>,
}

impl Ast {
    /// An empty program whose declarations come from `file`.
    pub fn for_file(file: Arc<SourceFile>) -> Self {
        Self {
            files: vec![file],
            ..Self::default()
        }
    }

    /// Rebuild the callable index. Returns `(kind, id, loc, previous loc)`
    /// for every id declared more than once; the first declaration wins.
    pub fn index_callables(&mut self) -> Vec<(&'static str, String, SourceLoc, SourceLoc)> {
        let mut dups = Vec::new();
        let mut table: HashMap<String, CallableRef> = HashMap::new();
        let mut locs: HashMap<String, SourceLoc> = HashMap::new();
        let entries = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| ("stage", &s.id, &s.loc, CallableRef::Stage(i)))
            .chain(
                self.pipelines
                    .iter()
                    .enumerate()
                    .map(|(i, p)| ("pipeline", &p.id, &p.loc, CallableRef::Pipeline(i))),
            );
        for (kind, id, loc, r) in entries {
            if let Some(prev) = locs.get(id) {
                dups.push((kind, id.clone(), loc.clone(), prev.clone()));
                continue;
            }
            locs.insert(id.clone(), loc.clone());
            table.insert(id.clone(), r);
        }
        self.callables = table;
        dups
    }

    pub fn callable(&self, id: &str) -> Option<Callable<'_>> {
        match self.callables.get(id)? {
            CallableRef::Stage(i) => self.stages.get(*i).map(Callable::Stage),
            CallableRef::Pipeline(i) => self.pipelines.get(*i).map(Callable::Pipeline),
        }
    }

    pub fn pipeline(&self, id: &str) -> Option<&Pipeline> {
        match self.callable(id)? {
            Callable::Pipeline(p) => Some(p),
            Callable::Stage(_) => None,
        }
    }

    /// Append another file's declarations.
    pub fn merge(&mut self, other: Ast) {
        self.files.extend(other.files);
        self.includes.extend(other.includes);
        self.user_types.extend(other.user_types);
        self.structs.extend(other.structs);
        self.stages.extend(other.stages);
        self.pipelines.extend(other.pipelines);
        if self.call.is_none() {
            self.call = other.call;
        }
    }
}
