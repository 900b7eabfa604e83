// types.rs — The MRO type system
//
// Type identities, file classification, the closed `Type` sum type, and the
// assignability relation between types. Expression validity lives in
// `validate.rs`; construction and caching of types lives in `registry.rs`.
//
// Preconditions: struct member types must be resolvable through the
//   `TypeLookup` passed to assignability checks.
// Postconditions: none (pure functions).
// Failure modes: incompatible types produce a chained `TypeError`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::ast::SourceLoc;
use crate::registry::TypeLookup;

// ── Type identity ────────────────────────────────────────────────────────

/// A type name with its array and map nesting.
///
/// `map_dim > 0` is a map whose values have `map_dim - 1` array
/// dimensions; `array_dim` counts the arrays wrapped around the whole
/// thing. `map<int[]>[]` is `("int", 1, 2)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId {
    pub tname: String,
    pub array_dim: u16,
    pub map_dim: u16,
}

impl TypeId {
    pub fn new(tname: impl Into<String>, array_dim: u16, map_dim: u16) -> Self {
        Self {
            tname: tname.into(),
            array_dim,
            map_dim,
        }
    }

    pub fn scalar(tname: impl Into<String>) -> Self {
        Self::new(tname, 0, 0)
    }

    pub fn is_scalar(&self) -> bool {
        self.array_dim == 0 && self.map_dim == 0
    }

    /// Same id with one more (or one fewer) array dimension.
    pub fn with_array_dim(&self, array_dim: u16) -> Self {
        Self::new(self.tname.clone(), array_dim, self.map_dim)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.map_dim > 0 {
            write!(f, "map<{}", self.tname)?;
            for _ in 1..self.map_dim {
                f.write_str("[]")?;
            }
            f.write_str(">")?;
        } else {
            f.write_str(&self.tname)?;
        }
        for _ in 0..self.array_dim {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

impl FromStr for TypeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn strip_arrays(mut s: &str) -> (&str, u16) {
            let mut dim = 0;
            while let Some(rest) = s.strip_suffix("[]") {
                s = rest;
                dim += 1;
            }
            (s, dim)
        }

        let (head, array_dim) = strip_arrays(s.trim());
        if let Some(inner) = head.strip_prefix("map<").and_then(|r| r.strip_suffix('>')) {
            let (name, inner_dim) = strip_arrays(inner);
            if name.is_empty() || name.contains(['<', '>', '[', ']']) {
                return Err(format!("invalid type name '{s}'"));
            }
            return Ok(TypeId::new(name, array_dim, inner_dim + 1));
        }
        if head.is_empty() || head.contains(['<', '>', '[', ']']) {
            return Err(format!("invalid type name '{s}'"));
        }
        Ok(TypeId::new(head, array_dim, 0))
    }
}

// ── File classification ──────────────────────────────────────────────────

/// Whether values of a type are, or may contain, paths to files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    #[default]
    NotFile,
    MayContainPaths,
    IsFile,
    IsDirectory,
}

impl FileKind {
    pub fn is_file_like(self) -> bool {
        matches!(self, FileKind::IsFile | FileKind::IsDirectory)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileKind::IsFile => "file",
            FileKind::IsDirectory => "directory",
            FileKind::NotFile | FileKind::MayContainPaths => "non-file",
        };
        f.write_str(s)
    }
}

impl Serialize for FileKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FileKind::IsFile => serializer.serialize_bool(true),
            FileKind::IsDirectory => serializer.serialize_str("directory"),
            FileKind::NotFile | FileKind::MayContainPaths => serializer.serialize_bool(false),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A type incompatibility, optionally caused by a nested incompatibility.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub message: String,
    pub reason: Option<Box<TypeError>>,
    long_sep: bool,
}

impl TypeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
            long_sep: false,
        }
    }

    /// `message: reason`.
    pub fn wrap(message: impl Into<String>, reason: TypeError) -> Self {
        Self {
            message: message.into(),
            reason: Some(Box::new(reason)),
            long_sep: false,
        }
    }

    /// Like `wrap`, but a long message puts the reason on its own
    /// indented line.
    pub fn binding(message: impl Into<String>, reason: TypeError) -> Self {
        let message = message.into();
        let long_sep = message.len() > 20;
        Self {
            message,
            reason: Some(Box::new(reason)),
            long_sep,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(reason) = &self.reason {
            let sep = if self.long_sep { ":\n\t" } else { ": " };
            write!(f, "{sep}{reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TypeError {}

// ── Types ────────────────────────────────────────────────────────────────

pub const STRING: &str = "string";
pub const INT: &str = "int";
pub const FLOAT: &str = "float";
pub const BOOL: &str = "bool";
pub const PATH: &str = "path";
pub const FILE: &str = "file";
pub const MAP: &str = "map";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    String,
    Int,
    Float,
    Bool,
    Path,
    File,
    Map,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::String,
        Builtin::Int,
        Builtin::Float,
        Builtin::Bool,
        Builtin::Path,
        Builtin::File,
        Builtin::Map,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::String => STRING,
            Builtin::Int => INT,
            Builtin::Float => FLOAT,
            Builtin::Bool => BOOL,
            Builtin::Path => PATH,
            Builtin::File => FILE,
            Builtin::Map => MAP,
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Builtins that `self` accepts besides itself.
    fn accepts(self, other: Builtin) -> bool {
        self == other
            || matches!(
                (self, other),
                (Builtin::File, Builtin::String)
                    | (Builtin::Path, Builtin::String)
                    | (Builtin::File, Builtin::Path)
                    | (Builtin::Float, Builtin::Int)
            )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub id: String,
    pub tname: TypeId,
    pub help: Option<String>,
    pub out_name: Option<String>,
}

/// A named, ordered list of typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub id: String,
    pub members: Vec<StructMember>,
    table: HashMap<String, usize>,
    pub kind: FileKind,
    pub loc: SourceLoc,
}

impl StructType {
    pub fn new(id: impl Into<String>, members: Vec<StructMember>, kind: FileKind, loc: SourceLoc) -> Self {
        let mut table = HashMap::with_capacity(members.len());
        for (i, m) in members.iter().enumerate() {
            table.entry(m.id.clone()).or_insert(i);
        }
        Self {
            id: id.into(),
            members,
            table,
            kind,
            loc,
        }
    }

    pub fn member(&self, id: &str) -> Option<&StructMember> {
        self.table.get(id).map(|&i| &self.members[i])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Builtin(Builtin),
    UserFile(String),
    Struct(Arc<StructType>),
    /// `elem` never has array dimensions of its own.
    Array { elem: Arc<Type>, dim: u16 },
    TypedMap { elem: Arc<Type> },
    Null,
}

impl Type {
    pub fn id(&self) -> TypeId {
        match self {
            Type::Builtin(b) => TypeId::scalar(b.name()),
            Type::UserFile(name) => TypeId::scalar(name.clone()),
            Type::Struct(s) => TypeId::scalar(s.id.clone()),
            Type::Array { elem, dim } => {
                let mut id = elem.id();
                id.array_dim = *dim;
                id
            }
            Type::TypedMap { elem } => {
                let inner = elem.id();
                TypeId::new(inner.tname, 0, inner.array_dim + 1)
            }
            Type::Null => TypeId::scalar("null"),
        }
    }

    pub fn file_kind(&self) -> FileKind {
        match self {
            Type::Builtin(Builtin::Path | Builtin::File) => FileKind::IsFile,
            Type::Builtin(Builtin::String | Builtin::Map) => FileKind::MayContainPaths,
            Type::Builtin(_) | Type::Null => FileKind::NotFile,
            Type::UserFile(_) => FileKind::IsFile,
            Type::Struct(s) => s.kind,
            Type::Array { elem, .. } => match elem.file_kind() {
                FileKind::IsFile => FileKind::IsDirectory,
                k => k,
            },
            Type::TypedMap { elem } => match elem.file_kind() {
                FileKind::NotFile => FileKind::NotFile,
                FileKind::IsFile | FileKind::IsDirectory => FileKind::IsDirectory,
                FileKind::MayContainPaths => FileKind::MayContainPaths,
            },
        }
    }

    /// Struct, array or map typed.
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Type::Struct(_) | Type::Array { .. } | Type::TypedMap { .. } | Type::Builtin(Builtin::Map)
        )
    }

    /// Whether a value of type `other` may be bound where `self` is
    /// expected.
    pub fn is_assignable_from(&self, other: &Type, lookup: &dyn TypeLookup) -> Result<(), TypeError> {
        if matches!(other, Type::Null) {
            return Ok(());
        }
        match self {
            Type::Builtin(b) => builtin_assignable(*b, other),
            Type::UserFile(name) => user_file_assignable(name, other),
            Type::Struct(s) => struct_assignable(s, other, lookup),
            Type::Array { elem, dim } => match other {
                Type::Array { elem: oe, dim: od } => {
                    elem.is_assignable_from(oe, lookup)
                        .map_err(|e| TypeError::wrap("incompatible array types", e))?;
                    if od != dim {
                        return Err(TypeError::new(format!(
                            "array dimension mismatch ({od} vs {dim})"
                        )));
                    }
                    Ok(())
                }
                _ => Err(TypeError::new(format!(
                    "cannot assign {} to an array value",
                    other.id()
                ))),
            },
            Type::TypedMap { elem } => match other {
                Type::TypedMap { elem: oe } => elem
                    .is_assignable_from(oe, lookup)
                    .map_err(|e| TypeError::wrap("incompatible map types", e)),
                Type::Struct(s) => {
                    for m in &s.members {
                        let mt = resolve_member(lookup, s, m)?;
                        elem.is_assignable_from(&mt, lookup).map_err(|e| {
                            TypeError::wrap(format!("field {} of {}", m.id, s.id), e)
                        })?;
                    }
                    Ok(())
                }
                _ => Err(TypeError::new(format!(
                    "cannot assign {} to a typed map value",
                    other.id()
                ))),
            },
            Type::Null => Err(TypeError::new(format!(
                "{} cannot be assigned to null",
                other.id()
            ))),
        }
    }

    /// Whether two declarations of the same type name describe the same
    /// type. Used to accept identical redefinitions.
    pub fn check_equal(&self, other: &Type) -> Result<(), TypeError> {
        match (self, other) {
            (Type::Builtin(a), Type::Builtin(b)) if a == b => Ok(()),
            (Type::Builtin(a), _) => Err(TypeError::new(format!(
                "{} is not a {}",
                other.id(),
                a.name()
            ))),
            (Type::UserFile(a), Type::UserFile(b)) => {
                if a == b {
                    Ok(())
                } else {
                    Err(TypeError::new(format!("{a} != {b}")))
                }
            }
            (Type::UserFile(_), _) => Err(TypeError::new(format!(
                "{} is not a user-defined file type",
                other.id()
            ))),
            (Type::Struct(a), Type::Struct(b)) => structs_equal(a, b),
            (Type::Struct(_), _) => Err(TypeError::new(format!("{} is not a struct", other.id()))),
            (Type::Array { elem, dim }, Type::Array { elem: oe, dim: od }) => {
                elem.check_equal(oe)
                    .map_err(|e| TypeError::wrap("array type", e))?;
                if dim != od {
                    return Err(TypeError::new("array dimension mismatch"));
                }
                Ok(())
            }
            (Type::Array { .. }, _) => Err(TypeError::new(format!(
                "{} is not an array",
                other.id()
            ))),
            (Type::TypedMap { elem }, Type::TypedMap { elem: oe }) => elem
                .check_equal(oe)
                .map_err(|e| TypeError::wrap("map type", e)),
            (Type::TypedMap { .. }, _) => Err(TypeError::new(format!(
                "{} is not a typed map",
                other.id()
            ))),
            (Type::Null, Type::Null) => Ok(()),
            (Type::Null, _) => Err(TypeError::new(format!("{} is not null", other.id()))),
        }
    }

    /// Whether a JSON value (for example a pipeline argument file) is a
    /// legal value of this type. `null` is legal everywhere.
    pub fn is_valid_json(&self, value: &serde_json::Value, lookup: &dyn TypeLookup) -> Result<(), TypeError> {
        use serde_json::Value;

        if value.is_null() {
            return Ok(());
        }
        let expected = || TypeError::new(format!("expected {}, got {}", self.id(), json_kind(value)));
        match self {
            Type::Builtin(Builtin::String | Builtin::Path | Builtin::File) | Type::UserFile(_) => {
                value.as_str().map(|_| ()).ok_or_else(expected)
            }
            Type::Builtin(Builtin::Int) => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Ok(()),
                    Some(f) => Err(TypeError::new(format!("cannot assign {f} to an integer"))),
                    None => Err(expected()),
                },
                _ => Err(expected()),
            },
            Type::Builtin(Builtin::Float) => value.as_f64().map(|_| ()).ok_or_else(expected),
            Type::Builtin(Builtin::Bool) => value.as_bool().map(|_| ()).ok_or_else(expected),
            Type::Builtin(Builtin::Map) => value.as_object().map(|_| ()).ok_or_else(expected),
            Type::Struct(s) => {
                let obj = value.as_object().ok_or_else(expected)?;
                for m in &s.members {
                    let Some(v) = obj.get(&m.id) else {
                        return Err(TypeError::new(format!("missing value for field {}", m.id)));
                    };
                    let mt = resolve_member(lookup, s, m)?;
                    mt.is_valid_json(v, lookup)
                        .map_err(|e| TypeError::binding(format!("field {}", m.id), e))?;
                }
                Ok(())
            }
            Type::Array { elem, dim } => {
                let items = value.as_array().ok_or_else(expected)?;
                let inner = if *dim > 1 {
                    Type::Array {
                        elem: elem.clone(),
                        dim: dim - 1,
                    }
                } else {
                    elem.as_ref().clone()
                };
                for (i, v) in items.iter().enumerate() {
                    inner
                        .is_valid_json(v, lookup)
                        .map_err(|e| TypeError::binding(format!("element {i}"), e))?;
                }
                Ok(())
            }
            Type::TypedMap { elem } => {
                let obj = value.as_object().ok_or_else(expected)?;
                for (k, v) in obj {
                    elem.is_valid_json(v, lookup)
                        .map_err(|e| TypeError::binding(format!("key {k}"), e))?;
                }
                Ok(())
            }
            Type::Null => Err(expected()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Look up a struct member's type, reporting a missing type as an
/// incompatibility rather than panicking.
pub(crate) fn resolve_member(
    lookup: &dyn TypeLookup,
    s: &StructType,
    m: &StructMember,
) -> Result<Arc<Type>, TypeError> {
    lookup.get(&m.tname).ok_or_else(|| {
        TypeError::new(format!("unknown type {} for member {} of {}", m.tname, m.id, s.id))
    })
}

// ── Assignability per variant ────────────────────────────────────────────

fn builtin_assignable(b: Builtin, other: &Type) -> Result<(), TypeError> {
    match other {
        Type::Builtin(o) if b.accepts(*o) => Ok(()),
        Type::Builtin(o) => Err(TypeError::new(format!(
            "{} cannot be assigned to {}",
            o.name(),
            b.name()
        ))),
        Type::UserFile(name) => match b {
            Builtin::File | Builtin::String => Ok(()),
            _ => Err(TypeError::new(format!(
                "{} cannot be assigned to {}",
                name,
                b.name()
            ))),
        },
        Type::Struct(s) => match b {
            Builtin::Map => Ok(()),
            _ => Err(TypeError::new(format!(
                "struct type {} cannot be assigned to {}",
                s.id,
                b.name()
            ))),
        },
        Type::Array { elem, .. } => Err(TypeError::new(format!(
            "cannot assign array of {} to singleton {}",
            elem.id(),
            b.name()
        ))),
        Type::TypedMap { elem } => match b {
            Builtin::Map => Ok(()),
            _ => Err(TypeError::new(format!(
                "map<{}> cannot be assigned to {}",
                elem.id(),
                b.name()
            ))),
        },
        Type::Null => Ok(()),
    }
}

fn user_file_assignable(name: &str, other: &Type) -> Result<(), TypeError> {
    match other {
        Type::Builtin(Builtin::File | Builtin::String) | Type::Null => Ok(()),
        Type::Builtin(o) => Err(TypeError::new(format!(
            "{} cannot be assigned to {}",
            o.name(),
            name
        ))),
        Type::UserFile(o) if o == name => Ok(()),
        Type::UserFile(o) => Err(TypeError::new(format!(
            "conversion between user-defined file types {o} and {name} is not allowed"
        ))),
        Type::Struct(s) => Err(TypeError::new(format!(
            "struct type {} cannot be assigned to {}",
            s.id, name
        ))),
        Type::Array { .. } => Err(TypeError::new(format!(
            "cannot assign array {} to singleton {}",
            other.id(),
            name
        ))),
        Type::TypedMap { elem } => Err(TypeError::new(format!(
            "cannot assign map<{}> to singleton {}",
            elem.id(),
            name
        ))),
    }
}

fn struct_assignable(s: &StructType, other: &Type, lookup: &dyn TypeLookup) -> Result<(), TypeError> {
    let o = match other {
        Type::Struct(o) => o,
        _ => {
            return Err(TypeError::new(format!(
                "cannot assign non-struct type {} to struct {}",
                other.id(),
                s.id
            )))
        }
    };
    if o.id == s.id {
        return Ok(());
    }
    let mut problems = Vec::new();
    for m in &s.members {
        let Some(om) = o.member(&m.id) else {
            problems.push(format!("no member {}", m.id));
            continue;
        };
        if om.tname.array_dim != m.tname.array_dim {
            problems.push(format!(
                "member {}: differing array dimensions {} vs {}",
                m.id, om.tname.array_dim, m.tname.array_dim
            ));
            continue;
        }
        if om.tname.map_dim != m.tname.map_dim {
            let p = if om.tname.map_dim == 0 {
                format!("member {}: not a map", m.id)
            } else if m.tname.map_dim == 0 {
                format!("member {}: unexpected map", m.id)
            } else {
                format!(
                    "member {}: differing inner array dimensions {} vs {}",
                    m.id,
                    om.tname.map_dim - 1,
                    m.tname.map_dim - 1
                )
            };
            problems.push(p);
            continue;
        }
        if om.tname == m.tname {
            continue;
        }
        let check = resolve_member(lookup, s, m).and_then(|mt| {
            let ot = resolve_member(lookup, o, om)?;
            mt.is_assignable_from(&ot, lookup)
        });
        if let Err(e) = check {
            problems.push(TypeError::wrap(format!("member {}", m.id), e).to_string());
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(TypeError::wrap(
            format!("struct {} cannot be used as {}", o.id, s.id),
            TypeError::new(problems.join("\n")),
        ))
    }
}

fn structs_equal(a: &StructType, b: &StructType) -> Result<(), TypeError> {
    if a.members.len() != b.members.len() {
        if let Some(m) = a.members.iter().find(|m| b.member(&m.id).is_none()) {
            return Err(TypeError::new(format!("missing field: {}", m.id)));
        }
        if let Some(m) = b.members.iter().find(|m| a.member(&m.id).is_none()) {
            return Err(TypeError::new(format!("missing field: {}", m.id)));
        }
    }
    for m in &a.members {
        let Some(om) = b.member(&m.id) else {
            return Err(TypeError::new(format!("missing field: {}", m.id)));
        };
        let field = |what: &str| TypeError::new(format!("field {}: {}", m.id, what));
        if om.tname.tname != m.tname.tname {
            return Err(field("differing types"));
        }
        if om.tname.array_dim != m.tname.array_dim {
            return Err(field("differing array dimension"));
        }
        if om.tname.map_dim != m.tname.map_dim {
            if om.tname.map_dim == 0 || m.tname.map_dim == 0 {
                return Err(field("not a typed map"));
            }
            return Err(field("differing inner array dimension"));
        }
        if om.help != m.help {
            return Err(field("differing output display names"));
        }
        if om.out_name != m.out_name {
            return Err(field("differing explicit output names"));
        }
    }
    Ok(())
}
