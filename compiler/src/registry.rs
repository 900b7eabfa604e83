// registry.rs — Type registry
//
// Holds builtin, user file, and struct types by name and lazily builds the
// array and typed-map wrappers around them. Two phases: `TypeRegistry` is
// the single-owner builder used while compiling; `freeze()` converts it
// into a `TypeTable` that never mutates and may be shared across threads.
//
// Preconditions: none.
// Postconditions: every registered name maps to exactly one type.
// Failure modes: conflicting registrations return a `DuplicateNameError`
//   diagnostic.
// Side effects: `TypeRegistry::get` caches wrapper types it builds.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::ast::SourceLoc;
use crate::diag::{kinds, Diagnostic};
use crate::types::{Builtin, StructType, Type, TypeId, MAP};

/// Read access to types by id.
pub trait TypeLookup {
    /// The type for `id`, building array and map wrappers as needed.
    fn get(&self, id: &TypeId) -> Option<Arc<Type>>;
}

/// Build the wrapper type for a non-scalar id from its element type.
fn build_wrapper(lookup: &dyn TypeLookup, id: &TypeId) -> Option<Type> {
    if id.array_dim > 0 {
        let elem = lookup.get(&TypeId::new(id.tname.clone(), 0, id.map_dim))?;
        return Some(Type::Array {
            elem,
            dim: id.array_dim,
        });
    }
    // map<map> has no meaning.
    if id.map_dim == 1 && id.tname == MAP {
        return None;
    }
    let elem = lookup.get(&TypeId::new(id.tname.clone(), id.map_dim - 1, 0))?;
    Some(Type::TypedMap { elem })
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Mutable registry used during compilation.
#[derive(Debug)]
pub struct TypeRegistry {
    base: HashMap<String, Arc<Type>>,
    locs: HashMap<String, SourceLoc>,
    cache: RefCell<HashMap<TypeId, Arc<Type>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding only the builtin types.
    pub fn new() -> Self {
        let base = Builtin::ALL
            .into_iter()
            .map(|b| (b.name().to_string(), Arc::new(Type::Builtin(b))))
            .collect();
        Self {
            base,
            locs: HashMap::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Register a user file type. Redeclaring one is harmless.
    pub fn add_user_type(&mut self, id: &str, loc: &SourceLoc) -> Result<(), Diagnostic> {
        match self.base.get(id).map(|t| t.as_ref()) {
            None => {
                self.base
                    .insert(id.to_string(), Arc::new(Type::UserFile(id.to_string())));
                self.locs.insert(id.to_string(), loc.clone());
                Ok(())
            }
            Some(Type::UserFile(_)) => Ok(()),
            Some(Type::Struct(s)) => Err(Diagnostic::error(
                kinds::DUPLICATE_NAME,
                loc,
                format!("type name {id} conflicts with previously declared struct type"),
            )
            .with_related(s.loc.clone(), "Previous declaration")),
            Some(_) => Err(Diagnostic::error(
                kinds::DUPLICATE_NAME,
                loc,
                format!("type name {id} conflicts with a base type name"),
            )),
        }
    }

    /// Register a struct type. An identical redefinition is accepted.
    pub fn add_struct_type(&mut self, st: Arc<StructType>) -> Result<(), Diagnostic> {
        match self.base.get(&st.id).map(|t| t.as_ref()) {
            None => {
                self.locs.insert(st.id.clone(), st.loc.clone());
                self.base.insert(st.id.clone(), Arc::new(Type::Struct(st)));
                Ok(())
            }
            Some(Type::UserFile(_)) => {
                let prev = self.locs.get(&st.id).cloned().unwrap_or_default();
                Err(Diagnostic::error(
                    kinds::DUPLICATE_NAME,
                    &st.loc,
                    format!(
                        "struct name {} conflicts with previously declared file type",
                        st.id
                    ),
                )
                .with_related(prev, "Previous declaration"))
            }
            Some(Type::Struct(prev)) => Type::Struct(prev.clone())
                .check_equal(&Type::Struct(st.clone()))
                .map_err(|e| {
                    Diagnostic::error(
                        kinds::DUPLICATE_NAME,
                        &st.loc,
                        format!(
                            "{} name conflicts with previously declared struct type: {}",
                            st.id, e
                        ),
                    )
                    .with_related(prev.loc.clone(), "Previous declaration")
                }),
            Some(_) => Err(Diagnostic::error(
                kinds::DUPLICATE_NAME,
                &st.loc,
                format!("type name {} conflicts with a base type", st.id),
            )),
        }
    }

    /// Whether `name` is a registered scalar type.
    pub fn contains(&self, name: &str) -> bool {
        self.base.contains_key(name)
    }

    /// The registered struct named `name`.
    pub fn get_struct(&self, name: &str) -> Option<Arc<StructType>> {
        match self.base.get(name)?.as_ref() {
            Type::Struct(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Convert into an immutable snapshot. Wrapper types built so far are
    /// kept; later misses are built without caching.
    pub fn freeze(self) -> TypeTable {
        TypeTable {
            base: self.base.into_iter().collect(),
            wrappers: self.cache.into_inner(),
        }
    }
}

impl TypeLookup for TypeRegistry {
    fn get(&self, id: &TypeId) -> Option<Arc<Type>> {
        if id.is_scalar() {
            return self.base.get(&id.tname).cloned();
        }
        if let Some(t) = self.cache.borrow().get(id) {
            return Some(t.clone());
        }
        let t = Arc::new(build_wrapper(self, id)?);
        self.cache.borrow_mut().insert(id.clone(), t.clone());
        Some(t)
    }
}

// ── Frozen snapshot ──────────────────────────────────────────────────────

/// The read-only type table of a compiled program.
#[derive(Debug, Clone)]
pub struct TypeTable {
    base: BTreeMap<String, Arc<Type>>,
    wrappers: HashMap<TypeId, Arc<Type>>,
}

impl TypeTable {
    /// Named types in name order.
    pub fn named(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.base.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

impl TypeLookup for TypeTable {
    fn get(&self, id: &TypeId) -> Option<Arc<Type>> {
        if id.is_scalar() {
            return self.base.get(&id.tname).cloned();
        }
        if let Some(t) = self.wrappers.get(id) {
            return Some(t.clone());
        }
        build_wrapper(self, id).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileKind, StructMember};

    fn strukt(id: &str, fields: &[(&str, &str)]) -> Arc<StructType> {
        let members = fields
            .iter()
            .map(|(id, t)| StructMember {
                id: id.to_string(),
                tname: t.parse().unwrap(),
                help: None,
                out_name: None,
            })
            .collect();
        Arc::new(StructType::new(id, members, FileKind::NotFile, SourceLoc::at_line(1)))
    }

    #[test]
    fn builtins_present() {
        let reg = TypeRegistry::new();
        for name in ["string", "int", "float", "bool", "path", "file", "map"] {
            assert!(reg.get(&TypeId::scalar(name)).is_some(), "{name}");
        }
        assert!(reg.get(&TypeId::scalar("txt")).is_none());
    }

    #[test]
    fn wrappers_built_and_cached() {
        let reg = TypeRegistry::new();
        let id = TypeId::new("int", 2, 2);
        let t = reg.get(&id).unwrap();
        assert_eq!(t.id(), id);
        let Type::Array { elem, dim } = t.as_ref() else {
            panic!("expected array, got {t:?}");
        };
        assert_eq!(*dim, 2);
        assert_eq!(elem.id().to_string(), "map<int[]>");
        let again = reg.get(&id).unwrap();
        assert!(Arc::ptr_eq(&t, &again));
    }

    #[test]
    fn map_of_map_rejected() {
        let reg = TypeRegistry::new();
        assert!(reg.get(&TypeId::new("map", 0, 1)).is_none());
        assert!(reg.get(&TypeId::new("map", 1, 0)).is_some());
    }

    #[test]
    fn user_type_conflicts() {
        let mut reg = TypeRegistry::new();
        assert!(reg.add_user_type("txt", &SourceLoc::at_line(1)).is_ok());
        assert!(reg.add_user_type("txt", &SourceLoc::at_line(2)).is_ok());
        let err = reg.add_user_type("int", &SourceLoc::at_line(3)).unwrap_err();
        assert_eq!(err.message, "type name int conflicts with a base type name");
        reg.add_struct_type(strukt("S", &[("a", "int")])).unwrap();
        let err = reg.add_user_type("S", &SourceLoc::at_line(4)).unwrap_err();
        assert_eq!(err.kind, kinds::DUPLICATE_NAME);
    }

    #[test]
    fn struct_redefinition() {
        let mut reg = TypeRegistry::new();
        reg.add_struct_type(strukt("S", &[("a", "int")])).unwrap();
        assert!(reg.add_struct_type(strukt("S", &[("a", "int")])).is_ok());
        let err = reg
            .add_struct_type(strukt("S", &[("a", "float")]))
            .unwrap_err();
        assert_eq!(
            err.message,
            "S name conflicts with previously declared struct type: field a: differing types"
        );
    }

    #[test]
    fn frozen_table_builds_uncached() {
        let mut reg = TypeRegistry::new();
        reg.add_user_type("bam", &SourceLoc::at_line(1)).unwrap();
        let table = reg.freeze();
        let a = table.get(&TypeId::new("bam", 1, 0)).unwrap();
        let b = table.get(&TypeId::new("bam", 1, 0)).unwrap();
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a, &b));
        fn assert_sync<T: Send + Sync>(_: &T) {}
        assert_sync(&table);
    }
}
