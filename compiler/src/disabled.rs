// disabled.rs — Conditionally null values
//
// The `disabled` modifier makes every output of a call null when its
// condition holds. `make_disabled` combines a condition with a value,
// folding conditions known at compile time; `specialize_pipeline` rewrites
// every reference to the output of a disabled call into such a value.
//
// Preconditions: bindings and modifiers are compiled; `calls` is in
//   dependency order.
// Postconditions: no binding or return refers directly to the output of a
//   call with a disable condition.
// Failure modes: a condition that may itself be null, or that is not a
//   boolean-shaped expression, yields a `TypeMismatchError`.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};

use crate::ast::*;
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::types::TypeError;

/// A value that is null when `cond` is true and `inner` otherwise.
pub fn make_disabled(cond: &Exp, inner: Exp) -> Result<Exp, TypeError> {
    if matches!(inner.kind, ExpKind::Null) {
        return Ok(inner);
    }
    match &cond.kind {
        ExpKind::Bool(true) => Ok(Exp::null(inner.loc)),
        ExpKind::Bool(false) => Ok(inner),
        ExpKind::Ref(r) => {
            if let ExpKind::Disabled(d) = &inner.kind {
                return match &d.disabled.kind {
                    ExpKind::Ref(existing) if existing == r => Ok(inner),
                    _ => Err(may_be_null()),
                };
            }
            Ok(wrap(cond, inner))
        }
        ExpKind::Disabled(_) => Err(may_be_null()),
        ExpKind::Split(split) => make_disabled_split(cond, split, inner),
        _ => Err(TypeError::new(format!(
            "disabled modifier cannot be bound to an expression of type {}",
            cond.kind_name()
        ))),
    }
}

fn may_be_null() -> TypeError {
    TypeError::new("disabled modifier cannot be bound to a value that may be null")
}

fn wrap(cond: &Exp, inner: Exp) -> Exp {
    let loc = inner.loc.clone();
    Exp::new(
        ExpKind::Disabled(Box::new(DisabledExp {
            disabled: cond.clone(),
            value: inner,
        })),
        loc,
    )
}

/// A split condition disables each fan-out element separately. Elements
/// that all agree collapse to a single condition.
fn make_disabled_split(cond: &Exp, split: &SplitExp, inner: Exp) -> Result<Exp, TypeError> {
    let distributed = match &split.value.kind {
        ExpKind::Null => return Ok(Exp::null(inner.loc)),
        ExpKind::Array(items) => {
            let Some(first) = items.first() else {
                return Ok(Exp::null(inner.loc));
            };
            if items.iter().all(|e| e.same_value(first)) {
                return make_disabled(first, inner);
            }
            let arr = items
                .iter()
                .map(|e| make_disabled(e, inner.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            ExpKind::Array(arr)
        }
        ExpKind::Map(kind, entries) => {
            let Some(first) = entries.values().next() else {
                return Ok(Exp::null(inner.loc));
            };
            if entries.values().all(|e| e.same_value(first)) {
                return make_disabled(first, inner);
            }
            let mut out = BTreeMap::new();
            for (k, e) in entries {
                out.insert(k.clone(), make_disabled(e, inner.clone())?);
            }
            ExpKind::Map(*kind, out)
        }
        // Known only at run time.
        _ => return Ok(wrap(cond, inner)),
    };
    Ok(Exp::new(
        ExpKind::Split(Box::new(SplitExp {
            value: Exp::new(distributed, split.value.loc.clone()),
            source: split.source.clone(),
        })),
        cond.loc.clone(),
    ))
}

// ── Specialization ──────────────────────────────────────────────────────────

/// Replace references to the outputs of disabled calls in `exp`.
fn specialize_exp(exp: Exp, conds: &HashMap<String, Exp>) -> Result<Exp, TypeError> {
    let Exp { kind, loc } = exp;
    let kind = match kind {
        ExpKind::Ref(r) => {
            let cond = match r.kind {
                RefKind::Call => conds.get(&r.id),
                RefKind::SelfRef => None,
            };
            let exp = Exp::new(ExpKind::Ref(r), loc);
            return match cond {
                Some(cond) => make_disabled(cond, exp),
                None => Ok(exp),
            };
        }
        ExpKind::Array(items) => ExpKind::Array(
            items
                .into_iter()
                .map(|e| specialize_exp(e, conds))
                .collect::<Result<_, _>>()?,
        ),
        ExpKind::Map(k, entries) => {
            let mut out = BTreeMap::new();
            for (key, e) in entries {
                out.insert(key, specialize_exp(e, conds)?);
            }
            ExpKind::Map(k, out)
        }
        ExpKind::Split(mut s) => {
            s.value = specialize_exp(s.value, conds)?;
            ExpKind::Split(s)
        }
        ExpKind::Disabled(d) => {
            let DisabledExp { disabled, value } = *d;
            let disabled = specialize_exp(disabled, conds)?;
            let value = specialize_exp(value, conds)?;
            return make_disabled(&disabled, value);
        }
        other => other,
    };
    Ok(Exp::new(kind, loc))
}

fn specialize_bindings(
    bindings: &mut BindStms,
    conds: &HashMap<String, Exp>,
    context: &str,
    errs: &mut Diagnostics,
) {
    for b in bindings.list.iter_mut() {
        match specialize_exp(b.exp.clone(), conds) {
            Ok(e) => b.exp = e,
            Err(e) => {
                errs.push(Diagnostic::error(
                    kinds::TYPE_MISMATCH,
                    &b.loc,
                    TypeError::wrap(format!("{context} parameter '{}'", b.id), e).to_string(),
                ));
            }
        }
    }
}

/// Propagate the disable conditions of `pipeline`'s calls into every
/// binding and return value that reads their outputs.
pub fn specialize_pipeline(pipeline: &mut Pipeline) -> Diagnostics {
    let mut errs = Diagnostics::new();
    let mut conds: HashMap<String, Exp> = HashMap::new();
    for call in pipeline.calls.iter_mut() {
        let context = format!("call {}", call.id);
        specialize_bindings(&mut call.bindings, &conds, &context, &mut errs);
        if let Some(cond) = call.disabled.take() {
            match specialize_exp(cond.clone(), &conds) {
                Ok(c) => {
                    conds.insert(call.id.clone(), c.clone());
                    call.disabled = Some(c);
                }
                Err(e) => {
                    errs.push(Diagnostic::error(
                        kinds::TYPE_MISMATCH,
                        &cond.loc,
                        TypeError::wrap(format!("disabled condition of call {}", call.id), e)
                            .to_string(),
                    ));
                    call.disabled = Some(cond);
                }
            }
        }
    }
    let context = format!("pipeline {} return", pipeline.id);
    specialize_bindings(&mut pipeline.ret.bindings, &conds, &context, &mut errs);
    errs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc::at_line(1)
    }

    fn r(id: &str, out: &str) -> Exp {
        Exp::reference(RefExp::call(id, out), loc())
    }

    fn b(v: bool) -> Exp {
        Exp::new(ExpKind::Bool(v), loc())
    }

    fn split(items: Vec<Exp>) -> Exp {
        Exp::new(
            ExpKind::Split(Box::new(SplitExp {
                value: Exp::new(ExpKind::Array(items), loc()),
                source: None,
            })),
            loc(),
        )
    }

    #[test]
    fn literal_conditions_fold() {
        let x = r("A", "out");
        assert!(matches!(make_disabled(&b(true), x.clone()).unwrap().kind, ExpKind::Null));
        assert_eq!(make_disabled(&b(false), x.clone()).unwrap(), x);
    }

    #[test]
    fn same_condition_is_idempotent() {
        let cond = r("C", "skip");
        let once = make_disabled(&cond, r("A", "out")).unwrap();
        assert!(matches!(once.kind, ExpKind::Disabled(_)));
        let twice = make_disabled(&cond, once.clone()).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn different_conditions_rejected() {
        let once = make_disabled(&r("C", "skip"), r("A", "out")).unwrap();
        let err = make_disabled(&r("D", "skip"), once).unwrap_err();
        assert_eq!(
            err.to_string(),
            "disabled modifier cannot be bound to a value that may be null"
        );
    }

    #[test]
    fn null_inner_stays_null() {
        let null = Exp::null(loc());
        assert_eq!(make_disabled(&r("C", "skip"), null.clone()).unwrap(), null);
    }

    #[test]
    fn split_conditions() {
        let x = r("A", "out");
        assert!(matches!(
            make_disabled(&split(vec![]), x.clone()).unwrap().kind,
            ExpKind::Null
        ));
        // All the same: collapses.
        assert_eq!(
            make_disabled(&split(vec![b(false), b(false)]), x.clone()).unwrap(),
            x
        );
        let mixed = make_disabled(&split(vec![b(true), b(false)]), x.clone()).unwrap();
        let ExpKind::Split(s) = &mixed.kind else {
            panic!("expected split, got {mixed}");
        };
        let ExpKind::Array(items) = &s.value.kind else {
            panic!("expected array");
        };
        assert!(matches!(items[0].kind, ExpKind::Null));
        assert_eq!(items[1], x);
    }

    #[test]
    fn bad_condition_shapes() {
        let err = make_disabled(&Exp::new(ExpKind::Int(1), loc()), r("A", "out")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "disabled modifier cannot be bound to an expression of type int"
        );
    }

    #[test]
    fn specialize_wraps_references() {
        let mut conds = HashMap::new();
        conds.insert("A".to_string(), Exp::reference(RefExp::self_ref("skip", ""), loc()));
        let exp = Exp::new(ExpKind::Array(vec![r("A", "out"), r("B", "out")]), loc());
        let out = specialize_exp(exp, &conds).unwrap();
        assert_eq!(out.to_string(), "[disabled(self.skip, A.out), B.out]");
    }
}
