//! The type algebra (§3, §4.1 of the specification).
//!
//! A [`Type`] is a value shape: it knows nothing about native code emission
//! or binary serialization (that is the code generator's and the runtime
//! reader's job, in `qit-compiler` and `qit-runtime` respectively) — here we
//! only track shape, field names, and the host-side value representation
//! used to type-check [`crate::expr::Expr::value`] payloads.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{AstError, AstResult};
use crate::expr::Expr;

/// A host-side value of some [`Type`], used to type-check `Value` expression
/// nodes and to build native literals from them.
///
/// Mirrors the recursive shape of [`Type`] itself: a `Record`/`Sequence`
/// payload is a nested list of `HostValue`s built by
/// [`Type::checked_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Int(i32),
    Bool(bool),
    Record(Vec<HostValue>),
    Sequence(Vec<HostValue>),
}

/// Whether a record type was introduced via `Product(...)` or `Struct(...)`.
///
/// The two constructors produce an identically-shaped native class; the
/// only observable difference is the auto-name prefix used when the type is
/// left unnamed (§4.1, §9 "Mapping identity").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Product,
    Struct,
}

impl RecordKind {
    pub fn autoname_prefix(self) -> &'static str {
        match self {
            RecordKind::Product => "Product",
            RecordKind::Struct => "Struct",
        }
    }
}

/// A product/struct record: a positional, named-field tuple.
///
/// `KeyValue(K, V)` is the two-field specialization used by [`Type::mapping`]
/// ("key", "value"); [`RecordType::is_key_value`] flags it so the
/// `key`/`value`/`min`/`max` helper functions in [`crate::function::key_value`]
/// know they may assume exactly two fields.
#[derive(Debug)]
pub struct RecordType {
    pub kind: RecordKind,
    pub fields: Vec<(Type, String)>,
    pub is_key_value: bool,
    name: RefCell<Option<String>>,
}

impl RecordType {
    pub fn field_types(&self) -> impl Iterator<Item = &Type> {
        self.fields.iter().map(|(t, _)| t)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, n)| n.as_str())
    }

    /// The user-assigned name, if any. Auto-names are assigned by the code
    /// generator on first emission (§3 "Auto-naming is stable"), not here.
    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }
}

/// Structural equality: two records are equal iff their field names and
/// field types (recursively) match (§4.1). The overall type name and
/// `is_key_value`/`kind` bookkeeping are not part of the key.
impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}
impl Eq for RecordType {}

impl std::hash::Hash for RecordType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for (ty, name) in &self.fields {
            ty.hash(state);
            name.hash(state);
        }
    }
}

/// `Sequence(element, length)`. `length` is only meaningful for
/// `.generate()` (§9 "the length is part of the type"); sequences built
/// purely as the flattened encoding of a `Mapping` carry `length = None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceType {
    pub element: Type,
    pub length: Option<ExprKey>,
}

/// `Values(T, [v1, ..])`: a finite enumerated set, possibly with free
/// variables captured inside the value expressions.
#[derive(Debug)]
pub struct ValuesType {
    pub element: Type,
    pub values: Vec<Expr>,
    name: RefCell<Option<String>>,
}

impl ValuesType {
    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }
}

/// A hashable/comparable proxy for an `Expr` used only where a `Type` needs
/// to participate in `PartialEq`/`Hash` (e.g. `Range(n)`'s count, or a
/// `Sequence`'s length). Two `Range`s are the same type iff they share the
/// *same* count expression node (reference identity for variables/calls,
/// structural identity for literals) — this mirrors that expression
/// equality is otherwise unspecified by the source and keeps `Type`
/// equality decidable without re-deriving full expression equality.
#[derive(Debug, Clone)]
pub struct ExprKey(pub Expr);

impl PartialEq for ExprKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.identity_eq(&other.0)
    }
}
impl Eq for ExprKey {}
impl std::hash::Hash for ExprKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.identity_hash(state);
    }
}

/// The type algebra: primitive, product/struct, sequence, mapping, and
/// finite-enumeration shapes (§3).
#[derive(Debug, Clone)]
pub enum Type {
    Int,
    Bool,
    /// `Range(n)`: integers `[0, n)`. `n` may itself be an expression.
    Range(Box<ExprKey>),
    Record(Rc<RecordType>),
    Sequence(Rc<SequenceType>),
    Values(Rc<ValuesType>),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Int, Type::Int) | (Type::Bool, Type::Bool) => true,
            (Type::Range(a), Type::Range(b)) => a == b,
            (Type::Record(a), Type::Record(b)) => Rc::ptr_eq(a, b) || a == b,
            (Type::Sequence(a), Type::Sequence(b)) => Rc::ptr_eq(a, b) || a == b,
            (Type::Values(a), Type::Values(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for Type {}

impl std::hash::Hash for Type {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Type::Int | Type::Bool => {}
            Type::Range(n) => n.hash(state),
            Type::Record(r) => r.hash(state),
            Type::Sequence(s) => s.hash(state),
            Type::Values(v) => (Rc::as_ptr(v) as usize).hash(state),
        }
    }
}

impl Type {
    pub fn int() -> Type {
        Type::Int
    }

    pub fn boolean() -> Type {
        Type::Bool
    }

    pub fn range(n: impl Into<Expr>) -> Type {
        Type::Range(Box::new(ExprKey(n.into())))
    }

    /// Builds a `Product`/`Struct` record type. Field names default to
    /// `v0, v1, ...` the way the Python original does for bare type
    /// arguments (`Struct(Int(), Int())`).
    pub fn record(
        kind: RecordKind,
        fields: Vec<(Type, Option<String>)>,
    ) -> AstResult<Type> {
        let mut names = Vec::with_capacity(fields.len());
        let mut seen = rustc_hash::FxHashSet::default();
        for (i, (_, name)) in fields.iter().enumerate() {
            let name = name.clone().unwrap_or_else(|| format!("v{i}"));
            if !seen.insert(name.clone()) {
                return Err(AstError::DuplicateField(name));
            }
            names.push(name);
        }
        let fields = fields
            .into_iter()
            .zip(names)
            .map(|((ty, _), name)| (ty, name))
            .collect();
        Ok(Type::Record(Rc::new(RecordType {
            kind,
            fields,
            is_key_value: false,
            name: RefCell::new(None),
        })))
    }

    pub fn product(fields: Vec<(Type, Option<String>)>) -> AstResult<Type> {
        Self::record(RecordKind::Product, fields)
    }

    pub fn strct(fields: Vec<(Type, Option<String>)>) -> AstResult<Type> {
        Self::record(RecordKind::Struct, fields)
    }

    /// `KeyValue(K, V)`: a two-field struct with fields named `key`/`value`.
    pub fn key_value(key: Type, value: Type) -> Type {
        Type::Record(Rc::new(RecordType {
            kind: RecordKind::Struct,
            fields: vec![(key, "key".to_string()), (value, "value".to_string())],
            is_key_value: true,
            name: RefCell::new(None),
        }))
    }

    pub fn sequence(element: Type, length: Option<Expr>) -> Type {
        Type::Sequence(Rc::new(SequenceType {
            element,
            length: length.map(ExprKey),
        }))
    }

    /// `Mapping(K, V)`, modeled as `Sequence(KeyValue(K, V))` with the
    /// convention that producers keep keys unique and in insertion order
    /// (§3, §9 "Mapping identity" — not enforced by the type).
    pub fn mapping(key: Type, value: Type) -> Type {
        Type::sequence(Type::key_value(key, value), None)
    }

    pub fn values(element: Type, values: Vec<Expr>) -> AstResult<Type> {
        if values.is_empty() {
            // §9 "Empty Values sets": reject at construction instead of
            // emitting a runtime-asserting `default` branch.
            return Err(AstError::EmptyValueSet);
        }
        Ok(Type::Values(Rc::new(ValuesType {
            element,
            values,
            name: RefCell::new(None),
        })))
    }

    /// Assigns a user-facing name, if the type supports one (records and
    /// `Values`). No-op for primitives, `Range`, and `Sequence`.
    pub fn with_name(self, name: impl Into<String>) -> Type {
        match &self {
            Type::Record(r) => *r.name.borrow_mut() = Some(name.into()),
            Type::Values(v) => *v.name.borrow_mut() = Some(name.into()),
            _ => {}
        }
        self
    }

    pub fn user_name(&self) -> Option<String> {
        match self {
            Type::Record(r) => r.name(),
            Type::Values(v) => v.name(),
            _ => None,
        }
    }

    /// Type-checks and converts a host payload into a [`HostValue`],
    /// recursively for composite types (§3 Invariants).
    pub fn checked_value(&self, payload: HostPayload) -> AstResult<HostValue> {
        match (self, payload) {
            (Type::Int, HostPayload::Int(i)) => Ok(HostValue::Int(i)),
            (Type::Bool, HostPayload::Bool(b)) => Ok(HostValue::Bool(b)),
            (Type::Range(_), HostPayload::Int(i)) => Ok(HostValue::Int(i)),
            (Type::Record(r), HostPayload::Tuple(items)) => {
                if items.len() != r.fields.len() {
                    return Err(AstError::TypeMismatch(format!(
                        "expected {} fields, got {}",
                        r.fields.len(),
                        items.len()
                    )));
                }
                let mut out = Vec::with_capacity(items.len());
                for ((field_ty, _), item) in r.fields.iter().zip(items) {
                    out.push(field_ty.checked_value(item)?);
                }
                Ok(HostValue::Record(out))
            }
            (Type::Sequence(s), HostPayload::List(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(s.element.checked_value(item)?);
                }
                Ok(HostValue::Sequence(out))
            }
            (ty, payload) => Err(AstError::TypeMismatch(format!(
                "value {payload:?} is not an instance of {ty:?}"
            ))),
        }
    }
}

/// The untyped host payload passed to [`Type::checked_value`] /
/// `Expr::value`, before it has been checked against a declared [`Type`].
#[derive(Debug, Clone)]
pub enum HostPayload {
    Int(i32),
    Bool(bool),
    Tuple(Vec<HostPayload>),
    List(Vec<HostPayload>),
}

impl From<i32> for HostPayload {
    fn from(v: i32) -> Self {
        HostPayload::Int(v)
    }
}
impl From<bool> for HostPayload {
    fn from(v: bool) -> Self {
        HostPayload::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_mul_matches_field_for_field_struct() {
        let a = Type::strct(vec![(Type::Int, None), (Type::Int, None)]).unwrap();
        let b = Type::product(vec![(Type::Int, None), (Type::Int, None)]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let err = Type::strct(vec![
            (Type::Int, Some("x".to_string())),
            (Type::Bool, Some("x".to_string())),
        ])
        .unwrap_err();
        assert_eq!(err, AstError::DuplicateField("x".to_string()));
    }

    #[test]
    fn default_field_names_are_v0_v1() {
        let ty = Type::strct(vec![(Type::Int, None), (Type::Bool, None)]).unwrap();
        match ty {
            Type::Record(r) => {
                let names: Vec<_> = r.field_names().collect();
                assert_eq!(names, vec!["v0", "v1"]);
            }
            _ => panic!("expected a record type"),
        }
    }

    #[test]
    fn empty_values_set_is_rejected() {
        let err = Type::values(Type::Int, Vec::new()).unwrap_err();
        assert_eq!(err, AstError::EmptyValueSet);
    }

    #[test]
    fn checked_value_rejects_wrong_arity() {
        let ty = Type::strct(vec![(Type::Int, None), (Type::Int, None)]).unwrap();
        let err = ty.checked_value(HostPayload::Tuple(vec![HostPayload::Int(1)])).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn checked_value_builds_nested_record() {
        let ty = Type::key_value(Type::Int, Type::Bool);
        let value = ty
            .checked_value(HostPayload::Tuple(vec![
                HostPayload::Int(7),
                HostPayload::Bool(true),
            ]))
            .unwrap();
        assert_eq!(
            value,
            HostValue::Record(vec![HostValue::Int(7), HostValue::Bool(true)])
        );
    }
}
