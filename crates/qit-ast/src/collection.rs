//! Collection pipelines: `iterate`/`generate` sources and the
//! `take`/`sort`/`map`/`filter` transformations layered on top of them
//! (§4.2, §4.5, §4.6).

use std::rc::Rc;

use crate::error::{AstError, AstResult};
use crate::expr::{Expr, VariableNode};
use crate::function::Function;
use crate::system::ActionSystem;
use crate::types::{RecordKind, Type};

/// Whether a collection enumerates its elements exhaustively and in a
/// deterministic order (`Iterate`) or draws them at random, with
/// replacement, forever (`Generate`) — §4.2.
///
/// `map`/`filter` preserve the parent's mode (confirmed by the original's
/// `p.generate().map(f).take(4)`); `sort` only accepts an `Iterate`
/// collection; `take` always yields `Iterate` (a `Generate` parent is
/// wrapped in a bounding adapter first, §9 Open Question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Iterate,
    Generate,
}

/// A collection pipeline: an element [`Type`], a [`Mode`], and the
/// [`Node`] that produces it. Cheaply cloned (`Rc`-backed); two clones of
/// the same pipeline share one declaration in the generated code (§3).
#[derive(Debug, Clone)]
pub struct Collection {
    pub mode: Mode,
    pub element_type: Type,
    pub node: Rc<Node>,
}

#[derive(Debug)]
pub enum Node {
    /// `Range(n).iterate()` / `.generate()`.
    Range { count: Expr },
    /// `Values(T, [...]).iterate()` / `.generate()`. `ty` is always
    /// `Type::Values`.
    Values { ty: Type },
    /// `Product(...)` / `Struct(...)` built from sub-collections sharing
    /// `mode` (the odometer/independent-draw construction, §4.2).
    Record {
        kind: RecordKind,
        fields: Vec<Collection>,
    },
    /// `Sequence(element, length)`: `length` repeated draws from `element`
    /// packed into a `std::vector` (§4.2, §9).
    Sequence { element: Box<Collection>, length: Expr },
    /// `.take(n)`: always yields `Iterate`; if `parent.mode == Generate`
    /// the code generator wraps it in a bounding adapter first (§9).
    Take { parent: Box<Collection>, count: Expr },
    /// `.sort()`: requires `parent.mode == Iterate` (§4.6).
    Sort { parent: Box<Collection> },
    Map { parent: Box<Collection>, function: Function, output_type: Type },
    Filter { parent: Box<Collection>, function: Function },
    /// The bounded-reachability search over an [`ActionSystem`] (§4.7).
    System { system: Rc<ActionSystem>, depth_bound: Expr },
}

impl Collection {
    fn new(mode: Mode, element_type: Type, node: Node) -> Collection {
        Collection {
            mode,
            element_type,
            node: Rc::new(node),
        }
    }

    pub fn element_type(&self) -> Type {
        self.element_type.clone()
    }

    /// `Range(n).iterate()`: yields `0, 1, ..., n - 1` in order.
    pub fn range_iterate(count: impl Into<Expr>) -> Collection {
        Collection::new(Mode::Iterate, Type::Int, Node::Range { count: count.into() })
    }

    /// `Range(n).generate()`: yields a uniform random value in `[0, n)`
    /// on every draw, forever.
    pub fn range_generate(count: impl Into<Expr>) -> Collection {
        Collection::new(Mode::Generate, Type::Int, Node::Range { count: count.into() })
    }

    fn values_of(ty: &Type) -> AstResult<Type> {
        match ty {
            Type::Values(_) => Ok(ty.clone()),
            _ => Err(AstError::TypeMismatch(format!(
                "expected a Values type, got {ty:?}"
            ))),
        }
    }

    pub fn values_iterate(ty: Type) -> AstResult<Collection> {
        let values_ty = Self::values_of(&ty)?;
        let element = match &values_ty {
            Type::Values(v) => v.element.clone(),
            _ => unreachable!(),
        };
        Ok(Collection::new(Mode::Iterate, element, Node::Values { ty: values_ty }))
    }

    pub fn values_generate(ty: Type) -> AstResult<Collection> {
        let values_ty = Self::values_of(&ty)?;
        let element = match &values_ty {
            Type::Values(v) => v.element.clone(),
            _ => unreachable!(),
        };
        Ok(Collection::new(Mode::Generate, element, Node::Values { ty: values_ty }))
    }

    /// `Product(c0, c1, ...)` / `Struct(...)`: builds the cartesian-product
    /// (if `Iterate`) or independent-draw (if `Generate`) combination of
    /// same-mode child collections (§4.2). Field names follow
    /// [`Type::record`]'s `v0, v1, ...` default.
    pub fn record(
        kind: RecordKind,
        fields: Vec<(Collection, Option<String>)>,
    ) -> AstResult<Collection> {
        if fields.is_empty() {
            return Err(AstError::TypeMismatch(
                "a record needs at least one field".to_string(),
            ));
        }
        let mode = fields[0].0.mode;
        for (c, _) in &fields {
            if c.mode != mode {
                return Err(AstError::TypeMismatch(
                    "all fields of a Product/Struct must share one mode (Iterate xor Generate)"
                        .to_string(),
                ));
            }
        }
        let field_types = fields
            .iter()
            .map(|(c, name)| (c.element_type(), name.clone()))
            .collect();
        let ty = Type::record(kind, field_types)?;
        let fields = fields.into_iter().map(|(c, _)| c).collect();
        Ok(Collection::new(mode, ty, Node::Record { kind, fields }))
    }

    /// `Sequence(element, length).generate()`: `length` independent draws
    /// from `element` (§9 "Sequence generation"). The Python original
    /// requires `length` whenever a `Sequence` is built directly as a
    /// generator (rather than via `Mapping`'s flattening), which this
    /// constructor enforces by taking `length` as a required argument.
    pub fn sequence_generate(element: Collection, length: impl Into<Expr>) -> AstResult<Collection> {
        if element.mode != Mode::Generate {
            return Err(AstError::TypeMismatch(
                "Sequence(..).generate() requires a Generate element collection".to_string(),
            ));
        }
        let length = length.into();
        let seq_ty = Type::sequence(element.element_type(), Some(length.clone()));
        Ok(Collection::new(
            Mode::Generate,
            seq_ty,
            Node::Sequence { element: Box::new(element), length },
        ))
    }

    /// `Sequence(element, length).iterate()`: one emission packing `length`
    /// successive draws from an `Iterate` element collection into a
    /// vector, then end (`qit::SequenceIterator`, §6).
    pub fn sequence_iterate(element: Collection, length: impl Into<Expr>) -> AstResult<Collection> {
        if element.mode != Mode::Iterate {
            return Err(AstError::TypeMismatch(
                "Sequence(..).iterate() requires an Iterate element collection".to_string(),
            ));
        }
        let length = length.into();
        let seq_ty = Type::sequence(element.element_type(), Some(length.clone()));
        Ok(Collection::new(
            Mode::Iterate,
            seq_ty,
            Node::Sequence { element: Box::new(element), length },
        ))
    }

    /// `.take(n)`: bounds an `Iterate` collection to at most `n` elements,
    /// or a `Generate` collection to exactly `n` draws — either way the
    /// result is `Iterate` (§4.6, confirmed by `Range(10).iterate().take(20)`
    /// clamping to the shorter length with no error).
    pub fn take(self, count: impl Into<Expr>) -> Collection {
        let element_type = self.element_type();
        Collection::new(
            Mode::Iterate,
            element_type,
            Node::Take { parent: Box::new(self), count: count.into() },
        )
    }

    /// `.sort()`: requires an `Iterate` parent (§4.6); callers sort a
    /// `Generate` pipeline by `take`-ing it first, matching every example
    /// in the original's test suite.
    pub fn sort(self) -> AstResult<Collection> {
        if self.mode != Mode::Iterate {
            return Err(AstError::TypeMismatch(
                "sort() requires an Iterate collection; call take() first".to_string(),
            ));
        }
        let element_type = self.element_type();
        Ok(Collection::new(Mode::Iterate, element_type, Node::Sort { parent: Box::new(self) }))
    }

    /// `.map(f)`: applies to either mode, preserving it (confirmed by
    /// `p.generate().map(f).take(4)` in the original test suite).
    pub fn map(self, function: Function) -> AstResult<Collection> {
        if function.0.params.len() != 1 {
            return Err(AstError::TypeMismatch(
                "map() requires a single-parameter function".to_string(),
            ));
        }
        if function.0.params[0].1 != self.element_type() {
            return Err(AstError::TypeMismatch(format!(
                "map() function parameter type {:?} does not match element type {:?}",
                function.0.params[0].1,
                self.element_type()
            )));
        }
        let mode = self.mode;
        let output_type = function.return_type();
        Ok(Collection::new(
            mode,
            output_type.clone(),
            Node::Map { parent: Box::new(self), function, output_type },
        ))
    }

    /// `.filter(f)`: `f` must return `Bool`; preserves mode.
    pub fn filter(self, function: Function) -> AstResult<Collection> {
        if function.0.params.len() != 1 {
            return Err(AstError::TypeMismatch(
                "filter() requires a single-parameter function".to_string(),
            ));
        }
        if function.0.params[0].1 != self.element_type() {
            return Err(AstError::TypeMismatch(
                "filter() function parameter type does not match element type".to_string(),
            ));
        }
        if function.return_type() != Type::Bool {
            return Err(AstError::TypeMismatch(
                "filter() function must return Bool".to_string(),
            ));
        }
        let mode = self.mode;
        let element_type = self.element_type();
        Ok(Collection::new(mode, element_type, Node::Filter { parent: Box::new(self), function }))
    }

    /// Wraps this collection as a [`Function`] body (`make_function`,
    /// §4.3): `single_valued = true` asserts exactly one element is ever
    /// produced (used for a deterministic per-state child), `false`
    /// collects every element into a `std::vector` parameter value.
    pub fn make_function(self, params: Vec<(String, Type)>, single_valued: bool) -> Function {
        Function::from_collection(params, self, single_valued)
    }

    /// The bounded-depth action-system reachability search (§4.7).
    pub fn system_states(system: ActionSystem, depth_bound: impl Into<Expr>) -> Collection {
        let element_type = system.state_type();
        Collection::new(
            Mode::Iterate,
            element_type,
            Node::System { system: Rc::new(system), depth_bound: depth_bound.into() },
        )
    }

    /// Free variables reachable through this pipeline's node graph
    /// (expression-level captures, plus variables captured by any `map`/
    /// `filter`/`Record` field's function — §4.4).
    pub fn free_variables(&self, out: &mut Vec<Rc<VariableNode>>) {
        match self.node.as_ref() {
            Node::Range { count } => count.free_variables(out),
            Node::Values { ty } => {
                if let Type::Values(v) = ty {
                    for value in &v.values {
                        value.free_variables(out);
                    }
                }
            }
            Node::Record { fields, .. } => {
                for field in fields {
                    field.free_variables(out);
                }
            }
            Node::Sequence { element, length } => {
                element.free_variables(out);
                length.free_variables(out);
            }
            Node::Take { parent, count } => {
                parent.free_variables(out);
                count.free_variables(out);
            }
            Node::Sort { parent } => parent.free_variables(out),
            Node::Map { parent, function, .. } | Node::Filter { parent, function } => {
                parent.free_variables(out);
                for capture in &function.0.captures {
                    if !out.iter().any(|seen| Rc::ptr_eq(seen, capture)) {
                        out.push(capture.clone());
                    }
                }
            }
            Node::System { system, depth_bound } => {
                system.free_variables(out);
                depth_bound.free_variables(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn take_beyond_length_still_type_checks_as_iterate() {
        let c = Collection::range_iterate(10).take(20);
        assert_eq!(c.mode, Mode::Iterate);
        assert_eq!(c.element_type(), Type::Int);
    }

    #[test]
    fn sort_requires_an_iterate_parent() {
        let err = Collection::range_generate(10).sort().unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn sort_after_take_on_a_generator_succeeds() {
        let c = Collection::range_generate(10).take(5).sort();
        assert!(c.is_ok());
    }

    #[test]
    fn map_preserves_generate_mode() {
        let identity = Function::new(
            vec![("x".to_string(), Type::Int)],
            Type::Int,
            crate::function::FunctionBody::InlineCode("return x;".to_string()),
            Vec::new(),
        );
        let c = Collection::range_generate(10).map(identity).unwrap();
        assert_eq!(c.mode, Mode::Generate);
    }

    #[test]
    fn map_rejects_wrong_parameter_count() {
        let two_params = Function::inline("a", "b", Type::Int, Type::Int, "return a + b;");
        let err = Collection::range_iterate(10).map(two_params).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn filter_requires_bool_return_type() {
        let not_bool = Function::new(
            vec![("x".to_string(), Type::Int)],
            Type::Int,
            crate::function::FunctionBody::InlineCode("return x;".to_string()),
            Vec::new(),
        );
        let err = Collection::range_iterate(10).filter(not_bool).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn record_rejects_mixed_modes() {
        let fields = vec![
            (Collection::range_iterate(10), None),
            (Collection::range_generate(3), None),
        ];
        let err = Collection::record(RecordKind::Product, fields).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn record_of_iterators_is_an_iterator() {
        let fields = vec![
            (Collection::range_iterate(10), None),
            (Collection::range_iterate(3), None),
        ];
        let c = Collection::record(RecordKind::Product, fields).unwrap();
        assert_eq!(c.mode, Mode::Iterate);
    }

    #[test]
    fn sequence_generate_requires_a_generate_element() {
        let err = Collection::sequence_generate(Collection::range_iterate(10), 5).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn sequence_iterate_requires_an_iterate_element() {
        let err = Collection::sequence_iterate(Collection::range_generate(10), 5).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn free_variables_propagate_through_take_and_map() {
        let x = Expr::variable("x", Type::Int);
        let base = Collection::range_iterate(x);
        let identity = Function::new(
            vec![("v".to_string(), Type::Int)],
            Type::Int,
            crate::function::FunctionBody::InlineCode("return v;".to_string()),
            Vec::new(),
        );
        let c = base.take(5).map(identity).unwrap();
        let mut vars = Vec::new();
        c.free_variables(&mut vars);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "x");
    }
}
