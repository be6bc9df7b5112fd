//! Functions: named, reusable scalar or collection-valued bodies (§4.3).
//!
//! A [`Function`] is compared and hashed by `Rc` identity, matching the
//! Python original's default object-identity semantics — two
//! `Function::inline` calls with textually identical bodies are still two
//! distinct declarations, each emitted once under its own auto-name.

use std::rc::Rc;

use crate::collection::Collection;
use crate::expr::{Expr, VariableNode};
use crate::types::Type;

/// What a function's body is made of, mirroring the three
/// `write_function_*` cases in the original builder (§4.3, §9 "supplemented
/// features").
#[derive(Debug)]
pub enum FunctionBody {
    /// Raw C++ statement text, substituted into a generated function
    /// (`qit::Function` in the builder's vocabulary). Used for `a + b`,
    /// `power`, and similar tiny bodies.
    InlineCode(String),
    /// The function's result is produced by draining a [`Collection`] that
    /// may reference the function's parameters as free variables — either
    /// collected into a `std::vector` (multi-valued) or asserted to
    /// produce exactly one element (single-valued), per
    /// [`FunctionBody::single_valued`].
    FromCollection {
        collection: Collection,
        single_valued: bool,
    },
    /// Declared here, but defined in a host-provided file derived from
    /// `name` — the generator emits an `#include` and a thunk that forwards
    /// to the host function of the same name, rather than any body of its
    /// own (§4.3 item 3).
    External { name: String },
}

#[derive(Debug)]
pub struct FunctionData {
    pub params: Vec<(String, Type)>,
    pub return_type: Type,
    pub body: FunctionBody,
    /// Free variables captured from the enclosing scope, distinct from
    /// `params` (§4.3 "captured" vs "parameter").
    pub captures: Vec<Rc<VariableNode>>,
}

/// A named, `Rc`-identity-compared function value.
#[derive(Debug, Clone)]
pub struct Function(pub Rc<FunctionData>);

impl Function {
    pub fn new(
        params: Vec<(String, Type)>,
        return_type: Type,
        body: FunctionBody,
        captures: Vec<Rc<VariableNode>>,
    ) -> Function {
        Function(Rc::new(FunctionData {
            params,
            return_type,
            body,
            captures,
        }))
    }

    /// A two-parameter inline-code function, e.g. `a + b` (§9).
    pub fn inline(
        p0: &str,
        p1: &str,
        param_ty: Type,
        return_type: Type,
        code: impl Into<String>,
    ) -> Function {
        Function::new(
            vec![(p0.to_string(), param_ty.clone()), (p1.to_string(), param_ty)],
            return_type,
            FunctionBody::InlineCode(code.into()),
            Vec::new(),
        )
    }

    /// Wraps a collection pipeline as a function ("make_function", §4.3):
    /// any free variables of `collection` that are not already `params`
    /// become captures.
    pub fn from_collection(
        params: Vec<(String, Type)>,
        collection: Collection,
        single_valued: bool,
    ) -> Function {
        let return_type = if single_valued {
            collection.element_type()
        } else {
            Type::sequence(collection.element_type(), None)
        };
        let mut free = Vec::new();
        collection.free_variables(&mut free);
        let captures: Vec<_> = free
            .into_iter()
            .filter(|v| !params.iter().any(|(name, _)| *name == v.name))
            .collect();
        Function::new(
            params,
            return_type,
            FunctionBody::FromCollection {
                collection,
                single_valued,
            },
            captures,
        )
    }

    /// A function whose body is defined in a host-provided `{name}.h`
    /// (§4.3 item 3): the generator emits `#include "{name}.h"` once and a
    /// thunk `operator()` that forwards its parameters to a free function
    /// of the same name. `name` must be unique among a program's declared
    /// functions, same as any other function (§4.3 "Overloads are
    /// disallowed").
    pub fn external(name: impl Into<String>, params: Vec<(String, Type)>, return_type: Type) -> Function {
        Function::new(params, return_type, FunctionBody::External { name: name.into() }, Vec::new())
    }

    pub fn return_type(&self) -> Type {
        self.0.return_type.clone()
    }

    pub fn call(&self, args: Vec<Expr>) -> Expr {
        Expr::call(self.clone(), args)
    }

    pub fn identity_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.identity_eq(other)
    }
}
impl Eq for Function {}

impl std::hash::Hash for Function {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// `Int` helper functions, transcribed from `qit/functions/int.py` (§9).
pub mod int {
    use super::*;

    /// `multiplication(n)`: a variadic product of `n` `Int` parameters.
    pub fn multiplication(n: usize) -> Function {
        assert!(n >= 2, "multiplication needs at least two operands");
        let params: Vec<_> = (0..n).map(|i| (format!("p{i}"), Type::Int)).collect();
        let mut code = String::from("return ");
        for i in 0..n {
            if i > 0 {
                code.push_str(" * ");
            }
            code.push_str(&format!("p{i}"));
        }
        code.push(';');
        Function::new(params, Type::Int, FunctionBody::InlineCode(code), Vec::new())
    }

    /// `power`: `base ** power`, computed iteratively to match the
    /// original's `while (p > 0) { result *= base; p--; }` loop exactly
    /// (so `power <= 0` yields `1`, matching the Python original's
    /// behavior for a non-positive exponent).
    pub fn power() -> Function {
        Function::new(
            vec![("base".to_string(), Type::Int), ("power".to_string(), Type::Int)],
            Type::Int,
            FunctionBody::InlineCode(
                "int result = 1;\nint p = power;\nwhile (p > 0) {\n    result *= base;\n    p--;\n}\nreturn result;"
                    .to_string(),
            ),
            Vec::new(),
        )
    }
}

/// `KeyValue` helper functions, transcribed from `qit/base/struct.py`'s
/// `KeyValue` subclass (§9).
pub mod key_value {
    use super::*;

    fn field(kv: &Type, field: &str, ret: Type) -> Function {
        Function::new(
            vec![("keyval".to_string(), kv.clone())],
            ret,
            FunctionBody::InlineCode(format!("return keyval.{field};")),
            Vec::new(),
        )
    }

    pub fn key_fn(kv: &Type, key_ty: Type) -> Function {
        field(kv, "key", key_ty)
    }

    pub fn value_fn(kv: &Type, value_ty: Type) -> Function {
        field(kv, "value", value_ty)
    }

    pub fn max_fn(kv: Type) -> Function {
        Function::new(
            vec![
                ("keyval1".to_string(), kv.clone()),
                ("keyval2".to_string(), kv.clone()),
            ],
            kv,
            FunctionBody::InlineCode(
                "return keyval1.value < keyval2.value ? keyval2 : keyval1;".to_string(),
            ),
            Vec::new(),
        )
    }

    pub fn min_fn(kv: Type) -> Function {
        Function::new(
            vec![
                ("keyval1".to_string(), kv.clone()),
                ("keyval2".to_string(), kv.clone()),
            ],
            kv,
            FunctionBody::InlineCode(
                "return keyval1.value > keyval2.value ? keyval2 : keyval1;".to_string(),
            ),
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_inline_functions_are_distinct_declarations() {
        let a = Function::inline("a", "b", Type::Int, Type::Int, "return a + b;");
        let b = Function::inline("a", "b", Type::Int, Type::Int, "return a + b;");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn multiplication_builds_one_parameter_per_operand() {
        let f = int::multiplication(3);
        assert_eq!(f.0.params.len(), 3);
        match &f.0.body {
            FunctionBody::InlineCode(code) => assert_eq!(code, "return p0 * p1 * p2;"),
            _ => panic!("expected inline code"),
        }
    }

    #[test]
    fn power_body_matches_the_original_iterative_loop() {
        let f = int::power();
        match &f.0.body {
            FunctionBody::InlineCode(code) => assert!(code.contains("while (p > 0)")),
            _ => panic!("expected inline code"),
        }
    }

    #[test]
    fn external_function_carries_no_captures_and_a_bare_name() {
        let f = Function::external("my_fire", vec![("marking".to_string(), Type::Int)], Type::Int);
        assert!(f.0.captures.is_empty());
        match &f.0.body {
            FunctionBody::External { name } => assert_eq!(name, "my_fire"),
            _ => panic!("expected an external body"),
        }
    }

    #[test]
    fn from_collection_captures_free_variables_not_in_params() {
        use crate::collection::Collection;

        let x = crate::expr::Expr::variable("x", Type::Int);
        let range = Collection::range_iterate(x);
        let f = Function::from_collection(Vec::new(), range, false);
        assert_eq!(f.0.captures.len(), 1);
        assert_eq!(f.0.captures[0].name, "x");
    }
}
