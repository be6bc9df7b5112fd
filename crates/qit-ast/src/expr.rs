//! Scalar expressions: literal values, free variables, and function calls
//! (§3 "Expressions" / §4.3).
//!
//! `Expr` is deliberately small — it only covers the scalar sublanguage used
//! for `Range` bounds, `Values` payloads, and function bodies. Collection
//! pipelines (`iterate`/`generate`/`map`/...) live in [`crate::collection`].

use std::rc::Rc;

use crate::error::{AstError, AstResult};
use crate::function::Function;
use crate::types::{HostPayload, HostValue, Type};

/// A node in the scalar expression graph.
///
/// Cloning an `Expr` is cheap (it is a thin `Rc`-backed handle save for the
/// `Value`/`Variable` leaves); two clones of the same node are
/// [`Expr::identity_eq`] to each other, matching Python's default
/// object-identity semantics for nodes with no `__eq__` override.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A literal host value of a known type.
    Value(Rc<ValueNode>),
    /// A free variable bound later via [`crate::driver`]-level `run`
    /// arguments (§4.4).
    Variable(Rc<VariableNode>),
    /// A call to a [`Function`] with scalar argument expressions.
    Call(Rc<CallNode>),
}

#[derive(Debug)]
pub struct ValueNode {
    pub ty: Type,
    pub value: HostValue,
}

#[derive(Debug)]
pub struct VariableNode {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug)]
pub struct CallNode {
    pub function: Function,
    pub args: Vec<Expr>,
}

impl Expr {
    pub fn value(ty: Type, payload: impl Into<HostPayload>) -> AstResult<Expr> {
        let value = ty.checked_value(payload.into())?;
        Ok(Expr::Value(Rc::new(ValueNode { ty, value })))
    }

    pub fn variable(name: impl Into<String>, ty: Type) -> Expr {
        Expr::Variable(Rc::new(VariableNode {
            name: name.into(),
            ty,
        }))
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Expr {
        Expr::Call(Rc::new(CallNode { function, args }))
    }

    pub fn ty(&self) -> Type {
        match self {
            Expr::Value(v) => v.ty.clone(),
            Expr::Variable(v) => v.ty.clone(),
            Expr::Call(c) => c.function.return_type(),
        }
    }

    /// The set of free [`VariableNode`]s reachable from this expression,
    /// by `Rc` identity (§4.4 "`get_variables` unions free variables").
    pub fn free_variables(&self, out: &mut Vec<Rc<VariableNode>>) {
        match self {
            Expr::Value(_) => {}
            Expr::Variable(v) => {
                if !out.iter().any(|seen| Rc::ptr_eq(seen, v)) {
                    out.push(v.clone());
                }
            }
            Expr::Call(c) => {
                for arg in &c.args {
                    arg.free_variables(out);
                }
            }
        }
    }

    /// Reference-identity equality used by [`crate::types::ExprKey`] and by
    /// the declaration pass's node-identity dedup (§3 "collapse on equality
    /// but not on pointer identity" for everything except `Type`).
    pub fn identity_eq(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Value(a), Expr::Value(b)) => Rc::ptr_eq(a, b),
            (Expr::Variable(a), Expr::Variable(b)) => Rc::ptr_eq(a, b),
            (Expr::Call(a), Expr::Call(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn identity_hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let ptr: usize = match self {
            Expr::Value(v) => Rc::as_ptr(v) as usize,
            Expr::Variable(v) => Rc::as_ptr(v) as usize,
            Expr::Call(c) => Rc::as_ptr(c) as usize,
        };
        ptr.hash(state);
    }

    /// `a + b`: builds an anonymous two-parameter function `return a + b;`
    /// when both operands are expressions of the same type, following the
    /// original's `Expression.__add__`/`__radd__` (§9 "supplemented
    /// features").
    pub fn checked_add(self, rhs: Expr) -> AstResult<Expr> {
        let (lt, rt) = (self.ty(), rhs.ty());
        if lt != rt {
            return Err(AstError::TypeMismatch(format!(
                "cannot add {lt:?} and {rt:?}"
            )));
        }
        let function = Function::inline("a", "b", lt.clone(), lt, "return a + b;");
        Ok(Expr::call(function, vec![self, rhs]))
    }
}

impl std::ops::Add for Expr {
    type Output = AstResult<Expr>;

    fn add(self, rhs: Expr) -> AstResult<Expr> {
        self.checked_add(rhs)
    }
}

/// Convenience literal constructors used throughout `qit-ast` and
/// `qit-compiler` tests (`Range(3)`, `Sequence(T, 5)`, ...).
impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::value(Type::Int, v).expect("i32 is always a valid Int value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_clones_of_a_value_share_identity() {
        let a = Expr::from(3);
        let b = a.clone();
        assert!(a.identity_eq(&b));
    }

    #[test]
    fn two_separately_built_values_are_not_identity_equal() {
        let a = Expr::from(3);
        let b = Expr::from(3);
        assert!(!a.identity_eq(&b));
    }

    #[test]
    fn add_of_matching_types_builds_a_call() {
        let sum = (Expr::from(1) + Expr::from(2)).unwrap();
        assert!(matches!(sum, Expr::Call(_)));
        assert_eq!(sum.ty(), Type::Int);
    }

    #[test]
    fn add_of_mismatched_types_is_rejected() {
        let b = Expr::value(Type::Bool, true).unwrap();
        let err = (Expr::from(1) + b).unwrap_err();
        assert!(matches!(err, AstError::TypeMismatch(_)));
    }

    #[test]
    fn variable_is_its_own_free_variable() {
        let x = Expr::variable("x", Type::Int);
        let mut vars = Vec::new();
        x.free_variables(&mut vars);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "x");
    }

    #[test]
    fn free_variables_are_deduplicated_by_identity() {
        let x = Expr::variable("x", Type::Int);
        let sum = (x.clone() + x).unwrap();
        let mut vars = Vec::new();
        sum.free_variables(&mut vars);
        assert_eq!(vars.len(), 1);
    }
}
