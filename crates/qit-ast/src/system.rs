//! Action systems: a set of initial states plus a fixed list of rules
//! explored by bounded-depth BFS (§4.7).

use std::rc::Rc;

use crate::collection::Collection;
use crate::expr::VariableNode;
use crate::function::Function;
use crate::types::Type;

/// One rule of an [`ActionSystem`]: a function from a state to either a
/// single successor state (`OneToOne`) or a batch of successor states
/// (`OneToMany`, a one-to-many "fan-out" rule), transcribed from
/// `builder.py`'s `declare_system_iterator` rule dispatch (§4.7, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    OneToOne,
    OneToMany,
}

#[derive(Debug)]
pub struct Rule {
    pub kind: RuleKind,
    pub function: Function,
}

impl Rule {
    /// `function` must take the state type as its sole parameter and
    /// return either the state type (`OneToOne`) or
    /// `std::vector<State>` (`OneToMany`, modeled here as
    /// `Type::sequence(state, None)`).
    pub fn one_to_one(function: Function) -> Rule {
        Rule { kind: RuleKind::OneToOne, function }
    }

    pub fn one_to_many(function: Function) -> Rule {
        Rule { kind: RuleKind::OneToMany, function }
    }
}

/// Initial states plus the ordered list of rules applied to discover new
/// states. Rule order is significant: it is the order tried on each state
/// before giving up and advancing to the next queued state (§4.7).
#[derive(Debug)]
pub struct ActionSystem {
    pub initial_states: Collection,
    pub rules: Vec<Rule>,
}

impl ActionSystem {
    pub fn new(initial_states: Collection, rules: Vec<Rule>) -> ActionSystem {
        ActionSystem { initial_states, rules }
    }

    pub fn state_type(&self) -> Type {
        self.initial_states.element_type()
    }

    pub fn free_variables(&self, out: &mut Vec<Rc<VariableNode>>) {
        self.initial_states.free_variables(out);
        for rule in &self.rules {
            for capture in &rule.function.0.captures {
                if !out.iter().any(|seen| Rc::ptr_eq(seen, capture)) {
                    out.push(capture.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionBody;

    #[test]
    fn state_type_follows_initial_states() {
        let system = ActionSystem::new(Collection::range_iterate(10), Vec::new());
        assert_eq!(system.state_type(), Type::Int);
    }

    #[test]
    fn rule_kinds_round_trip() {
        let successor = Function::new(
            vec![("s".to_string(), Type::Int)],
            Type::Int,
            FunctionBody::InlineCode("return s + 1;".to_string()),
            Vec::new(),
        );
        let rule = Rule::one_to_one(successor);
        assert_eq!(rule.kind, RuleKind::OneToOne);
    }
}
