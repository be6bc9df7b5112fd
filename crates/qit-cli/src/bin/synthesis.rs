//! Petri-net reachability demo (§8 scenario 5 of the specification).
//!
//! Builds a 3-place/3-transition Petri net as an [`ActionSystem`]: the
//! initial marking, and each transition's input/output arc weights, are
//! host-supplied free variables; firing a transition subtracts its input
//! weights and adds its output weights to the current marking, producing
//! zero or one successor marking per transition. `states(7)` performs the
//! depth-bounded BFS reachability search described in §4.7.
//!
//! Grounded in `original_source/programs/synthesis.py`'s Petri-net
//! definition (`N_EVENTS`, `MAX_IN_ARC_WEIGHT`, `MAX_OUT_ARC_WEIGHT`,
//! `MAX_PLACE_MARKING`, the per-transition `is_enabled`/`fire` functions,
//! `ActionSystem(Values(t_marking, [v_mapping]), fs_fire)`, `states(7)`).
//! The original additionally enumerates every `(M0, Wi, Wo)` triple and
//! filters by state-space equality to a reference LTS; that step needs a
//! field-projecting map from an enumerated parameter record into three
//! separate free variables, a capability `qit-ast` does not expose (`map`'s
//! functor always receives its parent's element as a single value, and
//! `Function::from_collection` binds captures by name, not by destructuring
//! a record argument). This demo instead runs the reachability search for
//! one concrete net, passed in as `Qit::run` arguments — the same binding
//! mechanism the enumeration would have used per candidate triple.

use std::collections::HashMap;

use anyhow::{Context, Result};

use qit_ast::system::{ActionSystem, Rule};
use qit_ast::types::HostValue;
use qit_ast::{Collection, Expr, Function};
use qit_compiler::{Qit, QitConfig, VerboseLevel};

const N_EVENTS: i32 = 3;
const MAX_IN_ARC_WEIGHT: i32 = 2;
const MAX_OUT_ARC_WEIGHT: i32 = 2;
const MAX_PLACE_MARKING: i32 = 2;

fn variable_node(expr: &Expr) -> std::rc::Rc<qit_ast::expr::VariableNode> {
    match expr {
        Expr::Variable(v) => v.clone(),
        _ => unreachable!("variable_node is only ever called on Expr::variable(...) results"),
    }
}

/// `t{t}_fire`: subtracts transition `t`'s input arc weights and adds its
/// output arc weights, producing one successor marking when every input
/// place holds enough tokens, or none otherwise (`declare_system`'s
/// `OneToMany` rule shape, §4.7).
fn fire_function(t: i32, input_arcs: &Expr, output_arcs: &Expr, marking_ty: qit_ast::Type) -> Function {
    let mut enabled_check = String::new();
    for p in 0..N_EVENTS {
        if p > 0 {
            enabled_check.push_str(" && ");
        }
        enabled_check.push_str(&format!(
            "qit_freevar_input_arcs.v{} <= marking.v{p}",
            p * N_EVENTS + t
        ));
    }

    let mut code = format!("if ({enabled_check}) {{\n    auto new_marking = marking;\n");
    for p in 0..N_EVENTS {
        code.push_str(&format!(
            "    new_marking.v{p} -= qit_freevar_input_arcs.v{};\n",
            p * N_EVENTS + t
        ));
    }
    for p in 0..N_EVENTS {
        code.push_str(&format!(
            "    new_marking.v{p} += qit_freevar_output_arcs.v{};\n",
            t * N_EVENTS + p
        ));
    }
    code.push_str("    return std::vector<decltype(new_marking)>{new_marking};\n}\nreturn {};");

    Function::new(
        vec![("marking".to_string(), marking_ty.clone())],
        qit_ast::Type::sequence(marking_ty, None),
        qit_ast::function::FunctionBody::InlineCode(code),
        vec![variable_node(input_arcs), variable_node(output_arcs)],
    )
}

fn main() -> Result<()> {
    env_logger::init();

    let marking_value_ty = qit_ast::Type::range(MAX_PLACE_MARKING + 1);
    let in_weight_ty = qit_ast::Type::range(MAX_IN_ARC_WEIGHT + 1);
    let out_weight_ty = qit_ast::Type::range(MAX_OUT_ARC_WEIGHT + 1);

    // Place/transition identity is carried positionally (fields v0..v{N-1}
    // of the marking/weight product types), not as its own `Type`.
    let marking_ty = qit_ast::Type::product(vec![(marking_value_ty.clone(), None); N_EVENTS as usize])
        .context("building the marking product type")?;
    let wi_ty = qit_ast::Type::product(vec![(in_weight_ty, None); (N_EVENTS * N_EVENTS) as usize])
        .context("building the input-arc-weight product type")?;
    let wo_ty = qit_ast::Type::product(vec![(out_weight_ty, None); (N_EVENTS * N_EVENTS) as usize])
        .context("building the output-arc-weight product type")?;

    let v_mapping = Expr::variable("mapping", marking_ty.clone());
    let v_input_arcs = Expr::variable("input_arcs", wi_ty.clone());
    let v_output_arcs = Expr::variable("output_arcs", wo_ty.clone());

    let initial_states = Collection::values_iterate(
        qit_ast::Type::values(marking_ty.clone(), vec![v_mapping.clone()])
            .context("building the initial-marking Values type")?,
    )
    .context("building the initial-states collection")?;

    let rules: Vec<Rule> = (0..N_EVENTS)
        .map(|t| Rule::one_to_many(fire_function(t, &v_input_arcs, &v_output_arcs, marking_ty.clone())))
        .collect();
    let system = ActionSystem::new(initial_states, rules);
    let states = Collection::system_states(system, 7);

    let qit = Qit::new(QitConfig {
        verbose: VerboseLevel::Info,
        ..QitConfig::default()
    });

    // A linear 3-place, 3-transition net: t0 consumes from p0 and produces
    // into p1, t1 consumes from p1 and produces into p2, t2 consumes from
    // p2 and produces into p0 — a token cycles around the three places.
    let mut input_weights = vec![0; (N_EVENTS * N_EVENTS) as usize];
    let mut output_weights = vec![0; (N_EVENTS * N_EVENTS) as usize];
    for t in 0..N_EVENTS {
        let consumed_place = t;
        let produced_place = (t + 1) % N_EVENTS;
        input_weights[(consumed_place * N_EVENTS + t) as usize] = 1;
        output_weights[(t * N_EVENTS + produced_place) as usize] = 1;
    }

    let mut args: HashMap<String, HostValue> = HashMap::new();
    args.insert(
        "mapping".to_string(),
        HostValue::Record(vec![HostValue::Int(1), HostValue::Int(0), HostValue::Int(0)]),
    );
    args.insert(
        "input_arcs".to_string(),
        HostValue::Record(input_weights.into_iter().map(HostValue::Int).collect()),
    );
    args.insert(
        "output_arcs".to_string(),
        HostValue::Record(output_weights.into_iter().map(HostValue::Int).collect()),
    );

    let results = qit.run(&states, args).context("compiling and running the reachability search")?;
    for value in &results {
        println!("{value:?}");
    }
    println!("total number: {}", results.len());
    Ok(())
}
