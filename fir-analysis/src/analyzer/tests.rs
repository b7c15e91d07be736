use pretty_assertions::assert_eq;
use velac_fir::{
    ExprId, ExprKind, Fir, FirBuilder, FirOperation, Function, FxHashMap, FxHashSet,
    TypeEnvironment,
    contracts::{
        ConstantRef, ContractCondition, ContractDescription, ContractRegistry, EffectDeclaration,
        ParamRef,
    },
    types::{Ty, TypeContext, TypeIntersector},
};

use crate::{
    analyzer::{ControlFlowGraphReference, DataFlowAnalyzer},
    config::DataFlowConfig,
};

fn init_logging() {
    let _ = env_logger::Builder::from_env("VELAC_TRACE")
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

/// Expression sites to observe during the walk.
#[derive(Default)]
struct Probes<'p> {
    /// Qualified accesses: capture `get_type_using_smartcast_info` right after the
    /// access is visited.
    smartcasts: &'p [ExprId],
    /// Any expression: capture the current type of its receiver-stack entry for the
    /// given symbol right after the expression is visited.
    receivers: &'p [(ExprId, velac_fir::SymbolId)],
    /// Calls: capture `get_type_using_contracts_for_collections` after the call.
    collections: &'p [ExprId],
    /// Calls: capture `get_type_using_conditional_contracts` after the call.
    conditionals: &'p [ExprId],
}

#[derive(Default)]
struct Captures {
    smartcasts: FxHashMap<ExprId, Option<Vec<Ty>>>,
    receiver_types: FxHashMap<ExprId, Option<Ty>>,
    collections: FxHashMap<ExprId, Option<Vec<Ty>>>,
    conditionals: FxHashMap<ExprId, Option<Vec<Ty>>>,
}

/// A minimal stand-in for the resolver's tree walk: drives the analyzer through the
/// enter/exit events in the order the resolver produces them.
struct Walker<'h, 'a> {
    analyzer: &'h mut DataFlowAnalyzer<'a>,
    fir: &'a Fir,
    smartcast_probes: FxHashSet<ExprId>,
    receiver_probes: FxHashMap<ExprId, velac_fir::SymbolId>,
    collection_probes: FxHashSet<ExprId>,
    conditional_probes: FxHashSet<ExprId>,
    captures: Captures,
}

impl<'h, 'a> Walker<'h, 'a> {
    fn new(analyzer: &'h mut DataFlowAnalyzer<'a>, fir: &'a Fir, probes: &Probes<'_>) -> Self {
        Self {
            analyzer,
            fir,
            smartcast_probes: probes.smartcasts.iter().copied().collect(),
            receiver_probes: probes.receivers.iter().copied().collect(),
            collection_probes: probes.collections.iter().copied().collect(),
            conditional_probes: probes.conditionals.iter().copied().collect(),
            captures: Captures::default(),
        }
    }

    fn visit(&mut self, expr: ExprId) {
        match self.fir.expr(expr).kind.clone() {
            ExprKind::Literal(_) => self.analyzer.exit_literal(expr),
            ExprKind::Access { receiver, .. } => {
                if let Some(receiver) = receiver {
                    self.visit(receiver);
                }
                self.analyzer.exit_qualified_access(expr);
                if self.smartcast_probes.contains(&expr) {
                    let info = self.analyzer.get_type_using_smartcast_info(expr);
                    self.captures.smartcasts.insert(expr, info);
                }
            }
            ExprKind::TypeOperator { operand, .. } => {
                self.visit(operand);
                self.analyzer.exit_type_operator(expr).unwrap();
            }
            ExprKind::Equality { lhs, rhs, .. } => {
                self.visit(lhs);
                self.visit(rhs);
                self.analyzer.exit_equality_operator(expr).unwrap();
            }
            ExprKind::CheckNotNull { operand } => {
                self.visit(operand);
                self.analyzer.exit_check_not_null(expr);
            }
            ExprKind::BooleanOperator { left, right, .. } => {
                self.analyzer.enter_binary_logic(expr);
                self.visit(left);
                self.analyzer.exit_left_binary_logic_argument(expr);
                self.visit(right);
                self.analyzer.exit_binary_logic(expr);
            }
            ExprKind::BooleanNot { operand } => {
                self.visit(operand);
                self.analyzer.exit_boolean_not(expr);
            }
            ExprKind::Call { receiver, args, .. } => {
                self.analyzer.enter_call(expr);
                if let Some(receiver) = receiver {
                    self.visit(receiver);
                }
                for arg in args {
                    if let ExprKind::AnonymousFunction { body, .. } = &self.fir.expr(arg).kind {
                        let body = *body;
                        self.analyzer.enter_anonymous_function(arg);
                        self.visit(body);
                        self.analyzer.exit_anonymous_function(arg);
                    } else {
                        self.visit(arg);
                    }
                }
                self.analyzer.exit_function_call(expr);
                if self.collection_probes.contains(&expr) {
                    let info = self.analyzer.get_type_using_contracts_for_collections(expr);
                    self.captures.collections.insert(expr, info);
                }
                if self.conditional_probes.contains(&expr) {
                    let info = self.analyzer.get_type_using_conditional_contracts(expr);
                    self.captures.conditionals.insert(expr, info);
                }
            }
            ExprKind::SafeCall { receiver, selector } => {
                self.visit(receiver);
                self.analyzer.enter_safe_call(expr);
                self.visit(selector);
                self.analyzer.exit_safe_call(expr);
            }
            ExprKind::When { branches } => {
                self.analyzer.enter_when(expr);
                for branch in branches {
                    match branch.condition {
                        Some(condition) => {
                            self.analyzer.enter_when_branch_condition(condition);
                            self.visit(condition);
                            self.analyzer.exit_when_branch_condition(condition, branch.body);
                            self.visit(branch.body);
                            self.analyzer.exit_when_branch_result(branch.body);
                        }
                        None => {
                            self.analyzer.enter_when_else_branch(branch.body);
                            self.visit(branch.body);
                            self.analyzer.exit_when_branch_result(branch.body);
                        }
                    }
                }
                self.analyzer.exit_when(expr);
            }
            ExprKind::While { condition, body } => {
                self.analyzer.enter_while_loop(expr);
                self.visit(condition);
                self.analyzer.exit_while_loop_condition(expr);
                self.visit(body);
                self.analyzer.exit_while_loop(expr);
            }
            ExprKind::DoWhile { body, condition } => {
                self.analyzer.enter_do_while_loop(expr);
                self.visit(body);
                self.analyzer.enter_do_while_loop_condition(expr);
                self.visit(condition);
                self.analyzer.exit_do_while_loop(expr);
            }
            ExprKind::Block { statements } => {
                self.analyzer.enter_block(expr);
                for statement in statements {
                    self.visit(statement);
                }
                self.analyzer.exit_block(expr);
            }
            ExprKind::Declaration { initializer, .. } => {
                if let Some(initializer) = initializer {
                    self.visit(initializer);
                }
                self.analyzer.exit_variable_declaration(expr);
            }
            ExprKind::Assignment { value, .. } => {
                self.visit(value);
                self.analyzer.exit_variable_assignment(expr);
            }
            ExprKind::Jump { value, .. } => {
                if let Some(value) = value {
                    self.visit(value);
                }
                self.analyzer.exit_jump(expr);
            }
            ExprKind::Try { body, catches, finally } => {
                self.analyzer.enter_try(expr);
                self.visit(body);
                self.analyzer.exit_try_main_block(body);
                for catch in catches {
                    self.analyzer.enter_catch_clause(catch.body);
                    self.visit(catch.body);
                    self.analyzer.exit_catch_clause(catch.body);
                }
                if let Some(finally) = finally {
                    self.analyzer.enter_finally(finally);
                    self.visit(finally);
                    self.analyzer.exit_finally(finally);
                }
                self.analyzer.exit_try(expr);
            }
            ExprKind::AnonymousFunction { body, .. } => {
                self.analyzer.enter_anonymous_function(expr);
                self.visit(body);
                self.analyzer.exit_anonymous_function(expr);
            }
        }
        if let Some(symbol) = self.receiver_probes.get(&expr).copied() {
            let ty = self.analyzer.receiver_stack().current_type(symbol).cloned();
            self.captures.receiver_types.insert(expr, ty);
        }
    }
}

struct Outcome {
    captures: Captures,
    reference: ControlFlowGraphReference,
}

fn analyze(
    fir: &Fir,
    env: &TypeEnvironment,
    contracts: &ContractRegistry,
    function: &Function,
    probes: Probes<'_>,
) -> Outcome {
    init_logging();
    let mut analyzer = DataFlowAnalyzer::new(fir, env, env, contracts, DataFlowConfig::default());
    analyzer.enter_function(function);
    let captures = {
        let mut walker = Walker::new(&mut analyzer, fir, &probes);
        walker.visit(function.body);
        walker.captures
    };
    let reference = analyzer
        .exit_function(function)
        .expect("top-level function analysis must produce a graph");
    Outcome { captures, reference }
}

/// The type the resolver would use at the probed site: the intersection of everything
/// the analyzer reported, or `None` when it reported nothing.
fn refined(env: &TypeEnvironment, outcome: &Outcome, probe: ExprId) -> Option<Ty> {
    outcome
        .captures
        .smartcasts
        .get(&probe)
        .expect("site was probed")
        .as_ref()
        .map(|types| env.intersect(types))
}

/// `fun f(x: Any?) { if (x is String) ↯x }`
#[test]
fn smartcast_after_is_check() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let condition = b.is_type(x1, Ty::string());
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));

    // No unsafe widening: everything reported is a subtype of the declared type.
    let reported = outcome.captures.smartcasts[&probe].as_ref().unwrap();
    for ty in reported {
        assert!(env.is_subtype_of(ty, &Ty::nullable_any()));
    }
}

/// `fun f(x: Any?) { if (x != null) ↯x }`
#[test]
fn smartcast_after_null_check() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let null = b.null_literal();
    let condition = b.equality(FirOperation::NotEq, x1, null);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// `fun f(x: Any?) { x!!; ↯x }`
#[test]
fn smartcast_after_not_null_assertion() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let check = b.check_not_null(x1);
    let probe = b.access(x);
    let body = b.block(vec![check, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// `fun f(x: Any?) { val b = x is String; if (b) ↯x }`
#[test]
fn smartcast_through_bound_condition() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let bv = b.local_val("b", Ty::boolean());
    let x1 = b.access(x);
    let test = b.is_type(x1, Ty::string());
    let decl = b.declare(bv, Some(test));
    let condition = b.access(bv);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![decl, when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// `fun f(x: Any?, y: Any?) { if (x is Int && y is String) { ↯x; ↯y } }`
#[test]
fn smartcast_under_conjunction() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let y = b.param("y", Ty::nullable_any());
    let x1 = b.access(x);
    let left = b.is_type(x1, Ty::int());
    let y1 = b.access(y);
    let right = b.is_type(y1, Ty::string());
    let condition = b.and(left, right);
    let probe_x = b.access(x);
    let probe_y = b.access(y);
    let then_body = b.block(vec![probe_x, probe_y]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x, y], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe_x, probe_y],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe_x), Some(Ty::int()));
    assert_eq!(refined(&env, &outcome, probe_y), Some(Ty::string()));
}

/// `fun f(x: Any?) { if (!(x is String)) return; ↯x }`
#[test]
fn smartcast_after_negated_check_with_early_return() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let test = b.is_type(x1, Ty::string());
    let condition = b.not(test);
    let ret = b.ret(None);
    let then_body = b.block(vec![ret]);
    let when = b.if_then(condition, then_body);
    let probe = b.access(x);
    let body = b.block(vec![when, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// `fun f(x: Any?) { when { x is Int -> ↯x; x is String -> ↯x; else -> {} } }`
#[test]
fn smartcast_per_when_branch() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let cond1 = b.is_type(x1, Ty::int());
    let probe1 = b.access(x);
    let body1 = b.block(vec![probe1]);
    let x2 = b.access(x);
    let cond2 = b.is_type(x2, Ty::string());
    let probe2 = b.access(x);
    let body2 = b.block(vec![probe2]);
    let else_body = b.block(vec![]);
    let when = b.when(
        vec![
            velac_fir::WhenBranch { condition: Some(cond1), body: body1 },
            velac_fir::WhenBranch { condition: Some(cond2), body: body2 },
            velac_fir::WhenBranch { condition: None, body: else_body },
        ],
        Ty::unit(),
    );
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe1, probe2],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe1), Some(Ty::int()));
    assert_eq!(refined(&env, &outcome, probe2), Some(Ty::string()));
}

/// `fun f(xs: List<Any?>) { xs.filter { it is Int } }` with a for-each-return-value
/// contract on `filter`: the call's return type narrows to `List<Int>`.
#[test]
fn collection_contract_narrows_element_type() {
    let mut b = FirBuilder::new();
    let list_any = Ty::named_with("List", vec![Ty::nullable_any()]);
    let xs = b.param("xs", list_any.clone());
    let filter = b.function_symbol("filter", vec![Ty::nullable_any()], list_any);
    let it = b.param("it", Ty::nullable_any());
    let it_access = b.access(it);
    let predicate = b.is_type(it_access, Ty::int());
    let lambda = b.lambda(Some(it), predicate, Ty::nullable_any());
    let xs_access = b.access(xs);
    let call = b.call(filter, Some(xs_access), vec![lambda]);
    let body = b.block(vec![call]);
    let f = b.function("f", None, vec![xs], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let mut contracts = ContractRegistry::new();
    contracts.register(
        filter,
        ContractDescription::new(vec![EffectDeclaration::ForEachReturnValue {
            lambda: ParamRef::Param(0),
            value: ConstantRef::True,
        }]),
    );
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        collections: &[call],
        ..Probes::default()
    });
    let narrowed = outcome.captures.collections[&call].as_ref().unwrap();
    assert_eq!(narrowed, &vec![Ty::named_with("List", vec![Ty::int()])]);
}

/// `fun f(x: Any?) { x?.hashCode(); if (x != null) ↯x }` — the safe call alone does not
/// establish non-nullness after the expression.
#[test]
fn safe_call_does_not_leak_past_its_expression() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let hash_code = b.function_symbol("hashCode", vec![], Ty::int());
    let x1 = b.access(x);
    let selector = b.call(hash_code, None, vec![]);
    let safe = b.safe_call(x1, selector);
    let probe_after_call = b.access(x);
    let x2 = b.access(x);
    let null = b.null_literal();
    let condition = b.equality(FirOperation::NotEq, x2, null);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![safe, probe_after_call, when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe_after_call, probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe_after_call), None);
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// `var x: Any? = "s"; if (x is String) { x = 1; ↯x }` — reassignment erases facts.
#[test]
fn reassignment_erases_previous_facts() {
    let mut b = FirBuilder::new();
    let x = b.local_var("x", Ty::nullable_any());
    let s = b.string_literal("s");
    let decl = b.declare(x, Some(s));
    let x1 = b.access(x);
    let condition = b.is_type(x1, Ty::string());
    let one = b.int_literal(1);
    let assign = b.assign(x, one);
    let probe = b.access(x);
    let then_body = b.block(vec![assign, probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![decl, when]);
    let f = b.function("f", None, vec![], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    // The String fact from before the reassignment must be gone; the only thing that
    // may remain is the new initializer's type.
    if let Some(types) = outcome.captures.smartcasts[&probe].as_ref() {
        assert!(!types.contains(&Ty::string()));
        assert_eq!(types, &vec![Ty::int()]);
    }
}

/// `fun f(b: Any?) { val a = b; if (b is String) ↯a }` and the mirrored check through
/// the alias: facts about either name are visible through the other.
#[test]
fn alias_round_trip() {
    let mut b = FirBuilder::new();
    let p = b.param("b", Ty::nullable_any());
    let a = b.local_val("a", Ty::nullable_any());
    let init = b.access(p);
    let decl = b.declare(a, Some(init));
    let a1 = b.access(a);
    let condition = b.is_type(a1, Ty::string());
    let probe_b = b.access(p);
    let probe_a = b.access(a);
    let then_body = b.block(vec![probe_b, probe_a]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![decl, when]);
    let f = b.function("f", None, vec![p], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe_b, probe_a],
        ..Probes::default()
    });
    // The check was written against `a`, which aliases `b`: both names see String.
    assert_eq!(refined(&env, &outcome, probe_b), Some(Ty::string()));
    assert_eq!(refined(&env, &outcome, probe_a), Some(Ty::string()));
}

/// `fun f(x: Any?) { (x is String) || return; ↯x }` — the operator can only complete
/// via the left operand's truth when the right operand never terminates.
#[test]
fn disjunction_with_dead_right_operand() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let left = b.is_type(x1, Ty::string());
    let right = b.ret(None);
    let or = b.or(left, right);
    let probe = b.access(x);
    let body = b.block(vec![or, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// `fun f(x: Any?) { while (x == null) { }; ↯x }` — leaving the loop through the
/// condition's false edge approves its falsity.
#[test]
fn loop_exit_knows_the_condition_failed() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let null = b.null_literal();
    let condition = b.equality(FirOperation::Eq, x1, null);
    let loop_body = b.block(vec![]);
    let while_loop = b.while_loop(condition, loop_body);
    let probe = b.access(x);
    let body = b.block(vec![while_loop, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// `fun f(x: Any?) { while (x == null) { break }; ↯x }` — a `break` predecessor
/// suppresses the condition-false fact at the loop exit.
#[test]
fn break_suppresses_loop_exit_refinement() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let null = b.null_literal();
    let condition = b.equality(FirOperation::Eq, x1, null);
    let brk = b.brk();
    let loop_body = b.block(vec![brk]);
    let while_loop = b.while_loop(condition, loop_body);
    let probe = b.access(x);
    let body = b.block(vec![while_loop, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), None);
}

/// `fun f(x: Any?) { do { } while (x == null); ↯x }`
#[test]
fn do_while_exit_knows_the_condition_failed() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let loop_body = b.block(vec![]);
    let x1 = b.access(x);
    let null = b.null_literal();
    let condition = b.equality(FirOperation::Eq, x1, null);
    let do_while = b.do_while_loop(loop_body, condition);
    let probe = b.access(x);
    let body = b.block(vec![do_while, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// `fun f(x: Any?) { x as String; ↯x }` and
/// `fun g(x: Any?) { val y = x as? String; if (y != null) ↯x }`
#[test]
fn casts_refine_the_operand() {
    // Unchecked cast.
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let cast = b.cast(x1, Ty::string());
    let probe = b.access(x);
    let body = b.block(vec![cast, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));

    // Safe cast, observed through the bound result's null check.
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let y = b.local_val("y", Ty::string().nullable());
    let x1 = b.access(x);
    let safe_cast = b.safe_cast(x1, Ty::string());
    let decl = b.declare(y, Some(safe_cast));
    let y1 = b.access(y);
    let null = b.null_literal();
    let condition = b.equality(FirOperation::NotEq, y1, null);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![decl, when]);
    let g = b.function("g", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let outcome = analyze(&fir, &env, &contracts, &g, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// `fun f(a: Any, b: String) { if (a === b) ↯a }` — reference identity of two non-null
/// values pins the types to each other.
#[test]
fn identity_comparison_transfers_types() {
    let mut b = FirBuilder::new();
    let a = b.param("a", Ty::any());
    let s = b.param("b", Ty::string());
    let a1 = b.access(a);
    let s1 = b.access(s);
    let condition = b.equality(FirOperation::Identity, a1, s1);
    let probe = b.access(a);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![a, s], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// `fun f(x: Any?) { if ((x is String) == true) ↯x }` — comparison against a boolean
/// constant transfers the operand's condition implications to the comparison's result.
#[test]
fn boolean_constant_comparison_keeps_conditions() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let test = b.is_type(x1, Ty::string());
    let truth = b.bool_literal(true);
    let condition = b.equality(FirOperation::Eq, test, truth);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(condition, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// A conditional contract `returns(true) implies (x is String)` makes the call usable
/// as an `is` check.
#[test]
fn conditional_contract_acts_as_type_test() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let is_string = b.function_symbol("isString", vec![Ty::nullable_any()], Ty::boolean());
    let arg = b.access(x);
    let call = b.call(is_string, None, vec![arg]);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(call, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let mut contracts = ContractRegistry::new();
    contracts.register(
        is_string,
        ContractDescription::new(vec![EffectDeclaration::Conditional {
            value: ConstantRef::True,
            condition: ContractCondition::IsInstance {
                parameter: ParamRef::Param(0),
                ty: Ty::string(),
                negated: false,
            },
        }]),
    );
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::string()));
}

/// A wildcard contract `returns() implies (x != null)` refines unconditionally once the
/// call completed.
#[test]
fn wildcard_contract_applies_after_the_call() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let require_not_null =
        b.function_symbol("requireNotNull", vec![Ty::nullable_any()], Ty::unit());
    let arg = b.access(x);
    let call = b.call(require_not_null, None, vec![arg]);
    let probe = b.access(x);
    let body = b.block(vec![call, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let mut contracts = ContractRegistry::new();
    contracts.register(
        require_not_null,
        ContractDescription::new(vec![EffectDeclaration::Conditional {
            value: ConstantRef::Wildcard,
            condition: ContractCondition::IsNull {
                parameter: ParamRef::Param(0),
                negated: true,
            },
        }]),
    );
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// `returnsNotNull implies (x != null)` evaluated statically against a non-nullable
/// argument refines the declared return type.
#[test]
fn conditional_contract_query_refines_return_type() {
    let mut b = FirBuilder::new();
    let s = b.param("s", Ty::string());
    let transform = b.function_symbol("transform", vec![Ty::nullable_any()], Ty::string().nullable());
    let arg = b.access(s);
    let call = b.call(transform, None, vec![arg]);
    let body = b.block(vec![call]);
    let f = b.function("f", None, vec![s], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let mut contracts = ContractRegistry::new();
    contracts.register(
        transform,
        ContractDescription::new(vec![EffectDeclaration::Conditional {
            value: ConstantRef::NotNull,
            condition: ContractCondition::IsNull {
                parameter: ParamRef::Param(0),
                negated: true,
            },
        }]),
    );
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        conditionals: &[call],
        ..Probes::default()
    });
    assert_eq!(
        outcome.captures.conditionals[&call],
        Some(vec![Ty::string()])
    );
}

/// Contract processing is suppressed inside `with_ignore_function_calls`.
#[test]
fn ignored_calls_contribute_no_contract_facts() {
    init_logging();
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let is_string = b.function_symbol("isString", vec![Ty::nullable_any()], Ty::boolean());
    let arg = b.access(x);
    let call = b.call(is_string, None, vec![arg]);
    let probe = b.access(x);
    let then_body = b.block(vec![probe]);
    let when = b.if_then(call, then_body);
    let body = b.block(vec![when]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let mut contracts = ContractRegistry::new();
    contracts.register(
        is_string,
        ContractDescription::new(vec![EffectDeclaration::Conditional {
            value: ConstantRef::True,
            condition: ContractCondition::IsInstance {
                parameter: ParamRef::Param(0),
                ty: Ty::string(),
                negated: false,
            },
        }]),
    );
    let mut analyzer = DataFlowAnalyzer::new(&fir, &env, &env, &contracts, DataFlowConfig::default());
    analyzer.enter_function(&f);
    let probes = Probes {
        smartcasts: &[probe],
        ..Probes::default()
    };
    let captures = analyzer.with_ignore_function_calls(|analyzer| {
        let mut walker = Walker::new(analyzer, &fir, &probes);
        walker.visit(f.body);
        walker.captures
    });
    analyzer.exit_function(&f).unwrap();
    assert_eq!(captures.smartcasts[&probe], None);
}

/// `fun Any?.f() { if (this is String) ↯this; ↯this }` — refinement of an implicit
/// receiver reaches the receiver stack inside the branch and disappears after it.
#[test]
fn receiver_refinement_updates_the_stack() {
    let mut b = FirBuilder::new();
    let this = b.receiver(Ty::nullable_any());
    let this1 = b.access(this);
    let condition = b.is_type(this1, Ty::string());
    let inside = b.access(this);
    let then_body = b.block(vec![inside]);
    let when = b.if_then(condition, then_body);
    let outside = b.access(this);
    let body = b.block(vec![when, outside]);
    let f = b.function("f", Some(this), vec![], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        receivers: &[(inside, this), (outside, this)],
        ..Probes::default()
    });
    assert_eq!(
        outcome.captures.receiver_types[&inside],
        Some(Ty::string())
    );
    assert_eq!(
        outcome.captures.receiver_types[&outside],
        Some(Ty::nullable_any())
    );
}

/// `fun f(x: Any?) { try { x!! } catch (e) { return }; ↯x }` — the catch path ends in a
/// jump, so only the main path reaches the probe.
#[test]
fn try_with_returning_catch_keeps_main_path_facts() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let e = b.param("e", Ty::named("Throwable"));
    let x1 = b.access(x);
    let check = b.check_not_null(x1);
    let try_body = b.block(vec![check]);
    let ret = b.ret(None);
    let catch_body = b.block(vec![ret]);
    let try_expr = b.try_catch(
        try_body,
        vec![velac_fir::Catch { parameter: e, body: catch_body }],
        None,
    );
    let probe = b.access(x);
    let body = b.block(vec![try_expr, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    assert_eq!(refined(&env, &outcome, probe), Some(Ty::any()));
}

/// Dropping a call's subgraph removes its nodes and flows and restores the position the
/// call started from.
#[test]
fn dropped_call_subgraph_leaves_no_trace() {
    init_logging();
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let callee = b.function_symbol("candidate", vec![Ty::nullable_any()], Ty::unit());
    let arg_access = b.access(x);
    let arg = b.check_not_null(arg_access);
    let call = b.call(callee, None, vec![arg]);
    let probe = b.access(x);
    let body = b.block(vec![call, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let mut analyzer = DataFlowAnalyzer::new(&fir, &env, &env, &contracts, DataFlowConfig::default());
    analyzer.enter_function(&f);
    analyzer.enter_block(f.body);

    // First resolution attempt: the argument's `!!` poisons the flow, then the
    // candidate is discarded.
    analyzer.enter_call(call);
    analyzer.exit_qualified_access(arg_access);
    analyzer.exit_check_not_null(arg);
    analyzer.drop_subgraph_from_call(call);

    // The probe sees none of the dropped facts.
    analyzer.exit_qualified_access(probe);
    assert_eq!(analyzer.get_type_using_smartcast_info(probe), None);
}

/// The snapshot handed back at function exit still answers flow lookups after the
/// analyzer context was reset.
#[test]
fn data_flow_info_survives_the_reset() {
    let mut b = FirBuilder::new();
    let x = b.param("x", Ty::nullable_any());
    let x1 = b.access(x);
    let check = b.check_not_null(x1);
    let probe = b.access(x);
    let body = b.block(vec![check, probe]);
    let f = b.function("f", None, vec![x], Ty::unit(), body);
    let fir = b.finish();

    let env = TypeEnvironment::new();
    let contracts = ContractRegistry::new();
    let outcome = analyze(&fir, &env, &contracts, &f, Probes {
        smartcasts: &[probe],
        ..Probes::default()
    });
    let info = &outcome.reference.data_flow_info;
    assert!(!info.flow_on_nodes.is_empty());
    assert!(outcome.reference.graph.len() > 0);
}
