use fu_balance::balance::{
    analyze_function, BalancePass, Balancer, CapacityProfile, FunctionalUnit, PassResult,
    RewriteRule,
};
use fu_balance::ir::{parse_module, BinaryOp, LoopBody, Operand, Operation, ParsedModule};

use FunctionalUnit::*;

const NESTED: &str = include_str!("fixtures/nested_loops.fir");

fn nested() -> ParsedModule {
    parse_module(NESTED).expect("fixture parses")
}

#[test]
fn pass_rewrites_only_the_innermost_loop() {
    let profile = CapacityProfile::sm_35();
    let mut m = nested();
    let c = m.value("c").expect("c");
    let pass = BalancePass::new(Balancer::new(&profile));
    assert_eq!(pass.name(), "fu-balance");

    let report = pass
        .run(&mut m.function, &m.frequencies, &m.loops)
        .expect("pass runs");
    assert_eq!(
        report.result,
        PassResult {
            changed: true,
            iterations: 2,
            rewrites_applied: 1,
            erased_insts: 1,
        }
    );

    assert_eq!(report.loops.len(), 2);
    assert_eq!(report.loops[0].label, "rows");
    assert!(report.loops[0].skipped);
    assert!(!report.loops[0].outcome.changed);
    assert_eq!(report.loops[1].label, "cols");
    assert!(!report.loops[1].skipped);

    let cols = &report.loops[1].outcome;
    assert!((cols.initial_overuse - 4.0 / 3.0).abs() < 1e-9);
    assert_eq!(cols.overuse, 0.0);
    assert_eq!(cols.applied[0].rule, RewriteRule::ShiftToMultiply);
    assert_eq!(cols.usage.get(Shift), 200);
    assert_eq!(cols.usage.get(IntMul), 100);
    assert_eq!(cols.usage.get(IntAdd), 200);
    assert_eq!(cols.usage.get(Mem), 200);

    // `%off = shl %c, 2` is the first candidate in layout order.
    let inner = m.function.block_by_label("inner").expect("inner block");
    let rewritten = &m.function.blocks[inner.index()].body[1];
    assert_eq!(rewritten.id, cols.applied[0].result);
    assert_eq!(rewritten.op, Operation::Binary(BinaryOp::Mul));
    assert_eq!(rewritten.operands[0], Operand::Value(c));
    assert_eq!(rewritten.operands[1].literal().and_then(|lit| lit.as_u64()), Some(4));

    let reparsed = parse_module(&m.to_text()).expect("printed module parses");
    assert_eq!(reparsed.function.instruction_count(), m.function.instruction_count());
    assert_eq!(reparsed.loops, m.loops);
}

#[test]
fn loops_with_subloops_are_never_rewritten() {
    let profile = CapacityProfile::sm_35();
    let mut m = nested();
    let before = m.function.clone();
    let rows = m.loops.find("rows").expect("outer loop");
    let body = LoopBody::from_loop(rows, &m.frequencies);
    assert!(!body.is_innermost());

    let outcome = Balancer::new(&profile)
        .balance(&mut m.function, &body)
        .expect("balance");
    assert!(!outcome.changed);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(m.function, before);
}

#[test]
fn whole_function_usage_counts_every_block() {
    let m = nested();
    let usage = analyze_function(&m.function, &m.frequencies).expect("analyze");
    assert_eq!(usage.get(Control), 122);
    assert_eq!(usage.get(Mem), 200);
    assert_eq!(usage.get(Pseudo), 0);
}

#[test]
fn second_pass_is_a_no_op() {
    let profile = CapacityProfile::sm_35();
    let mut m = nested();
    let pass = BalancePass::new(Balancer::new(&profile));
    pass.run(&mut m.function, &m.frequencies, &m.loops)
        .expect("first pass");
    let snapshot = m.function.clone();

    let report = pass
        .run(&mut m.function, &m.frequencies, &m.loops)
        .expect("second pass");
    assert!(!report.result.changed);
    assert_eq!(report.result.rewrites_applied, 0);
    assert_eq!(m.function, snapshot);
}

#[test]
fn function_without_loops_is_untouched() {
    let profile = CapacityProfile::sm_35();
    let mut m = parse_module(
        r#"
func @straight(%x: i32) {
entry: freq=1
  %y = shl %x, 2:i32 -> i32
  ret %y
}
"#,
    )
    .expect("valid module");
    let before = m.function.clone();
    let report = BalancePass::new(Balancer::new(&profile))
        .run(&mut m.function, &m.frequencies, &m.loops)
        .expect("pass runs");
    assert_eq!(report.result, PassResult::default());
    assert!(report.loops.is_empty());
    assert_eq!(m.function, before);
}
