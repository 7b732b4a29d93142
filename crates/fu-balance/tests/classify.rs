use fu_balance::balance::{analyze, classify, FunctionalUnit, UsageVector};
use fu_balance::ir::{
    parse_module, BlockId, FunctionIndices, LoopBody, ParsedModule, ProgramView, WeightedBlock,
};

use FunctionalUnit::*;

fn module(src: &str) -> ParsedModule {
    parse_module(src).expect("valid module")
}

/// Units charged for the instruction defining `name`.
fn units_of(module: &ParsedModule, name: &str) -> Vec<FunctionalUnit> {
    let indices = FunctionIndices::build(&module.function).expect("indices build");
    let view = ProgramView::new(&module.function, &indices);
    let value = module.value(name).expect("named value");
    let inst = view.inst_of(value).expect("defined by an instruction");
    classify(&view, inst).into_vec()
}

fn whole_function(module: &ParsedModule) -> UsageVector {
    let body = LoopBody::flat(
        "all",
        module
            .function
            .blocks
            .iter()
            .map(|block| WeightedBlock {
                block: block.id,
                frequency: 1,
            })
            .collect(),
    );
    analyze(&module.function, &body).expect("analyze")
}

#[test]
fn single_use_multiply_fuses_into_add() {
    let m = module(
        r#"
func @mad(%a: i32, %b: i32, %c: i32) {
entry:
  %m = mul %a, %b -> i32
  %s = add %m, %c -> i32
  ret %s
}
"#,
    );
    assert!(units_of(&m, "s").is_empty());
    assert_eq!(units_of(&m, "m"), vec![IntMul]);

    let usage = whole_function(&m);
    assert_eq!(usage.get(IntMul), 1);
    assert_eq!(usage.get(IntAdd), 0);
    assert_eq!(usage.get(Control), 1);
}

#[test]
fn shared_multiply_does_not_fuse() {
    let m = module(
        r#"
func @mad(%a: i32, %b: i32, %c: i32, %p: ptr) {
entry:
  %m = mul %a, %b -> i32
  %s = sub %c, %m -> i32
  store %m, %p
  ret %s
}
"#,
    );
    assert_eq!(units_of(&m, "s"), vec![IntAdd]);
}

#[test]
fn masked_right_shift_is_a_bitfield_extract() {
    let m = module(
        r#"
func @extract(%y: i32) {
entry:
  %s = ashr %y, 8:i32 -> i32
  %x = and %s, 0xff:i32 -> i32
  ret %x
}
"#,
    );
    assert_eq!(units_of(&m, "x"), vec![Bitfield]);
    assert_eq!(units_of(&m, "s"), vec![Shift]);
}

#[test]
fn and_without_the_extract_shape_is_logic() {
    let shared = module(
        r#"
func @shared(%y: i32) {
entry:
  %s = lshr %y, 8:i32 -> i32
  %x = and %s, 255:i32 -> i32
  %z = or %x, %s -> i32
  ret %z
}
"#,
    );
    assert_eq!(units_of(&shared, "x"), vec![Logic]);
    assert_eq!(units_of(&shared, "z"), vec![Logic]);

    let variable_mask = module(
        r#"
func @mask(%y: i32, %k: i32) {
entry:
  %s = lshr %y, 8:i32 -> i32
  %x = and %s, %k -> i32
  ret %x
}
"#,
    );
    assert_eq!(units_of(&variable_mask, "x"), vec![Logic]);

    let variable_shift = module(
        r#"
func @amount(%y: i32, %k: i32) {
entry:
  %s = lshr %y, %k -> i32
  %x = and %s, 15:i32 -> i32
  ret %x
}
"#,
    );
    assert_eq!(units_of(&variable_shift, "x"), vec![Logic]);
}

#[test]
fn conversions_are_charged_by_the_wider_side() {
    let m = module(
        r#"
func @casts(%i: i32, %d: f64, %b: i8, %h: f16, %w: i16) {
entry:
  %a = sitofp %i -> f64
  %c = fptrunc %d -> f32
  %e = zext %b -> i32
  %f = fpext %h -> f32
  %g = trunc %w -> i8
  %l = sext %i -> i64
  ret
}
"#,
    );
    assert_eq!(units_of(&m, "a"), vec![Conv64]);
    assert_eq!(units_of(&m, "c"), vec![Conv64]);
    assert_eq!(units_of(&m, "e"), vec![Conv32]);
    assert_eq!(units_of(&m, "f"), vec![Conv32]);
    assert_eq!(units_of(&m, "g"), vec![Conv]);
    assert_eq!(units_of(&m, "l"), vec![Conv64]);
}

#[test]
fn arithmetic_memory_and_control() {
    let m = module(
        r#"
func @mixed(%x: f32, %y: f64, %h: f16, %i: i32, %p: ptr) {
entry:
  %a = mul %x, %x -> f32
  %b = add %y, %y -> f64
  %c = add %h, %h -> f16
  %q = div %i, 3:i32 -> i32
  %r = rem %i, 3:i32 -> i32
  %o = xor %i, %q -> i32
  %t = shl %i, %r -> i32
  %cmp = icmp eq %o, %t -> i1
  %fc = fcmp olt %x, %x -> i1
  %g = gep %p, %i -> ptr
  %v = load %g -> i32
  %slot = alloca -> ptr
  condbr %cmp, next, next
next:
  %phi = phi [%v, entry] -> i32
  ret %phi
}
"#,
    );
    assert_eq!(units_of(&m, "a"), vec![Fp32]);
    assert_eq!(units_of(&m, "b"), vec![Fp64]);
    assert_eq!(units_of(&m, "c"), vec![Fp32]);
    assert!(units_of(&m, "q").is_empty());
    assert!(units_of(&m, "r").is_empty());
    assert_eq!(units_of(&m, "o"), vec![Logic]);
    assert_eq!(units_of(&m, "t"), vec![Shift]);
    assert_eq!(units_of(&m, "cmp"), vec![Logic]);
    assert_eq!(units_of(&m, "fc"), vec![Logic]);
    assert!(units_of(&m, "g").is_empty());
    assert_eq!(units_of(&m, "v"), vec![Mem]);
    assert!(units_of(&m, "slot").is_empty());
    assert!(units_of(&m, "phi").is_empty());

    let usage = whole_function(&m);
    assert_eq!(usage.get(Control), 2);
    assert_eq!(usage.get(Pseudo), 0);
}

#[test]
fn intrinsics_follow_the_unit_table() {
    let m = module(
        r#"
func @intrinsics(%i: i32, %f: f32, %d: f64, %fp: ptr) {
entry:
  %mn = call @llvm.nvvm.min.i(%i, %i) -> i32
  %fm = call @llvm.nvvm.fmax.d(%d, %d) -> f64
  %fma = call @llvm.nvvm.fma.rn.f(%f, %f, %f) -> f32
  %sq = call @llvm.nvvm.sqrt.rn.d(%d) -> f64
  %sf = call @llvm.nvvm.sqrt.rn.f(%f) -> f32
  %ex = call @llvm.nvvm.ex2.approx.f(%f) -> f32
  %rc = call @llvm.nvvm.rcp.rn.d(%d) -> f64
  %pc = call @llvm.nvvm.popc.i(%i) -> i32
  %cl = call @llvm.nvvm.clz.i(%i) -> i32
  %sd = call @llvm.nvvm.sad.i(%i, %i, %i) -> i32
  %br = call @llvm.nvvm.brev32(%i) -> i32
  %sh = call @llvm.nvvm.shfl.down.i32(%i, 1:i32) -> i32
  %tid = call @llvm.nvvm.read.ptx.sreg.tid.x() -> i32
  %bc = call @llvm.nvvm.bitcast.ll2d(%d) -> f64
  %cv = call @llvm.nvvm.d2i.rz(%d) -> i32
  %user = call @helper(%i) -> i32
  %ind = call %fp(%i) -> i32
  ret
}
"#,
    );
    assert_eq!(units_of(&m, "mn"), vec![IntAdd]);
    assert_eq!(units_of(&m, "fm"), vec![Fp64]);
    assert_eq!(units_of(&m, "fma"), vec![Fp32]);
    assert_eq!(units_of(&m, "sq"), vec![Fp64]);
    assert_eq!(units_of(&m, "sf"), vec![Trans]);
    assert_eq!(units_of(&m, "ex"), vec![Trans]);
    assert_eq!(units_of(&m, "rc"), vec![Fp64]);
    assert_eq!(units_of(&m, "pc"), vec![IntMul]);
    assert_eq!(units_of(&m, "cl"), vec![IntMul]);
    assert_eq!(units_of(&m, "sd"), vec![IntMul]);
    assert_eq!(units_of(&m, "br"), vec![Bitfield]);
    assert_eq!(units_of(&m, "sh"), vec![Warp]);
    assert!(units_of(&m, "tid").is_empty());
    assert_eq!(units_of(&m, "bc"), vec![Conv64]);
    assert_eq!(units_of(&m, "cv"), vec![Conv32]);
    assert!(units_of(&m, "user").is_empty());
    assert!(units_of(&m, "ind").is_empty());
}

#[test]
fn frequency_multiplies_each_charge() {
    let m = module(
        r#"
func @weighted(%x: i32, %p: ptr) {
hot: freq=250
  %y = shl %x, 1:i32 -> i32
  store %y, %p
  br cold
cold: freq=3
  %z = shl %x, 2:i32 -> i32
  ret %z
}
"#,
    );
    let body = LoopBody::from_loop(
        &fu_balance::ir::LoopInfo {
            label: "hot".to_string(),
            blocks: vec![BlockId(0)],
            subloops: Vec::new(),
        },
        &m.frequencies,
    );
    let usage = analyze(&m.function, &body).expect("analyze");
    assert_eq!(usage.get(Shift), 250);
    assert_eq!(usage.get(Mem), 250);
    assert_eq!(usage.get(Control), 250);
    assert_eq!(usage.total(), 750);

    let all = fu_balance::balance::analyze_function(&m.function, &m.frequencies).expect("analyze");
    assert_eq!(all.get(Shift), 253);
    assert_eq!(all.get(Control), 253);
}
