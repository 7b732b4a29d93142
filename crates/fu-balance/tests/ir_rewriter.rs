use fu_balance::ir::{
    parse_module, BinaryOp, BlockId, FragmentInst, FragmentOperand, Function, InstId, Literal,
    Operand, Operation, ParsedModule, ProgramRewriter, Replacement, RewriteError, Type, WrapFlags,
};

const CHAIN: &str = r#"
func @chain(%x: i32, %z: i32) {
entry: freq=1
  %a = add %x, 1:i32 -> i32
  %b = mul %a, %a -> i32
  ret %b
}
"#;

fn chain() -> ParsedModule {
    parse_module(CHAIN).expect("valid module")
}

fn ops(function: &Function) -> Vec<Operation> {
    function.blocks[0].body.iter().map(|inst| inst.op.clone()).collect()
}

#[test]
fn rewriter_replace_and_erase_instruction() {
    let mut module = chain();
    let a = module.value("a").expect("a");
    let z = module.value("z").expect("z");
    let mut rewriter = ProgramRewriter::new(&mut module.function).expect("build indices");

    rewriter.replace_all_uses(a, z).expect("replace uses");
    assert!(rewriter.users_of(a).is_empty());
    assert_eq!(rewriter.users_of(z), &[InstId(1), InstId(1)]);
    assert_eq!(rewriter.version(InstId(1)), Some(1));

    rewriter.erase_inst(InstId(0)).expect("erase dead add");
    assert_eq!(rewriter.func.blocks[0].body.len(), 2);
    assert_eq!(
        rewriter.func.blocks[0].body[0].operands,
        vec![Operand::Value(z), Operand::Value(z)]
    );
    assert!(rewriter.verify());
}

#[test]
fn erasing_a_live_value_fails() {
    let mut module = chain();
    let a = module.value("a").expect("a");
    let mut rewriter = ProgramRewriter::new(&mut module.function).expect("build indices");
    assert_eq!(
        rewriter.erase_inst(InstId(0)),
        Err(RewriteError::LiveUses { value: a })
    );
    assert_eq!(rewriter.func.blocks[0].body.len(), 3);
}

#[test]
fn insert_before_shifts_later_positions() {
    let mut module = chain();
    let x = module.value("x").expect("x");
    let mut rewriter = ProgramRewriter::new(&mut module.function).expect("build indices");

    let (inst, value) = rewriter
        .insert_before(
            InstId(1),
            Operation::Binary(BinaryOp::Shl),
            vec![Operand::Value(x), Operand::Literal(Literal::int(Type::I32, 2))],
            Type::I32,
            WrapFlags::NONE,
        )
        .expect("insert");

    assert_eq!(inst, InstId(3));
    assert_eq!(
        rewriter.view().insts_in_block(BlockId(0)),
        vec![InstId(0), InstId(3), InstId(1), InstId(2)]
    );
    assert_eq!(rewriter.func.blocks[0].body[1].id, value);
    assert_eq!(rewriter.view().type_of(value), Some(Type::I32));
    assert!(rewriter.verify());
}

#[test]
fn splice_replaces_root_and_redirects_uses() {
    let mut module = chain();
    let x = module.value("x").expect("x");
    let mut rewriter = ProgramRewriter::new(&mut module.function).expect("build indices");

    // Rebuild `b = a * a` as `t = x + 1; b' = t * t`, dropping the old add.
    let replacement = Replacement {
        root: InstId(1),
        fragment: vec![
            FragmentInst {
                op: Operation::Binary(BinaryOp::Add),
                operands: vec![
                    FragmentOperand::Existing(Operand::Value(x)),
                    FragmentOperand::Existing(Operand::Literal(Literal::int(Type::I32, 1))),
                ],
                output: Type::I32,
                flags: WrapFlags::NONE,
            },
            FragmentInst {
                op: Operation::Binary(BinaryOp::Mul),
                operands: vec![FragmentOperand::Local(0), FragmentOperand::Local(0)],
                output: Type::I32,
                flags: WrapFlags::NONE,
            },
        ],
        result: 1,
        erase: vec![InstId(0)],
    };
    let result = rewriter.splice(&replacement).expect("splice");

    assert!(rewriter.verify());
    let body = &rewriter.func.blocks[0].body;
    assert_eq!(
        ops(rewriter.func),
        vec![
            Operation::Binary(BinaryOp::Add),
            Operation::Binary(BinaryOp::Mul),
            Operation::Return
        ]
    );
    assert_eq!(body[1].id, result);
    assert_eq!(body[2].operands, vec![Operand::Value(result)]);
    assert!(!rewriter.contains(InstId(0)));
    assert!(!rewriter.contains(InstId(1)));
}

#[test]
fn rejected_splice_leaves_function_untouched() {
    let mut module = chain();
    let original = module.function.clone();
    let a = module.value("a").expect("a");
    let mut rewriter = ProgramRewriter::new(&mut module.function).expect("build indices");

    let no_result = Replacement {
        root: InstId(1),
        fragment: Vec::new(),
        result: 0,
        erase: Vec::new(),
    };
    assert!(matches!(
        rewriter.splice(&no_result),
        Err(RewriteError::InvalidFragment(_))
    ));

    // `ret` still needs the multiply, so erasing it alongside the add root fails.
    let escaping = Replacement {
        root: InstId(0),
        fragment: vec![FragmentInst {
            op: Operation::Binary(BinaryOp::Add),
            operands: vec![
                FragmentOperand::Existing(Operand::Literal(Literal::int(Type::I32, 1))),
                FragmentOperand::Existing(Operand::Literal(Literal::int(Type::I32, 2))),
            ],
            output: Type::I32,
            flags: WrapFlags::NONE,
        }],
        result: 0,
        erase: vec![InstId(1)],
    };
    assert!(matches!(
        rewriter.splice(&escaping),
        Err(RewriteError::LiveUses { .. })
    ));

    let reads_erased = Replacement {
        root: InstId(1),
        fragment: vec![FragmentInst {
            op: Operation::Binary(BinaryOp::Add),
            operands: vec![
                FragmentOperand::Existing(Operand::Value(a)),
                FragmentOperand::Existing(Operand::Value(a)),
            ],
            output: Type::I32,
            flags: WrapFlags::NONE,
        }],
        result: 0,
        erase: vec![InstId(0)],
    };
    assert!(matches!(
        rewriter.splice(&reads_erased),
        Err(RewriteError::InvalidFragment(_))
    ));

    assert_eq!(*rewriter.func, original);
}
