use fu_balance::ir::{
    parse_module, Block, BlockId, Function, FunctionIndexError, FunctionIndices, InstId,
    InstPosition, Instruction, Operand, Operation, Type, ValueId, WrapFlags,
};

fn inst(id: u32, op: Operation, operands: Vec<Operand>, output: Type) -> Instruction {
    Instruction {
        id: ValueId(id),
        op,
        operands,
        output,
        flags: WrapFlags::NONE,
    }
}

fn single_block(params: &[(u32, Type)], body: Vec<Instruction>) -> Function {
    Function {
        name: "f".to_string(),
        parameter_ids: params.iter().map(|(id, _)| ValueId(*id)).collect(),
        parameters: params.iter().map(|(_, ty)| *ty).collect(),
        blocks: vec![Block {
            id: BlockId(0),
            label: "entry".to_string(),
            body,
        }],
    }
}

#[test]
fn function_indices_track_definitions_and_users() {
    let module = parse_module(
        r#"
func @chain(%x: i32) {
entry: freq=1
  %a = add %x, 1:i32 -> i32
  %b = mul %a, %a -> i32
  ret %b
}
"#,
    )
    .expect("valid module");
    let function = &module.function;
    let x = module.value("x").expect("param");
    let a = module.value("a").expect("a");
    let b = module.value("b").expect("b");

    let indices = FunctionIndices::build(function).expect("indices build");

    assert!(indices.is_param(x));
    assert_eq!(indices.inst_of(x), None);
    assert_eq!(indices.inst_of(a), Some(InstId(0)));
    assert_eq!(indices.value_of(InstId(1)), Some(b));
    assert_eq!(
        indices.position(InstId(2)),
        Some(InstPosition {
            block: BlockId(0),
            index: 2
        })
    );
    assert_eq!(indices.type_of(a), Some(Type::I32));
    // One entry per operand slot.
    assert_eq!(indices.users_of(a), &[InstId(1), InstId(1)]);
    assert_eq!(indices.use_count(a), 2);
    assert_eq!(indices.use_count(b), 1);
    assert_eq!(indices.version(InstId(0)), Some(0));
    assert_eq!(indices.insts_in_block(BlockId(0)), vec![InstId(0), InstId(1), InstId(2)]);
    assert_eq!(indices.next_inst(), 3);
    assert_eq!(indices.next_value(), 4);
}

#[test]
fn phi_may_reference_a_later_definition() {
    let module = parse_module(
        r#"
func @count(%n: i32) {
entry: freq=1
  br body
body: freq=100
  %i = phi [0:i32, entry], [%next, body] -> i32
  %next = add %i, 1:i32 -> i32
  %c = icmp slt %next, %n -> i1
  condbr %c, body, exit
exit: freq=1
  ret
}
"#,
    )
    .expect("valid module");
    let indices = FunctionIndices::build(&module.function).expect("indices build");
    let next = module.value("next").expect("next");
    let phi = indices.inst_of(module.value("i").expect("phi")).expect("phi inst");
    assert!(indices.users_of(next).contains(&phi));
}

#[test]
fn duplicate_definitions_are_rejected() {
    let function = single_block(
        &[(0, Type::I32)],
        vec![inst(
            0,
            Operation::Binary(fu_balance::ir::BinaryOp::Add),
            vec![Operand::Value(ValueId(0)), Operand::Value(ValueId(0))],
            Type::I32,
        )],
    );
    assert_eq!(
        FunctionIndices::build(&function).unwrap_err(),
        FunctionIndexError::DuplicateValue { value: ValueId(0) }
    );
}

#[test]
fn undefined_operands_are_rejected() {
    let function = single_block(
        &[],
        vec![inst(0, Operation::Return, vec![Operand::Value(ValueId(7))], Type::Void)],
    );
    assert_eq!(
        FunctionIndices::build(&function).unwrap_err(),
        FunctionIndexError::MissingValueDefinition { value: ValueId(7) }
    );
}

#[test]
fn phi_arity_and_block_references_are_checked() {
    let phi = single_block(
        &[(0, Type::I32)],
        vec![inst(
            1,
            Operation::Phi {
                incoming: vec![BlockId(0)],
            },
            vec![Operand::Value(ValueId(0)), Operand::Value(ValueId(0))],
            Type::I32,
        )],
    );
    assert_eq!(
        FunctionIndices::build(&phi).unwrap_err(),
        FunctionIndexError::PhiArity { value: ValueId(1) }
    );

    let branch = single_block(
        &[],
        vec![inst(
            0,
            Operation::Branch {
                target: BlockId(3),
            },
            Vec::new(),
            Type::Void,
        )],
    );
    assert_eq!(
        FunctionIndices::build(&branch).unwrap_err(),
        FunctionIndexError::UnknownBlock { block: BlockId(3) }
    );
}

#[test]
fn blocks_must_be_numbered_by_position() {
    let mut function = single_block(&[], vec![inst(0, Operation::Return, Vec::new(), Type::Void)]);
    function.blocks[0].id = BlockId(1);
    assert_eq!(
        FunctionIndices::build(&function).unwrap_err(),
        FunctionIndexError::MisnumberedBlock {
            expected: BlockId(0),
            found: BlockId(1)
        }
    );
}
