use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::ir::{
    loops::{BlockFrequencies, LoopForest, LoopInfo},
    spec::{
        BinaryOp, Block, BlockId, Callee, CastKind, Function, Instruction, Literal, Operand,
        Operation, Predicate, Type, ValueId, WrapFlags,
    },
};

/// Errors raised while parsing the textual IR.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextIrError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("{0}")]
    Message(String),
}

impl TextIrError {
    fn new(msg: impl Into<String>) -> Self {
        TextIrError::Message(msg.into())
    }

    fn at(line: usize, msg: impl Into<String>) -> Self {
        TextIrError::Syntax {
            line,
            message: msg.into(),
        }
    }
}

/// Function together with the host-side facts the text format carries.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub function: Function,
    pub frequencies: BlockFrequencies,
    pub loops: LoopForest,
    pub value_names: HashMap<String, ValueId>,
}

impl ParsedModule {
    pub fn value(&self, name: &str) -> Option<ValueId> {
        self.value_names.get(name.trim_start_matches('%')).copied()
    }

    pub fn to_text(&self) -> String {
        print_module(&self.function, &self.frequencies, &self.loops)
    }
}

/// Parses a function written in the compact line-oriented IR syntax.
///
/// # Example
/// ```
/// use fu_balance::ir::text_ir::parse_module;
///
/// let module = parse_module(r#"
/// func @scale(%x: i32) {
/// body: freq=100
///   %y = shl %x, 3:i32 -> i32
///   ret %y
/// }
/// loops {
///   loop @body [body]
/// }
/// "#).expect("valid module");
/// assert_eq!(module.function.blocks.len(), 1);
/// assert_eq!(module.frequencies.get(module.function.blocks[0].id), 100);
/// ```
pub fn parse_module(src: &str) -> Result<ParsedModule, TextIrError> {
    Parser::new(src).parse()
}

struct RawBlock<'s> {
    label: String,
    frequency: Option<u64>,
    statements: Vec<(usize, &'s str)>,
}

struct Parser<'s> {
    source: &'s str,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self { source }
    }

    fn parse(&self) -> Result<ParsedModule, TextIrError> {
        let lines: Vec<(usize, &str)> = self
            .source
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, strip_comment(line).trim()))
            .filter(|(_, line)| !line.is_empty())
            .collect();
        let Some(&(header_line, header)) = lines.first() else {
            return Err(TextIrError::new("input is empty"));
        };

        let (name, params) = parse_function_header(header_line, header)?;
        let close = lines
            .iter()
            .position(|(_, line)| *line == "}")
            .ok_or_else(|| TextIrError::new("missing `}` to end function body"))?;
        let raw_blocks = split_blocks(&lines[1..close])?;
        let trailer = &lines[close + 1..];

        let mut value_map: HashMap<String, ValueId> = HashMap::new();
        let mut parameter_ids = Vec::with_capacity(params.len());
        let mut parameters = Vec::with_capacity(params.len());
        let mut next_value = 0u32;
        for (param_name, ty) in params {
            let id = ValueId(next_value);
            next_value += 1;
            if value_map.insert(param_name.clone(), id).is_some() {
                return Err(TextIrError::at(
                    header_line,
                    format!("duplicate parameter `%{param_name}`"),
                ));
            }
            parameter_ids.push(id);
            parameters.push(ty);
        }

        let mut block_map: HashMap<String, BlockId> = HashMap::new();
        for (index, raw) in raw_blocks.iter().enumerate() {
            if block_map
                .insert(raw.label.clone(), BlockId(index as u32))
                .is_some()
            {
                return Err(TextIrError::new(format!("duplicate block `{}`", raw.label)));
            }
        }

        let mut statement_ids: Vec<Vec<ValueId>> = Vec::with_capacity(raw_blocks.len());
        for raw in &raw_blocks {
            let mut ids = Vec::with_capacity(raw.statements.len());
            for (line, statement) in &raw.statements {
                let id = ValueId(next_value);
                next_value += 1;
                if let Some((result, _)) = split_result(statement) {
                    if value_map.insert(result.to_string(), id).is_some() {
                        return Err(TextIrError::at(
                            *line,
                            format!("value `%{result}` defined twice"),
                        ));
                    }
                }
                ids.push(id);
            }
            statement_ids.push(ids);
        }

        let cx = StatementContext {
            values: &value_map,
            blocks: &block_map,
        };
        let mut blocks = Vec::with_capacity(raw_blocks.len());
        let mut frequencies = BlockFrequencies::new();
        for (index, (raw, ids)) in raw_blocks.iter().zip(statement_ids).enumerate() {
            let id = BlockId(index as u32);
            if let Some(weight) = raw.frequency {
                frequencies.set(id, weight);
            }
            let mut body = Vec::with_capacity(raw.statements.len());
            for ((line, statement), value_id) in raw.statements.iter().zip(ids) {
                body.push(cx.parse_statement(*line, statement, value_id)?);
            }
            blocks.push(Block {
                id,
                label: raw.label.clone(),
                body,
            });
        }

        let loops = parse_loops(trailer, &block_map)?;

        Ok(ParsedModule {
            function: Function {
                name,
                parameter_ids,
                parameters,
                blocks,
            },
            frequencies,
            loops,
            value_names: value_map,
        })
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_function_header(line: usize, header: &str) -> Result<(String, Vec<(String, Type)>), TextIrError> {
    let header = header
        .strip_prefix("func")
        .ok_or_else(|| TextIrError::at(line, "function header must start with `func`"))?
        .trim_start();
    let header = header
        .strip_suffix('{')
        .ok_or_else(|| TextIrError::at(line, "missing `{` to start function body"))?
        .trim_end();
    let open = header
        .find('(')
        .ok_or_else(|| TextIrError::at(line, "missing `(` in function header"))?;
    let close = header
        .rfind(')')
        .ok_or_else(|| TextIrError::at(line, "missing `)` to close parameter list"))?;
    let name = header[..open].trim().trim_start_matches('@').to_string();
    if name.is_empty() {
        return Err(TextIrError::at(line, "function name cannot be empty"));
    }

    let params_src = header[open + 1..close].trim();
    if params_src.is_empty() {
        return Ok((name, Vec::new()));
    }
    let params = params_src
        .split(',')
        .map(|raw| {
            let (name, ty) = raw
                .split_once(':')
                .ok_or_else(|| TextIrError::at(line, "parameter must be `%name: type`"))?;
            let name = normalize_value_name(name);
            if name.is_empty() {
                return Err(TextIrError::at(line, "parameter name cannot be empty"));
            }
            Ok((name, parse_type(ty).map_err(|e| TextIrError::at(line, e))?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name, params))
}

fn split_blocks<'s>(lines: &[(usize, &'s str)]) -> Result<Vec<RawBlock<'s>>, TextIrError> {
    let mut blocks: Vec<RawBlock<'s>> = Vec::new();
    for &(line, text) in lines {
        if let Some((label, frequency)) = parse_block_label(line, text)? {
            blocks.push(RawBlock {
                label,
                frequency,
                statements: Vec::new(),
            });
            continue;
        }
        let block = blocks
            .last_mut()
            .ok_or_else(|| TextIrError::at(line, "statement outside of a block"))?;
        block.statements.push((line, text));
    }
    if blocks.is_empty() {
        return Err(TextIrError::new("function body cannot be empty"));
    }
    Ok(blocks)
}

/// Recognises `label:` and `label: freq=N`.
fn parse_block_label(line: usize, text: &str) -> Result<Option<(String, Option<u64>)>, TextIrError> {
    if text.starts_with('%') || text.contains('=') && !text.contains("freq=") {
        return Ok(None);
    }
    let Some((label, rest)) = text.split_once(':') else {
        return Ok(None);
    };
    let label = label.trim();
    if label.is_empty() || !label.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Ok(None);
    }
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Some((label.to_string(), None)));
    }
    let weight = rest
        .strip_prefix("freq=")
        .ok_or_else(|| TextIrError::at(line, format!("unexpected block annotation `{rest}`")))?;
    let weight = weight
        .trim()
        .parse::<u64>()
        .map_err(|_| TextIrError::at(line, format!("invalid block frequency `{weight}`")))?;
    Ok(Some((label.to_string(), Some(weight))))
}

fn split_result(statement: &str) -> Option<(&str, &str)> {
    let rest = statement.strip_prefix('%')?;
    let (name, tail) = rest.split_once('=')?;
    Some((name.trim(), tail.trim()))
}

struct StatementContext<'m> {
    values: &'m HashMap<String, ValueId>,
    blocks: &'m HashMap<String, BlockId>,
}

impl StatementContext<'_> {
    fn parse_statement(&self, line: usize, statement: &str, id: ValueId) -> Result<Instruction, TextIrError> {
        let body = match split_result(statement) {
            Some((_, tail)) => tail,
            None => statement,
        };
        let (body, output) = match body.rsplit_once("->") {
            Some((head, ty)) => (head.trim(), parse_type(ty).map_err(|e| TextIrError::at(line, e))?),
            None => (body.trim(), Type::Void),
        };
        let (mnemonic, mut rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        rest = rest.trim();

        let mut flags = WrapFlags::NONE;
        loop {
            if let Some(tail) = rest.strip_prefix("nuw ") {
                flags.nuw = true;
                rest = tail.trim_start();
            } else if let Some(tail) = rest.strip_prefix("nsw ") {
                flags.nsw = true;
                rest = tail.trim_start();
            } else {
                break;
            }
        }

        let err = |msg: String| TextIrError::at(line, msg);
        let (op, operands) = if let Some(binary) = BinaryOp::from_mnemonic(mnemonic) {
            (Operation::Binary(binary), self.operand_list(line, rest)?)
        } else if let Some(cast) = CastKind::from_mnemonic(mnemonic) {
            (Operation::Cast(cast), self.operand_list(line, rest)?)
        } else {
            match mnemonic {
                "icmp" | "fcmp" => {
                    let (pred, tail) = rest
                        .split_once(char::is_whitespace)
                        .ok_or_else(|| err("comparison needs a predicate".into()))?;
                    let pred = Predicate::from_mnemonic(pred)
                        .ok_or_else(|| err(format!("unknown predicate `{pred}`")))?;
                    (Operation::Compare(pred), self.operand_list(line, tail)?)
                }
                "load" => (Operation::Load, self.operand_list(line, rest)?),
                "store" => (Operation::Store, self.operand_list(line, rest)?),
                "gep" => (Operation::AddressOf, self.operand_list(line, rest)?),
                "alloca" => (Operation::Alloca, Vec::new()),
                "phi" => self.parse_phi(line, rest)?,
                "call" => self.parse_call(line, rest)?,
                "br" => (
                    Operation::Branch {
                        target: self.block(line, rest)?,
                    },
                    Vec::new(),
                ),
                "condbr" => {
                    let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
                    let [cond, then_label, else_label] = parts.as_slice() else {
                        return Err(err("`condbr` expects `%cond, then, else`".into()));
                    };
                    (
                        Operation::CondBranch {
                            then_block: self.block(line, then_label)?,
                            else_block: self.block(line, else_label)?,
                        },
                        vec![self.operand(line, cond)?],
                    )
                }
                "ret" => (Operation::Return, self.operand_list(line, rest)?),
                "unreachable" => (Operation::Unreachable, Vec::new()),
                other => return Err(err(format!("unknown operation `{other}`"))),
            }
        };

        Ok(Instruction {
            id,
            op,
            operands,
            output,
            flags,
        })
    }

    fn parse_phi(&self, line: usize, rest: &str) -> Result<(Operation, Vec<Operand>), TextIrError> {
        let mut incoming = Vec::new();
        let mut operands = Vec::new();
        for entry in rest.split("],") {
            let entry = entry.trim().trim_start_matches('[').trim_end_matches(']');
            let (value, label) = entry
                .split_once(',')
                .ok_or_else(|| TextIrError::at(line, "phi entries are `[value, block]`"))?;
            operands.push(self.operand(line, value)?);
            incoming.push(self.block(line, label)?);
        }
        Ok((Operation::Phi { incoming }, operands))
    }

    fn parse_call(&self, line: usize, rest: &str) -> Result<(Operation, Vec<Operand>), TextIrError> {
        let open = rest
            .find('(')
            .ok_or_else(|| TextIrError::at(line, "call is missing its argument list"))?;
        let close = rest
            .rfind(')')
            .ok_or_else(|| TextIrError::at(line, "call is missing `)`"))?;
        let target = rest[..open].trim();
        let mut operands = Vec::new();
        let callee = if let Some(symbol) = target.strip_prefix('@') {
            Callee::named(symbol)
        } else {
            operands.push(self.operand(line, target)?);
            Callee::Indirect
        };
        operands.extend(self.operand_list(line, &rest[open + 1..close])?);
        Ok((Operation::Call(callee), operands))
    }

    fn operand_list(&self, line: usize, src: &str) -> Result<Vec<Operand>, TextIrError> {
        let src = src.trim();
        if src.is_empty() {
            return Ok(Vec::new());
        }
        src.split(',').map(|raw| self.operand(line, raw)).collect()
    }

    fn operand(&self, line: usize, raw: &str) -> Result<Operand, TextIrError> {
        let raw = raw.trim();
        if raw.starts_with('%') {
            let name = normalize_value_name(raw);
            return self
                .values
                .get(&name)
                .copied()
                .map(Operand::Value)
                .ok_or_else(|| TextIrError::at(line, format!("unknown value `%{name}`")));
        }
        parse_literal(raw)
            .map(Operand::Literal)
            .map_err(|e| TextIrError::at(line, e))
    }

    fn block(&self, line: usize, label: &str) -> Result<BlockId, TextIrError> {
        let label = label.trim();
        self.blocks
            .get(label)
            .copied()
            .ok_or_else(|| TextIrError::at(line, format!("unknown block `{label}`")))
    }
}

fn normalize_value_name(name: &str) -> String {
    name.trim().trim_start_matches('%').to_string()
}

fn parse_type(src: &str) -> Result<Type, String> {
    let src = src.trim();
    match src {
        "f16" => Ok(Type::F16),
        "f32" => Ok(Type::F32),
        "f64" => Ok(Type::F64),
        "ptr" => Ok(Type::Ptr),
        "void" => Ok(Type::Void),
        other => other
            .strip_prefix('i')
            .and_then(|bits| bits.parse::<u16>().ok())
            .filter(|bits| (1..=64).contains(bits))
            .map(Type::Int)
            .ok_or_else(|| format!("unknown type `{other}`")),
    }
}

/// Literals are written `<value>:<type>`, e.g. `3:i32`, `0xff:i32`, `1.5:f32`.
fn parse_literal(src: &str) -> Result<Literal, String> {
    let (value, ty) = src
        .rsplit_once(':')
        .ok_or_else(|| format!("literal `{src}` must be `<value>:<type>`"))?;
    let ty = parse_type(ty)?;
    let value = value.trim();
    match ty {
        Type::Int(_) => {
            let parsed = if let Some(hex) = value.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).map(|v| v as i64)
            } else {
                value.parse::<i64>()
            };
            parsed
                .map(|v| Literal::int(ty, v))
                .map_err(|_| format!("invalid integer literal `{value}`"))
        }
        Type::F16 => value
            .parse::<f32>()
            .map(Literal::f16)
            .map_err(|_| format!("invalid float literal `{value}`")),
        Type::F32 => value
            .parse::<f32>()
            .map(Literal::f32)
            .map_err(|_| format!("invalid float literal `{value}`")),
        Type::F64 => value
            .parse::<f64>()
            .map(Literal::f64)
            .map_err(|_| format!("invalid float literal `{value}`")),
        Type::Ptr | Type::Void => Err(format!("`{ty}` literals are not supported")),
    }
}

fn parse_loops(lines: &[(usize, &str)], blocks: &HashMap<String, BlockId>) -> Result<LoopForest, TextIrError> {
    let Some((&(first_line, first), rest)) = lines.split_first() else {
        return Ok(LoopForest::default());
    };
    if first != "loops {" {
        return Err(TextIrError::at(first_line, "expected `loops {` section"));
    }

    // Stack of open loops; the bottom entry collects the top-level forest.
    let mut stack: Vec<LoopInfo> = vec![LoopInfo {
        label: String::new(),
        blocks: Vec::new(),
        subloops: Vec::new(),
    }];
    for &(line, text) in rest {
        if text == "}" {
            let done = stack
                .pop()
                .ok_or_else(|| TextIrError::at(line, "unbalanced `}`"))?;
            match stack.last_mut() {
                Some(parent) => parent.subloops.push(done),
                None => {
                    return Ok(LoopForest {
                        loops: done.subloops,
                    })
                }
            }
            continue;
        }
        let spec = text
            .strip_prefix("loop")
            .ok_or_else(|| TextIrError::at(line, "expected `loop @name [blocks]`"))?
            .trim();
        let (spec, opens) = match spec.strip_suffix('{') {
            Some(head) => (head.trim(), true),
            None => (spec, false),
        };
        let open = spec
            .find('[')
            .ok_or_else(|| TextIrError::at(line, "loop is missing its block list"))?;
        let close = spec
            .rfind(']')
            .ok_or_else(|| TextIrError::at(line, "loop block list is missing `]`"))?;
        let label = spec[..open].trim().trim_start_matches('@').to_string();
        let members = spec[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                blocks
                    .get(name)
                    .copied()
                    .ok_or_else(|| TextIrError::at(line, format!("unknown block `{name}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let info = LoopInfo {
            label,
            blocks: members,
            subloops: Vec::new(),
        };
        if opens {
            stack.push(info);
        } else if let Some(parent) = stack.last_mut() {
            parent.subloops.push(info);
        }
    }
    Err(TextIrError::new("unterminated `loops` section"))
}

/// Renders a function in the syntax accepted by [`parse_module`].
pub fn print_module(function: &Function, frequencies: &BlockFrequencies, loops: &LoopForest) -> String {
    let mut out = String::new();
    print_function_into(&mut out, function, Some(frequencies));
    if !loops.loops.is_empty() {
        out.push_str("loops {\n");
        for info in &loops.loops {
            print_loop(&mut out, function, info, 1);
        }
        out.push_str("}\n");
    }
    out
}

pub fn print_function(function: &Function) -> String {
    let mut out = String::new();
    print_function_into(&mut out, function, None);
    out
}

fn print_function_into(out: &mut String, function: &Function, frequencies: Option<&BlockFrequencies>) {
    let params = function
        .parameter_ids
        .iter()
        .zip(&function.parameters)
        .map(|(id, ty)| format!("%{}: {ty}", id.0))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "func @{}({params}) {{", function.name);
    for block in &function.blocks {
        match frequencies {
            Some(freqs) if freqs.get(block.id) > 0 => {
                let _ = writeln!(out, "{}: freq={}", block.label, freqs.get(block.id));
            }
            _ => {
                let _ = writeln!(out, "{}:", block.label);
            }
        }
        for inst in &block.body {
            let _ = writeln!(out, "  {}", render_instruction(function, inst));
        }
    }
    out.push_str("}\n");
}

fn print_loop(out: &mut String, function: &Function, info: &LoopInfo, depth: usize) {
    let indent = "  ".repeat(depth);
    let members = info
        .blocks
        .iter()
        .map(|block| block_label(function, *block))
        .collect::<Vec<_>>()
        .join(", ");
    if info.subloops.is_empty() {
        let _ = writeln!(out, "{indent}loop @{} [{members}]", info.label);
        return;
    }
    let _ = writeln!(out, "{indent}loop @{} [{members}] {{", info.label);
    for sub in &info.subloops {
        print_loop(out, function, sub, depth + 1);
    }
    let _ = writeln!(out, "{indent}}}");
}

fn block_label(function: &Function, block: BlockId) -> String {
    function
        .block(block)
        .map(|b| b.label.clone())
        .unwrap_or_else(|| format!("bb{}", block.0))
}

fn render_operand(operand: &Operand) -> String {
    match operand {
        Operand::Value(value) => format!("%{}", value.0),
        Operand::Literal(literal) => literal.to_string(),
    }
}

fn render_operands(operands: &[Operand]) -> String {
    operands
        .iter()
        .map(render_operand)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_instruction(function: &Function, inst: &Instruction) -> String {
    let mut text = String::new();
    if inst.output != Type::Void {
        let _ = write!(text, "%{} = ", inst.id.0);
    }
    match &inst.op {
        Operation::Binary(op) => {
            text.push_str(op.mnemonic());
            if inst.flags.nuw {
                text.push_str(" nuw");
            }
            if inst.flags.nsw {
                text.push_str(" nsw");
            }
            let _ = write!(text, " {}", render_operands(&inst.operands));
        }
        Operation::Cast(kind) => {
            let _ = write!(text, "{} {}", kind.mnemonic(), render_operands(&inst.operands));
        }
        Operation::Compare(pred) => {
            let is_float = inst
                .operands
                .first()
                .and_then(|operand| operand_type(function, operand))
                .is_some_and(Type::is_float);
            let cmp = if is_float { "fcmp" } else { "icmp" };
            let _ = write!(
                text,
                "{cmp} {} {}",
                pred.mnemonic(),
                render_operands(&inst.operands)
            );
        }
        Operation::Load => {
            let _ = write!(text, "load {}", render_operands(&inst.operands));
        }
        Operation::Store => {
            let _ = write!(text, "store {}", render_operands(&inst.operands));
        }
        Operation::AddressOf => {
            let _ = write!(text, "gep {}", render_operands(&inst.operands));
        }
        Operation::Alloca => text.push_str("alloca"),
        Operation::Phi { incoming } => {
            let entries = inst
                .operands
                .iter()
                .zip(incoming)
                .map(|(operand, block)| {
                    format!("[{}, {}]", render_operand(operand), block_label(function, *block))
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(text, "phi {entries}");
        }
        Operation::Call(callee) => {
            let (target, args) = match callee {
                Callee::Intrinsic { name, .. } | Callee::Function(name) => {
                    (format!("@{name}"), inst.operands.as_slice())
                }
                Callee::Indirect => match inst.operands.split_first() {
                    Some((target, args)) => (render_operand(target), args),
                    None => ("%?".to_string(), &[][..]),
                },
            };
            let _ = write!(text, "call {target}({})", render_operands(args));
        }
        Operation::Branch { target } => {
            let _ = write!(text, "br {}", block_label(function, *target));
        }
        Operation::CondBranch {
            then_block,
            else_block,
        } => {
            let _ = write!(
                text,
                "condbr {}, {}, {}",
                render_operands(&inst.operands),
                block_label(function, *then_block),
                block_label(function, *else_block)
            );
        }
        Operation::Return => {
            text.push_str("ret");
            if !inst.operands.is_empty() {
                let _ = write!(text, " {}", render_operands(&inst.operands));
            }
        }
        Operation::Unreachable => text.push_str("unreachable"),
    }
    if inst.output != Type::Void {
        let _ = write!(text, " -> {}", inst.output);
    }
    text
}

fn operand_type(function: &Function, operand: &Operand) -> Option<Type> {
    match operand {
        Operand::Literal(literal) => Some(literal.ty),
        Operand::Value(value) => function
            .parameter_ids
            .iter()
            .position(|id| id == value)
            .and_then(|idx| function.parameters.get(idx).copied())
            .or_else(|| {
                function
                    .instructions()
                    .find(|inst| inst.id == *value)
                    .map(|inst| inst.output)
            }),
    }
}
