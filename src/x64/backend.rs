// X64Backend lowers a canonical Graph into x86-64 LIR and assigns registers to it.
//
// Lowering follows the fixed control chain from the start node. Floating nodes have no
// position of their own: they are scheduled on demand right before their first user in the
// current branch, and the set of scheduled values is snapshotted before each branch of an If
// and restored afterwards, so a value computed inside one branch is recomputed in the other
// instead of being used where it was never defined. Parameters are copied out of their
// System V argument locations into fresh virtual registers at entry; every Return moves its
// value to RAX and jumps to a shared exit label.
//
// Register assignment is a linear scan over the instruction order. Control flow only moves
// forward, so the span from a virtual register's first to its last appearance covers every
// point where it can be live. Registers come from a pool that excludes the argument registers,
// RAX/RDX (fixed temps of multiply-high) and the frame registers. There is no spilling: running
// out of registers is a lowering error. Once registers are known, the prologue and the shared
// return sequence are added with pushes and pops of the callee-saved registers in use.

//! Graph-to-LIR lowering and register assignment for x86-64.

use super::calling_convention::{CCAssigner, CCAssignment, SysVAssigner};
use super::encoder::{AluOp, Condition, X64Encoder};
use super::lir_ops::*;
use super::{R10, R11, R12, R13, R14, R15, RAX, RBX};
use crate::asm::LabelId;
use crate::core::compiler::Backend;
use crate::core::config::CompilerConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{AsmReg, RegBitSet, RegisterFile, GP_BANK};
use crate::asm::Buffer;
use crate::ir::{Graph, NodeId, NodeKind, StampKind};
use crate::lir::{Lir, Value, VirtualReg};
use hashbrown::HashMap;

/// Registers handed out by the allocator.
pub const ALLOCATABLE: [AsmReg; 7] = [RBX, R10, R11, R12, R13, R14, R15];

fn lowering_error(reason: impl Into<String>) -> CompileError {
    CompileError::Lowering {
        reason: reason.into(),
    }
}

fn fits_imm32(value: i64) -> bool {
    i32::try_from(value).is_ok()
}

fn input(node: NodeId, inputs: &[NodeId], index: usize) -> CompileResult<NodeId> {
    inputs
        .get(index)
        .copied()
        .ok_or_else(|| lowering_error(format!("{node} is missing input {index}")))
}

struct Lowering<'g, 'l> {
    graph: &'g Graph,
    lir: &'l mut Lir<X64Encoder>,
    values: HashMap<NodeId, Value>,
    exit: LabelId,
}

impl Lowering<'_, '_> {
    fn kind_of(&self, node: NodeId) -> CompileResult<StampKind> {
        let kind = self.graph.node(node)?.stamp().kind();
        if kind == StampKind::Void {
            return Err(lowering_error(format!("{node} does not produce a value")));
        }
        Ok(kind)
    }

    /// `value` in a register, materialising immediates.
    fn in_register(&mut self, value: Value, kind: StampKind) -> Value {
        match value {
            Value::Immediate(_) => {
                let result = self.lir.new_vreg(kind);
                self.lir.append(MoveOp { result, input: value });
                result
            }
            other => other,
        }
    }

    /// `value` as a second ALU operand: a register or a 32-bit immediate.
    fn alu_operand(&mut self, value: Value, kind: StampKind) -> Value {
        match value {
            Value::Immediate(imm) if fits_imm32(imm) => value,
            other => self.in_register(other, kind),
        }
    }

    fn lower_params(&mut self) -> CompileResult<()> {
        let mut cc = SysVAssigner::new();
        for param in self.graph.params() {
            let kind = self.kind_of(param)?;
            let mut assignment = CCAssignment::new(kind);
            cc.assign_arg(&mut assignment);
            if !self.graph.node(param)?.has_usages() {
                continue;
            }
            let input = match (assignment.reg, assignment.stack_off) {
                (Some(reg), _) => Value::Register(reg, kind),
                (None, Some(offset)) => Value::StackSlot(offset, kind),
                (None, None) => return Err(lowering_error(format!("no location for {param}"))),
            };
            let result = self.lir.new_vreg(kind);
            self.lir.append(MoveOp { result, input });
            self.values.insert(param, result);
        }
        Ok(())
    }

    /// Value of `node`, scheduling floating nodes that are not available yet.
    fn value_of(&mut self, node: NodeId) -> CompileResult<Value> {
        if let Some(&value) = self.values.get(&node) {
            return Ok(value);
        }
        let graph = self.graph;
        let n = graph.node(node)?;
        let kind = n.kind();
        if n.is_fixed() {
            return Err(lowering_error(format!("{node} ({}) used before it is reached", kind.opcode().name())));
        }
        let inputs = n.inputs().to_vec();
        let value = match kind {
            NodeKind::Constant(c) => Value::Immediate(c),
            NodeKind::Narrow { .. } => self.value_of(input(node, &inputs, 0)?)?,
            NodeKind::Param(_) => return Err(lowering_error(format!("parameter {node} was not lowered"))),
            NodeKind::Add | NodeKind::Sub | NodeKind::Mul | NodeKind::And | NodeKind::Or | NodeKind::Xor => {
                let op = match kind {
                    NodeKind::Add => AluOp::Add,
                    NodeKind::Sub => AluOp::Sub,
                    NodeKind::Mul => AluOp::Imul,
                    NodeKind::And => AluOp::And,
                    NodeKind::Or => AluOp::Or,
                    _ => AluOp::Xor,
                };
                let result_kind = self.kind_of(node)?;
                let x = self.value_of(input(node, &inputs, 0)?)?;
                let y = self.value_of(input(node, &inputs, 1)?)?;
                let y = self.alu_operand(y, result_kind);
                let result = self.lir.new_vreg(result_kind);
                self.lir.append(BinaryOp { op, result, x, y });
                result
            }
            NodeKind::MulHigh => {
                let result_kind = self.kind_of(node)?;
                let x = self.value_of(input(node, &inputs, 0)?)?;
                let y = self.value_of(input(node, &inputs, 1)?)?;
                let y = self.in_register(y, result_kind);
                let result = self.lir.new_vreg(result_kind);
                self.lir.append(MulHighOp::new(result, x, y));
                result
            }
            NodeKind::Neg | NodeKind::Not => {
                let result_kind = self.kind_of(node)?;
                let x = self.value_of(input(node, &inputs, 0)?)?;
                let result = self.lir.new_vreg(result_kind);
                let kind = if kind == NodeKind::Neg { UnaryKind::Neg } else { UnaryKind::Not };
                self.lir.append(UnaryOp { kind, result, x });
                result
            }
            NodeKind::SignExtend => match self.value_of(input(node, &inputs, 0)?)? {
                Value::Immediate(imm) => Value::Immediate(imm),
                x => {
                    let result = self.lir.new_vreg(StampKind::Int64);
                    self.lir.append(SignExtendOp { result, x });
                    result
                }
            },
            NodeKind::IntegerLessThan | NodeKind::IntegerEquals => {
                let condition = if kind == NodeKind::IntegerLessThan {
                    Condition::Less
                } else {
                    Condition::Equal
                };
                let (x, y) = self.compare_operands(input(node, &inputs, 0)?, input(node, &inputs, 1)?)?;
                let result = self.lir.new_vreg(StampKind::Int32);
                self.lir.append(CompareOp { condition, result, x, y });
                result
            }
            NodeKind::Address => {
                let (base, offset) = (input(node, &inputs, 0)?, input(node, &inputs, 1)?);
                let base = self.value_of(base)?;
                let base = self.in_register(base, StampKind::Pointer);
                let offset_kind = self.kind_of(offset)?;
                let offset = match self.value_of(offset)? {
                    Value::Immediate(imm) if fits_imm32(imm) => Value::Immediate(imm),
                    other => {
                        let wide = self.in_register(other, offset_kind);
                        if offset_kind == StampKind::Int32 {
                            let result = self.lir.new_vreg(StampKind::Int64);
                            self.lir.append(SignExtendOp { result, x: wide });
                            result
                        } else {
                            wide
                        }
                    }
                };
                let result = self.lir.new_vreg(StampKind::Pointer);
                self.lir.append(LeaOp { result, base, offset });
                result
            }
            NodeKind::Start
            | NodeKind::Read
            | NodeKind::Write
            | NodeKind::If
            | NodeKind::Begin
            | NodeKind::Return => {
                return Err(lowering_error(format!("{node} is not a floating value")))
            }
        };
        self.values.insert(node, value);
        Ok(value)
    }

    fn compare_operands(&mut self, a: NodeId, b: NodeId) -> CompileResult<(Value, Value)> {
        let kind = self.kind_of(a)?;
        let x = self.value_of(a)?;
        let y = self.value_of(b)?;
        let x = self.in_register(x, kind);
        let y = self.alu_operand(y, kind);
        Ok((x, y))
    }

    /// Lower the fixed chain starting at `first` up to its Return.
    fn lower_chain(&mut self, first: Option<NodeId>) -> CompileResult<()> {
        let graph = self.graph;
        let mut cursor = first;
        while let Some(id) = cursor {
            let node = graph.node(id)?;
            let inputs = node.inputs().to_vec();
            match node.kind() {
                NodeKind::Start | NodeKind::Begin => {}
                NodeKind::Read => {
                    let kind = self.kind_of(id)?;
                    let address = self.value_of(input(id, &inputs, 0)?)?;
                    let address = self.in_register(address, StampKind::Pointer);
                    let result = self.lir.new_vreg(kind);
                    self.lir.append(LoadOp { result, address });
                    self.values.insert(id, result);
                }
                NodeKind::Write => {
                    let (address, value) = (input(id, &inputs, 0)?, input(id, &inputs, 1)?);
                    let kind = self.kind_of(value)?;
                    let address = self.value_of(address)?;
                    let address = self.in_register(address, StampKind::Pointer);
                    let value = self.value_of(value)?;
                    let value = self.alu_operand(value, kind);
                    self.lir.append(StoreOp { address, value, kind });
                }
                NodeKind::If => return self.lower_if(id, input(id, &inputs, 0)?),
                NodeKind::Return => {
                    if let Some(&input) = inputs.first() {
                        let kind = self.kind_of(input)?;
                        let input = self.value_of(input)?;
                        self.lir.append(MoveOp {
                            result: Value::Register(RAX, kind),
                            input,
                        });
                    }
                    self.lir.append(JumpOp { target: self.exit });
                    return Ok(());
                }
                other => {
                    return Err(lowering_error(format!(
                        "{id} ({}) is not part of the control chain",
                        other.opcode().name()
                    )))
                }
            }
            cursor = node.next();
        }
        Err(lowering_error("control chain ends without a return"))
    }

    fn lower_if(&mut self, if_node: NodeId, condition: NodeId) -> CompileResult<()> {
        let then_label = self.lir.create_label(format!("{if_node}.then"));
        let else_label = self.lir.create_label(format!("{if_node}.else"));

        // A comparison only feeding this If branches on the flags directly.
        let graph = self.graph;
        let cond = graph.node(condition)?;
        let fused = match cond.kind() {
            NodeKind::IntegerLessThan | NodeKind::IntegerEquals
                if cond.usages() == [if_node] && !self.values.contains_key(&condition) =>
            {
                let c = if cond.kind() == NodeKind::IntegerLessThan {
                    Condition::Less
                } else {
                    Condition::Equal
                };
                let inputs = cond.inputs();
                Some((c, input(condition, inputs, 0)?, input(condition, inputs, 1)?))
            }
            _ => None,
        };
        let (condition, x, y) = match fused {
            Some((c, a, b)) => {
                let (x, y) = self.compare_operands(a, b)?;
                (c, x, y)
            }
            None => {
                let value = self.value_of(condition)?;
                let x = self.in_register(value, StampKind::Int32);
                (Condition::NotEqual, x, Value::Immediate(0))
            }
        };
        self.lir.append(CompareAndBranchOp {
            condition,
            x,
            y,
            on_true: then_label,
            on_false: else_label,
        });

        let successors = graph.node(if_node)?.successors().to_vec();
        for (slot, label) in [then_label, else_label].into_iter().enumerate() {
            self.lir.append(LabelOp { label });
            let scheduled = self.values.clone();
            self.lower_chain(successors.get(slot).copied().flatten())?;
            self.values = scheduled;
        }
        Ok(())
    }
}

/// x86-64 backend: System V lowering plus a linear-scan register assignment.
pub struct X64Backend {
    allocatable: RegBitSet,
    callee_saved: RegBitSet,
}

impl Default for X64Backend {
    fn default() -> Self {
        let cc = SysVAssigner::new();
        Self {
            allocatable: RegBitSet::from_regs(&ALLOCATABLE),
            callee_saved: cc.get_ccinfo().callee_saved_regs.clone(),
        }
    }
}

impl X64Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// First and last instruction index at which each virtual register appears.
    fn live_ranges(lir: &mut Lir<X64Encoder>) -> Vec<Option<(usize, usize)>> {
        let mut ranges = vec![None; lir.vreg_count()];
        lir.for_each_operand(|index, _, value| {
            if let Value::Virtual(vreg, _) = *value {
                if let Some(range) = ranges.get_mut(vreg.index()) {
                    *range = Some(match *range {
                        None => (index, index),
                        Some((start, _)) => (start, index),
                    });
                }
            }
        });
        ranges
    }
}

impl Backend for X64Backend {
    type Assembler = X64Encoder;

    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn new_assembler(&self, config: &CompilerConfig) -> CompileResult<X64Encoder> {
        X64Encoder::new(Buffer::new(config.initial_buffer_capacity, config.byte_order))
    }

    fn lower(&mut self, graph: &Graph, lir: &mut Lir<X64Encoder>) -> CompileResult<()> {
        let exit = lir.create_label("exit");
        let mut lowering = Lowering {
            graph,
            lir,
            values: HashMap::new(),
            exit,
        };
        lowering.lower_params()?;
        let first = graph.node(graph.start())?.next();
        lowering.lower_chain(first)?;
        lir.append(LabelOp { label: exit });
        log::debug!(
            "lowered {} into {} instructions, {} virtual registers",
            graph.name(),
            lir.len(),
            lir.vreg_count()
        );
        Ok(())
    }

    fn allocate(&mut self, lir: &mut Lir<X64Encoder>) -> CompileResult<()> {
        let ranges = Self::live_ranges(lir);
        let mut order: Vec<(usize, usize, VirtualReg)> = ranges
            .iter()
            .enumerate()
            .filter_map(|(v, r)| r.map(|(start, end)| (start, end, VirtualReg(v as u32))))
            .collect();
        order.sort_unstable();

        let mut registers = RegisterFile::new(self.allocatable.clone());
        let mut active: Vec<(usize, AsmReg)> = Vec::new();
        let mut assigned: HashMap<VirtualReg, AsmReg> = HashMap::new();
        for (start, end, vreg) in order {
            active.retain(|&(last, reg)| {
                let expired = last < start;
                if expired {
                    registers.free(reg);
                }
                !expired
            });
            let reg = registers.allocate(GP_BANK).ok_or_else(|| {
                lowering_error(format!(
                    "out of registers at instruction {start}: {} values live",
                    active.len() + 1
                ))
            })?;
            active.push((end, reg));
            assigned.insert(vreg, reg);
        }

        lir.allocate(|vreg, kind| {
            assigned
                .get(&vreg)
                .map(|&reg| Value::Register(reg, kind))
                .ok_or_else(|| CompileError::invariant(format!("{vreg} has no live range")))
        })?;

        let clobbered = registers.clobbered();
        let saved: Vec<AsmReg> = clobbered
            .iter_bank(GP_BANK)
            .filter(|&reg| self.callee_saved.contains(reg))
            .collect();
        log::debug!("registers assigned, saving {:?}", saved);
        lir.insert(0, PrologueOp { saved: saved.clone() })?;
        lir.append(ReturnOp { saved });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kir::parse_graph;
    use crate::lir::LirAssembler;

    fn lower(source: &str) -> (Lir<X64Encoder>, Vec<u8>) {
        let graph = parse_graph(source).unwrap();
        let mut backend = X64Backend::new();
        let mut lir = Lir::new();
        backend.lower(&graph, &mut lir).unwrap();
        backend.allocate(&mut lir).unwrap();
        let mut masm = backend.new_assembler(&CompilerConfig::default()).unwrap();
        lir.emit(&mut masm).unwrap();
        let code = LirAssembler::finish(&mut masm, true).unwrap();
        (lir, code)
    }

    #[test]
    fn test_lower_straight_line() {
        let (lir, code) = lower(
            "graph f(%a: i64, %b: i64) {\n  %s = add %a, %b\n  return %s\n}\n",
        );
        assert_eq!(
            lir.instruction_names(),
            vec!["prologue", "move", "move", "add", "move", "jump", "label", "return"]
        );
        assert_eq!(code.last(), Some(&0xC3));
    }

    #[test]
    fn test_branch_values_are_rescheduled() {
        let (lir, _) = lower(
            "graph f(%a: i32, %b: i32) {\n  %s = add %a, %b\n  %t = lt %a, %b\n  if %t {\n    return %s\n  } else {\n    return %s\n  }\n}\n",
        );
        let names = lir.instruction_names();
        assert_eq!(names.iter().filter(|n| **n == "add").count(), 2);
        assert!(names.contains(&"compare_and_branch"));
        assert!(!names.contains(&"compare"));
    }

    #[test]
    fn test_stack_params() {
        let (mut lir, _) = lower(
            "graph f(%a: i64, %b: i64, %c: i64, %d: i64, %e: i64, %f: i64, %g: i64) {\n  return %g\n}\n",
        );
        let mut slots = Vec::new();
        lir.for_each_operand(|_, _, value| {
            if let Value::StackSlot(offset, _) = *value {
                slots.push(offset);
            }
        });
        assert_eq!(slots, vec![16]);
    }

    #[test]
    fn test_out_of_registers() {
        let mut source = String::from("graph f(%p: ptr) {\n");
        for i in 0..8 {
            source.push_str(&format!("  %r{i} = read i64 %p\n"));
        }
        source.push_str("  %s1 = add %r0, %r1\n");
        for i in 2..8 {
            source.push_str(&format!("  %s{i} = add %s{}, %r{i}\n", i - 1));
        }
        source.push_str("  return %s7\n}\n");
        let graph = parse_graph(&source).unwrap();

        let mut backend = X64Backend::new();
        let mut lir = Lir::new();
        backend.lower(&graph, &mut lir).unwrap();
        assert!(matches!(
            backend.allocate(&mut lir),
            Err(CompileError::Lowering { .. })
        ));
    }

    #[test]
    fn test_callee_saved_registers_are_preserved() {
        let (_, code) = lower("graph f(%a: i64) {\n  %n = neg %a\n  return %n\n}\n");
        let mut decoder = iced_x86::Decoder::with_ip(64, &code, 0, iced_x86::DecoderOptions::NONE);
        let mut pushes = Vec::new();
        while decoder.can_decode() {
            let instruction = decoder.decode();
            if instruction.mnemonic() == iced_x86::Mnemonic::Push {
                pushes.push(instruction.op0_register());
            }
        }
        assert_eq!(pushes, vec![iced_x86::Register::RBP, iced_x86::Register::RBX]);
    }
}
