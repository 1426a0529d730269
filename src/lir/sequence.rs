// Lir is the instruction sequence of one compilation unit. Lowering appends boxed
// instructions and allocates virtual registers and labels through it; labels are
// recorded by name and re-created on the machine assembler, in the same order, when
// emission starts, so the LabelIds handed out during lowering stay valid. allocate()
// is the single hand-off to a register allocator: the callback is asked once per
// virtual register and every operand referring to it is rewritten to the returned
// location. emit() walks the instructions in program order and refuses to emit one
// whose operands are not all concrete, whose def or temp is an immediate, or whose
// alive operand shares storage with a def or temp of the same instruction.

//! Ordered LIR instruction sequence.

use super::instruction::{LirAssembler, LirInstruction};
use super::operand::{OperandMode, Value, VirtualReg};
use crate::asm::LabelId;
use crate::core::error::{CompileError, CompileResult};
use crate::ir::StampKind;
use hashbrown::HashMap;

pub struct Lir<M> {
    instructions: Vec<Box<dyn LirInstruction<M>>>,
    vreg_kinds: Vec<StampKind>,
    labels: Vec<String>,
}

impl<M> Default for Lir<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Lir<M> {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            vreg_kinds: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn new_vreg(&mut self, kind: StampKind) -> Value {
        let vreg = VirtualReg(self.vreg_kinds.len() as u32);
        self.vreg_kinds.push(kind);
        Value::Virtual(vreg, kind)
    }

    pub fn vreg_count(&self) -> usize {
        self.vreg_kinds.len()
    }

    pub fn vreg_kind(&self, vreg: VirtualReg) -> Option<StampKind> {
        self.vreg_kinds.get(vreg.index()).copied()
    }

    pub fn create_label(&mut self, name: impl Into<String>) -> LabelId {
        let id = LabelId::new(self.labels.len() as u32);
        self.labels.push(name.into());
        id
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn append(&mut self, instruction: impl LirInstruction<M> + 'static) {
        self.instructions.push(Box::new(instruction));
    }

    /// Insert before the instruction at `index`; `index == len()` appends.
    pub fn insert(&mut self, index: usize, instruction: impl LirInstruction<M> + 'static) -> CompileResult<()> {
        if index > self.instructions.len() {
            return Err(CompileError::invariant(format!(
                "cannot insert LIR instruction at {index} (length {})",
                self.instructions.len()
            )));
        }
        self.instructions.insert(index, Box::new(instruction));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction_names(&self) -> Vec<&'static str> {
        self.instructions.iter().map(|i| i.name()).collect()
    }

    /// Visit every operand of every instruction in program order, with the
    /// index of the instruction it belongs to.
    pub fn for_each_operand(&mut self, mut visitor: impl FnMut(usize, OperandMode, &mut Value)) {
        for (index, instruction) in self.instructions.iter_mut().enumerate() {
            instruction.visit_operands(&mut |mode, value| visitor(index, mode, value));
        }
    }

    /// Replace every virtual register with the location `assign` picks for it.
    /// `assign` is called once per distinct virtual register, in order of first
    /// appearance.
    pub fn allocate(
        &mut self,
        mut assign: impl FnMut(VirtualReg, StampKind) -> CompileResult<Value>,
    ) -> CompileResult<()> {
        let mut assigned: HashMap<VirtualReg, Value> = HashMap::new();
        let mut failure: Option<CompileError> = None;
        self.for_each_operand(|_, _, value| {
            if failure.is_some() {
                return;
            }
            let Value::Virtual(vreg, kind) = *value else {
                return;
            };
            if let Some(&location) = assigned.get(&vreg) {
                *value = location;
                return;
            }
            match assign(vreg, kind) {
                Ok(location) if location.is_concrete() => {
                    log::trace!("allocate {} -> {}", vreg, location);
                    assigned.insert(vreg, location);
                    *value = location;
                }
                Ok(location) => {
                    failure = Some(CompileError::invariant(format!(
                        "allocator mapped {vreg} to non-concrete {location}"
                    )));
                }
                Err(err) => failure = Some(err),
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_operands(instruction: &mut Box<dyn LirInstruction<M>>) -> CompileResult<()> {
        let name = instruction.name();
        let mut failure: Option<CompileError> = None;
        let mut alive = Vec::new();
        let mut written = Vec::new();
        let mut index = 0;
        instruction.visit_operands(&mut |mode, value| {
            let current = index;
            index += 1;
            if failure.is_some() {
                return;
            }
            if !value.is_concrete() {
                failure = Some(CompileError::UnallocatedOperand {
                    instruction: name,
                    index: current,
                    reason: format!("{value} is still virtual"),
                });
                return;
            }
            match mode {
                OperandMode::Def | OperandMode::Temp => match value.location() {
                    Some(location) => written.push(location),
                    None => {
                        failure = Some(CompileError::UnallocatedOperand {
                            instruction: name,
                            index: current,
                            reason: format!("{mode:?} operand {value} has no storage"),
                        })
                    }
                },
                OperandMode::Alive => alive.extend(value.location()),
                OperandMode::Use => {}
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(location) = alive.iter().find(|l| written.contains(l)) {
            return Err(CompileError::AliveOperandClobbered {
                instruction: name,
                location: location.to_string(),
            });
        }
        Ok(())
    }

    /// Emit every instruction in program order; returns the number emitted.
    pub fn emit(&mut self, masm: &mut M) -> CompileResult<usize>
    where
        M: LirAssembler,
    {
        for (index, name) in self.labels.iter().enumerate() {
            let label = masm.create_label(name);
            if label.index() != index {
                return Err(CompileError::invariant(format!(
                    "assembler created {label} for LIR label {index} ({name})"
                )));
            }
        }
        for instruction in &mut self.instructions {
            Self::check_operands(instruction)?;
            log::trace!("emit {}", instruction.name());
            instruction.emit_code(masm)?;
        }
        Ok(self.instructions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::register_file::AsmReg;

    /// Records emitted instruction names.
    #[derive(Default)]
    struct Recorder {
        labels: Vec<String>,
        emitted: Vec<&'static str>,
    }

    impl LirAssembler for Recorder {
        fn create_label(&mut self, name: &str) -> LabelId {
            self.labels.push(name.to_string());
            LabelId::new(self.labels.len() as u32 - 1)
        }

        fn labels_bound(&self) -> usize {
            0
        }

        fn patches_applied(&self) -> usize {
            0
        }

        fn finish(&mut self, _trim: bool) -> CompileResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct Op {
        name: &'static str,
        operands: Vec<(OperandMode, Value)>,
    }

    impl LirInstruction<Recorder> for Op {
        fn name(&self) -> &'static str {
            self.name
        }

        fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
            for (mode, value) in &mut self.operands {
                visitor(*mode, value);
            }
        }

        fn emit_code(&self, masm: &mut Recorder) -> CompileResult<()> {
            masm.emitted.push(self.name);
            Ok(())
        }
    }

    fn reg(id: u8) -> Value {
        Value::Register(AsmReg::gp(id), StampKind::Int64)
    }

    #[test]
    fn test_allocate_is_consistent() {
        let mut lir: Lir<Recorder> = Lir::new();
        let a = lir.new_vreg(StampKind::Int64);
        let b = lir.new_vreg(StampKind::Int64);
        lir.append(Op {
            name: "first",
            operands: vec![(OperandMode::Def, a), (OperandMode::Use, b)],
        });
        lir.append(Op {
            name: "second",
            operands: vec![(OperandMode::Use, a)],
        });

        let mut calls = 0;
        lir.allocate(|vreg, _| {
            calls += 1;
            Ok(reg(vreg.0 as u8 + 10))
        })
        .unwrap();
        assert_eq!(calls, 2);

        let mut seen = Vec::new();
        lir.for_each_operand(|index, _, value| seen.push((index, *value)));
        assert_eq!(seen, vec![(0, reg(10)), (0, reg(11)), (1, reg(10))]);
        assert_eq!(lir.instruction_names(), vec!["first", "second"]);

        let mut masm = Recorder::default();
        assert_eq!(lir.emit(&mut masm).unwrap(), 2);
        assert_eq!(masm.emitted, vec!["first", "second"]);
    }

    #[test]
    fn test_unallocated_operand_rejected() {
        let mut lir: Lir<Recorder> = Lir::new();
        let a = lir.new_vreg(StampKind::Int32);
        lir.append(Op {
            name: "op",
            operands: vec![(OperandMode::Def, reg(0)), (OperandMode::Use, a)],
        });
        let mut masm = Recorder::default();
        assert!(matches!(
            lir.emit(&mut masm),
            Err(CompileError::UnallocatedOperand { instruction: "op", index: 1, .. })
        ));
        assert!(masm.emitted.is_empty());
    }

    #[test]
    fn test_alive_clobber_rejected() {
        let mut lir: Lir<Recorder> = Lir::new();
        lir.append(Op {
            name: "loop",
            operands: vec![
                (OperandMode::Alive, reg(3)),
                (OperandMode::Temp, Value::Register(AsmReg::gp(3), StampKind::Int32)),
            ],
        });
        let mut masm = Recorder::default();
        assert!(matches!(
            lir.emit(&mut masm),
            Err(CompileError::AliveOperandClobbered { instruction: "loop", .. })
        ));
    }

    #[test]
    fn test_use_may_share_def_storage() {
        let mut lir: Lir<Recorder> = Lir::new();
        lir.append(Op {
            name: "add",
            operands: vec![
                (OperandMode::Def, reg(1)),
                (OperandMode::Use, reg(1)),
                (OperandMode::Alive, Value::Immediate(4)),
            ],
        });
        let mut masm = Recorder::default();
        assert_eq!(lir.emit(&mut masm).unwrap(), 1);
    }

    #[test]
    fn test_labels_recreated_in_order() {
        let mut lir: Lir<Recorder> = Lir::new();
        let first = lir.create_label("entry");
        let second = lir.create_label("exit");
        assert_eq!((first.index(), second.index()), (0, 1));
        let mut masm = Recorder::default();
        lir.emit(&mut masm).unwrap();
        assert_eq!(masm.labels, vec!["entry", "exit"]);
    }
}
