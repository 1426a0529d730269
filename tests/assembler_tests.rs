//! Label binding and branch patching checked against a real decoder.

mod common;

use common::{decode, init_logging};
use iced_x86::Mnemonic;
use kelp::asm::{Assembler, Buffer, ByteOrder, LabelState, Rel32Patcher};
use kelp::x64::{AluOp, Condition, OperandSize, X64Encoder, RBX, RCX};
use kelp::CompileError;

#[test]
fn test_buffer_values_read_back_in_byte_order() {
    for order in [ByteOrder::Little, ByteOrder::Big] {
        let mut buffer = Buffer::new(2, order);
        buffer.emit_byte(0x7F).unwrap();
        buffer.emit_short(-2).unwrap();
        buffer.emit_int(0x1234_5678).unwrap();
        buffer.emit_long(-3).unwrap();
        assert_eq!(buffer.position(), 15);
        assert_eq!(buffer.get_byte(0).unwrap(), 0x7F);
        assert_eq!(buffer.get_short(1).unwrap(), -2);
        assert_eq!(buffer.get_int(3).unwrap(), 0x1234_5678);
        assert_eq!(buffer.get_long(7).unwrap(), -3);
    }
    let mut little = Buffer::new(4, ByteOrder::Little);
    little.emit_int(1).unwrap();
    assert_eq!(little.bytes(), &[1, 0, 0, 0]);
    let mut big = Buffer::new(4, ByteOrder::Big);
    big.emit_int(1).unwrap();
    assert_eq!(big.bytes(), &[0, 0, 0, 1]);
}

#[test]
fn test_many_patches_to_one_label() {
    let mut asm = Assembler::new(Buffer::new(16, ByteOrder::Little), Rel32Patcher);
    let target = asm.create_label("target");
    let mut sites = Vec::new();
    for _ in 0..5 {
        sites.push(asm.position());
        asm.buffer_mut().emit_int(0).unwrap();
        asm.add_patch_at(target, sites[sites.len() - 1]).unwrap();
    }
    assert_eq!(
        asm.label_state(target).unwrap(),
        LabelState::Unbound { pending_patches: 5 }
    );
    asm.bind_here(target).unwrap();
    for site in sites {
        assert_eq!(asm.buffer().get_int(site).unwrap() as usize, 20 - site);
    }
    assert_eq!(asm.patches_applied(), 5);
    assert_eq!(asm.finish(true).unwrap().len(), 20);
}

#[test]
fn test_loop_branches_decode_to_their_labels() {
    init_logging();
    let mut masm = X64Encoder::with_capacity(16).unwrap();
    let top = masm.create_label("top");
    let exit = masm.create_label("exit");

    masm.mov_ri(OperandSize::S64, RCX, 0).unwrap();
    masm.bind(top).unwrap();
    masm.alu_ri(AluOp::Add, OperandSize::S64, RCX, 1).unwrap();
    masm.alu_rr(AluOp::Cmp, OperandSize::S64, RCX, RBX).unwrap();
    masm.jcc(Condition::Equal, exit).unwrap();
    masm.jmp(top).unwrap();
    masm.bind(exit).unwrap();
    masm.ret().unwrap();

    let top_pos = masm.assembler().label_position(top).unwrap() as u64;
    let exit_pos = masm.assembler().label_position(exit).unwrap() as u64;
    let code = masm.finish(true).unwrap();

    let instructions = decode(&code);
    let je = instructions.iter().find(|i| i.mnemonic() == Mnemonic::Je).unwrap();
    assert_eq!(je.len(), 6);
    assert_eq!(je.near_branch_target(), exit_pos);
    let jmp = instructions.iter().find(|i| i.mnemonic() == Mnemonic::Jmp).unwrap();
    assert_eq!(jmp.len(), 2);
    assert_eq!(jmp.near_branch_target(), top_pos);
    assert_eq!(instructions.last().map(|i| i.mnemonic()), Some(Mnemonic::Ret));
}

#[test]
fn test_far_backward_branch_uses_near_form() {
    let mut masm = X64Encoder::with_capacity(16).unwrap();
    let top = masm.create_label("top");
    masm.bind(top).unwrap();
    for _ in 0..200 {
        masm.nop().unwrap();
    }
    masm.jcc(Condition::NotEqual, top).unwrap();
    let code = masm.finish(true).unwrap();

    let jne = decode(&code).pop().unwrap();
    assert_eq!(jne.mnemonic(), Mnemonic::Jne);
    assert_eq!(jne.len(), 6);
    assert_eq!(jne.near_branch_target(), 0);
}

#[test]
fn test_jump_table_entries_hold_distance_from_base() {
    let mut masm = X64Encoder::with_capacity(16).unwrap();
    let cases: Vec<_> = (0..3).map(|i| masm.create_label(&format!("case{i}"))).collect();
    masm.align(8).unwrap();
    let base = masm.position();
    for &case in &cases {
        masm.emit_jump_table_entry(base, case).unwrap();
    }
    let mut targets = Vec::new();
    for &case in &cases {
        masm.bind(case).unwrap();
        targets.push(masm.position());
        masm.ret().unwrap();
    }
    let code = masm.finish(true).unwrap();
    for (i, target) in targets.into_iter().enumerate() {
        let entry = base + 4 * i;
        let value = i32::from_le_bytes([code[entry], code[entry + 1], code[entry + 2], code[entry + 3]]);
        assert_eq!(value as usize, target - base);
    }
}

#[test]
fn test_unbound_label_fails_finish() {
    let mut masm = X64Encoder::with_capacity(16).unwrap();
    let never = masm.create_label("never");
    masm.jmp(never).unwrap();
    let err = masm.finish(true).unwrap_err();
    assert!(matches!(err, CompileError::LabelUnbound { ref name, .. } if name == "never"));
}
