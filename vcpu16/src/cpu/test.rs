use super::test_helpers::*;
use super::*;
use crate::isa::{self, memory_map, Instruction};
use std::io::Cursor;

fn cpu_with_program(instructions: &[Instruction]) -> Cpu {
    let mut bytes = Vec::new();
    for instruction in instructions {
        bytes.extend(instruction.encode());
    }
    let mut cpu = Cpu::new(Box::new(Cursor::new(Vec::new())), Box::new(Vec::new()));
    cpu.load_program(&bytes, memory_map::PROGRAM_BASE).unwrap();
    cpu
}

#[test]
fn reset_state_matches_spec() {
    let cpu = Cpu::new_with_stdio();
    assert_eq!(cpu.regs(), [0, 0, 0, 0, memory_map::INITIAL_SP, memory_map::PROGRAM_BASE]);
    assert_eq!(cpu.flags(), 0);
    assert_eq!(cpu.cycles(), 0);
    assert!(!cpu.is_halted());
}

#[test]
fn register_index_above_five_is_tolerant() {
    let mut cpu = cpu_with_program(&[Instruction::Hlt]);
    assert_eq!(cpu.get_reg(6), 0);
    assert_eq!(cpu.get_reg(200), 0);
    cpu.set_reg(9, 0x1234);
    assert_eq!(cpu.get_reg(9), 0);
    // And the write didn't corrupt any real register.
    assert_eq!(cpu.regs()[0..4], [0, 0, 0, 0]);
}

#[test]
fn cycles_increment_once_per_step() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 1 },
        Instruction::LoadImm { r: isa::REG_B, imm: 2 },
        Instruction::Hlt,
    ]);
    let before = cpu.cycles();
    cpu.step();
    assert_eq!(cpu.cycles(), before + 1);
    cpu.step();
    assert_eq!(cpu.cycles(), before + 2);
}

#[test]
fn step_after_halt_is_idempotent() {
    let mut cpu = cpu_with_program(&[Instruction::Hlt]);
    cpu.step();
    assert!(cpu.is_halted());
    let cycles_after_halt = cpu.cycles();
    match cpu.step() {
        StepOutcome::AlreadyHalted => {}
        other => panic!("expected AlreadyHalted, got {:?}", other),
    }
    assert_eq!(cpu.cycles(), cycles_after_halt);
}

#[test]
fn push_then_pop_round_trips_and_restores_sp() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 0x1234 },
        Instruction::Push { r: isa::REG_A },
        Instruction::LoadImm { r: isa::REG_A, imm: 0 },
        Instruction::Pop { r: isa::REG_A },
        Instruction::Hlt,
    ]);
    let initial_sp = cpu.get_reg(isa::REG_SP);
    cpu.run().unwrap();
    assert_eq!(cpu.get_reg(isa::REG_A), 0x1234);
    assert_eq!(cpu.get_reg(isa::REG_SP), initial_sp);
}

#[test]
fn call_then_ret_returns_past_the_call_operand() {
    // CALL F; HLT          (at 0x0100: 3-byte CALL, then HLT at 0x0103)
    // F: LOAD A,7; RET
    let call_site_len = Instruction::Call { addr: 0 }.opcode().encoded_len();
    let hlt_at = memory_map::PROGRAM_BASE + call_site_len;
    let f_at = hlt_at + 1; // past the HLT byte

    let mut bytes = Vec::new();
    bytes.extend(Instruction::Call { addr: f_at }.encode());
    bytes.extend(Instruction::Hlt.encode());

    let mut cpu = Cpu::new(Box::new(Cursor::new(Vec::new())), Box::new(Vec::new()));
    // Load the subroutine first so the main program's `load_program` call
    // (which also resets PC) runs last and leaves PC at the entry point.
    let mut tail = Instruction::LoadImm { r: isa::REG_A, imm: 7 }.encode();
    tail.extend(Instruction::Ret.encode());
    cpu.load_program(&tail, f_at).unwrap();
    cpu.load_program(&bytes, memory_map::PROGRAM_BASE).unwrap();
    let initial_sp = cpu.get_reg(isa::REG_SP);

    cpu.run().unwrap();

    assert_eq!(cpu.get_reg(isa::REG_A), 7);
    assert_eq!(cpu.pc(), hlt_at + 1);
    assert_eq!(cpu.get_reg(isa::REG_SP), initial_sp);
    assert!(cpu.is_halted());
}

#[test]
fn divide_by_zero_halts_with_runtime_error() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 10 },
        Instruction::LoadImm { r: isa::REG_B, imm: 0 },
        Instruction::Div { dst: isa::REG_A, src: isa::REG_B },
        Instruction::Hlt,
    ]);
    let err = cpu.run().unwrap_err();
    assert!(matches!(err, RuntimeError::DivideByZero { .. }));
    assert!(cpu.is_halted());
}

#[test]
fn div_clobbers_source_register_with_remainder() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 17 },
        Instruction::LoadImm { r: isa::REG_B, imm: 5 },
        Instruction::Div { dst: isa::REG_A, src: isa::REG_B },
        Instruction::Hlt,
    ]);
    cpu.run().unwrap();
    assert_eq!(cpu.get_reg(isa::REG_A), 3);
    assert_eq!(cpu.get_reg(isa::REG_B), 2);
}

#[test]
fn unsigned_overflow_sets_zero_and_carry() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 0xFFFF },
        Instruction::AddImm { r: isa::REG_A, imm: 1 },
        Instruction::Hlt,
    ]);
    cpu.run().unwrap();
    assert_eq!(cpu.get_reg(isa::REG_A), 0x0000);
    assert!(cpu.flags() & isa::flag::ZERO != 0);
    assert!(cpu.flags() & isa::flag::CARRY != 0);
}

#[test]
fn signed_overflow_sets_negative_and_overflow_without_carry() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 0x7FFF },
        Instruction::AddImm { r: isa::REG_A, imm: 1 },
        Instruction::Hlt,
    ]);
    cpu.run().unwrap();
    assert_eq!(cpu.get_reg(isa::REG_A), 0x8000);
    assert!(cpu.flags() & isa::flag::NEGATIVE != 0);
    assert!(cpu.flags() & isa::flag::OVERFLOW != 0);
    assert!(cpu.flags() & isa::flag::CARRY == 0);
}

#[test]
fn shift_by_zero_preserves_value_and_clears_carry() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 0xBEEF },
        Instruction::Shl { r: isa::REG_A, shift: 0 },
        Instruction::Hlt,
    ]);
    cpu.run().unwrap();
    assert_eq!(cpu.get_reg(isa::REG_A), 0xBEEF);
    assert!(cpu.flags() & isa::flag::CARRY == 0);

    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 0xBEEF },
        Instruction::Shr { r: isa::REG_A, shift: 0 },
        Instruction::Hlt,
    ]);
    cpu.run().unwrap();
    assert_eq!(cpu.get_reg(isa::REG_A), 0xBEEF);
    assert!(cpu.flags() & isa::flag::CARRY == 0);
}

#[test]
fn program_exactly_filling_memory_loads_but_one_more_byte_overflows() {
    let start = 0xFFF0u16;
    let fits = vec![0u8; 0x10];
    let mut cpu = Cpu::new_with_stdio();
    assert!(cpu.load_program(&fits, start).is_ok());

    let overflows = vec![0u8; 0x11];
    let mut cpu = Cpu::new_with_stdio();
    assert!(matches!(
        cpu.load_program(&overflows, start),
        Err(LoaderError::ProgramOverflow { .. })
    ));
}

#[test]
fn out_to_stdout_port_writes_low_byte() {
    let (_cpu, stdout) = run_source("LOAD A,72\nOUT 0xFF00,A\nHLT\n");
    assert_eq!(stdout.contents(), vec![b'H']);
}

#[test]
fn timer_increments_once_per_step_while_enabled() {
    let mut cpu = cpu_with_program(&[
        Instruction::LoadImm { r: isa::REG_A, imm: 1 },
        Instruction::Out { port: memory_map::PORT_TIMER_CONTROL, r: isa::REG_A },
        Instruction::Nop,
        Instruction::Nop,
        Instruction::In { r: isa::REG_B, port: memory_map::PORT_TIMER_VALUE },
        Instruction::Hlt,
    ]);
    cpu.run().unwrap();
    // timer increments on the step that reads the opcode byte, including
    // the NOP->NOP->IN steps after it was enabled.
    assert_eq!(cpu.get_reg(isa::REG_B), 3);
}

#[test]
fn stdin_port_reads_a_byte_and_zero_on_eof() {
    let (mut cpu, _stdout) = assemble_and_load_with_stdin("LOAD A,0\nHLT\n", "X");
    let byte = cpu.read_byte(memory_map::PORT_STDIN);
    assert_eq!(byte, b'X');
    let eof_byte = cpu.read_byte(memory_map::PORT_STDIN);
    assert_eq!(eof_byte, 0);
}
