//! Arithmetic: ADD, ADDI, SUB, SUBI, MUL, DIV, INC, DEC.
//!
//! All results truncate to 16 bits; wider intermediates are used only for
//! flag detection, matching the ISA's documented flag formulas.

use super::Cpu;
use crate::isa::flag;
use crate::cpu::error::RuntimeError;

fn add_impl(cpu: &mut Cpu, a: u16, b: u16) -> u16 {
    let full = a as u32 + b as u32;
    let result = full as u16;
    let overflow = ((a ^ result) & (b ^ result) & 0x8000) != 0;
    cpu.set_flag(flag::CARRY, full > 0xFFFF);
    cpu.set_flag(flag::OVERFLOW, overflow);
    cpu.update_zero_and_negative(result);
    result
}

fn sub_impl(cpu: &mut Cpu, a: u16, b: u16) -> u16 {
    let result = a.wrapping_sub(b);
    let overflow = ((a ^ b) & (a ^ result) & 0x8000) != 0;
    cpu.set_flag(flag::CARRY, a < b);
    cpu.set_flag(flag::OVERFLOW, overflow);
    cpu.update_zero_and_negative(result);
    result
}

/// ADD r1,r2 / ADDI r,imm
/// Function: r1 := r1 + r2 (or r := r + imm)
/// Flags: Z N C O
pub fn add(cpu: &mut Cpu, dst: u8, src: u8) {
    let a = cpu.get_reg(dst);
    let b = cpu.get_reg(src);
    let result = add_impl(cpu, a, b);
    cpu.set_reg(dst, result);
}

pub fn add_imm(cpu: &mut Cpu, r: u8, imm: u16) {
    let a = cpu.get_reg(r);
    let result = add_impl(cpu, a, imm);
    cpu.set_reg(r, result);
}

/// SUB r1,r2 / SUBI r,imm
/// Function: r1 := r1 - r2 (or r := r - imm)
/// Flags: Z N C O (C is borrow)
pub fn sub(cpu: &mut Cpu, dst: u8, src: u8) {
    let a = cpu.get_reg(dst);
    let b = cpu.get_reg(src);
    let result = sub_impl(cpu, a, b);
    cpu.set_reg(dst, result);
}

pub fn sub_imm(cpu: &mut Cpu, r: u8, imm: u16) {
    let a = cpu.get_reg(r);
    let result = sub_impl(cpu, a, imm);
    cpu.set_reg(r, result);
}

/// CMP r1,r2 / CMPI r,imm
/// Function: flags from r1 - r2, result discarded
/// Flags: Z N C O
pub fn cmp(cpu: &mut Cpu, a: u8, b: u8) {
    let lhs = cpu.get_reg(a);
    let rhs = cpu.get_reg(b);
    sub_impl(cpu, lhs, rhs);
}

pub fn cmp_imm(cpu: &mut Cpu, r: u8, imm: u16) {
    let lhs = cpu.get_reg(r);
    sub_impl(cpu, lhs, imm);
}

/// MUL r1,r2
/// Function: r1 := low16(r1 * r2)
/// Flags: Z N C (high half nonzero), O := 0
pub fn mul(cpu: &mut Cpu, dst: u8, src: u8) {
    let a = cpu.get_reg(dst) as u32;
    let b = cpu.get_reg(src) as u32;
    let full = a * b;
    let result = full as u16;
    cpu.set_flag(flag::CARRY, (full >> 16) != 0);
    cpu.set_flag(flag::OVERFLOW, false);
    cpu.update_zero_and_negative(result);
    cpu.set_reg(dst, result);
}

/// DIV r1,r2
/// Function: r1 := r1 / r2; r2 := r1 % r2 (remainder clobbers the source
/// register — part of the ISA contract, not a bug).
/// Flags: Z N from the quotient, C := O := 0
pub fn div(cpu: &mut Cpu, dst: u8, src: u8, pc: u16) -> Result<(), RuntimeError> {
    let dividend = cpu.get_reg(dst);
    let divisor = cpu.get_reg(src);
    if divisor == 0 {
        return Err(RuntimeError::DivideByZero { pc });
    }
    let quotient = dividend / divisor;
    let remainder = dividend % divisor;
    cpu.set_flag(flag::CARRY, false);
    cpu.set_flag(flag::OVERFLOW, false);
    cpu.update_zero_and_negative(quotient);
    cpu.set_reg(dst, quotient);
    cpu.set_reg(src, remainder);
    Ok(())
}

/// INC r / DEC r
/// Function: r := r +/- 1
/// Flags: Z N, C := O := 0
pub fn inc(cpu: &mut Cpu, r: u8) {
    let value = cpu.get_reg(r).wrapping_add(1);
    cpu.set_flag(flag::CARRY, false);
    cpu.set_flag(flag::OVERFLOW, false);
    cpu.update_zero_and_negative(value);
    cpu.set_reg(r, value);
}

pub fn dec(cpu: &mut Cpu, r: u8) {
    let value = cpu.get_reg(r).wrapping_sub(1);
    cpu.set_flag(flag::CARRY, false);
    cpu.set_flag(flag::OVERFLOW, false);
    cpu.update_zero_and_negative(value);
    cpu.set_reg(r, value);
}
