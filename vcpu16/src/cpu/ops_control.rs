//! Control transfer: JMP, JZ, JNZ, JC, JNC, CALL, RET.
//!
//! The step loop always advances PC past the instruction's operand bytes
//! before dispatching here; these functions only need to overwrite PC when
//! the transfer is actually taken.

use super::Cpu;
use crate::isa::flag;

fn jump_if(cpu: &mut Cpu, addr: u16, condition: bool) {
    if condition {
        cpu.set_pc(addr);
    }
}

/// JMP addr
/// Function: PC := addr, unconditionally
pub fn jmp(cpu: &mut Cpu, addr: u16) {
    jump_if(cpu, addr, true);
}

/// JZ addr — branch if Z=1
pub fn jz(cpu: &mut Cpu, addr: u16) {
    jump_if(cpu, addr, cpu.flag(flag::ZERO));
}

/// JNZ addr — branch if Z=0
pub fn jnz(cpu: &mut Cpu, addr: u16) {
    jump_if(cpu, addr, !cpu.flag(flag::ZERO));
}

/// JC addr — branch if C=1
pub fn jc(cpu: &mut Cpu, addr: u16) {
    jump_if(cpu, addr, cpu.flag(flag::CARRY));
}

/// JNC addr — branch if C=0
pub fn jnc(cpu: &mut Cpu, addr: u16) {
    jump_if(cpu, addr, !cpu.flag(flag::CARRY));
}

/// CALL addr
/// Function: push the address of the instruction following CALL, then
/// PC := addr.
pub fn call(cpu: &mut Cpu, addr: u16) {
    let return_address = cpu.pc();
    cpu.push_word(return_address);
    cpu.set_pc(addr);
}

/// RET
/// Function: PC := pop()
pub fn ret(cpu: &mut Cpu) {
    let address = cpu.pop_word();
    cpu.set_pc(address);
}
