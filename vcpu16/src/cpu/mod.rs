use std::io::{self, Read, Write};

use crate::isa::{self, flag, memory_map, Instruction, OpCode};

pub mod error;
pub mod ops_arith;
pub mod ops_bitwise;
pub mod ops_control;
pub mod ops_data;
pub mod ops_io;

#[cfg(test)]
mod test_helpers;

// Test must be after test_helpers, rust format tries to move things around.
#[cfg(test)]
mod test;

pub use error::{LoaderError, RuntimeError};

const MEMORY_SIZE: usize = 0x10000;

/// The outcome of a single [`Cpu::step`] call.
#[derive(Debug)]
pub enum StepOutcome {
    /// One instruction executed normally.
    Executed,
    /// The CPU was already halted; `step` is idempotent in this state.
    AlreadyHalted,
    /// A runtime error occurred; the CPU is now halted.
    Fatal(RuntimeError),
}

/// This struct implements the virtual CPU described by the vcpu16 ISA.
///
/// Six 16-bit registers (`A, B, C, D, SP, PC`), a flags byte, and 64 KiB of
/// linear memory with four memory-mapped I/O ports. See [`crate::isa`] for
/// the opcode table and memory map this executes against.
pub struct Cpu {
    regs: [u16; 6],
    flags: u8,
    memory: Box<[u8; MEMORY_SIZE]>,
    running: bool,
    halted: bool,
    cycles: u64,
    timer_enabled: bool,
    timer_value: u16,
    stdin: Box<dyn Read>,
    stdout: Box<dyn Write>,
}

impl Cpu {
    /// Builds a CPU in reset state, wired to the given host I/O streams.
    /// Accepting these as constructor parameters (rather than reaching for
    /// the real `std::io::stdin()`/`stdout()` internally) is what makes the
    /// CPU testable without touching the real host streams.
    pub fn new(stdin: Box<dyn Read>, stdout: Box<dyn Write>) -> Cpu {
        let mut regs = [0u16; 6];
        regs[isa::REG_SP as usize] = memory_map::INITIAL_SP;
        regs[isa::REG_PC as usize] = memory_map::PROGRAM_BASE;

        Cpu {
            regs,
            flags: 0,
            memory: Box::new([0u8; MEMORY_SIZE]),
            running: false,
            halted: false,
            cycles: 0,
            timer_enabled: false,
            timer_value: 0,
            stdin,
            stdout,
        }
    }

    /// Convenience constructor wired to the real host stdin/stdout.
    pub fn new_with_stdio() -> Cpu {
        Cpu::new(Box::new(io::stdin()), Box::new(io::stdout()))
    }

    /// Copies `bytes` into memory starting at `start` and sets PC to
    /// `start`. Fails if the program doesn't fit in the 64 KiB address
    /// space; leaves the CPU's halted state as it was before the call.
    pub fn load_program(&mut self, bytes: &[u8], start: u16) -> Result<(), LoaderError> {
        let end = start as usize + bytes.len();
        if end > MEMORY_SIZE {
            return Err(LoaderError::ProgramOverflow {
                start,
                len: bytes.len(),
            });
        }
        self.memory[start as usize..end].copy_from_slice(bytes);
        self.regs[isa::REG_PC as usize] = start;
        Ok(())
    }

    pub fn regs(&self) -> [u16; 6] {
        self.regs
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn pc(&self) -> u16 {
        self.regs[isa::REG_PC as usize]
    }

    fn set_pc(&mut self, value: u16) {
        self.regs[isa::REG_PC as usize] = value;
    }

    /// Any observable read of a register index outside `0..=5` yields 0;
    /// this tolerance exists because the decoder extracts register
    /// indices from untrusted (loaded, not assembled) code.
    pub fn get_reg(&self, index: u8) -> u16 {
        self.regs.get(index as usize).copied().unwrap_or(0)
    }

    /// Writes to a register index outside `0..=5` are a silent no-op, for
    /// the same reason `get_reg` tolerates them.
    pub fn set_reg(&mut self, index: u8, value: u16) {
        if let Some(slot) = self.regs.get_mut(index as usize) {
            *slot = value;
        }
    }

    fn flag(&self, mask: u8) -> bool {
        self.flags & mask != 0
    }

    fn set_flag(&mut self, mask: u8, value: bool) {
        if value {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }

    fn update_zero_and_negative(&mut self, result: u16) {
        self.set_flag(flag::ZERO, result == 0);
        self.set_flag(flag::NEGATIVE, result & 0x8000 != 0);
    }

    /// Reads from the mapped ports bypass raw memory and invoke host I/O or
    /// timer logic; every other address hits the backing byte array.
    fn read_byte(&mut self, addr: u16) -> u8 {
        match addr {
            memory_map::PORT_STDOUT => 0,
            memory_map::PORT_STDIN => self.read_stdin_byte(),
            memory_map::PORT_TIMER_CONTROL => u8::from(self.timer_enabled),
            memory_map::PORT_TIMER_VALUE => (self.timer_value & 0xFF) as u8,
            _ => self.memory[addr as usize],
        }
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        match addr {
            memory_map::PORT_STDOUT => {
                // Flushed after every write so interleaving with host
                // messages on the same stream stays deterministic.
                let _ = self.stdout.write_all(&[value]);
                let _ = self.stdout.flush();
            }
            memory_map::PORT_STDIN => {}
            memory_map::PORT_TIMER_CONTROL => {
                self.timer_enabled = value != 0;
                if self.timer_enabled {
                    self.timer_value = 0;
                }
            }
            memory_map::PORT_TIMER_VALUE => {
                self.timer_value = value as u16;
            }
            _ => {
                self.memory[addr as usize] = value;
            }
        }
    }

    fn read_stdin_byte(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        match self.stdin.read(&mut buf) {
            Ok(1) => buf[0],
            _ => 0,
        }
    }

    /// A word access is two independent byte accesses in declared order;
    /// one crossing a port boundary is intentionally just two port hits.
    fn read_word(&mut self, addr: u16) -> u16 {
        let low = self.read_byte(addr);
        let high = self.read_byte(addr.wrapping_add(1));
        u16::from_le_bytes([low, high])
    }

    fn write_word(&mut self, addr: u16, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.write_byte(addr, low);
        self.write_byte(addr.wrapping_add(1), high);
    }

    fn push_word(&mut self, value: u16) {
        let sp = self.get_reg(isa::REG_SP).wrapping_sub(2);
        self.set_reg(isa::REG_SP, sp);
        self.write_word(sp, value);
    }

    fn pop_word(&mut self) -> u16 {
        let sp = self.get_reg(isa::REG_SP);
        let value = self.read_word(sp);
        self.set_reg(isa::REG_SP, sp.wrapping_add(2));
        value
    }

    /// Performs exactly one fetch/decode/execute cycle.
    pub fn step(&mut self) -> StepOutcome {
        if self.halted {
            return StepOutcome::AlreadyHalted;
        }

        let start_pc = self.pc();
        let opcode_byte = self.read_byte(start_pc);

        if self.timer_enabled {
            self.timer_value = self.timer_value.wrapping_add(1);
        }

        let opcode = match OpCode::from_byte(opcode_byte) {
            Some(opcode) => opcode,
            None => {
                self.halted = true;
                self.running = false;
                return StepOutcome::Fatal(RuntimeError::UnknownOpcode { pc: start_pc });
            }
        };

        let operand_len = opcode.operand_len() as usize;
        let mut buf = [0u8; 4];
        buf[0] = opcode_byte;
        for (i, slot) in buf[1..=operand_len].iter_mut().enumerate() {
            *slot = self.read_byte(start_pc.wrapping_add(1 + i as u16));
        }

        let (instruction, len) =
            isa::decode_instruction(&buf[..1 + operand_len]).expect("opcode already validated");

        // Advance PC past the operand bytes before executing; control
        // transfer instructions overwrite this explicitly.
        self.set_pc(start_pc.wrapping_add(len as u16));

        match self.execute(instruction, start_pc) {
            Ok(()) => {
                // HLT itself doesn't count as an executed cycle — it's the
                // terminal marker, not work the program did. Every other
                // instruction increments unconditionally.
                if !self.halted {
                    self.cycles = self.cycles.wrapping_add(1);
                }
                StepOutcome::Executed
            }
            Err(err) => {
                self.halted = true;
                self.running = false;
                StepOutcome::Fatal(err)
            }
        }
    }

    /// Steps until halted or a fatal step result.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.running = true;
        self.halted = false;
        loop {
            match self.step() {
                StepOutcome::Executed => continue,
                StepOutcome::AlreadyHalted => return Ok(()),
                StepOutcome::Fatal(err) => return Err(err),
            }
        }
    }

    fn execute(&mut self, instruction: Instruction, pc: u16) -> Result<(), RuntimeError> {
        use Instruction::*;
        match instruction {
            Nop => {}
            LoadImm { r, imm } => ops_data::load_imm(self, r, imm),
            LoadMem { r, addr } => ops_data::load_mem(self, r, addr),
            StoreMem { addr, r } => ops_data::store_mem(self, addr, r),
            Mov { dst, src } => ops_data::mov(self, dst, src),
            Push { r } => ops_data::push(self, r),
            Pop { r } => ops_data::pop(self, r),
            Add { dst, src } => ops_arith::add(self, dst, src),
            AddImm { r, imm } => ops_arith::add_imm(self, r, imm),
            Sub { dst, src } => ops_arith::sub(self, dst, src),
            SubImm { r, imm } => ops_arith::sub_imm(self, r, imm),
            Mul { dst, src } => ops_arith::mul(self, dst, src),
            Div { dst, src } => ops_arith::div(self, dst, src, pc)?,
            Inc { r } => ops_arith::inc(self, r),
            Dec { r } => ops_arith::dec(self, r),
            And { dst, src } => ops_bitwise::and(self, dst, src),
            Or { dst, src } => ops_bitwise::or(self, dst, src),
            Xor { dst, src } => ops_bitwise::xor(self, dst, src),
            Not { r } => ops_bitwise::not(self, r),
            Shl { r, shift } => ops_bitwise::shl(self, r, shift),
            Shr { r, shift } => ops_bitwise::shr(self, r, shift),
            Cmp { a, b } => ops_arith::cmp(self, a, b),
            CmpImm { r, imm } => ops_arith::cmp_imm(self, r, imm),
            Jmp { addr } => ops_control::jmp(self, addr),
            Jz { addr } => ops_control::jz(self, addr),
            Jnz { addr } => ops_control::jnz(self, addr),
            Jc { addr } => ops_control::jc(self, addr),
            Jnc { addr } => ops_control::jnc(self, addr),
            Call { addr } => ops_control::call(self, addr),
            Ret => ops_control::ret(self),
            In { r, port } => ops_io::r#in(self, r, port),
            Out { port, r } => ops_io::out(self, port, r),
            Hlt => {
                self.halted = true;
                self.running = false;
            }
        }
        Ok(())
    }
}
