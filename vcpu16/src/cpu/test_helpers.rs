#![cfg(test)]

use std::cell::RefCell;
use std::io::{Cursor, Write};
use std::rc::Rc;

use crate::asm::Assembler;
use crate::cpu::Cpu;
use crate::isa::memory_map;

/// An in-memory stdout the test can inspect after the CPU halts. Cheaply
/// cloneable so one handle can be handed to `Cpu::new` while another stays
/// with the test.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> SharedBuffer {
        SharedBuffer(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Assembles `source`, loads it at the program base, and returns the CPU
/// along with its stdout buffer, without running it.
pub fn assemble_and_load(source: &str) -> (Cpu, SharedBuffer) {
    assemble_and_load_with_stdin(source, "")
}

pub fn assemble_and_load_with_stdin(source: &str, stdin: &str) -> (Cpu, SharedBuffer) {
    let image = Assembler::assemble(source).unwrap_or_else(|err| {
        panic!("assembly of:\n{}\nfailed: {}", source, err);
    });
    let stdout = SharedBuffer::new();
    let mut cpu = Cpu::new(
        Box::new(Cursor::new(stdin.as_bytes().to_vec())),
        Box::new(stdout.clone()),
    );
    cpu.load_program(&image.bytes, memory_map::PROGRAM_BASE)
        .expect("assembled program should fit in memory");
    (cpu, stdout)
}

/// Assembles, loads, and runs `source` to halt.
pub fn run_source(source: &str) -> (Cpu, SharedBuffer) {
    let (mut cpu, stdout) = assemble_and_load(source);
    cpu.run().unwrap_or_else(|err| {
        panic!("program:\n{}\nfailed at runtime: {}", source, err);
    });
    (cpu, stdout)
}
