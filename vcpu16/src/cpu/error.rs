use thiserror::Error;

/// Errors that can happen while loading a program image into memory,
/// whether that image came from disk (the `FileNotFound`/`IOError`
/// variants, used by `vcpu16-cli`) or from an in-memory byte slice handed
/// directly to [`crate::cpu::Cpu::load_program`] (`ProgramOverflow`).
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("program file not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error loading program: {0}")]
    IOError(#[from] std::io::Error),

    #[error("program of {len} bytes does not fit at {start:#06x} (memory ends at 0x10000)")]
    ProgramOverflow { start: u16, len: usize },
}

/// Errors that halt the CPU mid-execution. Both variants carry the program
/// counter of the offending instruction, per the spec's error taxonomy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("divide by zero at PC={pc:#06x}")]
    DivideByZero { pc: u16 },

    #[error("unknown opcode at PC={pc:#06x}")]
    UnknownOpcode { pc: u16 },
}
