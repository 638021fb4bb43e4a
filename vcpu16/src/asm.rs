//! Two-pass source-to-image translator.
//!
//! Pass 1 walks the source once, recording label addresses and the byte
//! length contributed by each line, without resolving any operand values.
//! Pass 2 walks it again, this time resolving numbers and labels and
//! emitting real bytes. Splitting the work this way is what lets a label
//! be referenced before it's defined.

use std::collections::HashMap;

use colored::*;
use thiserror::Error;

use crate::isa::{self, memory_map, match_mnemonic, Instruction, Mnemonic};

const LABEL_TABLE_CAPACITY: usize = 256;
const MAX_LABEL_LEN: usize = 63;
const OUTPUT_CAP: usize = 0x10000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("line {line}: unknown instruction \"{mnemonic}\"")]
    UnknownInstruction { line: usize, mnemonic: String },

    #[error("line {line}: invalid register \"{text}\"")]
    InvalidRegister { line: usize, text: String },

    #[error("line {line}: invalid number \"{text}\"")]
    InvalidNumber { line: usize, text: String },

    #[error("line {line}: malformed memory operand \"{text}\"")]
    MalformedMemoryOperand { line: usize, text: String },

    #[error("line {line}: undefined label \"{name}\"")]
    UndefinedLabel { line: usize, name: String },

    #[error("line {line}: duplicate label \"{name}\"")]
    DuplicateLabel { line: usize, name: String },

    #[error("label table is full (max {max} labels)")]
    LabelTableFull { line: usize, max: usize },

    #[error("line {line}: STORE requires a memory destination, e.g. \"STORE [addr],r\"")]
    BadStoreShape { line: usize },
}

impl AssemblerError {
    pub fn line(&self) -> usize {
        match self {
            AssemblerError::UnknownInstruction { line, .. }
            | AssemblerError::InvalidRegister { line, .. }
            | AssemblerError::InvalidNumber { line, .. }
            | AssemblerError::MalformedMemoryOperand { line, .. }
            | AssemblerError::UndefinedLabel { line, .. }
            | AssemblerError::DuplicateLabel { line, .. }
            | AssemblerError::LabelTableFull { line, .. }
            | AssemblerError::BadStoreShape { line } => *line,
        }
    }

    /// Renders the error with a few lines of source context, in the
    /// cyan-line-number / bright-red-arrow style used elsewhere for
    /// diagnostics meant for a terminal.
    pub fn render(&self, source: &str) -> String {
        let error_row = self.line().saturating_sub(1);
        let range = 3i64;
        let min = (error_row as i64 - range).max(0) as usize;
        let max = (error_row as i64 + range) as usize;

        let mut rendered = String::from("\n");
        for (row_index, row_text) in source.lines().enumerate() {
            if row_index > max {
                break;
            }
            if row_index < min {
                continue;
            }
            rendered.push_str(&format!("{}", format!("{:>4}: ", row_index + 1).cyan()));
            rendered.push_str(&format!("{}\n", row_text.bright_white()));
            if row_index == error_row {
                rendered.push_str(&format!("      {}\n", format!("^ {}", self).bright_red()));
            }
        }
        rendered
    }
}

/// Label name to resolved 16-bit address, built during pass 1 and consulted
/// during pass 2.
#[derive(Debug, Default)]
pub struct LabelTable {
    addresses: HashMap<String, u16>,
}

impl LabelTable {
    fn new() -> LabelTable {
        LabelTable {
            addresses: HashMap::new(),
        }
    }

    fn define(&mut self, name: &str, address: u16, line: usize) -> Result<(), AssemblerError> {
        // Long names are accepted but truncated, matching the silent
        // truncation the rest of the toolchain applies to numeric literals
        // and output-size overflow rather than rejecting them outright.
        let name = if name.len() > MAX_LABEL_LEN {
            &name[..MAX_LABEL_LEN]
        } else {
            name
        };
        if self.addresses.contains_key(name) {
            return Err(AssemblerError::DuplicateLabel {
                line,
                name: name.to_string(),
            });
        }
        if self.addresses.len() >= LABEL_TABLE_CAPACITY {
            return Err(AssemblerError::LabelTableFull {
                line,
                max: LABEL_TABLE_CAPACITY,
            });
        }
        self.addresses.insert(name.to_string(), address);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.addresses.get(name).copied()
    }
}

/// The assembled byte image plus the label table that produced it.
///
/// `truncated` is set if the image would have exceeded the 64 KiB output
/// cap; bytes past the cap are silently dropped, matching the source
/// toolchain's behavior, but the library surfaces the fact here so a
/// caller that cares (the CLI) can warn about it instead of staying silent
/// forever.
#[derive(Debug, Default)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub labels: LabelTable,
    pub truncated: bool,
}

/// A source line after comment-stripping and label extraction, not yet
/// operand-resolved. Shared by both passes so they can't disagree about
/// where statements fall.
struct Statement {
    line: usize,
    label: Option<String>,
    mnemonic: Option<Mnemonic>,
    arg1: String,
    arg2: String,
}

fn fold_argument(text: &str) -> String {
    let text = text.trim();
    let first = text.chars().next();
    match first {
        Some(c) if c.is_ascii_digit() || c == '[' => text.to_string(),
        _ => text.to_ascii_uppercase(),
    }
}

/// Runs steps 1-7 of the per-line pipeline (stripping, case-folding, label
/// extraction, mnemonic/argument splitting) without resolving any operand
/// values. Returns `None` for blank/comment-only lines.
fn parse_statement(raw: &str, line: usize) -> Result<Option<Statement>, AssemblerError> {
    let trimmed = raw.trim();
    let without_comment = trimmed
        .split(|c| c == ';' || c == '#')
        .next()
        .unwrap_or("")
        .trim();
    if without_comment.is_empty() {
        return Ok(None);
    }

    let (label, rest) = match without_comment.split_once(':') {
        Some((label_text, rest)) => (Some(label_text.trim().to_ascii_uppercase()), rest.trim()),
        None => (None, without_comment),
    };

    if rest.is_empty() {
        return Ok(Some(Statement {
            line,
            label,
            mnemonic: None,
            arg1: String::new(),
            arg2: String::new(),
        }));
    }

    let (mnemonic_text, arg_text) = match rest.split_once(char::is_whitespace) {
        Some((m, a)) => (m, a.trim()),
        None => (rest, ""),
    };
    let mnemonic_text = mnemonic_text.to_ascii_uppercase();
    let mnemonic = match_mnemonic(&mnemonic_text).ok_or_else(|| AssemblerError::UnknownInstruction {
        line,
        mnemonic: mnemonic_text.clone(),
    })?;

    let (arg1, arg2) = match arg_text.split_once(',') {
        Some((a, b)) => (fold_argument(a), fold_argument(b)),
        None if arg_text.is_empty() => (String::new(), String::new()),
        None => (fold_argument(arg_text), String::new()),
    };

    Ok(Some(Statement {
        line,
        label,
        mnemonic: Some(mnemonic),
        arg1,
        arg2,
    }))
}

fn parse_number(text: &str, line: usize) -> Result<u16, AssemblerError> {
    let err = || AssemblerError::InvalidNumber {
        line,
        text: text.to_string(),
    };
    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (text, 10),
    };
    if digits.is_empty() {
        return Err(err());
    }
    u64::from_str_radix(digits, radix)
        .map(|value| value as u16)
        .map_err(|_| err())
}

fn parse_register(text: &str, line: usize) -> Result<u8, AssemblerError> {
    isa::register_index(text).ok_or_else(|| AssemblerError::InvalidRegister {
        line,
        text: text.to_string(),
    })
}

fn parse_shift(text: &str, line: usize) -> Result<u8, AssemblerError> {
    parse_number(text, line).map(|value| value as u8)
}

fn parse_memory_operand(text: &str, line: usize, labels: &LabelTable) -> Result<u16, AssemblerError> {
    let malformed = || AssemblerError::MalformedMemoryOperand {
        line,
        text: text.to_string(),
    };
    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(malformed)?
        .trim();
    if let Ok(value) = parse_number(inner, line) {
        return Ok(value);
    }
    let name = inner.to_ascii_uppercase();
    labels
        .get(&name)
        .ok_or(AssemblerError::UndefinedLabel { line, name })
}

fn parse_jump_target(text: &str, line: usize, labels: &LabelTable) -> Result<u16, AssemblerError> {
    if let Ok(value) = parse_number(text, line) {
        return Ok(value);
    }
    labels.get(text).ok_or_else(|| AssemblerError::UndefinedLabel {
        line,
        name: text.to_string(),
    })
}

/// Picks the exact opcode for a statement, which is all pass 1 needs to
/// compute this line's encoded length — operand *values* don't matter yet,
/// only whether a `LOAD` operand is bracketed.
fn select_opcode(mnemonic: Mnemonic, arg2: &str) -> isa::OpCode {
    use isa::OpCode::*;
    match mnemonic {
        Mnemonic::Nop => NOP,
        Mnemonic::Load => {
            if arg2.starts_with('[') {
                LOAD_MEM
            } else {
                LOAD_IMM
            }
        }
        Mnemonic::Store => STORE_MEM,
        Mnemonic::Mov => MOV,
        Mnemonic::Push => PUSH,
        Mnemonic::Pop => POP,
        Mnemonic::Add => ADD,
        Mnemonic::AddI => ADDI,
        Mnemonic::Sub => SUB,
        Mnemonic::SubI => SUBI,
        Mnemonic::Mul => MUL,
        Mnemonic::Div => DIV,
        Mnemonic::Inc => INC,
        Mnemonic::Dec => DEC,
        Mnemonic::And => AND,
        Mnemonic::Or => OR,
        Mnemonic::Xor => XOR,
        Mnemonic::Not => NOT,
        Mnemonic::Shl => SHL,
        Mnemonic::Shr => SHR,
        Mnemonic::Cmp => CMP,
        Mnemonic::CmpI => CMPI,
        Mnemonic::Jmp => JMP,
        Mnemonic::Jz => JZ,
        Mnemonic::Jnz => JNZ,
        Mnemonic::Jc => JC,
        Mnemonic::Jnc => JNC,
        Mnemonic::Call => CALL,
        Mnemonic::Ret => RET,
        Mnemonic::In => IN,
        Mnemonic::Out => OUT,
        Mnemonic::Hlt => HLT,
    }
}

/// Resolves a statement's operands into a concrete `Instruction`, using the
/// label table pass 1 built. Called only from pass 2.
fn build_instruction(
    mnemonic: Mnemonic,
    arg1: &str,
    arg2: &str,
    line: usize,
    labels: &LabelTable,
) -> Result<Instruction, AssemblerError> {
    use Mnemonic::*;
    Ok(match mnemonic {
        Nop => Instruction::Nop,
        Load => {
            let r = parse_register(arg1, line)?;
            if arg2.starts_with('[') {
                Instruction::LoadMem {
                    r,
                    addr: parse_memory_operand(arg2, line, labels)?,
                }
            } else {
                Instruction::LoadImm {
                    r,
                    imm: parse_number(arg2, line)?,
                }
            }
        }
        Store => {
            if !arg1.starts_with('[') {
                return Err(AssemblerError::BadStoreShape { line });
            }
            Instruction::StoreMem {
                addr: parse_memory_operand(arg1, line, labels)?,
                r: parse_register(arg2, line)?,
            }
        }
        Mov => Instruction::Mov {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        Push => Instruction::Push {
            r: parse_register(arg1, line)?,
        },
        Pop => Instruction::Pop {
            r: parse_register(arg1, line)?,
        },
        Add => Instruction::Add {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        AddI => Instruction::AddImm {
            r: parse_register(arg1, line)?,
            imm: parse_number(arg2, line)?,
        },
        Sub => Instruction::Sub {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        SubI => Instruction::SubImm {
            r: parse_register(arg1, line)?,
            imm: parse_number(arg2, line)?,
        },
        Mul => Instruction::Mul {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        Div => Instruction::Div {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        Inc => Instruction::Inc {
            r: parse_register(arg1, line)?,
        },
        Dec => Instruction::Dec {
            r: parse_register(arg1, line)?,
        },
        And => Instruction::And {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        Or => Instruction::Or {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        Xor => Instruction::Xor {
            dst: parse_register(arg1, line)?,
            src: parse_register(arg2, line)?,
        },
        Not => Instruction::Not {
            r: parse_register(arg1, line)?,
        },
        Shl => Instruction::Shl {
            r: parse_register(arg1, line)?,
            shift: parse_shift(arg2, line)?,
        },
        Shr => Instruction::Shr {
            r: parse_register(arg1, line)?,
            shift: parse_shift(arg2, line)?,
        },
        Cmp => Instruction::Cmp {
            a: parse_register(arg1, line)?,
            b: parse_register(arg2, line)?,
        },
        CmpI => Instruction::CmpImm {
            r: parse_register(arg1, line)?,
            imm: parse_number(arg2, line)?,
        },
        Jmp => Instruction::Jmp {
            addr: parse_jump_target(arg1, line, labels)?,
        },
        Jz => Instruction::Jz {
            addr: parse_jump_target(arg1, line, labels)?,
        },
        Jnz => Instruction::Jnz {
            addr: parse_jump_target(arg1, line, labels)?,
        },
        Jc => Instruction::Jc {
            addr: parse_jump_target(arg1, line, labels)?,
        },
        Jnc => Instruction::Jnc {
            addr: parse_jump_target(arg1, line, labels)?,
        },
        Call => Instruction::Call {
            addr: parse_jump_target(arg1, line, labels)?,
        },
        Ret => Instruction::Ret,
        In => Instruction::In {
            r: parse_register(arg1, line)?,
            port: parse_number(arg2, line)?,
        },
        Out => Instruction::Out {
            port: parse_number(arg1, line)?,
            r: parse_register(arg2, line)?,
        },
        Hlt => Instruction::Hlt,
    })
}

/// Translates vcpu16 assembly source into a byte image.
pub struct Assembler;

impl Assembler {
    pub fn assemble(source: &str) -> Result<Image, AssemblerError> {
        let statements = Self::parse_all(source)?;
        let labels = Self::first_pass(&statements)?;
        Self::second_pass(&statements, labels)
    }

    fn parse_all(source: &str) -> Result<Vec<Statement>, AssemblerError> {
        let mut statements = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            if let Some(statement) = parse_statement(raw, line)? {
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    fn first_pass(statements: &[Statement]) -> Result<LabelTable, AssemblerError> {
        let mut labels = LabelTable::new();
        let mut offset: u32 = 0;
        for statement in statements {
            if let Some(name) = &statement.label {
                let address = memory_map::PROGRAM_BASE as u32 + offset;
                labels.define(name, address as u16, statement.line)?;
            }
            if let Some(mnemonic) = statement.mnemonic {
                let opcode = select_opcode(mnemonic, &statement.arg2);
                offset += opcode.encoded_len() as u32;
            }
        }
        Ok(labels)
    }

    fn second_pass(statements: &[Statement], labels: LabelTable) -> Result<Image, AssemblerError> {
        let mut bytes = Vec::new();
        let mut truncated = false;

        for statement in statements {
            let Some(mnemonic) = statement.mnemonic else {
                continue;
            };
            let instruction =
                build_instruction(mnemonic, &statement.arg1, &statement.arg2, statement.line, &labels)?;
            let encoded = instruction.encode();
            for byte in encoded {
                if bytes.len() < OUTPUT_CAP {
                    bytes.push(byte);
                } else {
                    truncated = true;
                }
            }
        }

        Ok(Image {
            bytes,
            labels,
            truncated,
        })
    }
}
