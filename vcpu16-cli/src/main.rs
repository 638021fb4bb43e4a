use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;

use vcpu16::asm::{Assembler, AssemblerError, Image};
use vcpu16::cpu::{Cpu, LoaderError, RuntimeError, StepOutcome};
use vcpu16::isa::memory_map;

#[derive(Parser)]
#[command(author, version, about = "vcpu16 assembler and emulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a source file into a flat binary image.
    Assemble { input: PathBuf, output: PathBuf },
    /// Load a binary image and run it to halt.
    Run { input: PathBuf },
    /// Run a binary image, dumping the register file before and after.
    Debug { input: PathBuf },
    /// Single-step a binary image, printing one line per executed instruction.
    Trace { input: PathBuf },
    /// Assemble and immediately run the result, without writing a binary.
    AsmRun { input: PathBuf },
    /// Assemble and immediately debug the result, without writing a binary.
    AsmDebug { input: PathBuf },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("assembly failed: {0}")]
    Assembler(#[from] AssemblerError),

    #[error("{0}")]
    Loader(#[from] LoaderError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Assemble { input, output } => assemble(&input, &output),
        Commands::Run { input } => run(&input),
        Commands::Debug { input } => debug(&input),
        Commands::Trace { input } => trace(&input),
        Commands::AsmRun { input } => asm_run(&input),
        Commands::AsmDebug { input } => asm_debug(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn assemble_source(source: &str) -> Result<Image, CliError> {
    let image = Assembler::assemble(source).map_err(|err| {
        eprintln!("{}", err.render(source));
        CliError::Assembler(err)
    })?;
    if image.truncated {
        eprintln!("warning: assembled image exceeds 64 KiB; extra bytes were dropped");
    }
    Ok(image)
}

fn read_source(input: &PathBuf) -> Result<String, CliError> {
    fs::read_to_string(input).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CliError::Loader(LoaderError::FileNotFound {
                path: input.display().to_string(),
            })
        } else {
            CliError::Loader(LoaderError::IOError(err))
        }
    })
}

fn assemble(input: &PathBuf, output: &PathBuf) -> Result<(), CliError> {
    let source = read_source(input)?;
    let image = assemble_source(&source)?;
    fs::write(output, &image.bytes)?;
    Ok(())
}

fn read_binary(input: &PathBuf) -> Result<Vec<u8>, CliError> {
    fs::read(input).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CliError::Loader(LoaderError::FileNotFound {
                path: input.display().to_string(),
            })
        } else {
            CliError::Loader(LoaderError::IOError(err))
        }
    })
}

fn load_cpu(input: &PathBuf) -> Result<Cpu, CliError> {
    let bytes = read_binary(input)?;
    let mut cpu = Cpu::new_with_stdio();
    cpu.load_program(&bytes, memory_map::PROGRAM_BASE)?;
    Ok(cpu)
}

fn run(input: &PathBuf) -> Result<(), CliError> {
    let mut cpu = load_cpu(input)?;
    cpu.run()?;
    Ok(())
}

fn dump_registers(cpu: &Cpu, label: &str) {
    let regs = cpu.regs();
    println!(
        "{label}: A={:#06x} B={:#06x} C={:#06x} D={:#06x} SP={:#06x} PC={:#06x} FLAGS={:#04x}",
        regs[0], regs[1], regs[2], regs[3], regs[4], regs[5], cpu.flags()
    );
}

fn debug(input: &PathBuf) -> Result<(), CliError> {
    let mut cpu = load_cpu(input)?;
    dump_registers(&cpu, "initial");
    cpu.run()?;
    dump_registers(&cpu, "final");
    Ok(())
}

fn trace(input: &PathBuf) -> Result<(), CliError> {
    let mut cpu = load_cpu(input)?;
    loop {
        match cpu.step() {
            StepOutcome::Executed => {
                let regs = cpu.regs();
                println!(
                    "CYC={} PC={:#06x} A={:#06x} B={:#06x} C={:#06x} D={:#06x}",
                    cpu.cycles(),
                    regs[5],
                    regs[0],
                    regs[1],
                    regs[2],
                    regs[3]
                );
            }
            StepOutcome::AlreadyHalted => return Ok(()),
            StepOutcome::Fatal(err) => return Err(err.into()),
        }
    }
}

fn asm_run(input: &PathBuf) -> Result<(), CliError> {
    let source = read_source(input)?;
    let image = assemble_source(&source)?;
    let mut cpu = Cpu::new_with_stdio();
    cpu.load_program(&image.bytes, memory_map::PROGRAM_BASE)?;
    cpu.run()?;
    Ok(())
}

fn asm_debug(input: &PathBuf) -> Result<(), CliError> {
    let source = read_source(input)?;
    let image = assemble_source(&source)?;
    let mut cpu = Cpu::new_with_stdio();
    cpu.load_program(&image.bytes, memory_map::PROGRAM_BASE)?;
    dump_registers(&cpu, "initial");
    cpu.run()?;
    dump_registers(&cpu, "final");
    Ok(())
}
