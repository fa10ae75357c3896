use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use covi::bytecode::asm::{AsmError, assemble};
use covi::bytecode::disasm::render_module;
use covi::bytecode::{CompileError, Compiler, LoadError, Module};
use covi::runtime::{ConfigError, ExitStatus, RuntimeError, StdIo, Vm, VmConfig};

const SOURCE_EXTENSION: &str = "covi";

#[derive(Parser, Debug)]
#[command(name = "covi", version)]
#[command(about = "Covi compiler, assembler and bytecode VM")]
struct Cli {
    /// Log module loading and every executed instruction (RUST_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a .covi source file into a bytecode module
    Build {
        source: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Write the hex transcription instead of binary
        #[arg(long)]
        hex: bool,
    },

    /// Run a bytecode module (binary or hex), or compile and run a .covi file
    Run {
        file: PathBuf,

        #[arg(long)]
        module_root: Option<PathBuf>,

        #[arg(long)]
        function_root: Option<PathBuf>,

        /// JSON file with VM settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log every executed instruction to stderr
        #[arg(long)]
        trace: bool,
    },

    /// Assemble a text listing into a bytecode module
    Asm {
        listing: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        hex: bool,
    },

    /// Print a listing of a module
    Disasm { file: PathBuf },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Compile { path: PathBuf, source: CompileError },

    #[error("{rendered}")]
    Asm { rendered: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let trace = matches!(cli.command, Command::Run { trace: true, .. });
    init_logging(cli.debug, trace);

    match run(cli.command, cli.debug) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            if let CliError::Compile { source, .. } = &e {
                if let Some(hint) = source.hint() {
                    eprintln!("  hint: {}", hint);
                }
            }
            ExitCode::FAILURE
        }
    }
}

/// Default filter directives. Tracing only opens the instruction trace
/// target, so `--trace` works without `--debug`.
fn log_directives(debug: bool, trace: bool) -> String {
    let mut directives = String::from(if debug { "covi=debug" } else { "covi=warn" });
    if trace {
        directives.push_str(",covi::trace=debug");
    }
    directives
}

fn init_logging(debug: bool, trace: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(debug, trace)));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Command, debug: bool) -> Result<(), CliError> {
    match command {
        Command::Build {
            source,
            output,
            hex,
        } => {
            let module = compile_file(&source)?;
            write_module(&module, &output, hex)
        }

        Command::Run {
            file,
            module_root,
            function_root,
            config,
            trace,
        } => {
            let mut vm_config = match config {
                Some(path) => VmConfig::from_json_file(&path)?,
                None => VmConfig::default(),
            };
            if let Some(root) = module_root {
                vm_config.module_root = root;
            }
            if let Some(root) = function_root {
                vm_config.function_root = root;
            }
            vm_config.trace |= trace || debug;

            let module = load_program(&file)?;
            let mut vm = Vm::new(&vm_config);
            let status = vm.run_module(&module, &mut StdIo)?;
            debug!(?status, "run finished");
            if status == ExitStatus::ForeignSkipped {
                info!(file = %file.display(), "foreign module skipped");
            }
            Ok(())
        }

        Command::Asm {
            listing,
            output,
            hex,
        } => {
            let text = read_text(&listing)?;
            let module = assemble(&text).map_err(|e: AsmError| CliError::Asm {
                rendered: e.render(&listing.display().to_string(), &text),
            })?;
            write_module(&module, &output, hex)
        }

        Command::Disasm { file } => {
            let module = load_program(&file)?;
            let name = file.display().to_string();
            print!("{}", render_module(&name, &module));
            Ok(())
        }
    }
}

fn is_source(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
}

/// `.covi` sources are compiled in memory; anything else is a module file.
fn load_program(path: &Path) -> Result<Module, CliError> {
    if is_source(path) {
        return compile_file(path);
    }
    Ok(Module::from_file(path)?)
}

fn compile_file(path: &Path) -> Result<Module, CliError> {
    let source = read_text(path)?;
    let module = Compiler::new()
        .compile_source(&source)
        .map_err(|source| CliError::Compile {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), bytes = module.code().len(), "compiled");
    Ok(module)
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_module(module: &Module, output: &Path, hex: bool) -> Result<(), CliError> {
    let bytes = if hex {
        module.to_hex().into_bytes()
    } else {
        module.to_bytes()
    };

    fs::write(output, &bytes).map_err(|source| CliError::Write {
        path: output.to_path_buf(),
        source,
    })?;
    info!(output = %output.display(), bytes = bytes.len(), "wrote module");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(log_directives(false, false), "covi=warn");
        assert_eq!(log_directives(true, false), "covi=debug");
    }

    #[test]
    fn test_trace_opens_trace_target() {
        let directives = log_directives(false, true);
        assert_eq!(directives, "covi=warn,covi::trace=debug");
        assert!(directives.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_run_trace_flag_parses() {
        let cli = Cli::parse_from(["covi", "run", "prog.covi", "--trace"]);
        assert!(matches!(cli.command, Command::Run { trace: true, .. }));
        assert!(!cli.debug);
    }
}
