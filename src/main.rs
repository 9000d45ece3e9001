use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use toyasm::protocol::{Command as EngineCommand, Response};
use toyasm::{DebuggerOptions, Engine, Output, PauseReason, Program, Repl, Session, SessionConfig};

/// toyasm assembles and debugs programs for a small 16-bit teaching instruction set.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a `.asm` file and run it to completion
    Run {
        /// `.asm` file to run
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
        /// Give up after this many instructions
        #[arg(short, long)]
        step_limit: Option<u64>,
    },
    /// Assemble a `.asm` file and step through it in the debugger
    Debug {
        /// `.asm` file to debug
        name: PathBuf,
        /// Read debugger commands from argument
        #[arg(short, long)]
        command: Option<String>,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
        /// Give up a single `continue` after this many instructions
        #[arg(short, long)]
        step_limit: Option<u64>,
    },
    /// Check a `.asm` file without running it
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Print the assembled instructions of a `.asm` file
    Disasm {
        /// File to disassemble
        name: PathBuf,
    },
    /// Place a watch on a `.asm` file to receive constant assembler updates
    Watch {
        /// `.asm` file to watch
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    toyasm::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(toyasm::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let Some(command) = args.command else {
        if let Some(path) = args.path {
            return run(&path, false, None);
        }
        println!("\n~ toyasm v{VERSION} ~");
        println!("{}", LOGO.truecolor(120, 200, 160).bold());
        println!("{SHORT_INFO}");
        std::process::exit(0);
    };

    match command {
        Command::Run {
            name,
            minimal,
            step_limit,
        } => run(&name, minimal, step_limit),
        Command::Debug {
            name,
            command,
            minimal,
            step_limit,
        } => debug(&name, DebuggerOptions { command }, minimal, step_limit),
        Command::Check { name } => {
            file_message(Green, "Checking", &name);
            let src = fs::read_to_string(&name).into_diagnostic()?;
            let program = assemble(&src)?;
            message(
                Green,
                "Success",
                &format!("no errors found! ({} instructions)", program.len()),
            );
            Ok(())
        }
        Command::Disasm { name } => {
            let src = fs::read_to_string(&name).into_diagnostic()?;
            let program = assemble(&src)?;
            for line in toyasm::debugger::disassemble(&program) {
                println!("{}", line);
            }
            Ok(())
        }
        Command::Watch { name } => watch(name),
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn config(echo: bool, step_limit: Option<u64>) -> SessionConfig {
    let mut config = toyasm::env::session_config();
    config.echo = echo;
    if let Some(step_limit) = step_limit {
        config.step_limit = step_limit;
    }
    config
}

/// Assemble and run on the engine thread, echoing program output as it arrives.
fn run(name: &Path, minimal: bool, step_limit: Option<u64>) -> Result<()> {
    Output::set_minimal(minimal);
    file_message(MsgColor::Green, "Assembling", name);
    let src = read_source(name)?;

    let mut engine = Engine::spawn(config(true, step_limit)).into_diagnostic()?;
    message(MsgColor::Green, "Running", "assembled program");
    let response = engine
        .request(EngineCommand::AssembleRun { source: src.clone() }, |_| ())
        .into_diagnostic()?;

    match response {
        Response::Paused {
            reason: PauseReason::Halted,
            state,
        } => {
            if !state.console.is_empty() {
                println!();
            }
            file_message(MsgColor::Green, "Completed", name);
            Ok(())
        }
        Response::Paused { reason, .. } => {
            println!();
            message(MsgColor::Red, "Stopped", &reason.to_string());
            bail!("Program did not halt: {}", reason)
        }
        Response::Error { diagnostic, .. } => {
            println!();
            Err(diagnostic.report(&src))
        }
        other => bail!("Unexpected engine response: {}", other.outcome()),
    }
}

fn debug(name: &Path, opts: DebuggerOptions, minimal: bool, step_limit: Option<u64>) -> Result<()> {
    Output::set_minimal(minimal);
    let src = read_source(name)?;
    let mut session = Session::new(config(true, step_limit));
    if let Err(diagnostic) = session.assemble(&src) {
        return Err(diagnostic.report(&src));
    }
    Repl::new(session, src, opts).run();
    Ok(())
}

fn watch(name: PathBuf) -> Result<()> {
    use MsgColor::*;
    if !name.exists() {
        bail!("File does not exist. Exiting...")
    }
    // Vim breaks if watching a single file
    let folder_path = match name.parent() {
        Some(pth) if pth.is_dir() => pth.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    // Clear screen and move cursor to top left
    print!("\x1B[2J\x1B[2;1H");
    file_message(Green, "Watching", &name);
    message(Cyan, "Help", "press CTRL+C to exit");

    let mut watcher =
        Hotwatch::new_with_custom_delay(Duration::from_millis(500)).into_diagnostic()?;

    watcher
        .watch(folder_path, move |event: Event| match event.kind {
            // Watch remove for vim changes
            EventKind::Modify(_) | EventKind::Remove(_) => {
                print!("\x1B[2J\x1B[2;1H");
                file_message(Green, "Watching", &name);
                message(Green, "Re-checking", "file change detected");
                message(Cyan, "Help", "press CTRL+C to exit");

                // Makes reruns more obvious
                sleep(Duration::from_millis(50));

                let src = match fs::read_to_string(&name) {
                    Ok(src) => src,
                    Err(e) => {
                        eprintln!("{e}. Exiting...");
                        std::process::exit(1)
                    }
                };
                match assemble(&src) {
                    Ok(_) => message(Green, "Success", "no errors found!"),
                    Err(e) => println!("\n{:?}", e),
                }
                Flow::Continue
            }
            _ => Flow::Continue,
        })
        .into_diagnostic()?;
    watcher.run();
    Ok(())
}

fn read_source(name: &Path) -> Result<String> {
    match name.extension().and_then(|ext| ext.to_str()) {
        Some("asm") | Some("s") => fs::read_to_string(name).into_diagnostic(),
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    }
}

/// Assemble `src`, rendering any failure against the source.
fn assemble(src: &str) -> Result<Program> {
    toyasm::assemble(src).map_err(|diagnostic| diagnostic.report(src))
}

const LOGO: &str = r#"
  _
 | |_ ___  _   _  __ _ ___ _ __ ___
 | __/ _ \| | | |/ _` / __| '_ ` _ \
 | || (_) | |_| | (_| \__ \ | | | | |
  \__\___/ \__, |\__,_|___/_| |_| |_|
           |___/                     "#;

const SHORT_INFO: &str = r"
Welcome to toyasm, an assembler and time-travelling debugger
for a small 16-bit teaching instruction set.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
