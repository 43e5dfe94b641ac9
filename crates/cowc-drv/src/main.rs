//! The cowc command line.
//!
//! Compiles one Cowgol source file to 8080 assembly text for the
//! downstream assembler and linker.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cowc_drv::{Config, Session};

/// Cowgol cross-compiler targeting 8080 assembly.
#[derive(Parser, Debug)]
#[command(name = "cowc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile Cowgol source to 8080 assembly", long_about = None)]
struct Cli {
    /// Source file (.cow).
    input: PathBuf,

    /// Add a directory to the include search path; repeatable.
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Output path (defaults to the input with an .asm extension).
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Disable the optimizer.
    #[arg(long = "no-opt")]
    no_opt: bool,

    /// Log the optimizer's change counts per pass.
    #[arg(long = "debug-opt")]
    debug_opt: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.debug_opt {
        builder.filter_module("cowc_opt", log::LevelFilter::Debug);
        builder.filter_module("cowc_gen", log::LevelFilter::Debug);
    }
    builder.init();

    let mut config = Config::new(cli.input);
    config.include_dirs = cli.include;
    config.output = cli.output;
    config.optimize = !cli.no_opt;
    config.debug_opt = cli.debug_opt;

    let mut session = Session::new(config);
    match session.compile_to_file() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let rendered = session.render_diagnostics();
            if !rendered.is_empty() {
                eprint!("{}", rendered);
            }
            eprintln!("error: {:#}", anyhow::Error::new(err));
            ExitCode::FAILURE
        }
    }
}
