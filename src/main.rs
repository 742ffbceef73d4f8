use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use depthpaint::cli::{self, CliArgs};
use depthpaint::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.input.is_empty() {
        let _ = CliArgs::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }

    if args.log_file {
        // Session log (overwrites previous session log)
        logger::init();
        if let Some(path) = logger::log_path() {
            eprintln!("logging to {}", path.display());
        }
    } else {
        logger::init_stderr(args.verbose);
    }

    cli::run(args)
}
