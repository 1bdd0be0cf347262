// ComposeFE headless entry point.  The interactive editor embeds the
// library directly; this binary only exposes the batch renderer.

use clap::Parser;
use composefe::cli::{self, CliArgs};
use composefe::logger;

fn main() -> std::process::ExitCode {
    // Session log (overwrites previous session log)
    logger::init();
    let args = CliArgs::parse();
    cli::run(args)
}
