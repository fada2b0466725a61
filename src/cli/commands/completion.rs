//! Completion command - shell completion scripts

use crate::cli::args::{Cli, CompletionArgs};
use crate::error::PackResult;
use clap::CommandFactory;

pub fn execute(args: CompletionArgs) -> PackResult<()> {
    let mut command = Cli::command();
    clap_complete::generate(args.shell, &mut command, "pack", &mut std::io::stdout());
    Ok(())
}
