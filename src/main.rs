//! # Command Line Interface
//!
//! The argument tree is in `cli.rs`, which is shared with the build script.
//! Subcommands are run by the `commands` module.

mod cli;

use env_logger;
#[cfg(windows)]
use colored;
use log::error;
use flopkit::commands;
use flopkit::commands::CommandError;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    #[cfg(windows)]
    let _ = colored::control::set_virtual_terminal(true);

    let main_cmd = cli::build_cli();
    let matches = main_cmd.clone().get_matches();

    if let Some(cmd) = matches.subcommand_matches("completions") {
        return commands::completions::generate(main_cmd,cmd);
    }

    // Image level

    if let Some(cmd) = matches.subcommand_matches("convert") {
        return commands::convert::convert(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("geometry") {
        return commands::stat::geometry(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("detect") {
        return commands::stat::detect(cmd);
    }

    // File system level

    if let Some(cmd) = matches.subcommand_matches("catalog") {
        return commands::stat::catalog(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("usage") {
        return commands::stat::usage(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("get") {
        return commands::get::get(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("put") {
        return commands::put::put(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("delete") {
        return commands::put::delete(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("extract") {
        return commands::extract::extract(cmd);
    }

    error!("No subcommand was found, try `flopkit --help`");
    Err(Box::new(CommandError::InvalidCommand))
}
