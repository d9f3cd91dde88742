mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show netbehave info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("netbehave", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Patch {
            path,
            base_type,
            prefix,
            cache_dir,
            search_dirs,
            no_verify,
        } => commands::patch::run(
            path,
            base_type,
            prefix,
            cache_dir,
            search_dirs,
            *no_verify,
            &cli.global,
        ),
        Command::Verify {
            path,
            base_type,
            prefix,
            search_dirs,
        } => commands::verify::run(path, base_type, prefix, search_dirs, &cli.global),
    }
}
