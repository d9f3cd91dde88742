use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// netbehave - NetworkBehaviour event-override patcher for Unity Netcode assemblies
#[derive(Debug, Parser)]
#[command(name = "netbehave", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Patch an assembly: inject missing event-method overrides and write the result
    /// to the cache directory.
    Patch {
        /// Path to the game assembly, or to a Managed directory holding
        /// Assembly-CSharp.dll.
        #[arg(value_name = "FILE|DIR")]
        path: PathBuf,

        /// Fully-qualified name of the base type whose events are enforced.
        #[arg(long, value_name = "NAME", default_value = netbehave::patch::DEFAULT_BASE_TYPE)]
        base_type: String,

        /// Name prefix selecting event methods on the base type.
        #[arg(long, value_name = "PREFIX", default_value = netbehave::patch::DEFAULT_PREFIX)]
        prefix: String,

        /// Directory the patched assembly is written into.
        #[arg(long, value_name = "DIR", default_value = "netbehave-cache")]
        cache_dir: PathBuf,

        /// Additional directory to probe when resolving referenced assemblies.
        /// May be given multiple times; the input's directory is always probed.
        #[arg(long = "search-dir", value_name = "DIR")]
        search_dirs: Vec<PathBuf>,

        /// Skip the verification pass after patching.
        #[arg(long)]
        no_verify: bool,
    },

    /// Verify a previously patched assembly and report the compliance count.
    Verify {
        /// Path to the patched assembly in the cache directory.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Fully-qualified name of the base type whose events are enforced.
        #[arg(long, value_name = "NAME", default_value = netbehave::patch::DEFAULT_BASE_TYPE)]
        base_type: String,

        /// Name prefix selecting event methods on the base type.
        #[arg(long, value_name = "PREFIX", default_value = netbehave::patch::DEFAULT_PREFIX)]
        prefix: String,

        /// Additional directory to probe when resolving referenced assemblies.
        #[arg(long = "search-dir", value_name = "DIR")]
        search_dirs: Vec<PathBuf>,
    },
}
