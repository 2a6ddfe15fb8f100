use clap::{Parser, Subcommand};
use miette::{miette, Result};
use std::path::PathBuf;

use cil_dec_rs::cli;

#[derive(Parser)]
#[command(name = "cil-dec")]
#[command(about = "Control-flow reconstruction for .NET CIL method bodies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a method's control flow graph and print its blocks and loops
    Cfg {
        /// Metadata fixture (JSON)
        input: PathBuf,

        /// Method token, decimal or 0x-prefixed hex
        #[arg(short, long, value_parser = cli::parse_method_id)]
        method: u32,

        /// Output DOT file for visualization (optional)
        #[arg(short, long)]
        dot: Option<PathBuf>,
    },

    /// Decompile one method, or every method of the fixture
    Decompile {
        /// Metadata fixture (JSON)
        input: PathBuf,

        /// Method token, decimal or 0x-prefixed hex (all methods if omitted)
        #[arg(short, long, value_parser = cli::parse_method_id)]
        method: Option<u32>,

        /// Settings file (JSON); flags below override it
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Wrap every embedded statement in braces
        #[arg(long)]
        always_braces: bool,

        /// Leave string switches as if/else chains
        #[arg(long)]
        no_string_switch: bool,

        /// Leave sparse integer dispatch as if/else chains
        #[arg(long)]
        no_sparse_switch: bool,

        /// Keep `x = x + 1` instead of `x++`
        #[arg(long)]
        no_increments: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cfg { input, method, dot } => {
            cli::cfg::cfg(&input, method, dot.as_deref()).map_err(|e| miette!("{:#}", e))
        }
        Commands::Decompile {
            input,
            method,
            settings,
            output,
            always_braces,
            no_string_switch,
            no_sparse_switch,
            no_increments,
        } => {
            let args = cli::decompile::DecompileArgs {
                input_path: input,
                method,
                settings_path: settings,
                output_path: output,
                always_braces,
                no_string_switch,
                no_sparse_switch,
                no_increments,
            };
            cli::decompile::decompile(&args).map_err(|e| miette!("{}", e))
        }
    }
}
