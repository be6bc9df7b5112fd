//! `qit`: a tiny command-line driver for ad-hoc expression dumps.
//!
//! Builds one demo expression graph, then either prints the generated C++
//! translation unit (`--emit-source`) or compiles and runs it, printing
//! each value the program writes to its output stream. Grounded in
//! `typhon-cli`'s `main.rs` for the clap/`env_logger`/`anyhow` shape; the
//! demo expression itself has no teacher analog and is authored to exercise
//! a representative slice of the DSL (a product of two ranges, sorted and
//! bounded).

use anyhow::{Context, Result};
use clap::Parser;

use qit_ast::types::RecordKind;
use qit_ast::Collection;
use qit_compiler::{Qit, QitConfig, VerboseLevel};

/// Dump or run the demo expression graph compiled by qit-compiler.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Print the generated C++ translation unit instead of running it.
    #[arg(long)]
    emit_source: bool,

    /// Directory to write the generated sources and compiled binary under.
    #[arg(long, default_value = "./qit-build")]
    build_dir: std::path::PathBuf,

    /// Compile with debug flags (-O0 -g) instead of -O2.
    #[arg(long)]
    debug: bool,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn demo_expr() -> Result<Collection> {
    let x = Collection::range_iterate(4);
    let y = Collection::range_iterate(3);
    let pair = Collection::record(RecordKind::Product, vec![(x, None), (y, None)])
        .context("building the demo product collection")?;
    let sorted = pair.sort().context("sorting the demo collection")?;
    Ok(sorted.take(6))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let verbose = match args.verbose {
        0 => VerboseLevel::Off,
        1 => VerboseLevel::Info,
        _ => VerboseLevel::Debug,
    };
    let qit = Qit::new(QitConfig {
        build_dir: args.build_dir,
        verbose,
        debug: args.debug,
        ..QitConfig::default()
    });

    let expr = demo_expr()?;

    if args.emit_source {
        let source = qit.declarations(&expr).context("declaring and emitting the demo expression")?;
        print!("{source}");
        return Ok(());
    }

    let results = qit
        .run(&expr, std::collections::HashMap::new())
        .context("compiling and running the demo expression")?;
    for value in results {
        println!("{value:?}");
    }
    Ok(())
}
