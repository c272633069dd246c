//! Object graph persistence CLI.
//!
//! Provides the `obgraph` binary: `--load DIR` repopulates a universe
//! from a published dump, `--demo` builds a small in-memory graph, and
//! `--dump DIR` publishes the universe's persistable closure. The flags
//! compose: `--load old --dump new` migrates a dump directory, and
//! `--demo --dump DIR` seeds a fresh one.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::info;

use obgraph_core::object::Space;
use obgraph_core::payload::{load_symbol_payload, SymbolPayload, SYMBOL_PAYLOAD_KIND};
use obgraph_core::{Universe, Value};
use obgraph_storage::{dump_into_directory, load_from_directory};

/// Object graph dump and load tools.
#[derive(Parser)]
#[command(name = "obgraph", about = "Object graph dump and load tools")]
struct Cli {
    /// Load a published dump from this directory first.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Build the small demonstration graph in memory.
    #[arg(long)]
    demo: bool,

    /// Publish a dump into this directory.
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    process::exit(run(cli));
}

/// Returns exit code: 0 = success, 1 = load failure, 2 = dump failure.
fn run(cli: Cli) -> i32 {
    let universe = Universe::new();
    if let Err(e) = setup_universe(&universe) {
        eprintln!("Error: universe setup failed: {}", e);
        return 1;
    }

    if let Some(dir) = &cli.load {
        match load_from_directory(&universe, dir) {
            Ok(outcome) => {
                info!(
                    objects = outcome.objects,
                    globals = outcome.globals,
                    dir = %dir.display(),
                    "loaded"
                );
            }
            Err(e) => {
                eprintln!("Error: failed to load from '{}': {}", dir.display(), e);
                return 1;
            }
        }
    }

    if cli.demo {
        if let Err(e) = build_demo(&universe) {
            eprintln!("Error: demo graph construction failed: {}", e);
            return 1;
        }
    }

    if let Some(dir) = &cli.dump {
        match dump_into_directory(&universe, dir) {
            Ok(outcome) => {
                println!(
                    "dumped {} objects and {} globals into {}",
                    outcome.objects,
                    outcome.globals,
                    dir.display()
                );
            }
            Err(e) => {
                eprintln!("Error: failed to dump into '{}': {}", dir.display(), e);
                return 2;
            }
        }
    }

    0
}

/// Registers the global slots and payload kinds the stores may name.
fn setup_universe(universe: &Universe) -> Result<(), obgraph_core::CoreError> {
    universe.globals.register("the_system")?;
    universe
        .payloads
        .register(SYMBOL_PAYLOAD_KIND, load_symbol_payload)?;
    Ok(())
}

/// Builds a handful of user-space objects wired through every value
/// shape, and binds `the_system` to the root.
fn build_demo(universe: &Universe) -> Result<(), obgraph_core::CoreError> {
    let root = universe.objects.create_fresh();
    let counter = universe.objects.create_fresh();
    let named = universe.objects.create_fresh();
    let extra = universe.objects.create_fresh();

    universe.objects.set_space(&root, Space::User);
    universe.objects.set_space(&counter, Space::User);
    universe.objects.set_space(&named, Space::Global);
    universe.objects.set_space(&extra, Space::User);

    root.put_attr(counter.clone(), Value::Int(1))?;
    root.put_attr(named.clone(), Value::str("demo"))?;
    root.append_comp(Value::float(2.718281828)?);
    root.append_comp(Value::set([counter.clone(), extra.clone()]));
    root.append_comp(Value::tuple([extra.clone(), counter.clone()]));

    counter.put_attr(counter.clone(), Value::Int(0))?;

    let mut sym = SymbolPayload::new("the_demo_symbol");
    sym.set_proxy(Some(extra.clone()));
    sym.set_data(Value::str("payload data"));
    named.set_payload(Box::new(sym));

    universe.globals.bind("the_system", Some(root.clone()))?;
    info!(root = %root, "demo graph built");
    Ok(())
}
