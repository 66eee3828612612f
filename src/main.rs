//! pdstore — an interactive driver for the persistent object-graph engine.
//!
//! Usage:
//!   pdstore --config pdstore.toml
//!
//! Once running, type `help` at the prompt for the command list. The shape
//! of this loop — a single long-lived process driving create/name/find/
//! delete/walk/gc operations from typed commands — follows
//! `PtrieTester`/`tester.py` (`examples/original_source/ptrie-tester.py`),
//! the original system's own test driver.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pdstore::cache::CacheField;
use pdstore::config::EngineConfig;
use pdstore::error::Error;
use pdstore::field::Field;
use pdstore::graph::ObjectGraphAPI;
use pdstore::type_registry::{FieldSpec, TypeDescriptor};

#[derive(Parser)]
#[command(name = "pdstore", about = "Persistent object-graph store", version)]
struct Cli {
    /// Path to an EngineConfig TOML file.
    #[arg(short, long, default_value = "pdstore.toml")]
    config: PathBuf,
}

/// The demo type the REPL's `insert` command builds: a single integer
/// field named `value`.
const VALUE_TYPE: &str = "value";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match EngineConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let graph = match ObjectGraphAPI::open(&config) {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "failed to open store");
            std::process::exit(1);
        }
    };
    graph.register_type(TypeDescriptor::new(
        VALUE_TYPE,
        vec![FieldSpec::new("value", Field::Int(0))],
    ));

    info!(dir = %config.store.dir.display(), "pdstore ready");
    println!("pdstore — type 'help' for commands, 'quit' to exit");

    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        print!("pdstore> ");
        out.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break; // EOF
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = words.first() else { continue };

        match run_command(&graph, command, &words[1..]) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => println!("error: {e}"),
        }
    }
}

/// Runs one command. Returns `Ok(true)` on `quit`.
fn run_command(graph: &ObjectGraphAPI, command: &str, args: &[&str]) -> Result<bool, Error> {
    match command {
        "help" => {
            print_help();
            Ok(false)
        }
        "quit" => {
            graph.close()?;
            Ok(true)
        }
        "insert" => {
            let [name, value] = args else {
                println!("usage: insert <name> <int-value>");
                return Ok(false);
            };
            let n: i64 = value.parse().unwrap_or_else(|_| {
                println!("'{value}' is not an integer, storing 0");
                0
            });
            let mut fields = HashMap::new();
            fields.insert("value".to_string(), CacheField::Int(n));
            let handle = graph.create_object(VALUE_TYPE, fields)?;
            let oid = graph.store_named(&handle, name)?;
            println!("{name} -> {oid}");
            Ok(false)
        }
        "find" => {
            let [name] = args else {
                println!("usage: find <name>");
                return Ok(false);
            };
            let oid = graph.directory().find(name.as_bytes())?;
            println!("{oid}");
            Ok(false)
        }
        "load" | "read" => {
            let [name] = args else {
                println!("usage: {command} <name>");
                return Ok(false);
            };
            let handle = graph.load_named(name)?;
            if handle.is_null() {
                println!("{name}: not found");
                return Ok(false);
            }
            let fields = graph.get_fields(&handle)?;
            println!("{name} ({}): {fields:?}", handle.type_name());
            Ok(false)
        }
        "delete" | "rm" => {
            let [name] = args else {
                println!("usage: {command} <name>");
                return Ok(false);
            };
            graph.remove_named(name)?;
            println!("removed {name}");
            Ok(false)
        }
        "dfwalk" | "ls" => {
            for (key, oid) in graph.directory().depth_first()? {
                println!("{} -> {oid}", String::from_utf8_lossy(&key));
            }
            Ok(false)
        }
        "bfwalk" => {
            for (key, oid) in graph.directory().breadth_first()? {
                println!("{} -> {oid}", String::from_utf8_lossy(&key));
            }
            Ok(false)
        }
        "gc" => {
            graph.collect(&[])?;
            println!("collection finished");
            Ok(false)
        }
        "save" => {
            graph.close()?;
            println!("flushed");
            Ok(false)
        }
        "status" => {
            print_status(graph)?;
            Ok(false)
        }
        "" => Ok(false),
        other => {
            println!("unknown command '{other}' — type 'help'");
            Ok(false)
        }
    }
}

fn print_help() {
    println!(
        "commands:
  help                    show this message
  insert <name> <int>     create a value object and bind it to <name>
  find <name>             print the OID bound to <name>, or the null OID
  load|read <name>        print the fields of the object bound to <name>
  delete|rm <name>        unbind <name>
  dfwalk|ls               list every bound name, depth-first
  bfwalk                  list every bound name, iteratively
  gc                      run garbage collection
  save                    flush pending drafts without collecting
  status                  report pool/cache occupancy
  quit                    flush and exit"
    );
}

fn print_status(graph: &ObjectGraphAPI) -> Result<(), Error> {
    println!("object store   : {}", graph.store().dir().display());
    println!("  active bytes : {}", graph.store().active_size_bytes()?);
    println!("  standby bytes: {}", graph.store().standby_size_bytes()?);
    println!("cache entries  : {}", graph.cache().len());
    println!("names bound    : {}", graph.directory().depth_first()?.len());
    Ok(())
}
