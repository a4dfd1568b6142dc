// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .default_value("modweave.toml")
        .global(true)
        .help("Path to the configuration file")
}

fn build_cli() -> Command {
    Command::new("modweave")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Modweave Contributors")
        .about("Mod loader core: load order, cached JSON merging and metadata indexing")
        .subcommand_required(false)
        .arg(config_arg())
        .subcommand(
            Command::new("run")
                .about("Resolve the load order, merge patches and update the metadata index")
                .arg(
                    Arg::new("force_save")
                        .long("force-save")
                        .action(ArgAction::SetTrue)
                        .help("Rewrite the index and its cache even when nothing changed"),
                )
                .arg(
                    Arg::new("no_progress")
                        .long("no-progress")
                        .action(ArgAction::SetTrue)
                        .help("Log progress instead of drawing a progress bar"),
                ),
        )
        .subcommand(
            Command::new("order").about("Show the load order and the packages that cannot be loaded"),
        )
        .subcommand(
            Command::new("cache")
                .about("Persisted cache management")
                .subcommand(Command::new("status").about("Show what the merge and index caches hold"))
                .subcommand(
                    Command::new("clear")
                        .about("Delete both caches; the next run rebuilds everything")
                        .arg(
                            Arg::new("order")
                                .long("order")
                                .action(ArgAction::SetTrue)
                                .help("Also delete the stored load order"),
                        ),
                ),
        )
        .subcommand(
            Command::new("query")
                .about("Look up resources in the metadata index")
                .arg(Arg::new("resource_type").help("Resource type, e.g. MechDef"))
                .arg(Arg::new("id").help("Resource id (lists the type when omitted)"))
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .value_name("TAG")
                        .help("List resources carrying this tag instead"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // CARGO_MANIFEST_DIR is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("modweave.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
