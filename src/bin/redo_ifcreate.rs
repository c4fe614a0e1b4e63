/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use anyhow::Context;
use clap::Parser;
use log::error;

use redo::deps::ParentBuild;
use redo::env::Env;
use redo::store::Store;
use redo::{error as redo_error, logger};

/// Record ifcreate dependencies of the calling .do script's target;
/// fails if any path already exists
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Paths whose creation should make the parent target out of date
    paths: Vec<String>,
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(ref err) => {
            error!("{:#}", err);
            redo_error::exit_code(err)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init()?;

    let store = Store::open()?;
    let env = Env::from_process()?;
    let parent = env
        .parent
        .as_ref()
        .context("redo-ifcreate must be invoked from a .do script")?;

    let deps = ParentBuild::new(&store, parent);
    for path in &args.paths {
        deps.add_ifcreate(path)?;
    }
    Ok(())
}
