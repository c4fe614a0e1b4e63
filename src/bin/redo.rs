/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::Parser;
use log::{error, info};

use redo::build::Orchestrator;
use redo::env::Env;
use redo::store::Store;
use redo::{error as redo_error, lock, logger};

/// Build each target unconditionally
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Targets to build (defaults to 'all')
    targets: Vec<String>,

    /// Trace .do script execution (sh -x)
    #[arg(short = 'x', default_value_t = false)]
    trace: bool,

    /// Echo .do script lines as read (sh -v)
    #[arg(short = 'v', default_value_t = false)]
    echo: bool,

    /// Reserved: number of parallel jobs
    #[arg(short = 'j', value_name = "N")]
    jobs: Option<u32>,

    /// Remove leftover lock files from crashed builds and exit
    #[arg(long, default_value_t = false)]
    purge_locks: bool,
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
    if args.purge_locks {
        let removed = lock::purge_stale_locks(store.root())?;
        info!("removed {} stale lock file(s)", removed);
        return Ok(());
    }
    if args.jobs.is_some() {
        log::debug!("-j is reserved, building serially");
    }

    let env = Env::from_process()?.with_shell_flags(args.trace, args.echo);
    let targets = default_targets(args.targets);
    Orchestrator::new(store, env).redo(&targets)
}

fn default_targets(targets: Vec<String>) -> Vec<String> {
    if targets.is_empty() {
        vec!["all".to_owned()]
    } else {
        targets
    }
}
