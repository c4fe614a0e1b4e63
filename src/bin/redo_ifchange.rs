/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::Parser;
use log::error;

use redo::build::Orchestrator;
use redo::deps::ParentBuild;
use redo::env::Env;
use redo::store::Store;
use redo::{error as redo_error, logger};

/// Build each out-of-date target, then record it as an ifchange
/// dependency of the calling .do script's target
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Targets to bring up to date (defaults to 'all')
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
    if args.jobs.is_some() {
        log::debug!("-j is reserved, building serially");
    }
    let env = Env::from_process()?.with_shell_flags(args.trace, args.echo);
    let targets = if args.targets.is_empty() {
        vec!["all".to_owned()]
    } else {
        args.targets
    };

    let orchestrator = Orchestrator::new(store, env);
    let parent = orchestrator.env().parent.clone();
    let keep_going = orchestrator.env().keep_going;

    // targets are built and recorded one at a time: a sibling failing
    // elsewhere in the batch must not lose the records of targets that
    // already settled
    let mut last_failure: Option<anyhow::Error> = None;
    for target in &targets {
        if let Err(err) = orchestrator.redo_ifchange(&[target.clone()]) {
            if !keep_going {
                return Err(err);
            }
            last_failure = Some(err);
            continue;
        }
        // stamped post-build, against what the target actually produced
        if let Some(parent) = &parent {
            ParentBuild::new(orchestrator.store(), parent).add_ifchange(target)?;
        }
    }
    match last_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
