/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::store;

pub const VAR_SESSION: &str = "REDO_SESSION";
pub const VAR_DEPTH: &str = "REDO_DEPTH";
pub const VAR_INIT_PATH: &str = "REDO_INIT_PATH";
pub const VAR_KEEP_GOING: &str = "REDO_KEEP_GOING";
pub const VAR_SHUFFLE: &str = "REDO_SHUFFLE";
pub const VAR_SHELL_ARGS: &str = "REDO_SHELL_ARGS";
pub const VAR_PATH: &str = "REDO_PATH";
pub const VAR_TARGET: &str = "REDO_TARGET";

const SESSION_ID_LEN: usize = 16;

/// Context of the parent build, present when this process was spawned
/// from inside a running `.do` script.
#[derive(Debug, Clone)]
pub struct Parent {
    /// Directory of the parent `.do` invocation (`REDO_PATH`).
    pub redo_path: PathBuf,
    /// Absolute path of the target the parent is building (`REDO_TARGET`).
    pub target: PathBuf,
}

/// The `REDO_*` environment contract, read once per process.
#[derive(Debug, Clone)]
pub struct Env {
    pub session: String,
    pub depth: u32,
    pub init_path: PathBuf,
    pub keep_going: bool,
    pub shuffle: Option<String>,
    pub shell_args: String,
    pub parent: Option<Parent>,
}

impl Env {
    /// Read the contract from the process environment. The outermost
    /// invocation (no `REDO_SESSION`) materializes a session id and the
    /// init path.
    pub fn from_process() -> anyhow::Result<Env> {
        let session = match env::var(VAR_SESSION) {
            Ok(session) if !session.is_empty() => session,
            _ => new_session_id(),
        };
        let depth = env::var(VAR_DEPTH)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let init_path = match env::var_os(VAR_INIT_PATH).filter(|value| !value.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => env::current_dir().context("failed to read current directory")?,
        };
        let keep_going = env::var(VAR_KEEP_GOING)
            .map(|value| !value.is_empty())
            .unwrap_or(false);
        let shuffle = env::var(VAR_SHUFFLE).ok().filter(|value| !value.is_empty());
        let shell_args = env::var(VAR_SHELL_ARGS).unwrap_or_default();
        let parent = match (
            env::var_os(VAR_PATH).filter(|value| !value.is_empty()),
            env::var_os(VAR_TARGET).filter(|value| !value.is_empty()),
        ) {
            (Some(redo_path), Some(target)) => Some(Parent {
                redo_path: PathBuf::from(redo_path),
                target: PathBuf::from(target),
            }),
            _ => None,
        };
        Ok(Env {
            session,
            depth,
            init_path,
            keep_going,
            shuffle,
            shell_args,
            parent,
        })
    }

    /// Fold the `-x`/`-v` flags into the shell-args string handed to `sh`.
    pub fn with_shell_flags(mut self, trace: bool, verbose: bool) -> Self {
        if trace && !self.shell_args.contains('x') {
            self.shell_args.push('x');
        }
        if verbose && !self.shell_args.contains('v') {
            self.shell_args.push('v');
        }
        self
    }

    /// Environment for a spawned `.do` script. `REDO_TARGET` is
    /// overwritten, never appended; `PATH` gains `:.` so scripts can call
    /// helpers from the current directory.
    pub fn child_env(
        &self,
        do_dir: &Path,
        target: &Path,
        root: &Path,
    ) -> Vec<(&'static str, OsString)> {
        let mut vars: Vec<(&'static str, OsString)> = vec![
            (VAR_SESSION, self.session.clone().into()),
            (VAR_DEPTH, (self.depth + 1).to_string().into()),
            (VAR_INIT_PATH, self.init_path.clone().into()),
            (VAR_SHELL_ARGS, self.shell_args.clone().into()),
            (VAR_PATH, do_dir.to_path_buf().into()),
            (VAR_TARGET, target.to_path_buf().into()),
            (store::ROOT_VAR, root.to_path_buf().into()),
        ];
        if self.keep_going {
            vars.push((VAR_KEEP_GOING, "1".into()));
        }
        if let Some(shuffle) = &self.shuffle {
            vars.push((VAR_SHUFFLE, shuffle.clone().into()));
        }
        let mut path = env::var_os("PATH").unwrap_or_default();
        path.push(":.");
        vars.push(("PATH", path));
        vars
    }

    /// Two-space indentation per recursion level for build lines.
    pub fn indent(&self) -> String {
        "  ".repeat(self.depth as usize)
    }
}

fn new_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}
