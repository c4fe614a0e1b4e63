/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;
use log::{debug, error, info, warn};

use crate::dofile::{self, DoFile};
use crate::env::Env;
use crate::error::BuildError;
use crate::lock::TargetLock;
use crate::path;
use crate::resolver::Resolver;
use crate::stamp::{self, Stamp};
use crate::store::Store;

/// Builds a batch of targets: locks each one, runs its `.do` script under
/// the environment contract, and installs whatever the script produced.
pub struct Orchestrator {
    store: Store,
    env: Env,
}

impl Orchestrator {
    pub fn new(store: Store, env: Env) -> Self {
        Orchestrator { store, env }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Build every target unconditionally (the `redo` entry).
    pub fn redo(&self, targets: &[String]) -> anyhow::Result<()> {
        self.run_batch(targets, false)
    }

    /// Build the out-of-date subset (the `redo-ifchange` entry).
    pub fn redo_ifchange(&self, targets: &[String]) -> anyhow::Result<()> {
        self.run_batch(targets, true)
    }

    /// Two passes over the batch: uncontended targets first, then a
    /// blocking pass over whatever another process held.
    fn run_batch(&self, targets: &[String], only_if_changed: bool) -> anyhow::Result<()> {
        let mut last_failure: Option<anyhow::Error> = None;
        let mut deferred: Vec<(String, PathBuf)> = Vec::new();

        for raw in targets {
            let target = path::absolutize(Path::new(raw))
                .with_context(|| format!("failed to resolve target path '{}'", raw))?;
            match TargetLock::try_acquire(&self.store.lock_path(&target))? {
                Some(_lock) => {
                    if let Err(err) = self.process(raw, &target, only_if_changed) {
                        if !self.env.keep_going {
                            return Err(err);
                        }
                        error!("{:#}", err);
                        last_failure = Some(err);
                    }
                }
                None => {
                    debug!("'{}' is locked by another process, deferring", raw);
                    deferred.push((raw.clone(), target));
                }
            }
        }

        for (raw, target) in deferred {
            let _lock = TargetLock::acquire(&self.store.lock_path(&target))?;
            if let Err(err) = self.process(&raw, &target, only_if_changed) {
                if !self.env.keep_going {
                    return Err(err);
                }
                error!("{:#}", err);
                last_failure = Some(err);
            }
        }

        match last_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// One target, lock already held by the caller.
    fn process(&self, raw: &str, target: &Path, only_if_changed: bool) -> anyhow::Result<()> {
        if only_if_changed {
            let mut resolver = Resolver::new(&self.store, &self.env.session);
            if resolver.is_up_to_date(target)? {
                debug!("'{}' is up to date", raw);
                if self.store.has_meta_dir(target) {
                    self.store.mark_clean(target, &self.env.session)?;
                }
                return Ok(());
            }
        }
        let do_file = match dofile::find(target) {
            Some(do_file) => do_file,
            None => {
                if only_if_changed && target.exists() {
                    debug!("'{}' is a source file", raw);
                    return Ok(());
                }
                return Err(BuildError::NoDoFile(raw.to_owned()).into());
            }
        };
        self.build(raw, target, &do_file)
    }

    fn build(&self, raw: &str, target: &Path, do_file: &DoFile) -> anyhow::Result<()> {
        let pre_stamp = stamp::stamp(target)?;
        if let Some(built) = self.store.built_stamp(target) {
            if !pre_stamp.is_missing() && pre_stamp != built {
                warn!(
                    "{}redo  {} (modified outside redo, skipping)",
                    self.env.indent(),
                    raw
                );
                return Ok(());
            }
        }

        info!("{}redo  {}", self.env.indent(), raw);

        let do_dir = do_file.dir().to_path_buf();
        let target_rel = path::relative_to(target, &do_dir);
        let base_arg = do_file.base_arg(&target_rel);
        let tmp3 = format!("{}.redo1.temp", target_rel);
        let tmp_stdout = format!(
            "{}.redo2.temp",
            target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        let _cwd = CwdGuard::enter(&do_dir)?;
        self.store.init_meta_dir(target, do_file)?;

        let outcome = self.execute(
            raw,
            target,
            do_file,
            &do_dir,
            &target_rel,
            &base_arg,
            &tmp3,
            &tmp_stdout,
            &pre_stamp,
        );

        // status marks land before temp cleanup so observers of the
        // MetaDir always see a settled outcome
        match &outcome {
            Ok(()) => {
                self.store.mark_clean(target, &self.env.session)?;
                if target.exists() {
                    self.store.mark_built(target)?;
                }
            }
            Err(_) => {
                self.store.mark_dirty(target, &self.env.session)?;
            }
        }
        remove_temp(Path::new(&tmp3));
        remove_temp(Path::new(&tmp_stdout));
        outcome
    }

    /// Spawn the `.do` script per the shell contract and classify its
    /// output. Runs with the `.do`'s directory as the working directory.
    fn execute(
        &self,
        raw: &str,
        target: &Path,
        do_file: &DoFile,
        do_dir: &Path,
        target_rel: &str,
        base_arg: &str,
        tmp3: &str,
        tmp_stdout: &str,
        pre_stamp: &Stamp,
    ) -> anyhow::Result<()> {
        let interpreter = dofile::interpreter(&do_file.path, &self.env.shell_args)?;
        let (program, args) = interpreter
            .split_first()
            .context("empty interpreter command")?;

        let stdout_file = File::create(tmp_stdout)
            .with_context(|| format!("failed to create '{}'", tmp_stdout))?;

        let status = Command::new(program)
            .args(args)
            .arg(do_file.file_name())
            .arg(target_rel)
            .arg(base_arg)
            .arg(tmp3)
            .envs(self.env.child_env(do_dir, target, self.store.root()))
            .stdout(Stdio::from(stdout_file))
            .status()
            .with_context(|| {
                format!(
                    "failed to spawn '{}' for '{}'",
                    program,
                    do_file.path.display()
                )
            })?;

        let code = match status.code() {
            Some(0) => return self.install(raw, target, pre_stamp, tmp3, tmp_stdout),
            Some(code) => code,
            None => 1, // terminated by signal
        };
        Err(BuildError::ChildFailed {
            target: raw.to_owned(),
            do_file: do_file.file_name(),
            code,
        }
        .into())
    }

    /// Classify what the script produced and install it over the target.
    fn install(
        &self,
        raw: &str,
        target: &Path,
        pre_stamp: &Stamp,
        tmp3: &str,
        tmp_stdout: &str,
    ) -> anyhow::Result<()> {
        // any divergence of the target itself means the script wrote $1
        let now = stamp::stamp(target)?;
        if !now.is_missing() && now != *pre_stamp {
            return Err(BuildError::ModifiedDirectly(raw.to_owned()).into());
        }

        let tmp3 = Path::new(tmp3);
        let tmp_stdout = Path::new(tmp_stdout);
        let stdout_len = fs::metadata(tmp_stdout)
            .map(|metadata| metadata.len())
            .unwrap_or(0);

        if tmp3.exists() {
            let installed = install_artifact(tmp3, target)?;
            if stdout_len > 0 {
                return Err(BuildError::StdoutAndTmpFile(raw.to_owned()).into());
            }
            if !installed {
                return self.make_phony(target);
            }
            return Ok(());
        }
        if stdout_len > 0 {
            if !install_artifact(tmp_stdout, target)? {
                return self.make_phony(target);
            }
            return Ok(());
        }
        self.make_phony(target)
    }

    /// No artifact: drop any stale target and record the phony marker.
    fn make_phony(&self, target: &Path) -> anyhow::Result<()> {
        if target.is_dir() {
            fs::remove_dir_all(target)
                .with_context(|| format!("failed to remove '{}'", target.display()))?;
        } else if target.exists() {
            fs::remove_file(target)
                .with_context(|| format!("failed to remove '{}'", target.display()))?;
        }
        self.store.store_phony(target)
    }
}

/// Rename the produced artifact over the target, tolerating both files
/// and directories. False when neither attempt lands; the caller records
/// the target as phony instead.
fn install_artifact(from: &Path, to: &Path) -> anyhow::Result<bool> {
    if fs::rename(from, to).is_ok() {
        return Ok(true);
    }
    if to.is_dir() {
        fs::remove_dir_all(to)
            .with_context(|| format!("failed to replace directory '{}'", to.display()))?;
        if fs::rename(from, to).is_ok() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn remove_temp(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else {
        let _ = fs::remove_file(path);
    }
}

/// Restores the previous working directory on drop, on success and
/// failure paths alike.
struct CwdGuard {
    previous: PathBuf,
}

impl CwdGuard {
    fn enter(dir: &Path) -> anyhow::Result<CwdGuard> {
        let previous = env::current_dir().context("failed to read current directory")?;
        env::set_current_dir(dir)
            .with_context(|| format!("failed to enter '{}'", dir.display()))?;
        Ok(CwdGuard { previous })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Err(err) = env::set_current_dir(&self.previous) {
            error!(
                "failed to restore working directory to '{}': {}",
                self.previous.display(),
                err
            );
        }
    }
}
