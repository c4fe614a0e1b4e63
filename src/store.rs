/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use regex::Regex;

use crate::dofile::DoFile;
use crate::path;
use crate::stamp::{self, Stamp, SENTINEL};

/// Overrides the metadata root; re-exported to every child so one build
/// tree agrees on a single root.
pub const ROOT_VAR: &str = "REDO_ROOT";

const ALWAYS_RECORD: &str = ".~redo-always~.";
const PHONY_RECORD: &str = ".phony-target.";
const DO_RECORD: &str = ".do.do.";
const BUILT_RECORD: &str = ".blt.blt.";

/// One dependency record inside a MetaDir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepRecord {
    /// Rebuild when the dependency's stamp no longer matches.
    IfChange { dep: String, stamp: Stamp },
    /// Rebuild when the named path comes into existence.
    IfCreate { dep: String },
    /// Rebuild on every invocation.
    Always,
}

/// Per-target metadata under a user-scoped root. Each target owns one
/// MetaDir named by the hash of its canonical path; every record is a
/// single self-describing file inside it.
pub struct Store {
    root: PathBuf,
    mark_pattern: Regex,
}

impl Store {
    /// Open the store at the user-scoped default root, honoring
    /// [`ROOT_VAR`].
    pub fn open() -> anyhow::Result<Store> {
        if let Some(root) = env::var_os(ROOT_VAR).filter(|v| !v.is_empty()) {
            return Store::with_root(PathBuf::from(root));
        }
        let root = dirs::data_dir()
            .map(|dir| dir.join("redo"))
            .or_else(|| dirs::home_dir().map(|dir| dir.join(".redo")))
            .context("failed to locate a user data directory for redo metadata")?;
        Store::with_root(root)
    }

    pub fn with_root(root: PathBuf) -> anyhow::Result<Store> {
        let mark_pattern = Regex::new(r"^\.(?:cln|drt)\..+\.(?:cln|drt)\.$")
            .context("failed to compile mark pattern")?;
        Ok(Store { root, mark_pattern })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// MetaDir for an absolute target path, split as `<id[..2]>/<id[2..]>`
    /// to keep the root from growing flat.
    pub fn meta_dir(&self, target: &Path) -> PathBuf {
        let id = stamp::target_id(target);
        self.root.join(&id[..2]).join(&id[2..])
    }

    /// Lock file serializing builds of `target`, flat under the root.
    pub fn lock_path(&self, target: &Path) -> PathBuf {
        self.root
            .join(format!(".lck.{}.lck.", stamp::target_id(target)))
    }

    pub fn has_meta_dir(&self, target: &Path) -> bool {
        self.meta_dir(target).is_dir()
    }

    /// True iff `target` exists on disk and redo holds no metadata for it.
    pub fn is_source(&self, target: &Path) -> bool {
        target.exists() && !self.has_meta_dir(target)
    }

    /// Start a fresh build of `target`: drop any prior MetaDir, record the
    /// `.do` used, and register the `.do` itself as an ifchange dependency.
    pub fn init_meta_dir(&self, target: &Path, do_file: &DoFile) -> anyhow::Result<()> {
        let meta = self.meta_dir(target);
        if meta.exists() {
            fs::remove_dir_all(&meta)
                .with_context(|| format!("failed to clear MetaDir at '{}'", meta.display()))?;
        }
        fs::create_dir_all(&meta)
            .with_context(|| format!("failed to create MetaDir at '{}'", meta.display()))?;
        let do_record = meta.join(DO_RECORD);
        fs::write(&do_record, do_file.path.to_string_lossy().as_bytes())
            .with_context(|| format!("failed to record .do path at '{}'", do_record.display()))?;
        let do_stamp = stamp::stamp(&do_file.path)?;
        self.store_ifchange(target, &do_file.file_name(), &do_stamp)
    }

    /// Record `dep` (a path relative to the `.do` directory) with the
    /// stamp observed for it.
    pub fn store_ifchange(&self, target: &Path, dep: &str, stamp: &Stamp) -> anyhow::Result<()> {
        let record = self
            .meta_dir(target)
            .join(format!(".@{}@.", path::escape(dep)));
        fs::write(&record, stamp.as_bytes())
            .with_context(|| format!("failed to write ifchange record '{}'", record.display()))
    }

    /// Record an ifcreate dependency. Fails when the path already exists:
    /// ifcreate watches for creation, not change.
    pub fn store_ifcreate(&self, target: &Path, dep: &str, dep_path: &Path) -> anyhow::Result<()> {
        if dep_path.exists() {
            bail!(
                "cannot watch '{}' for creation, it already exists",
                dep_path.display()
            );
        }
        let record = self
            .meta_dir(target)
            .join(format!(".%{}%.", path::escape(dep)));
        fs::write(&record, [SENTINEL])
            .with_context(|| format!("failed to write ifcreate record '{}'", record.display()))
    }

    pub fn store_always(&self, target: &Path) -> anyhow::Result<()> {
        let record = self.meta_dir(target).join(ALWAYS_RECORD);
        fs::write(&record, [SENTINEL])
            .with_context(|| format!("failed to write always record '{}'", record.display()))
    }

    pub fn store_phony(&self, target: &Path) -> anyhow::Result<()> {
        let record = self.meta_dir(target).join(PHONY_RECORD);
        fs::write(&record, [SENTINEL])
            .with_context(|| format!("failed to write phony marker '{}'", record.display()))
    }

    pub fn phony(&self, target: &Path) -> bool {
        self.meta_dir(target).join(PHONY_RECORD).is_file()
    }

    /// The artifact a declared dependency resolves to: the target itself
    /// when on disk, its phony marker when the target is phony, nothing
    /// otherwise.
    pub fn built_target_path(&self, target: &Path) -> Option<PathBuf> {
        if target.exists() {
            return Some(target.to_path_buf());
        }
        let marker = self.meta_dir(target).join(PHONY_RECORD);
        if marker.is_file() {
            return Some(marker);
        }
        None
    }

    pub fn cached_do(&self, target: &Path) -> Option<PathBuf> {
        let record = self.meta_dir(target).join(DO_RECORD);
        fs::read_to_string(record).ok().map(PathBuf::from)
    }

    /// Record the target's stamp right after a successful install.
    pub fn mark_built(&self, target: &Path) -> anyhow::Result<()> {
        let built = stamp::stamp(target)?;
        let record = self.meta_dir(target).join(BUILT_RECORD);
        fs::write(&record, built.as_bytes())
            .with_context(|| format!("failed to write built stamp '{}'", record.display()))
    }

    /// Stamp of the target at the end of its last successful build.
    pub fn built_stamp(&self, target: &Path) -> Option<Stamp> {
        let record = self.meta_dir(target).join(BUILT_RECORD);
        fs::read(record).ok().map(Stamp::from_bytes)
    }

    /// Record that `session` proved the target clean. Clean and dirty
    /// marks are mutually exclusive; marks from other sessions are purged.
    pub fn mark_clean(&self, target: &Path, session: &str) -> anyhow::Result<()> {
        self.write_mark(target, &format!(".cln.{}.cln.", session))
    }

    /// Record that `session` observed the target's build fail.
    pub fn mark_dirty(&self, target: &Path, session: &str) -> anyhow::Result<()> {
        self.write_mark(target, &format!(".drt.{}.drt.", session))
    }

    pub fn is_clean(&self, target: &Path, session: &str) -> bool {
        self.meta_dir(target)
            .join(format!(".cln.{}.cln.", session))
            .is_file()
    }

    pub fn is_dirty(&self, target: &Path, session: &str) -> bool {
        self.meta_dir(target)
            .join(format!(".drt.{}.drt.", session))
            .is_file()
    }

    fn write_mark(&self, target: &Path, name: &str) -> anyhow::Result<()> {
        self.purge_marks(target)?;
        let meta = self.meta_dir(target);
        fs::create_dir_all(&meta)
            .with_context(|| format!("failed to create MetaDir at '{}'", meta.display()))?;
        let record = meta.join(name);
        fs::write(&record, [SENTINEL])
            .with_context(|| format!("failed to write mark '{}'", record.display()))
    }

    fn purge_marks(&self, target: &Path) -> anyhow::Result<()> {
        let meta = self.meta_dir(target);
        let entries = match fs::read_dir(&meta) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list MetaDir at '{}'", meta.display()));
            }
        };
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to list MetaDir at '{}'", meta.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.mark_pattern.is_match(&name) {
                fs::remove_file(entry.path())
                    .with_context(|| format!("failed to purge mark '{}'", name))?;
            }
        }
        Ok(())
    }

    /// All dependency records of `target`, in directory order. Empty when
    /// no MetaDir exists.
    pub fn dep_records(&self, target: &Path) -> anyhow::Result<Vec<DepRecord>> {
        let meta = self.meta_dir(target);
        let mut records = Vec::new();
        let entries = match fs::read_dir(&meta) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(records),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list MetaDir at '{}'", meta.display()));
            }
        };
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to list MetaDir at '{}'", meta.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ALWAYS_RECORD {
                records.push(DepRecord::Always);
            } else if let Some(escaped) = name
                .strip_prefix(".@")
                .and_then(|rest| rest.strip_suffix("@."))
            {
                let payload = fs::read(entry.path())
                    .with_context(|| format!("failed to read record '{}'", name))?;
                records.push(DepRecord::IfChange {
                    dep: path::unescape(escaped),
                    stamp: Stamp::from_bytes(payload),
                });
            } else if let Some(escaped) = name
                .strip_prefix(".%")
                .and_then(|rest| rest.strip_suffix("%."))
            {
                records.push(DepRecord::IfCreate {
                    dep: path::unescape(escaped),
                });
            }
        }
        Ok(records)
    }
}
