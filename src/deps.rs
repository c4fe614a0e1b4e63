/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::env::Parent;
use crate::path;
use crate::stamp::{self, Stamp};
use crate::store::Store;

/// Write-back of dependency declarations into the parent target's
/// MetaDir, used by the helper binaries while a `.do` script runs.
pub struct ParentBuild<'a> {
    store: &'a Store,
    parent: &'a Parent,
}

impl<'a> ParentBuild<'a> {
    pub fn new(store: &'a Store, parent: &'a Parent) -> Self {
        ParentBuild { store, parent }
    }

    /// Record an ifchange dependency, stamped against what the dependency
    /// actually produced (the artifact, or its phony marker).
    pub fn add_ifchange(&self, dep: &str) -> anyhow::Result<()> {
        let (rel, abs) = self.normalize(dep)?;
        let stamp = match self.store.built_target_path(&abs) {
            Some(built) => stamp::stamp(&built)?,
            None => Stamp::missing(),
        };
        self.store.store_ifchange(&self.parent.target, &rel, &stamp)
    }

    /// Record an ifcreate dependency; refuses paths that already exist.
    pub fn add_ifcreate(&self, dep: &str) -> anyhow::Result<()> {
        let (rel, abs) = self.normalize(dep)?;
        self.store.store_ifcreate(&self.parent.target, &rel, &abs)
    }

    pub fn add_always(&self) -> anyhow::Result<()> {
        self.store.store_always(&self.parent.target)
    }

    /// Normalize a path as given on a helper command line to the form
    /// stored in records: resolved via the current directory, then made
    /// relative to the parent redo-path.
    fn normalize(&self, dep: &str) -> anyhow::Result<(String, PathBuf)> {
        let abs = path::absolutize(Path::new(dep))
            .with_context(|| format!("failed to resolve dependency path '{}'", dep))?;
        let rel = pathdiff::diff_paths(&abs, &self.parent.redo_path)
            .unwrap_or_else(|| abs.clone());
        Ok((path::sanitize(&rel.to_string_lossy()), abs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DepRecord;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        project: PathBuf,
        store: Store,
        parent: Parent,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        let store = Store::with_root(dir.path().join("root")).unwrap();
        let target = project.join("parent");
        let do_path = project.join("parent.do");
        fs::write(&do_path, "").unwrap();
        store
            .init_meta_dir(
                &target,
                &crate::dofile::DoFile {
                    path: do_path,
                    specific: true,
                },
            )
            .unwrap();
        let parent = Parent {
            redo_path: project.clone(),
            target,
        };
        Fixture {
            _dir: dir,
            project,
            store,
            parent,
        }
    }

    #[test]
    fn test_ifchange_records_relative_path_and_stamp() {
        let fixture = fixture();
        let dep = fixture.project.join("dep");
        fs::write(&dep, "payload").unwrap();

        let deps = ParentBuild::new(&fixture.store, &fixture.parent);
        deps.add_ifchange(dep.to_string_lossy().as_ref()).unwrap();

        let records = fixture.store.dep_records(&fixture.parent.target).unwrap();
        assert!(records.contains(&DepRecord::IfChange {
            dep: "dep".to_owned(),
            stamp: stamp::stamp(&dep).unwrap(),
        }));
    }

    #[test]
    fn test_ifchange_missing_dep_records_sentinel() {
        let fixture = fixture();
        let deps = ParentBuild::new(&fixture.store, &fixture.parent);
        deps.add_ifchange(fixture.project.join("ghost").to_string_lossy().as_ref())
            .unwrap();
        let records = fixture.store.dep_records(&fixture.parent.target).unwrap();
        assert!(records.contains(&DepRecord::IfChange {
            dep: "ghost".to_owned(),
            stamp: Stamp::missing(),
        }));
    }

    #[test]
    fn test_ifcreate_existing_path_fails() {
        let fixture = fixture();
        let existing = fixture.project.join("x");
        fs::write(&existing, "").unwrap();
        let deps = ParentBuild::new(&fixture.store, &fixture.parent);
        assert!(deps
            .add_ifcreate(existing.to_string_lossy().as_ref())
            .is_err());
    }

    #[test]
    fn test_always_recorded() {
        let fixture = fixture();
        ParentBuild::new(&fixture.store, &fixture.parent)
            .add_always()
            .unwrap();
        let records = fixture.store.dep_records(&fixture.parent.target).unwrap();
        assert!(records.contains(&DepRecord::Always));
    }
}
