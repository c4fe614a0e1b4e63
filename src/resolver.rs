/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::debug;

use crate::dofile;
use crate::path;
use crate::stamp;
use crate::store::{DepRecord, Store};

/// Decides whether a target must be rebuilt by walking its recorded
/// dependencies. One resolver instance spans one decision: targets
/// revisited within it are reported up-to-date, which keeps cycles built
/// out of generated `.do` files bounded.
pub struct Resolver<'a> {
    store: &'a Store,
    session: &'a str,
    visiting: HashSet<PathBuf>,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store, session: &'a str) -> Self {
        Resolver {
            store,
            session,
            visiting: HashSet::new(),
        }
    }

    /// True iff `target` (absolute) needs no rebuild.
    pub fn is_up_to_date(&mut self, target: &Path) -> anyhow::Result<bool> {
        if !self.visiting.insert(target.to_path_buf()) {
            debug!("'{}' already visited, treating as up to date", target.display());
            return Ok(true);
        }
        self.check(target)
    }

    fn check(&mut self, target: &Path) -> anyhow::Result<bool> {
        if self.store.is_clean(target, self.session) {
            return Ok(true);
        }
        if self.store.is_dirty(target, self.session) {
            debug!("'{}' failed earlier this session", target.display());
            return Ok(false);
        }
        if !target.exists() && !self.store.phony(target) {
            debug!("'{}' has never been built", target.display());
            return Ok(false);
        }
        // divergence from the recorded post-build stamp means the user
        // edited the artifact; report stale so the orchestrator can warn
        if let Some(built) = self.store.built_stamp(target) {
            let current = stamp::stamp(target)?;
            if !current.is_missing() && current != built {
                debug!("'{}' was modified outside redo", target.display());
                return Ok(false);
            }
        }
        if self.store.is_source(target) {
            return Ok(true);
        }
        let do_file = match dofile::find(target) {
            Some(do_file) => do_file,
            None => return Ok(true), // tracked once, now a plain file
        };
        let records = self.store.dep_records(target)?;
        if records.iter().any(|record| matches!(record, DepRecord::Always)) {
            debug!("'{}' depends on always", target.display());
            return Ok(false);
        }
        let do_dir = do_file.dir();
        for record in &records {
            if let DepRecord::IfCreate { dep } = record {
                let dep_path = path::absolutize(&do_dir.join(dep))?;
                if dep_path.exists() {
                    debug!(
                        "'{}' waits on creation of '{}', which now exists",
                        target.display(),
                        dep
                    );
                    return Ok(false);
                }
            }
        }
        for record in &records {
            if let DepRecord::IfChange { dep, stamp: stored } = record {
                let dep_path = path::absolutize(&do_dir.join(dep))?;
                let built = match self.store.built_target_path(&dep_path) {
                    Some(built) => built,
                    None => {
                        debug!("dependency '{}' of '{}' is gone", dep, target.display());
                        return Ok(false);
                    }
                };
                let current = stamp::stamp(&built)?;
                if current != *stored {
                    debug!("dependency '{}' of '{}' changed", dep, target.display());
                    return Ok(false);
                }
                if !self.is_up_to_date(&dep_path)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dofile::DoFile;
    use crate::stamp::Stamp;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        project: PathBuf,
        store: Store,
    }

    /// A built target `t` with its `t.do` recorded, as the orchestrator
    /// leaves it after a successful run.
    fn built_target(name: &str) -> (Fixture, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        let store = Store::with_root(dir.path().join("root")).unwrap();

        let target = project.join(name);
        let do_path = project.join(format!("{}.do", name));
        fs::write(&do_path, "echo hi > $3\n").unwrap();
        fs::write(&target, "hi\n").unwrap();

        let do_file = DoFile {
            path: do_path,
            specific: true,
        };
        store.init_meta_dir(&target, &do_file).unwrap();
        store.mark_built(&target).unwrap();

        let fixture = Fixture {
            _dir: dir,
            project,
            store,
        };
        (fixture, target)
    }

    fn up_to_date(store: &Store, target: &Path) -> bool {
        Resolver::new(store, "session").is_up_to_date(target).unwrap()
    }

    #[test]
    fn test_never_built_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_root(dir.path().join("root")).unwrap();
        assert!(!up_to_date(&store, &dir.path().join("t")));
    }

    #[test]
    fn test_source_file_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_root(dir.path().join("root")).unwrap();
        let source = dir.path().join("s");
        fs::write(&source, "data").unwrap();
        assert!(up_to_date(&store, &source));
    }

    #[test]
    fn test_built_target_is_up_to_date() {
        let (fixture, target) = built_target("t");
        assert!(up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_always_forces_rebuild() {
        let (fixture, target) = built_target("t");
        fixture.store.store_always(&target).unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_ifcreate_fires_on_creation() {
        let (fixture, target) = built_target("t");
        fixture
            .store
            .store_ifcreate(&target, "x", &fixture.project.join("x"))
            .unwrap();
        assert!(up_to_date(&fixture.store, &target));
        fs::write(fixture.project.join("x"), "").unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_do_change_forces_rebuild() {
        let (fixture, target) = built_target("t");
        fs::write(fixture.project.join("t.do"), "echo changed > $3\n").unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_missing_dep_forces_rebuild() {
        let (fixture, target) = built_target("t");
        fixture
            .store
            .store_ifchange(&target, "gone", &Stamp::from_bytes(b"old".to_vec()))
            .unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_dep_stamp_mismatch_forces_rebuild() {
        let (fixture, target) = built_target("t");
        let dep = fixture.project.join("dep");
        fs::write(&dep, "v1").unwrap();
        fixture
            .store
            .store_ifchange(&target, "dep", &stamp::stamp(&dep).unwrap())
            .unwrap();
        assert!(up_to_date(&fixture.store, &target));
        fs::write(&dep, "v2").unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_external_modification_is_stale() {
        let (fixture, target) = built_target("t");
        fs::write(&target, "edited by hand\n").unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_session_marks_short_circuit() {
        let (fixture, target) = built_target("t");
        fixture.store.store_always(&target).unwrap();
        assert!(!up_to_date(&fixture.store, &target));
        fixture.store.mark_clean(&target, "session").unwrap();
        assert!(up_to_date(&fixture.store, &target));
        fixture.store.mark_dirty(&target, "session").unwrap();
        assert!(!up_to_date(&fixture.store, &target));
    }

    #[test]
    fn test_self_cycle_is_bounded() {
        let (fixture, target) = built_target("t");
        let rel = "t";
        fixture
            .store
            .store_ifchange(&target, rel, &stamp::stamp(&target).unwrap())
            .unwrap();
        assert!(up_to_date(&fixture.store, &target));
    }
}
