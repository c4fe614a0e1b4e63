/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// A build script located for a target, together with how it was matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoFile {
    /// Absolute path to the script.
    pub path: PathBuf,
    /// True when the script is `<target>.do` rather than a `default*.do`.
    pub specific: bool,
}

impl DoFile {
    /// Directory the script lives in; scripts execute with this as their
    /// working directory.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The `$2` argument: `$1` for a specific script, `$1` with the
    /// script's extension suffix stripped for a default one.
    pub fn base_arg(&self, target_rel: &str) -> String {
        if self.specific {
            return target_rel.to_owned();
        }
        let name = self.file_name();
        let suffix = name
            .strip_prefix("default")
            .and_then(|rest| rest.strip_suffix(".do"))
            .unwrap_or("");
        target_rel
            .strip_suffix(suffix)
            .unwrap_or(target_rel)
            .to_owned()
    }
}

/// Locate the `.do` script for `target` (absolute path): `<name>.do` in
/// the target's own directory, then `default<.exts>.do` candidates in that
/// directory and every ancestor. Specific names are never matched upward.
pub fn find(target: &Path) -> Option<DoFile> {
    let dir = target.parent()?;
    let name = target.file_name()?.to_string_lossy().into_owned();

    let specific = dir.join(format!("{}.do", name));
    if specific.is_file() {
        return Some(DoFile {
            path: specific,
            specific: true,
        });
    }

    let candidates = default_candidates(&name);
    let mut search = Some(dir);
    while let Some(dir) = search {
        for candidate in &candidates {
            let path = dir.join(candidate);
            if path.is_file() {
                return Some(DoFile {
                    path,
                    specific: false,
                });
            }
        }
        search = dir.parent();
    }
    None
}

/// `default<.exts>.do` names for every proper suffix of the target's
/// extension list, most specific first, ending with the bare `default.do`.
fn default_candidates(name: &str) -> Vec<String> {
    let parts: Vec<&str> = name.split('.').collect();
    let mut candidates = Vec::with_capacity(parts.len());
    for i in 1..parts.len() {
        candidates.push(format!("default.{}.do", parts[i..].join(".")));
    }
    candidates.push("default.do".to_owned());
    candidates
}

/// Interpreter argv for `script`: the `#!` line when present, otherwise
/// `sh -e` with any accumulated shell args folded in.
pub fn interpreter(script: &Path, shell_args: &str) -> anyhow::Result<Vec<String>> {
    let contents = fs::read(script)
        .with_context(|| format!("failed to read .do script '{}'", script.display()))?;
    let first_line = match contents.split(|b| *b == b'\n').next() {
        Some(line) => String::from_utf8_lossy(line).into_owned(),
        None => String::new(),
    };
    if let Some(rest) = first_line.trim_end().strip_prefix("#!") {
        let argv: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
        if !argv.is_empty() {
            return Ok(argv);
        }
    }
    Ok(vec!["sh".to_owned(), format!("-e{}", shell_args)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_specific_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.do"));
        touch(&dir.path().join("default.do"));
        let found = find(&dir.path().join("a")).unwrap();
        assert_eq!(found.path, dir.path().join("a.do"));
        assert!(found.specific);
    }

    #[test]
    fn test_default_suffix_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("default.b.c.do"));
        touch(&dir.path().join("default.c.do"));
        touch(&dir.path().join("default.do"));
        let found = find(&dir.path().join("a.b.c")).unwrap();
        assert_eq!(found.path, dir.path().join("default.b.c.do"));
        assert!(!found.specific);
    }

    #[test]
    fn test_default_found_in_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let sub = root.path().join("x/y");
        fs::create_dir_all(&sub).unwrap();
        touch(&root.path().join("default.ext.do"));
        let found = find(&sub.join("t.ext")).unwrap();
        assert_eq!(found.path, root.path().join("default.ext.do"));
    }

    #[test]
    fn test_specific_not_matched_in_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let sub = root.path().join("x");
        fs::create_dir_all(&sub).unwrap();
        touch(&root.path().join("t.do"));
        assert_eq!(find(&sub.join("t")), None);
    }

    #[test]
    fn test_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find(&dir.path().join("a")), None);
    }

    #[test]
    fn test_base_arg_specific() {
        let do_file = DoFile {
            path: PathBuf::from("/p/a.b.do"),
            specific: true,
        };
        assert_eq!(do_file.base_arg("a.b"), "a.b");
    }

    #[test]
    fn test_base_arg_default_strips_suffix() {
        let do_file = DoFile {
            path: PathBuf::from("/p/default.b.c.do"),
            specific: false,
        };
        assert_eq!(do_file.base_arg("sub/a.b.c"), "sub/a");
    }

    #[test]
    fn test_base_arg_bare_default() {
        let do_file = DoFile {
            path: PathBuf::from("/p/default.do"),
            specific: false,
        };
        assert_eq!(do_file.base_arg("all"), "all");
    }

    #[test]
    fn test_interpreter_shebang() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("f.do");
        fs::write(&script, "#!/usr/bin/env python3\nprint()\n").unwrap();
        let argv = interpreter(&script, "").unwrap();
        assert_eq!(argv, vec!["/usr/bin/env", "python3"]);
    }

    #[test]
    fn test_interpreter_default_shell() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("f.do");
        fs::write(&script, "echo hi\n").unwrap();
        assert_eq!(interpreter(&script, "").unwrap(), vec!["sh", "-e"]);
        assert_eq!(interpreter(&script, "x").unwrap(), vec!["sh", "-ex"]);
    }
}
