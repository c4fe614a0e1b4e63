/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Context;

/// Payload byte for records that carry no stamp: missing dependencies and
/// the ifcreate/always/phony sentinels. Distinct from every valid stamp
/// (file stamps are 32 hex characters, directory stamps `<secs>.<nanos>`).
pub const SENTINEL: u8 = b'!';

/// Opaque summary of a filesystem object at a point in time. Compared by
/// byte equality only; the payload format is part of the on-disk contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp(Vec<u8>);

impl Stamp {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Stamp(bytes)
    }

    /// Stamp of a path that does not exist.
    pub fn missing() -> Self {
        Stamp(vec![SENTINEL])
    }

    pub fn is_missing(&self) -> bool {
        self.0 == [SENTINEL]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Stamp the object at `path`: content hash for regular files, rendered
/// modification time for directories, [`Stamp::missing`] when absent.
pub fn stamp(path: &Path) -> anyhow::Result<Stamp> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Stamp::missing()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat '{}'", path.display()));
        }
    };
    if metadata.is_dir() {
        let modified = metadata
            .modified()
            .with_context(|| format!("failed to read mtime of '{}'", path.display()))?;
        let since = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
        let rendered = format!("{}.{:09}", since.as_secs(), since.subsec_nanos());
        Ok(Stamp(rendered.into_bytes()))
    } else {
        let contents =
            fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        Ok(Stamp(format!("{:x}", md5::compute(&contents)).into_bytes()))
    }
}

/// Stable hex digest of a canonical target path, used to derive MetaDir
/// and lock file names.
pub fn target_id(target: &Path) -> String {
    format!("{:x}", md5::compute(target.to_string_lossy().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_missing() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = stamp(&dir.path().join("nope")).unwrap();
        assert!(stamp.is_missing());
        assert_eq!(stamp.as_bytes(), &[SENTINEL]);
    }

    #[test]
    fn test_stamp_stable_without_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "contents").unwrap();
        assert_eq!(stamp(&file).unwrap(), stamp(&file).unwrap());
    }

    #[test]
    fn test_stamp_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "one").unwrap();
        let before = stamp(&file).unwrap();
        fs::write(&file, "two").unwrap();
        assert_ne!(before, stamp(&file).unwrap());
    }

    #[test]
    fn test_file_stamp_is_not_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();
        let stamp = stamp(&file).unwrap();
        assert!(!stamp.is_missing());
        assert_eq!(stamp.as_bytes().len(), 32);
    }

    #[test]
    fn test_directory_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = stamp(dir.path()).unwrap();
        assert!(!stamp.is_missing());
        assert!(stamp.to_string().contains('.'));
    }

    #[test]
    fn test_target_id_is_stable_hex() {
        let id = target_id(Path::new("/some/target"));
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, target_id(Path::new("/some/target")));
        assert_ne!(id, target_id(Path::new("/some/other")));
    }
}
