/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Character that replaces path separators inside record filenames.
pub const ESCAPE_CHAR: char = '^';

const SEPARATOR: char = '/';

/// Resolve `path` against the current directory and fold `.`/`..`
/// components lexically. Unlike `fs::canonicalize` the path does not have
/// to exist.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    Ok(normalize(&absolute))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            part => out.push(part),
        }
    }
    out
}

/// Normalize a path string before it is embedded in a record name:
/// trailing separators are dropped, and `./` survives only as the bare
/// current-directory path.
pub fn sanitize(path: &str) -> String {
    let mut s = path;
    while s.len() > 1 && s.ends_with(SEPARATOR) {
        s = &s[..s.len() - 1];
    }
    if s == "." {
        return s.to_owned();
    }
    let mut out = s;
    while let Some(rest) = out.strip_prefix("./") {
        out = rest;
    }
    out.to_owned()
}

/// Escape a path for use inside a record filename: separators become
/// [`ESCAPE_CHAR`], literal escape characters are doubled with `@`.
/// Round-trips: `unescape(escape(p)) == sanitize(p)`.
pub fn escape(path: &str) -> String {
    let sanitized = sanitize(path);
    let mut out = String::with_capacity(sanitized.len());
    for c in sanitized.chars() {
        match c {
            ESCAPE_CHAR => {
                out.push(ESCAPE_CHAR);
                out.push('@');
            }
            SEPARATOR => out.push(ESCAPE_CHAR),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`].
pub fn unescape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ESCAPE_CHAR {
            if chars.peek() == Some(&'@') {
                chars.next();
                out.push(ESCAPE_CHAR);
            } else {
                out.push(SEPARATOR);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `target` relative to `dir`, both absolute. Falls back to the absolute
/// path when no relative form exists.
pub fn relative_to(target: &Path, dir: &Path) -> String {
    pathdiff::diff_paths(target, dir)
        .unwrap_or_else(|| target.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
