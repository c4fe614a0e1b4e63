/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use thiserror::Error;

/// Engine-level build failures, each tied to the process exit code the
/// binaries must report.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no .do file found for target '{0}'")]
    NoDoFile(String),
    #[error("'{do_file}' for target '{target}' exited with code {code}")]
    ChildFailed {
        target: String,
        do_file: String,
        code: i32,
    },
    #[error(".do script for '{0}' wrote to stdout and created $3")]
    StdoutAndTmpFile(String),
    #[error(".do script modified '{0}' directly")]
    ModifiedDirectly(String),
}

impl BuildError {
    /// A failing child propagates its own exit code; engine errors exit 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::ChildFailed { code, .. } => *code,
            _ => 1,
        }
    }
}

/// Exit code for a finished run: the first `BuildError` in the chain
/// decides, anything else is an engine failure.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<BuildError>()
        .map(BuildError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_exit_code_propagates() {
        let err = BuildError::ChildFailed {
            target: "t".to_owned(),
            do_file: "t.do".to_owned(),
            code: 42,
        };
        assert_eq!(err.exit_code(), 42);
    }

    #[test]
    fn test_engine_errors_exit_one() {
        assert_eq!(BuildError::NoDoFile("t".to_owned()).exit_code(), 1);
        assert_eq!(
            BuildError::ModifiedDirectly("t".to_owned()).exit_code(),
            1
        );
    }

    #[test]
    fn test_exit_code_through_anyhow() {
        let err: anyhow::Error = BuildError::ChildFailed {
            target: "t".to_owned(),
            do_file: "t.do".to_owned(),
            code: 7,
        }
        .into();
        assert_eq!(exit_code(&err), 7);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
