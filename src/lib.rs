/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! File-oriented incremental build engine: targets are produced by `.do`
//! scripts which declare their dependencies at runtime through the
//! `redo-ifchange`, `redo-ifcreate` and `redo-always` helpers.

pub mod build;
pub mod deps;
pub mod dofile;
pub mod env;
pub mod error;
pub mod lock;
pub mod logger;
pub mod path;
pub mod resolver;
pub mod stamp;
pub mod store;
