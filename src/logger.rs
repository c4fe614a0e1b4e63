/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::env;

use anyhow::Context;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Level override, standard `LevelFilter` names (`debug` traces resolver
/// decisions).
pub const VAR_LOG: &str = "REDO_LOG";

/// Route all engine output to stderr; stdout belongs to the `.do`
/// scripts.
pub fn init() -> anyhow::Result<()> {
    let level = env::var(VAR_LOG)
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .context("failed to assemble logger configuration")?;
    log4rs::init_config(config).context("failed to init logger")?;
    Ok(())
}
