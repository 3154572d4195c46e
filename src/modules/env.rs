use std::ffi::OsStr;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{Context, Env};
use crate::registry::Module;

pub const CONFIG_HOME: &str = "XDG_CONFIG_HOME";
const HOME_VARS: [&str; 2] = ["HOME", "HOMEPATH"];

/// Captures the process environment into the context.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvCapture {}

impl EnvCapture {
    /// Loads `vars`, replacing invalid unicode in names and values with
    /// U+FFFD.
    pub fn capture<I, K, V>(env: &mut Env, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        env.load(vars.into_iter().map(|(key, value)| {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key.to_str().is_none() || value.to_str().is_none() {
                debug!(name = %key.to_string_lossy(), "Environment variable is not valid unicode");
            }
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        }));

        if env.has(CONFIG_HOME) {
            return;
        }
        let config_home = HOME_VARS
            .iter()
            .find_map(|var| env.get(var))
            .map(|home| Path::new(home).join(".config").to_string_lossy().to_string());
        if let Some(config_home) = config_home {
            env.set(CONFIG_HOME, config_home);
        }
    }
}

impl Module for EnvCapture {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        Self::capture(&mut ctx.env, std::env::vars_os());
        Ok(())
    }
}
