use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Context;
use crate::registry::Module;

/// Decides whether the publish stage runs, from an environment variable.
/// Publishing stays off unless the variable is set to a false value.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkipPublish {
    pub env_name: String,
}

impl Default for SkipPublish {
    fn default() -> Self {
        Self {
            env_name: "SKIP_PUBLISH".to_string(),
        }
    }
}

impl Module for SkipPublish {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        let Some(value) = ctx.env.get(&self.env_name) else {
            return Ok(());
        };
        let skip = parse_bool(value)
            .ok_or_else(|| anyhow!("parsing {} as bool: invalid value {value:?}", self.env_name))?;
        ctx.publish = !skip;
        info!(publish = ctx.publish, "Publishing toggled");
        Ok(())
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn false_value_enables_publishing() {
        let mut ctx = Context::new();
        ctx.env.set("SKIP_PUBLISH", "false");
        SkipPublish::default().run(&mut ctx).unwrap();
        assert!(ctx.publish);
    }

    #[test]
    fn unset_value_leaves_publishing_off() {
        let mut ctx = Context::new();
        SkipPublish::default().run(&mut ctx).unwrap();
        assert!(!ctx.publish);
    }
}
