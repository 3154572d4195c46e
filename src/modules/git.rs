use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::Context;
use crate::modules::command_output;
use crate::registry::Module;

#[derive(Debug, Clone, Copy)]
enum Field {
    Version,
    Tag,
    Reference,
    Url,
}

struct Query {
    name: &'static str,
    required: bool,
    field: Field,
    args: &'static [&'static str],
}

const QUERIES: [Query; 4] = [
    Query {
        name: "version info",
        required: true,
        field: Field::Version,
        args: &["describe", "--tags", "--always", "--dirty"],
    },
    Query {
        name: "current tag",
        required: false,
        field: Field::Tag,
        args: &["describe", "--exact-match", "--tags"],
    },
    Query {
        name: "current ref",
        required: true,
        field: Field::Reference,
        args: &["-P", "show", "--format=%H", "-s"],
    },
    Query {
        name: "url",
        required: false,
        field: Field::Url,
        args: &["ls-remote", "--get-url"],
    },
];

/// Fills in version and repository data from `git`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Git {}

impl Module for Git {
    fn run(&self, ctx: &mut Context) -> Result<()> {
        for query in &QUERIES {
            let value = match command_output(ctx.env.command("git").args(query.args)) {
                Ok(value) => value,
                Err(err) if query.required => {
                    return Err(err.context(format!("cannot detect {} from git", query.name)));
                }
                Err(err) => {
                    debug!(query = query.name, error = %err, "Optional git query failed");
                    String::new()
                }
            };
            let target = match query.field {
                Field::Version => &mut ctx.version,
                Field::Tag => &mut ctx.git.tag,
                Field::Reference => &mut ctx.git.reference,
                Field::Url => &mut ctx.git.url,
            };
            *target = value;
        }

        if ctx.version.is_empty() {
            return Err(anyhow!("git reported an empty version"));
        }
        info!(
            version = ctx.version.as_str(),
            tag = ctx.git.tag.as_str(),
            "Version detected"
        );
        Ok(())
    }
}
