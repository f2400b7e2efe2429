//! Configuration command.

use super::Context;
use crate::output;
use anyhow::Result;

pub fn config(ctx: &Context, init: bool) -> Result<()> {
    if init {
        ctx.config.save(&ctx.paths)?;
        let message = format!("Wrote {}", ctx.paths.config_file().display());
        output::print_success(&message, &ctx.format);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&ctx.config)?);
    Ok(())
}
