mod ask;
mod refresh;

use crate::state::Context;

/// Dexter - marketing performance assistant
#[poise::command(slash_command, subcommands("ask::ask", "refresh::refresh"))]
pub async fn dexter(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}
