use crate::state::Context;

/// Re-fetch the client directory (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn refresh(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let user_id = ctx.author().id.get();
    if !ctx.data().is_admin(user_id) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match ctx.data().directory.refresh().await {
        Ok(clients) => {
            ctx.say(format!(
                "Client directory refreshed: {} client(s) loaded.",
                clients.len()
            ))
            .await?;
        }
        Err(err) => {
            ctx.say(format!("Directory refresh failed: {}", err)).await?;
        }
    }

    Ok(())
}
