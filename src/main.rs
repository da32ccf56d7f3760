mod commands;
mod directory;
mod llm;
mod metrics;
mod narrative;
mod nlu;
mod notion;
mod pipeline;
mod prompts;
mod resolve;
mod retrieve;
mod state;

use std::collections::HashSet;
use std::sync::Arc;

use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tracing::{error, info, Level};

use directory::ClientDirectory;
use llm::LlmClient;
use narrative::LlmStages;
use nlu::LlmQuestionParser;
use notion::NotionClient;
use pipeline::Pipeline;
use resolve::SessionMemory;
use retrieve::DriveRetriever;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let token = dotenv::var("DISCORD_TOKEN").expect("DISCORD_TOKEN required");
    let guild_id: Option<serenity::GuildId> = dotenv::var("DISCORD_GUILD_ID")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(serenity::GuildId::new);

    // External collaborators
    let notion = Arc::new(NotionClient::from_env()?);
    let llm_client = Arc::new(LlmClient::from_env()?);
    info!("LLM client initialized");

    // Client directory: one snapshot per process, refreshable via /dexter refresh
    let directory = Arc::new(ClientDirectory::new(notion.clone()));
    let clients = directory.load().await?;
    info!(count = clients.len(), "Client directory loaded");

    let sessions = Arc::new(SessionMemory::from_env());
    let retriever = Arc::new(DriveRetriever::from_env(notion)?);
    let parser = Arc::new(LlmQuestionParser::new(llm_client.clone()));
    let stages = Arc::new(LlmStages::new(llm_client));

    let pipeline = Arc::new(Pipeline::new(
        directory.clone(),
        sessions,
        parser,
        retriever,
        stages.clone(),
        stages.clone(),
        stages,
    ));

    // Parse admin user IDs from env
    let admin_ids: HashSet<u64> = dotenv::var("ADMIN_USER_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect();
    if !admin_ids.is_empty() {
        info!(count = admin_ids.len(), "Admin users configured");
    }

    let app_state = AppState {
        pipeline,
        directory,
        admin_ids,
    };

    let intents = serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::dexter()],
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(
                        ctx,
                        &framework.options().commands,
                        gid,
                    )
                    .await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    )
                    .await?;
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting Dexter Discord bot...");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}
