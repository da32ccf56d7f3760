use tracing::info;

use crate::pipeline::PipelineError;
use crate::state::Context;

/// Ask a business-performance question
#[poise::command(slash_command, guild_only)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question"] question: String,
) -> Result<(), anyhow::Error> {
    // Acknowledge immediately so the user isn't staring at a loading spinner
    let user_mention = format!("<@{}>", ctx.author().id);
    ctx.say(format!(
        "On it — digging into the numbers. I'll ping you when the answer is ready, {}",
        user_mention
    ))
    .await?;

    let user_id = ctx.author().id.get();
    info!(user = ctx.author().name, question, "Pipeline run started");

    let reply = match ctx.data().pipeline.answer(&question, Some(user_id)).await {
        Ok(text) => text,
        // Known client, stale data: say so, don't pretend we never heard of them.
        Err(PipelineError::DataUnavailable(slug)) => format!(
            "I know **{}**, but I couldn't find fresh report data for them. \
             Check that the latest ads and analytics exports have landed.",
            slug
        ),
    };

    info!(reply_len = reply.len(), "Pipeline run complete");

    let full = format!("{} here's what I found:\n\n{}", user_mention, reply);
    send_chunked(&ctx, &full).await
}

const CHUNK_LIMIT: usize = 1990;

/// Send a message in Discord-safe chunks (max 1990 bytes).
/// Uses ctx.say() for all chunks — poise routes follow-ups through the
/// interaction webhook, which doesn't require Send Messages channel permission.
async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = chunk_split_at(remaining);
        let chunk = &remaining[..split_at];
        remaining = &remaining[split_at..];

        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Where to cut the next chunk. Prefers a newline or space near the limit;
/// the limit itself is floored to a char boundary so the slice can never
/// land inside a multi-byte character.
fn chunk_split_at(remaining: &str) -> usize {
    if remaining.len() <= CHUNK_LIMIT {
        return remaining.len();
    }
    let mut end = CHUNK_LIMIT;
    while !remaining.is_char_boundary(end) {
        end -= 1;
    }
    remaining[..end]
        .rfind('\n')
        .or_else(|| remaining[..end].rfind(' '))
        .map(|i| i + 1)
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(text: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut remaining = text;
        while !remaining.is_empty() {
            let split_at = chunk_split_at(remaining);
            out.push(&remaining[..split_at]);
            remaining = &remaining[split_at..];
        }
        out
    }

    #[test]
    fn short_replies_are_one_chunk() {
        assert_eq!(chunks("hello"), vec!["hello"]);
    }

    #[test]
    fn long_replies_split_on_whitespace_and_reassemble() {
        let text = "word ".repeat(1000);
        let parts = chunks(&text);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|c| c.len() <= CHUNK_LIMIT));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn multibyte_char_straddling_the_limit_does_not_panic() {
        // 1989 bytes of filler, then a 4-byte emoji across the 1990 mark,
        // then enough tail to force a second chunk. No spaces or newlines,
        // so the cut falls back to the floored boundary.
        let text = format!("{}📊{}", "a".repeat(1989), "b".repeat(100));
        assert!(!text.is_char_boundary(CHUNK_LIMIT));

        let parts = chunks(&text);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|c| c.len() <= CHUNK_LIMIT));
        assert_eq!(parts.concat(), text);
    }
}
