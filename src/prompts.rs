//! Prompt builders for the NLU and narrative stages.

use crate::metrics::{fmt_count, fmt_delta, fmt_money, fmt_rate, Metrics};
use crate::nlu::QuestionContext;

pub fn nlu(question: &str, slug: &str) -> String {
    format!(
        r#"You're an intelligent assistant analyzing a marketing question.

Given this user query: "{question}", return a JSON object with:
- "intent": a short label for the type of question (e.g. "performance_review", "growth_strategy", "budget_optimization", etc.)
- "entities": a list of any key terms, brands, or themes mentioned in the question
- "slug": the company/client this applies to (use: "{slug}")

Only respond with valid JSON."#
    )
}

pub fn trends(industry: &str) -> String {
    format!(
        r#"Act as a marketing trend analyst.

In 3 sentences, summarize the current major trends and strategies in the **{industry}** industry — especially related to advertising, SEO, social media, or lead generation.

Avoid generalities — be specific and timely. Mention tools, tactics, and changes in consumer behavior if relevant."#
    )
}

pub fn strategy(metrics: &Metrics, trends: &str, context: &QuestionContext) -> String {
    format!(
        r#"You are a creative growth strategist inspired by Steve Jobs and Virgil Abloh.

You are advising a business called "{slug}".
Your goal is to translate numbers and trends into a bold but realistic 3-6 month growth idea.

Here are some key performance insights:
- Ad Spend: {cost}
- Conversions: {conversions}
- Conversion Rate: {rate}
- CPL: {cpl}
- Benchmark CPL: {benchmark}
- Leads vs. previous period: {lead_delta}
- GA Users vs. previous period: {user_delta}

Market Trends for this industry:
{trends}

User asked something related to: "{intent}"

Please return one strategic insight that:
- Synthesizes the data and current marketing trends
- Focuses on practical moves the business can take in the next 3-6 months
- Relates to performance marketing (Google Ads, SEO, content, email, etc.)
- Is creative, thoughtful, and high-leverage — not generic or obvious
- Is contextually relevant to the performance of the brand relative to the market
- Fixes something that needs to be fixed
- Don't emphasize AI or AI related topics

Respond with a single paragraph — no greetings, no summaries."#,
        slug = context.slug,
        cost = fmt_money(metrics.total_cost),
        conversions = fmt_count(metrics.total_conversions),
        rate = fmt_rate(metrics.conversion_rate),
        cpl = fmt_money(metrics.cpl),
        benchmark = fmt_money(metrics.benchmark_cpl),
        lead_delta = fmt_delta(metrics.lead_change),
        user_delta = fmt_delta(metrics.user_change),
        trends = trends,
        intent = context.intent,
    )
}

pub fn translate(strategic_thought: &str, context: &QuestionContext) -> String {
    format!(
        r#"You are answering a business owner's question: "{question}"

Your job is to take a raw strategic idea and communicate it simply to your client, as if Elon Musk was explaining what matters most to them.

Here's the raw strategy:
"""{strategic_thought}"""

Do not restate all the stats — focus on the mood, clarity, and message.
Be bold, but not buzzwordy. Keep it grounded and emotionally resonant.

Respond in 4 sentences or less."#,
        question = context.question,
        strategic_thought = strategic_thought,
    )
}
