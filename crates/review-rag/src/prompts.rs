//! Fixed prompt templates for the agent and the analysis tools.

/// System instruction for the tool-routing agent.
pub const AGENT_SYSTEM_PROMPT: &str = "\
You are an analyst answering questions about customer reviews of cloud \
infrastructure vendors (e.g. ovh, scaleway, hetzner, digital_ocean, vultr, \
cherry_servers).

You have four tools:
- retrieve_reviews: fetch relevant review snippets from the vector store. \
Always call this first to ground your answer. You may call it again between \
analyses to gather more context.
- sentiment_analysis: summarize overall sentiment, rating statistics, and \
emotional themes from a snippet set.
- aspect_extraction: identify and rank the specific product/service aspects \
customers mention, with per-aspect sentiment and example quotes.
- jtbd_analysis: infer the jobs-to-be-done — what customers are trying to \
accomplish, their motivations, expected outcomes, and frustrations.

Guidance:
- Ground every claim in retrieved snippets; quote or paraphrase them.
- If retrieval returns no snippets, say that no relevant reviews were found \
and answer directly without calling further analysis tools.
- Pass the retrieved snippets to the analysis tools when the question calls \
for sentiment, aspects, or customer goals.
- Keep the final answer concise and concrete; mention vendors by name.";

/// System instruction for the non-agentic RAG answer path.
pub const RAG_SYSTEM_PROMPT: &str = "\
You are an analyst answering questions about customer reviews of cloud \
infrastructure vendors. Answer using only the review excerpts provided in \
the context. Ground every claim in the excerpts; if the context contains no \
relevant reviews, say so plainly instead of speculating.";

const SENTIMENT_ANALYSIS_PROMPT: &str = "\
Analyze the overall sentiment of the customer reviews below.

Report: the number of reviews analyzed, the mean rating, the percentage of \
positive reviews (rating >= 4), the percentage of negative reviews \
(rating <= 2), and the top recurring positive and negative themes, each \
backed by the reviews' own wording.

Reviews (JSON):
{reviews}";

const ASPECTS_ANALYSIS_PROMPT: &str = "\
Identify the specific product/service aspects mentioned in the customer \
reviews below (e.g. performance, pricing, support, reliability, control \
panel). Rank them by how often they are discussed.

For each aspect report: its name, mention frequency, an average sentiment \
score between -1 and 1, and short example quotes split into positive, \
neutral, and negative mentions.

Reviews (JSON):
{reviews}";

const JTBD_ANALYSIS_PROMPT: &str = "\
Infer the Jobs-to-Be-Done from the customer reviews below: the functional \
job customers hire this service for, the situation in which the job arises, \
their motivation, what a successful outcome looks like, and their common \
frustrations. Include short supporting quotes taken from the reviews.

Reviews (JSON):
{reviews}";

fn fill(template: &str, reviews_json: &str, question: &str, hint: &str) -> String {
    format!(
        "{}\n\n{}: {}",
        template.replace("{reviews}", reviews_json),
        hint,
        question
    )
}

pub fn sentiment_prompt(reviews_json: &str, question: &str) -> String {
    fill(
        SENTIMENT_ANALYSIS_PROMPT,
        reviews_json,
        question,
        "You may use this question to focus the sentiment analysis",
    )
}

pub fn aspects_prompt(reviews_json: &str, question: &str) -> String {
    fill(
        ASPECTS_ANALYSIS_PROMPT,
        reviews_json,
        question,
        "You may use this question to focus the aspect analysis",
    )
}

pub fn jtbd_prompt(reviews_json: &str, question: &str) -> String {
    fill(
        JTBD_ANALYSIS_PROMPT,
        reviews_json,
        question,
        "You may use this question to focus the JTBD analysis",
    )
}

/// Prompt for the single-shot RAG chain: formatted context plus question.
pub fn rag_prompt(context: &str, question: &str) -> String {
    format!(
        "{}\n\nReview excerpts:\n{}\n\nQuestion: {}",
        RAG_SYSTEM_PROMPT, context, question
    )
}
