//! Word-count token heuristics. Good enough for budgeting, not billing.

const CHARS_PER_TOKEN: usize = 4;
const FALLBACK_PRICING_MODEL: &str = "gpt-3.5-turbo";

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt: f64,
    pub completion: f64,
}

pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    let (prompt, completion) = match model {
        "gpt-3.5-turbo" => (0.0005, 0.0015),
        "gpt-4" => (0.03, 0.06),
        "gpt-4-turbo" => (0.01, 0.03),
        "claude-3-opus" => (0.015, 0.075),
        "claude-3-sonnet" => (0.003, 0.015),
        "claude-3-haiku" => (0.00025, 0.00125),
        _ => return None,
    };
    Some(ModelPricing { prompt, completion })
}

fn is_special(c: char) -> bool {
    !(c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace())
}

/// `ceil(words * 1.3) + ceil(punctuation * 0.5)`.
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let special = text.chars().filter(|c| is_special(*c)).count();
    (words as f64 * 1.3).ceil() as usize + (special as f64 * 0.5).ceil() as usize
}

pub fn tokens_to_chars(tokens: usize) -> usize {
    tokens * CHARS_PER_TOKEN
}

/// Unknown models are priced as gpt-3.5-turbo.
pub fn estimate_cost(prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
    let pricing = pricing_for(model)
        .or_else(|| pricing_for(FALLBACK_PRICING_MODEL))
        .unwrap_or(ModelPricing {
            prompt: 0.0,
            completion: 0.0,
        });
    (prompt_tokens as f64 / 1000.0) * pricing.prompt
        + (completion_tokens as f64 / 1000.0) * pricing.completion
}

/// Cut `text` to roughly `max_tokens`, ending on a word boundary, and append
/// `suffix`. Text already within the limit is returned unchanged.
pub fn truncate_to_token_limit(text: &str, max_tokens: usize, suffix: &str) -> String {
    if estimate_token_count(text) <= max_tokens {
        return text.to_string();
    }

    let suffix_tokens = estimate_token_count(suffix);
    if max_tokens <= suffix_tokens {
        return suffix.to_string();
    }

    let target_chars = tokens_to_chars(max_tokens - suffix_tokens);
    let cut: String = text.chars().take(target_chars).collect();

    // Drop the trailing partial word and the whitespace before it.
    let without_tail = cut.trim_end_matches(|c: char| !c.is_whitespace());
    let truncated = if without_tail.is_empty() {
        cut.as_str()
    } else {
        without_tail.trim_end()
    };
    format!("{truncated}{suffix}")
}
