//! Prompt assembly for Triage and Case Build (spec.md §4.D, §6).
//!
//! Token budgets are approximated as 4 characters per token, which is close
//! enough for Finnish text to keep prompts inside the stated ≤4000/≤8000
//! input-token ceilings without pulling in a tokenizer dependency this
//! pipeline has no other use for.

const CHARS_PER_TOKEN: usize = 4;

fn char_budget(max_tokens: usize) -> usize {
    max_tokens.saturating_mul(CHARS_PER_TOKEN)
}

fn truncate_with_marker(s: &str, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        return (s.to_string(), false);
    }
    let marker = "\n[...]\n";
    let budget = max_chars.saturating_sub(marker.chars().count());
    let head: String = s.chars().take(budget).collect();
    (format!("{head}{marker}"), true)
}

pub struct TriageInput<'a> {
    pub municipality: &'a str,
    pub body: &'a str,
    pub title: &'a str,
    pub meeting_date: Option<chrono::NaiveDate>,
    pub headings: &'a [String],
    pub text: &'a str,
}

/// Returns `(prompt, truncated)`. The prompt wraps the document's fields in
/// explicit delimiters so the model cannot confuse instructions with
/// document content.
pub fn build_triage_prompt(input: &TriageInput<'_>) -> (String, bool) {
    let budget = char_budget(4000);
    let text_head: String = input.text.chars().take(2000).collect();
    let (text_head, truncated) = truncate_with_marker(&text_head, budget / 2);

    let prompt = format!(
        "<<<DOCUMENT>>>\nmunicipality: {municipality}\nbody: {body}\ntitle: {title}\nmeeting_date: {meeting_date}\nheadings: {headings}\ntext:\n{text}\n<<<END DOCUMENT>>>\n\nReturn JSON: {{\"categories\": string[] (subset of zoning, permits_extraction, water_wetlands, industry_infrastructure), \"relevance_score\": number in [0,1], \"candidate_reason\": string}}",
        municipality = input.municipality,
        body = input.body,
        title = input.title,
        meeting_date = input.meeting_date.map(|d| d.to_string()).unwrap_or_default(),
        headings = input.headings.join("; "),
        text = text_head,
    );
    let (prompt, clipped2) = truncate_with_marker(&prompt, budget);
    (prompt, truncated || clipped2)
}

pub struct CaseBuildInput<'a> {
    pub municipality: &'a str,
    pub body: &'a str,
    pub title: &'a str,
    pub meeting_date: Option<chrono::NaiveDate>,
    pub source_url: &'a str,
    pub text: &'a str,
}

pub fn build_case_build_prompt(input: &CaseBuildInput<'_>) -> (String, bool) {
    let budget = char_budget(8000);
    let (text, text_truncated) = truncate_with_marker(input.text, budget.saturating_sub(500));

    let prompt = format!(
        "<<<DOCUMENT>>>\nmunicipality: {municipality}\nbody: {body}\ntitle: {title}\nmeeting_date: {meeting_date}\nsource_url: {source_url}\ntext:\n{text}\n<<<END DOCUMENT>>>\n\nReturn JSON: {{\"headline\": string, \"summary\": string, \"status\": \"proposed\"|\"approved\"|\"unknown\", \"timeline\": [{{\"event_type\": string, \"event_time\": RFC3339}}], \"evidence\": [{{\"page\": number|null, \"snippet\": string, \"source_url\": string}}], \"entities\": string[], \"locations\": string[], \"confidence\": \"high\"|\"medium\"|\"low\", \"confidence_reason\": string}}",
        municipality = input.municipality,
        body = input.body,
        title = input.title,
        meeting_date = input.meeting_date.map(|d| d.to_string()).unwrap_or_default(),
        source_url = input.source_url,
        text = text,
    );
    let (prompt, clipped2) = truncate_with_marker(&prompt, budget);
    (prompt, text_truncated || clipped2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_prompt_stays_within_the_token_budget() {
        let long_text = "sana ".repeat(10_000);
        let input = TriageInput {
            municipality: "Salla",
            body: "Tekninen lautakunta",
            title: "Kokous",
            meeting_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 12),
            headings: &[],
            text: &long_text,
        };
        let (prompt, truncated) = build_triage_prompt(&input);
        assert!(truncated);
        assert!(prompt.chars().count() <= char_budget(4000));
    }

    #[test]
    fn short_document_is_not_marked_truncated() {
        let input = CaseBuildInput {
            municipality: "Salla",
            body: "Tekninen lautakunta",
            title: "Kokous",
            meeting_date: None,
            source_url: "http://example/x.pdf",
            text: "lyhyt teksti",
        };
        let (_prompt, truncated) = build_case_build_prompt(&input);
        assert!(!truncated);
    }
}
