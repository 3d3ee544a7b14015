//! Deterministic pre-Triage filter: most documents never touch the LLM.

/// Keyword set from spec.md §4.D, checked against title + body + the first
/// 2000 characters of extracted text before any LLM call is made.
const KEYWORDS: &[&str] = &[
    "kaava",
    "yleiskaava",
    "osayleiskaava",
    "asemakaava",
    "poikkeaminen",
    "maa-aines",
    "ympäristölupa",
    "meluilmoitus",
    "vesitalous",
    "ojitus",
    "kuivatus",
    "natura",
    "tuuli",
    "kaivos",
    "turve",
];

/// Committees that are monitored regardless of keyword match (e.g. an
/// environmental board's agenda is always worth a Triage pass even when its
/// summary happens to avoid every listed keyword this month).
const MONITORED_BODIES: &[&str] = &[
    "ympäristölautakunta",
    "rakennuslautakunta",
    "tekninen lautakunta",
    "kaavoitustoimikunta",
];

fn contains_any_keyword(haystack: &str) -> bool {
    let lower = haystack.to_lowercase();
    KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn is_monitored_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    MONITORED_BODIES.iter().any(|b| lower.contains(b))
}

/// Whether a document should proceed to an LLM Triage call. `text` is the
/// concatenated extracted text of its Files (already clamped by the caller
/// to the first 2000 characters, per spec.md §4.D).
pub fn passes_keyword_gate(title: &str, body: &str, text_first_2000_chars: &str) -> bool {
    if is_monitored_body(body) {
        return true;
    }
    contains_any_keyword(title) || contains_any_keyword(body) || contains_any_keyword(text_first_2000_chars)
}
