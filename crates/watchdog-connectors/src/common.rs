//! Helpers shared across connector variants: link extraction (grounded on
//! `webpipe-local::links::extract_links`), Finnish committee-name lookup,
//! meeting-date parsing, and doc-type keyword inference (spec §4.B).

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use watchdog_core::DocType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub url: String,
    pub text: String,
}

/// Extract absolute `<a href>` links with their anchor text, resolving
/// relative hrefs against `base_url` and dropping fragments.
pub fn extract_link_candidates(html: &str, base_url: &str) -> Vec<LinkCandidate> {
    let base = url::Url::parse(base_url).ok();
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href").map(str::trim) else { continue };
        if href.is_empty() {
            continue;
        }
        let href_lc = href.to_ascii_lowercase();
        if href_lc.starts_with("javascript:") || href_lc.starts_with("mailto:") {
            continue;
        }
        let abs = if let Ok(u) = url::Url::parse(href) {
            u
        } else if let Some(b) = &base {
            match b.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            continue;
        };
        let mut u = abs;
        u.set_fragment(None);
        let text = el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
        out.push(LinkCandidate { url: u.to_string(), text });
    }
    out
}

/// Default Finnish committee-name dictionary (spec §4.B, MunicipalWebsite).
pub fn default_committee_dictionary() -> BTreeMap<&'static str, &'static str> {
    let mut m = BTreeMap::new();
    m.insert("valtuusto", "Kunnanvaltuusto");
    m.insert("hallitus", "Kunnanhallitus");
    m.insert("ympäristö", "Ympäristölautakunta");
    m.insert("tekninen", "Tekninen lautakunta");
    m.insert("rakennus", "Rakennuslautakunta");
    m.insert("hyvinvointi", "Hyvinvointilautakunta");
    m.insert("sivistys", "Sivistyslautakunta");
    m.insert("tarkastus", "Tarkastuslautakunta");
    m
}

/// Matches `text` against a committee keyword dictionary, falling back to
/// "Tuntematon" when nothing matches.
pub fn match_body<'a>(text: &str, dictionary: &BTreeMap<&'a str, &'a str>) -> String {
    let lower = text.to_lowercase();
    for (keyword, label) in dictionary {
        if lower.contains(keyword) {
            return (*label).to_string();
        }
    }
    "Tuntematon".to_string()
}

/// Infers `doc_type` from a Finnish keyword, defaulting to `minutes` (spec
/// §4.B).
pub fn infer_doc_type(text: &str) -> DocType {
    let lower = text.to_lowercase();
    if lower.contains("esityslista") {
        DocType::Agenda
    } else if lower.contains("pöytäkirja") {
        DocType::Minutes
    } else if lower.contains("päätös") {
        DocType::Decision
    } else if lower.contains("kuulutus") {
        DocType::Announcement
    } else {
        DocType::Minutes
    }
}

/// Matches `d.m.yyyy` or `yyyy-mm-dd` anywhere in `text`.
pub fn extract_meeting_date(text: &str) -> Option<NaiveDate> {
    use regex::Regex;
    static DOT_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static ISO_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

    let dot_re = DOT_RE.get_or_init(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4})").unwrap());
    if let Some(caps) = dot_re.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        if let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(d);
        }
    }

    let iso_re = ISO_RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap());
    if let Some(caps) = iso_re.captures(text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

/// Stable hash of an absolute URL, used as `external_id` when the upstream
/// platform has no native id (spec §4.B, MunicipalWebsite).
pub fn stable_url_hash(url: &str) -> String {
    let mut h = Sha256::new();
    h.update(url.as_bytes());
    hex::encode(h.finalize())[..16].to_string()
}
