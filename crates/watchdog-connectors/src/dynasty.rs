//! Dynasty connector (spec §4.B): parses `meeting_handlers` listing frames
//! for meeting items and their linked documents.

use crate::common::{default_committee_dictionary, extract_link_candidates, extract_meeting_date, infer_doc_type, match_body};
use async_trait::async_trait;
use std::sync::Arc;
use watchdog_core::{Connector, DocumentRef, Gateway, Platform, Result, Source};

pub struct DynastyConnector {
    source: Source,
    gateway: Arc<dyn Gateway>,
}

impl DynastyConnector {
    pub fn new(source: Source, gateway: Arc<dyn Gateway>) -> Self {
        Self { source, gateway }
    }

    fn base(&self) -> &str {
        self.source.base_url.trim_end_matches('/')
    }
}

#[async_trait]
impl Connector for DynastyConnector {
    fn platform(&self) -> Platform {
        Platform::Dynasty
    }

    async fn discover(&self) -> Result<Vec<DocumentRef>> {
        let dictionary = default_committee_dictionary();
        let listing_path = self.source.config.paths.meetings.as_deref().unwrap_or("/meeting_handlers/meetingframes");
        let listing_url = format!("{}{}", self.base(), listing_path);
        let resp = self.gateway.fetch(&listing_url).await?;
        let html = String::from_utf8_lossy(&resp.bytes).to_string();

        let mut out = Vec::new();
        for item in extract_meeting_items(&html) {
            let item_links = extract_link_candidates(&item.html, &listing_url);
            for link in item_links {
                let lower = link.url.to_ascii_lowercase();
                if !(lower.contains(".pdf") || lower.contains("docid")) {
                    continue;
                }
                let search_text = format!("{} {}", item.text, link.text);
                out.push(DocumentRef {
                    municipality: self.source.config.municipality.clone(),
                    platform: Platform::Dynasty,
                    body: match_body(&search_text, &dictionary),
                    meeting_date: extract_meeting_date(&search_text),
                    published_at: None,
                    doc_type: infer_doc_type(&search_text),
                    title: if link.text.is_empty() { item.text.clone() } else { link.text.clone() },
                    source_url: listing_url.clone(),
                    file_urls: vec![link.url.clone()],
                    external_id: item.id.clone(),
                });
            }
        }
        Ok(out)
    }
}

struct MeetingItem {
    id: String,
    text: String,
    html: String,
}

/// Splits a `meeting_handlers` page into per-item frames, each carrying an
/// `id="meeting_item_<id>"`-style anchor. Real Dynasty markup nests items
/// inside `<div class="meeting_item" data-item-id="...">` blocks; this
/// extracts those blocks without a full DOM walk, tolerant of attribute
/// ordering.
fn extract_meeting_items(html: &str) -> Vec<MeetingItem> {
    let mut out = Vec::new();
    let marker = "meeting_item";
    let mut search_from = 0usize;

    while let Some(rel) = html[search_from..].find(marker) {
        let start = search_from + rel;
        let Some(tag_start) = html[..start].rfind('<') else {
            search_from = start + marker.len();
            continue;
        };
        let Some(tag_end) = html[tag_start..].find('>').map(|i| tag_start + i + 1) else {
            search_from = start + marker.len();
            continue;
        };
        let id = extract_attr(&html[tag_start..tag_end], "data-item-id").unwrap_or_else(|| format!("{start}"));

        let block_end = find_matching_close(html, tag_end).unwrap_or_else(|| html.len().min(tag_end + 4000));
        let block = &html[tag_start..block_end];
        let text = html_scraper::Html::parse_document(block)
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ");

        out.push(MeetingItem { id, text, html: block.to_string() });
        search_from = block_end;
    }
    out
}

fn extract_attr(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Finds the end of the div opened at `open_tag_end` by tracking nested
/// `<div` / `</div>` occurrences. Best-effort: markup this connector reads
/// is machine-generated and reliably balanced in practice.
fn find_matching_close(html: &str, open_tag_end: usize) -> Option<usize> {
    let mut depth = 1i32;
    let mut pos = open_tag_end;
    loop {
        let next_open = html[pos..].find("<div").map(|i| pos + i);
        let next_close = html[pos..].find("</div>").map(|i| pos + i);
        match (next_open, next_close) {
            (_, None) => return None,
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                pos = o + 4;
            }
            (_, Some(c)) => {
                depth -= 1;
                pos = c + 6;
                if depth == 0 {
                    return Some(pos);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use watchdog_core::FetchResponse;

    struct FixtureGateway {
        body: String,
    }

    #[async_trait]
    impl Gateway for FixtureGateway {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse> {
            Ok(FetchResponse {
                final_url: "https://dynasty.example.fi/meeting_handlers/meetingframes".to_string(),
                status: 200,
                content_type: Some("text/html".to_string()),
                headers: BTreeMap::new(),
                bytes: self.body.clone().into_bytes(),
                truncated: false,
            })
        }
        async fn download(&self, url: &str, mime: Option<&str>) -> Result<FetchResponse> {
            self.fetch(url).await.map(|mut r| {
                r.content_type = mime.map(String::from);
                r
            })
        }
    }

    fn source() -> Source {
        let mut config = watchdog_core::SourceConfig::default();
        config.municipality = "Inari".to_string();
        Source {
            id: 2,
            municipality: "Inari".to_string(),
            platform: Platform::Dynasty,
            base_url: "https://dynasty.example.fi".to_string(),
            enabled: true,
            config,
            last_success_at: None,
            last_attempt_at: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    #[tokio::test]
    async fn extracts_items_and_their_linked_documents() {
        let html = r#"
            <div class="meeting_item" data-item-id="771">
                Kunnanhallitus 5.5.2025
                <a href="/asiakirjat/771-paatos.pdf">Päätös</a>
            </div>
            <div class="meeting_item" data-item-id="772">
                Muu asia 6.5.2025
                <a href="/about">Ei liitetty</a>
            </div>
        "#;
        let gw = Arc::new(FixtureGateway { body: html.to_string() });
        let connector = DynastyConnector::new(source(), gw);
        let refs = connector.discover().await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].external_id, "771");
        assert_eq!(refs[0].body, "Kunnanhallitus");
        assert_eq!(refs[0].meeting_date, chrono::NaiveDate::from_ymd_opt(2025, 5, 5));
    }
}
