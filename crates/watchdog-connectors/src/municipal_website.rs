//! Generic HTML scraper connector for municipalities with a plain CMS
//! website rather than a dedicated meeting-management platform (spec
//! §4.B, `MunicipalWebsite`).

use crate::common::{default_committee_dictionary, extract_meeting_date, infer_doc_type, match_body, stable_url_hash};
use async_trait::async_trait;
use html_scraper::ElementRef;
use std::sync::Arc;
use watchdog_core::{Connector, DocumentRef, Gateway, Platform, Result, Source};

pub struct MunicipalWebsiteConnector {
    source: Source,
    gateway: Arc<dyn Gateway>,
}

impl MunicipalWebsiteConnector {
    pub fn new(source: Source, gateway: Arc<dyn Gateway>) -> Self {
        Self { source, gateway }
    }

    fn base(&self) -> &str {
        self.source.base_url.trim_end_matches('/')
    }
}

#[async_trait]
impl Connector for MunicipalWebsiteConnector {
    fn platform(&self) -> Platform {
        Platform::MunicipalWebsite
    }

    async fn discover(&self) -> Result<Vec<DocumentRef>> {
        let dictionary = default_committee_dictionary();
        let mut out = Vec::new();

        for listing_path in &self.source.config.listing_paths {
            let listing_url = format!("{}{}", self.base(), listing_path);
            let page = self.gateway.fetch(&listing_url).await?;
            let html = String::from_utf8_lossy(&page.bytes).to_string();

            let doc = html_scraper::Html::parse_document(&html);
            let Ok(sel) = html_scraper::Selector::parse("a[href]") else {
                continue;
            };

            for el in doc.select(&sel) {
                // Connectors must not raise on a single item's parse
                // failure (spec §4.B); skip anything malformed.
                let Some(href) = el.value().attr("href") else { continue };
                if !href.to_ascii_lowercase().contains(".pdf") {
                    continue;
                }
                let Some(abs_url) = resolve_href(&listing_url, href) else { continue };

                let anchor_text = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
                let block_text = block_text_around(el);
                let search_text = format!("{anchor_text} {block_text}");

                let title = if anchor_text.is_empty() {
                    abs_url.rsplit('/').next().unwrap_or("document").to_string()
                } else {
                    anchor_text.clone()
                };
                let body = match_body(&search_text, &dictionary);
                let meeting_date = extract_meeting_date(&block_text).or_else(|| extract_meeting_date(&anchor_text));
                let doc_type = infer_doc_type(&search_text);
                let external_id = stable_url_hash(&abs_url);

                out.push(DocumentRef {
                    municipality: self.source.config.municipality.clone(),
                    platform: Platform::MunicipalWebsite,
                    body,
                    meeting_date,
                    published_at: None,
                    doc_type,
                    title,
                    source_url: listing_url.clone(),
                    file_urls: vec![abs_url],
                    external_id,
                });
            }
        }

        Ok(out)
    }
}

fn resolve_href(base: &str, href: &str) -> Option<String> {
    if let Ok(u) = url::Url::parse(href) {
        return Some(u.to_string());
    }
    let base_url = url::Url::parse(base).ok()?;
    base_url.join(href).ok().map(|u| u.to_string())
}

/// Collects text from the anchor's nearest ancestor block that carries
/// more than a handful of words, used as the search context for committee
/// and date matching (spec §4.B: "the anchor's parent block").
fn block_text_around(el: ElementRef) -> String {
    let mut node = el.parent();
    for _ in 0..4 {
        let Some(n) = node else { break };
        if let Some(parent_el) = ElementRef::wrap(n) {
            let text: String = parent_el.text().collect::<Vec<_>>().join(" ");
            if text.split_whitespace().count() > 3 {
                return text;
            }
        }
        node = n.parent();
    }
    el.text().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use watchdog_core::{DocType, FetchResponse, SourceConfig, SourcePaths};

    struct FixtureGateway {
        body: String,
    }

    #[async_trait]
    impl Gateway for FixtureGateway {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse> {
            Ok(FetchResponse {
                final_url: "https://www.utsjoki.fi/paatokset".to_string(),
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
        Source {
            id: 1,
            municipality: "Utsjoki".to_string(),
            platform: Platform::MunicipalWebsite,
            base_url: "https://www.utsjoki.fi".to_string(),
            enabled: true,
            config: SourceConfig {
                listing_paths: vec!["/paatokset".to_string()],
                paths: SourcePaths::default(),
                municipality: "Utsjoki".to_string(),
                body_patterns: None,
                pdf_pattern: None,
            },
            last_success_at: None,
            last_attempt_at: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    // Scenario S4 (spec §8): anchor `paatos-2024-11-ympäristö.pdf` inside a
    // block containing "Ympäristölautakunta 13.12.2024".
    #[tokio::test]
    async fn s4_municipal_website_anchor_yields_expected_document_ref() {
        let html = r#"
            <html><body>
              <ul>
                <li>
                  Ympäristölautakunta 13.12.2024
                  <a href="/liitteet/paatos-2024-11-ympäristö.pdf">Päätös kaavamuutoksesta</a>
                </li>
              </ul>
            </body></html>
        "#;
        let gw = Arc::new(FixtureGateway { body: html.to_string() });
        let connector = MunicipalWebsiteConnector::new(source(), gw);
        let refs = connector.discover().await.unwrap();
        assert_eq!(refs.len(), 1);
        let r = &refs[0];
        assert_eq!(r.body, "Ympäristölautakunta");
        assert_eq!(r.meeting_date, chrono::NaiveDate::from_ymd_opt(2024, 12, 13));
        assert_eq!(r.doc_type, DocType::Decision);
        assert_eq!(r.file_urls.len(), 1);
        assert!(r.file_urls[0].ends_with("paatos-2024-11-ympäristö.pdf"));
    }

    #[tokio::test]
    async fn skips_non_pdf_anchors_without_failing_the_whole_page() {
        let html = r#"<a href="/about">About</a><a href="/doc.PDF">Doc</a>"#;
        let gw = Arc::new(FixtureGateway { body: html.to_string() });
        let connector = MunicipalWebsiteConnector::new(source(), gw);
        let refs = connector.discover().await.unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs[0].file_urls[0].to_ascii_lowercase().ends_with(".pdf"));
    }
}
