//! CloudNC connector (spec §4.B): meeting-RSS first, falling back to
//! listing-HTML + per-meeting-page scraping when no feed path is configured.

use crate::common::{default_committee_dictionary, extract_link_candidates, extract_meeting_date, infer_doc_type, match_body};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::sync::Arc;
use watchdog_core::{Connector, DocType, DocumentRef, Gateway, Platform, Result, Source};

pub struct CloudNcConnector {
    source: Source,
    gateway: Arc<dyn Gateway>,
}

impl CloudNcConnector {
    pub fn new(source: Source, gateway: Arc<dyn Gateway>) -> Self {
        Self { source, gateway }
    }

    fn base(&self) -> &str {
        self.source.base_url.trim_end_matches('/')
    }

    async fn discover_via_feed(&self, feed_path: &str) -> Result<Vec<DocumentRef>> {
        let feed_url = format!("{}{}", self.base(), feed_path);
        let resp = self.gateway.fetch(&feed_url).await?;
        let xml = String::from_utf8_lossy(&resp.bytes).to_string();
        Ok(parse_meeting_feed(&xml, &self.source.config.municipality, &feed_url))
    }

    async fn discover_via_html(&self, listing_path: &str) -> Result<Vec<DocumentRef>> {
        let dictionary = default_committee_dictionary();
        let listing_url = format!("{}{}", self.base(), listing_path);
        let listing = self.gateway.fetch(&listing_url).await?;
        let listing_html = String::from_utf8_lossy(&listing.bytes).to_string();

        let meeting_links = extract_link_candidates(&listing_html, &listing_url);
        let mut out = Vec::new();

        for meeting in meeting_links {
            // One bad meeting page must not take down the whole run.
            let Ok(page) = self.gateway.fetch(&meeting.url).await else { continue };
            let page_html = String::from_utf8_lossy(&page.bytes).to_string();
            let attachments = extract_link_candidates(&page_html, &meeting.url);

            for att in attachments {
                if !att.url.to_ascii_lowercase().contains(".pdf") {
                    continue;
                }
                let Some(file_id) = numeric_file_id(&att.url) else { continue };
                let search_text = format!("{} {}", meeting.text, att.text);
                out.push(DocumentRef {
                    municipality: self.source.config.municipality.clone(),
                    platform: Platform::CloudNc,
                    body: match_body(&search_text, &dictionary),
                    meeting_date: extract_meeting_date(&search_text),
                    published_at: None,
                    doc_type: infer_doc_type(&search_text),
                    title: if att.text.is_empty() { meeting.text.clone() } else { att.text.clone() },
                    source_url: meeting.url.clone(),
                    file_urls: vec![att.url.clone()],
                    external_id: file_id,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Connector for CloudNcConnector {
    fn platform(&self) -> Platform {
        Platform::CloudNc
    }

    async fn discover(&self) -> Result<Vec<DocumentRef>> {
        if let Some(feed_path) = &self.source.config.paths.meetings {
            return self.discover_via_feed(feed_path).await;
        }
        let mut out = Vec::new();
        for listing_path in &self.source.config.listing_paths {
            out.extend(self.discover_via_html(listing_path).await?);
        }
        Ok(out)
    }
}

/// Extracts the trailing run of digits from a URL, used as CloudNC's
/// numeric file id (spec §4.B: "`external_id` = numeric file id").
fn numeric_file_id(url: &str) -> Option<String> {
    let digits: String = url.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        let digits: String = url.chars().filter(|c| c.is_ascii_digit()).collect();
        return if digits.is_empty() { None } else { Some(digits) };
    }
    Some(digits.chars().rev().collect())
}

fn parse_meeting_feed(xml: &str, municipality: &str, feed_url: &str) -> Vec<DocumentRef> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let (mut title, mut link, mut pub_date, mut body) = (String::new(), String::new(), String::new(), String::new());
    let mut current_tag = String::new();
    let mut in_item = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = true;
                    title.clear();
                    link.clear();
                    pub_date.clear();
                    body.clear();
                }
                current_tag = name;
            }
            Ok(Event::Text(t)) => {
                if !in_item {
                    continue;
                }
                let text = t.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "title" => title = text,
                    "link" => link = text,
                    "pubDate" | "pubdate" => pub_date = text,
                    "category" => body = text,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" && in_item {
                    in_item = false;
                    if link.is_empty() {
                        continue;
                    }
                    let search_text = format!("{title} {body}");
                    let external_id = numeric_file_id(&link).unwrap_or_else(|| title.clone());
                    out.push(DocumentRef {
                        municipality: municipality.to_string(),
                        platform: Platform::CloudNc,
                        body: if body.is_empty() {
                            match_body(&search_text, &default_committee_dictionary())
                        } else {
                            body.clone()
                        },
                        meeting_date: extract_meeting_date(&search_text).or_else(|| parse_rfc2822_date(&pub_date)),
                        published_at: None,
                        doc_type: infer_doc_type(&search_text),
                        title: title.clone(),
                        source_url: feed_url.to_string(),
                        file_urls: vec![link.clone()],
                        external_id,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    out
}

fn parse_rfc2822_date(s: &str) -> Option<chrono::NaiveDate> {
    chrono::DateTime::parse_from_rfc2822(s).ok().map(|d| d.date_naive())
}
