// src/ingest/feed.rs
//! RSS 2.0 / Atom parsing into flat `FeedEntry` records.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    OffsetDateTime,
};

/// Format-independent view of one feed entry, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
}

// ---- Atom ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element whose attributes we don't care about (`<guid isPermaLink=..>`, `<title type=..>`).
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    text: String,
}

impl TextNode {
    fn into_text(self) -> Option<String> {
        let t = self.text.trim();
        (!t.is_empty()).then(|| t.to_string())
    }
}

/// Parse a feed body. The root element picks the dialect.
pub fn parse_feed(body: &str) -> Result<Vec<FeedEntry>> {
    let t0 = std::time::Instant::now();
    let xml = scrub_html_entities_for_xml(body);

    let entries = match root_element(&xml)?.as_str() {
        "rss" => parse_rss(&xml)?,
        "feed" => parse_atom(&xml)?,
        other => return Err(anyhow!("unsupported feed root element <{other}>")),
    };

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(entries)
}

fn parse_rss(xml: &str) -> Result<Vec<FeedEntry>> {
    let rss: Rss = from_str(xml).context("parsing rss xml")?;
    Ok(rss
        .channel
        .item
        .into_iter()
        .map(|it| FeedEntry {
            guid: it.guid.and_then(TextNode::into_text),
            title: it.title,
            link: it.link.map(|l| l.trim().to_string()),
            summary: it.description,
            content: it.content_encoded,
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
        })
        .collect())
}

fn parse_atom(xml: &str) -> Result<Vec<FeedEntry>> {
    let feed: AtomFeed = from_str(xml).context("parsing atom xml")?;
    Ok(feed
        .entry
        .into_iter()
        .map(|e| {
            // Prefer rel="alternate" (or no rel) over self/edit links.
            let link = e
                .link
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| e.link.first())
                .and_then(|l| l.href.clone());
            FeedEntry {
                guid: e.id.map(|s| s.trim().to_string()),
                title: e.title.and_then(TextNode::into_text),
                link,
                summary: e.summary.and_then(TextNode::into_text),
                content: e.content.and_then(TextNode::into_text),
                published_at: e
                    .published
                    .or(e.updated)
                    .as_deref()
                    .and_then(parse_rfc3339),
            }
        })
        .collect())
}

fn root_element(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().context("reading feed xml")? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
            }
            Event::Eof => return Err(anyhow!("empty feed document")),
            _ => {}
        }
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
        // `time` rejects some legacy zone names ("EST", "PDT") that chrono accepts.
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
