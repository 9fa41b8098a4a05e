use std::io::Cursor;

use anyhow::Context;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;

pub const CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
pub const FEED_UNAVAILABLE: &str = "Feed Temporarily Unavailable";
pub const NO_CONTENT: &str = "No Content Available";

/// RFC 822 date as RSS readers expect it: zero-padded day, GMT zone.
const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Channel-level metadata written around a list of items.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: Option<String>,
}

/// Attribution attached to items in the merged feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSource {
    pub name: String,
    /// Feed URL of the originating source
    pub url: String,
}

/// One syndicated article.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub guid: Option<String>,
    pub source: Option<ItemSource>,
}

impl FeedItem {
    /// Identity key: the guid when the upstream supplied one, else the link.
    pub fn identity(&self) -> &str {
        self.guid.as_deref().unwrap_or(&self.link)
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Serializes `items` as an RSS 2.0 document under `channel`.
///
/// Items are written in the order given. Items with a [`ItemSource`] get a
/// `<source url="…">` child.
pub fn write_feed(channel: &Channel, items: &[FeedItem]) -> anyhow::Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    open_document(&mut writer)?;
    write_channel_header(&mut writer, channel)?;

    for item in items {
        write_item(&mut writer, item)?;
    }

    close_document(writer)
}

/// Serializes an item-less document whose channel describes a failure.
pub fn write_error_feed(title: &str, link: &str, description: &str) -> anyhow::Result<String> {
    let channel = Channel {
        title: title.to_string(),
        link: link.to_string(),
        description: description.to_string(),
        language: None,
    };
    write_feed(&channel, &[])
}

fn open_document(writer: &mut XmlWriter) -> anyhow::Result<()> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(rss))
        .context("Failed to write rss element")?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .context("Failed to write channel element")?;
    Ok(())
}

fn close_document(mut writer: XmlWriter) -> anyhow::Result<String> {
    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .context("Failed to write channel end")?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .context("Failed to write rss end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated RSS contains invalid UTF-8")
}

fn write_channel_header(writer: &mut XmlWriter, channel: &Channel) -> anyhow::Result<()> {
    write_text_element(writer, "title", &channel.title)?;
    write_text_element(writer, "link", &channel.link)?;
    write_text_element(writer, "description", &channel.description)?;
    if let Some(ref language) = channel.language {
        write_text_element(writer, "language", language)?;
    }
    write_text_element(writer, "lastBuildDate", &format_date(Utc::now()))
}

fn write_item(writer: &mut XmlWriter, item: &FeedItem) -> anyhow::Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .context("Failed to write item element")?;

    write_text_element(writer, "title", &item.title)?;
    write_text_element(writer, "link", &item.link)?;
    write_text_element(writer, "description", &item.description)?;
    if let Some(pub_date) = item.pub_date {
        write_text_element(writer, "pubDate", &format_date(pub_date))?;
    }
    if let Some(ref guid) = item.guid {
        write_text_element(writer, "guid", guid)?;
    }
    if let Some(ref source) = item.source {
        let mut start = BytesStart::new("source");
        start.push_attribute(("url", source.url.as_str()));
        writer
            .write_event(Event::Start(start))
            .context("Failed to write source element")?;
        writer
            .write_event(Event::Text(BytesText::new(&source.name)))
            .context("Failed to write source text")?;
        writer
            .write_event(Event::End(BytesEnd::new("source")))
            .context("Failed to write source end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("item")))
        .context("Failed to write item end")?;
    Ok(())
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format(PUB_DATE_FORMAT).to_string()
}

fn write_text_element(writer: &mut XmlWriter, name: &str, text: &str) -> anyhow::Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("Failed to write {} element", name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {} text", name))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {} end", name))?;
    Ok(())
}
