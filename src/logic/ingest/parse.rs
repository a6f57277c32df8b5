//! Feed Parsing
//!
//! Streaming extraction of items from RSS 2.0 (`<item>`) and Atom
//! (`<entry>`) documents, followed by text normalization: tag stripping,
//! HTML-entity decoding and whitespace collapsing.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::FeedError;

/// One feed item before dedup and candidate construction.
#[derive(Debug, Clone, Default)]
pub struct RawItem {
    pub title: String,
    pub summary: String,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl RawItem {
    /// Feed-native identity: explicit id when present, link otherwise.
    pub fn external_id(&self) -> Option<String> {
        self.guid
            .clone()
            .filter(|g| !g.is_empty())
            .or_else(|| self.link.clone().filter(|l| !l.is_empty()))
    }
}

#[derive(Default)]
struct ItemBuilder {
    title: String,
    description: String,
    content: String,
    link_text: String,
    link_attr: Option<String>,
    guid: String,
    date_primary: String,
    date_fallback: String,
}

impl ItemBuilder {
    fn finish(self) -> RawItem {
        let summary = if !self.description.trim().is_empty() {
            self.description
        } else {
            self.content
        };
        let link = self
            .link_attr
            .or_else(|| {
                let text = self.link_text.trim().to_string();
                (!text.is_empty()).then_some(text)
            });
        let date_raw = if !self.date_primary.trim().is_empty() {
            self.date_primary
        } else {
            self.date_fallback
        };

        RawItem {
            title: normalize_text(&self.title),
            summary: normalize_text(&summary),
            link,
            guid: {
                let g = self.guid.trim().to_string();
                (!g.is_empty()).then_some(g)
            },
            published: parse_date(date_raw.trim()),
        }
    }
}

/// Parse a feed document into its items. Both RSS and Atom items surface
/// through the same `RawItem` shape.
pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>, FeedError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut items = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"item" || name == b"entry" {
                    current = Some(ItemBuilder::default());
                } else if let Some(builder) = current.as_mut() {
                    field = classify_field(name);
                    if name == b"link" {
                        if let Some(href) = href_attr(e) {
                            builder.link_attr = Some(href);
                        }
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(builder) = current.as_mut() {
                    if e.local_name().as_ref() == b"link" {
                        if let Some(href) = href_attr(e) {
                            builder.link_attr = Some(href);
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"item" || name == b"entry" {
                    if let Some(builder) = current.take() {
                        items.push(builder.finish());
                    }
                } else {
                    field = None;
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(builder), Some(field)) = (current.as_mut(), field) {
                    if let Ok(text) = e.unescape() {
                        builder.push(field, &text);
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let (Some(builder), Some(field)) = (current.as_mut(), field) {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    builder.push(field, &text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FeedError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Description,
    Content,
    Link,
    Guid,
    DatePrimary,
    DateFallback,
}

fn classify_field(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::Title),
        b"description" | b"summary" => Some(Field::Description),
        b"encoded" | b"content" => Some(Field::Content),
        b"link" => Some(Field::Link),
        b"guid" | b"id" => Some(Field::Guid),
        b"pubDate" | b"published" | b"date" => Some(Field::DatePrimary),
        b"updated" => Some(Field::DateFallback),
        _ => None,
    }
}

impl ItemBuilder {
    fn push(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Title => &mut self.title,
            Field::Description => &mut self.description,
            Field::Content => &mut self.content,
            Field::Link => &mut self.link_text,
            Field::Guid => &mut self.guid,
            Field::DatePrimary => &mut self.date_primary,
            Field::DateFallback => &mut self.date_fallback,
        };
        target.push_str(text);
    }
}

fn href_attr(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"href")
        .and_then(|a| String::from_utf8(a.value.into_owned()).ok())
}

/// Feeds disagree on date formats; try the two that cover the ecosystem.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// ============================================================================
// TEXT NORMALIZATION
// ============================================================================

/// Strip markup, decode entities, collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    let stripped = strip_tags(raw);
    let decoded = decode_entities(&stripped);
    collapse_whitespace(&decoded)
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        // Entities are short; look for ';' within a small window.
        let rest = &text[i + 1..];
        let end = rest.char_indices().take(10).find(|(_, c)| *c == ';');
        let Some((len, _)) = end else {
            out.push(c);
            continue;
        };
        let entity = &rest[..len];
        let replacement = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => decode_numeric_entity(entity),
        };
        match replacement {
            Some(decoded) => {
                out.push(decoded);
                // Skip the consumed entity body plus the ';'.
                for _ in 0..=len {
                    chars.next();
                }
            }
            None => out.push(c),
        }
    }
    out
}

fn decode_numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example Feed</title>
  <item>
    <title>Ransomware hits hospital network</title>
    <link>https://example.org/a</link>
    <guid>abc123</guid>
    <description><![CDATA[<p>Attackers &amp; affiliates encrypted systems.</p>]]></description>
    <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Second &#x27;quoted&#x27; advisory</title>
    <link>https://example.org/b</link>
    <description>Plain text body</description>
  </item>
</channel></rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <entry>
    <title>Atom advisory</title>
    <link href="https://example.org/atom-1"/>
    <id>urn:uuid:1</id>
    <summary>Summary &lt;b&gt;bold&lt;/b&gt; text</summary>
    <updated>2024-01-02T03:04:05Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let items = parse_feed(RSS_SAMPLE).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title, "Ransomware hits hospital network");
        assert_eq!(first.summary, "Attackers & affiliates encrypted systems.");
        assert_eq!(first.external_id().as_deref(), Some("abc123"));
        assert!(first.published.is_some());

        // No guid: the link is the identity. No pubDate: no publish time.
        let second = &items[1];
        assert_eq!(second.external_id().as_deref(), Some("https://example.org/b"));
        assert!(second.published.is_none());
        assert_eq!(second.title, "Second 'quoted' advisory");
    }

    #[test]
    fn test_parse_atom_entries() {
        let items = parse_feed(ATOM_SAMPLE).unwrap();
        assert_eq!(items.len(), 1);

        let item = &items[0];
        assert_eq!(item.title, "Atom advisory");
        assert_eq!(item.link.as_deref(), Some("https://example.org/atom-1"));
        assert_eq!(item.external_id().as_deref(), Some("urn:uuid:1"));
        // Escaped markup decodes and then strips.
        assert_eq!(item.summary, "Summary bold text");
        assert!(item.published.is_some());
    }

    #[test]
    fn test_channel_title_not_mistaken_for_item() {
        let items = parse_feed(RSS_SAMPLE).unwrap();
        assert!(items.iter().all(|i| i.title != "Example Feed"));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("<p>Hello&nbsp;&amp;   goodbye</p>"),
            "Hello & goodbye"
        );
        assert_eq!(normalize_text("a &#65; &#x42; b"), "a A B b");
        assert_eq!(normalize_text("  spaced\n\tout  "), "spaced out");
        // Unknown entity survives verbatim.
        assert_eq!(normalize_text("tom &jerry; inc"), "tom &jerry; inc");
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Mon, 01 Jan 2024 10:00:00 GMT").is_some());
        assert!(parse_date("2024-01-02T03:04:05Z").is_some());
        assert!(parse_date("yesterday-ish").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        assert!(matches!(
            parse_feed("<rss><channel><item><title>broken"),
            Err(FeedError::Parse(_)) | Ok(_)
        ));
    }
}
