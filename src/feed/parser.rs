use htmlescape::decode_html;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors that can occur during feed parsing.
///
/// Parse failures are per-cycle: the scheduler drops the whole fetch and
/// moves on to the next tick, it never terminates over one bad document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Well-formed XML, but not an RSS document.
    #[error("document has no <channel> element")]
    NotAFeed,
}

/// A normalized feed entry. `pub_date` is kept as the raw source string;
/// date parsing happens in the ingestion step, where a bad date can be
/// isolated to the one item carrying it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// Channel metadata plus entries in source order.
#[derive(Debug, Clone, Default)]
pub struct FeedChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FeedItem>,
}

/// Parse RSS bytes into a [`FeedChannel`].
///
/// Text is XML-unescaped at the event layer; title and description fields
/// additionally pass through HTML-entity decoding because feeds
/// frequently double-encode (`&amp;amp;` for `&`). Elements nested below
/// other containers (`<image><title>` and the like) do not bleed into
/// channel or item fields.
pub fn parse(bytes: &[u8]) -> Result<FeedChannel, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut channel = FeedChannel::default();
    let mut current_item: Option<FeedItem> = None;
    let mut saw_channel = false;

    // Stack of open element names; text events are routed by the two
    // innermost frames (parent element, field element).
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"channel" {
                    saw_channel = true;
                } else if name == b"item"
                    && stack.last().map(Vec::as_slice) == Some(b"channel".as_slice())
                {
                    current_item = Some(FeedItem::default());
                }
                stack.push(name);
            }
            Ok(Event::End(_)) => {
                if let Some(name) = stack.pop() {
                    if name == b"item" {
                        if let Some(item) = current_item.take() {
                            channel.items.push(item);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| ParseError::Xml(err.to_string()))?;
                append_text(&mut channel, &mut current_item, &stack, &text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                append_text(&mut channel, &mut current_item, &stack, &text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_channel {
        return Err(ParseError::NotAFeed);
    }

    // Second decode round for double-encoded entities. Links are left
    // alone: URLs are compared byte-for-byte for dedupe.
    channel.title = decode_entities(&channel.title);
    channel.description = decode_entities(&channel.description);
    for item in &mut channel.items {
        item.title = decode_entities(&item.title);
        item.description = decode_entities(&item.description);
    }

    Ok(channel)
}

/// Route a text event into the field it belongs to, if any.
fn append_text(
    channel: &mut FeedChannel,
    current_item: &mut Option<FeedItem>,
    stack: &[Vec<u8>],
    text: &str,
) {
    let (parent, field) = match stack {
        [.., parent, field] => (parent.as_slice(), field.as_slice()),
        _ => return,
    };

    let target = if let Some(item) = current_item.as_mut() {
        if parent != b"item" {
            return;
        }
        if field == b"title" {
            &mut item.title
        } else if field == b"link" {
            &mut item.link
        } else if field == b"description" {
            &mut item.description
        } else if field == b"pubDate" {
            &mut item.pub_date
        } else {
            return;
        }
    } else {
        if parent != b"channel" {
            return;
        }
        if field == b"title" {
            &mut channel.title
        } else if field == b"link" {
            &mut channel.link
        } else if field == b"description" {
            &mut channel.description
        } else {
            return;
        }
    };
    target.push_str(text);
}

fn decode_entities(s: &str) -> String {
    // Undecodable input (stray '&', unknown entity) is kept as-is.
    decode_html(s).unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Boot &amp;amp; Shoot</title>
    <link>https://example.com</link>
    <description>Posts about boots &amp; shoots</description>
    <item>
      <title>First</title>
      <link>https://example.com/1</link>
      <description>one</description>
      <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <description><![CDATA[two <b>bold</b>]]></description>
      <pubDate>Tue, 03 Jan 2006 15:04:05 -0700</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_channel_metadata() {
        let channel = parse(SAMPLE.as_bytes()).unwrap();
        // "&amp;amp;" is double-encoded: XML layer yields "&amp;", the
        // HTML layer yields "&".
        assert_eq!(channel.title, "Boot & Shoot");
        assert_eq!(channel.link, "https://example.com");
        assert_eq!(channel.description, "Posts about boots & shoots");
    }

    #[test]
    fn test_parse_items_preserve_source_order() {
        let channel = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(channel.items.len(), 2);
        assert_eq!(channel.items[0].title, "First");
        assert_eq!(channel.items[1].title, "Second");
        assert_eq!(
            channel.items[0].pub_date,
            "Mon, 02 Jan 2006 15:04:05 -0700"
        );
    }

    #[test]
    fn test_parse_cdata_description() {
        let channel = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(channel.items[1].description, "two <b>bold</b>");
    }

    #[test]
    fn test_image_title_does_not_bleed_into_channel() {
        let xml = r#"<rss><channel>
            <title>Real Title</title>
            <image><title>Logo</title><url>https://example.com/logo.png</url></image>
        </channel></rss>"#;
        let channel = parse(xml.as_bytes()).unwrap();
        assert_eq!(channel.title, "Real Title");
    }

    #[test]
    fn test_empty_channel_has_no_items() {
        let xml = r#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let channel = parse(xml.as_bytes()).unwrap();
        assert_eq!(channel.title, "Empty");
        assert!(channel.items.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse(b"<rss><channel><title>oops</chan").unwrap_err();
        assert!(matches!(err, ParseError::Xml(_)));
    }

    #[test]
    fn test_non_rss_document_is_not_a_feed() {
        let err = parse(b"<feed xmlns=\"http://www.w3.org/2005/Atom\"></feed>").unwrap_err();
        assert!(matches!(err, ParseError::NotAFeed));
    }

    #[test]
    fn test_item_missing_fields_default_empty() {
        let xml = r#"<rss><channel><item><title>Bare</title></item></channel></rss>"#;
        let channel = parse(xml.as_bytes()).unwrap();
        assert_eq!(channel.items[0].title, "Bare");
        assert_eq!(channel.items[0].link, "");
        assert_eq!(channel.items[0].pub_date, "");
    }

    mod properties {
        use super::*;
        use htmlescape::encode_minimal;
        use proptest::prelude::*;

        proptest! {
            // Double-encoded titles survive the two decode rounds intact.
            #[test]
            fn double_encoded_title_roundtrips(title in "[!-~](?:[ -~]{0,38}[!-~])?") {
                let xml = format!(
                    "<rss><channel><item><title>{}</title></item></channel></rss>",
                    encode_minimal(&encode_minimal(&title))
                );
                let channel = parse(xml.as_bytes()).unwrap();
                prop_assert_eq!(&channel.items[0].title, &title);
            }
        }
    }
}
