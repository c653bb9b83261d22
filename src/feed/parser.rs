use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// A malformed feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Document root is <{0}>, not <rss>")]
    NotRss(String),

    #[error("Document has no root element")]
    MissingRoot,

    #[error("Document ended inside <{0}>")]
    Truncated(String),
}

/// A parsed RSS channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub description: Option<String>,
    pub items: Vec<FeedItem>,
}

/// One `<item>` as it appeared in the document.
///
/// `published` is the raw `pubDate` text; interpreting it is left to the
/// ingestor so a single bad date only costs that item. `description` keeps
/// its text byte-for-byte, surrounding whitespace included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub published: String,
}

const CHANNEL_PATH: &[&[u8]] = &[b"rss", b"channel"];
const ITEM_PATH: &[&[u8]] = &[b"rss", b"channel", b"item"];

#[derive(Debug, Clone, Copy)]
enum Field {
    ChannelTitle,
    ChannelDescription,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemPublished,
}

fn path_is(path: &[Vec<u8>], expected: &[&[u8]]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a.as_slice() == *b)
}

/// Accumulates a [`ParsedFeed`] from reader events.
///
/// Element names are compared in full, so `<atom:link>` is never taken for
/// an item's `<link>`.
#[derive(Default)]
struct FeedBuilder {
    path: Vec<Vec<u8>>,
    root_seen: bool,
    feed: ParsedFeed,
    item: Option<FeedItem>,
    text: String,
}

impl FeedBuilder {
    fn field(&self) -> Option<Field> {
        let (name, parent) = self.path.split_last()?;
        if path_is(parent, CHANNEL_PATH) {
            match name.as_slice() {
                b"title" => Some(Field::ChannelTitle),
                b"description" => Some(Field::ChannelDescription),
                _ => None,
            }
        } else if path_is(parent, ITEM_PATH) {
            match name.as_slice() {
                b"title" => Some(Field::ItemTitle),
                b"link" => Some(Field::ItemLink),
                b"description" => Some(Field::ItemDescription),
                b"pubDate" => Some(Field::ItemPublished),
                _ => None,
            }
        } else {
            None
        }
    }

    fn start(&mut self, name: &[u8]) -> Result<(), ParseError> {
        if !self.root_seen {
            if name != b"rss" {
                return Err(ParseError::NotRss(String::from_utf8_lossy(name).into_owned()));
            }
            self.root_seen = true;
        }

        self.path.push(name.to_vec());
        if path_is(&self.path, ITEM_PATH) {
            self.item = Some(FeedItem::default());
        } else if self.field().is_some() {
            self.text.clear();
        }
        Ok(())
    }

    fn text(&mut self, content: &str) {
        if self.field().is_some() {
            self.text.push_str(content);
        }
    }

    fn end(&mut self) {
        if path_is(&self.path, ITEM_PATH) {
            if let Some(item) = self.item.take() {
                self.feed.items.push(item);
            }
        } else if let Some(field) = self.field() {
            let value = std::mem::take(&mut self.text);
            self.assign(field, value);
        }
        self.path.pop();
    }

    fn assign(&mut self, field: Field, value: String) {
        match (field, self.item.as_mut()) {
            (Field::ChannelTitle, _) => self.feed.title = value.trim().to_string(),
            (Field::ChannelDescription, _) => self.feed.description = Some(value),
            (Field::ItemTitle, Some(item)) => item.title = value.trim().to_string(),
            (Field::ItemLink, Some(item)) => item.link = value.trim().to_string(),
            (Field::ItemDescription, Some(item)) => item.description = Some(value),
            (Field::ItemPublished, Some(item)) => item.published = value.trim().to_string(),
            (_, None) => {}
        }
    }

    fn finish(self) -> Result<ParsedFeed, ParseError> {
        if let Some(open) = self.path.last() {
            return Err(ParseError::Truncated(String::from_utf8_lossy(open).into_owned()));
        }
        if !self.root_seen {
            return Err(ParseError::MissingRoot);
        }
        Ok(self.feed)
    }
}

/// Parse an RSS 2.0 document.
///
/// Elements the feed omits come back empty (or `None` for descriptions);
/// a document that is not well-formed RSS is an error. Titles, links and
/// dates are trimmed, descriptions are kept exactly as written.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // quick-xml 0.37 never expands custom entities; only the XML builtins
    // are resolved by `unescape()`.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);

    let mut builder = FeedBuilder::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => builder.start(e.name().as_ref())?,
            Event::Empty(e) => {
                builder.start(e.name().as_ref())?;
                builder.end();
            }
            Event::End(_) => builder.end(),
            Event::Text(e) => builder.text(&e.unescape()?),
            Event::CData(e) => builder.text(&e.decode().map_err(quick_xml::Error::from)?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}
