/*!
Feed format normalization.

Takes the raw XML of an RSS 2.0 / Atom / RDF feed and produces the uniform
`Article` shape. Journal feeds disagree on almost everything: where the link
lives, whether the description is escaped HTML or CDATA, which of half a
dozen fields carries the date. ScienceDirect feeds additionally bury the
real publication period as literal text inside the description HTML while
their structured date fields are missing or wrong, so they get a dedicated
extraction tier.

Parsing is a small dispatch over the detected root shape rather than
duck-typed property probing: each supported shape maps to one item element
name, and the per-item extraction rules are pure functions over a generic
field map.
*/

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use common::{Article, FeedType};

/// Top-level shapes the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootShape {
    Rss2,
    Atom,
    Rdf,
}

impl RootShape {
    fn detect(root_local_name: &str) -> Option<Self> {
        match root_local_name {
            "rss" => Some(RootShape::Rss2),
            "feed" => Some(RootShape::Atom),
            "RDF" => Some(RootShape::Rdf),
            _ => None,
        }
    }

    /// Local name of the per-article element for this shape.
    fn item_name(self) -> &'static str {
        match self {
            RootShape::Rss2 | RootShape::Rdf => "item",
            RootShape::Atom => "entry",
        }
    }
}

/// One child element of an item: accumulated text (entities decoded, CDATA
/// unwrapped) plus its attributes.
#[derive(Debug, Clone, Default)]
struct RawField {
    text: String,
    attrs: HashMap<String, String>,
}

impl RawField {
    /// A "plain string" field carries text and nothing else; fields with
    /// attributes (Atom links, permalink guids) are structured values.
    fn as_plain_string(&self) -> Option<&str> {
        if self.attrs.is_empty() {
            Some(&self.text)
        } else {
            None
        }
    }
}

/// Generic parsed item. Fields are reachable both by their prefix-stripped
/// local name (`date` for `dc:date`) and by their original qualified name
/// (`prism:coverDate`); the first occurrence wins per key.
#[derive(Debug, Default)]
struct RawItem {
    fields: HashMap<String, RawField>,
}

impl RawItem {
    fn insert(&mut self, qualified: String, local: String, field: RawField) {
        if qualified != local {
            self.fields
                .entry(qualified)
                .or_insert_with(|| field.clone());
        }
        self.fields.entry(local).or_insert(field);
    }

    fn get(&self, key: &str) -> Option<&RawField> {
        self.fields.get(key)
    }

    fn plain_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(RawField::as_plain_string)
    }

    /// First probe whose field has non-empty text.
    fn first_nonempty(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.get(key))
            .map(|field| field.text.as_str())
            .find(|text| !text.is_empty())
    }
}

fn collect_attrs(e: &BytesStart<'_>) -> HashMap<String, String> {
    e.attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            (key, value)
        })
        .collect()
}

/// Parse feed XML into generic items, dispatching on the detected root
/// shape. A feed with exactly one item yields a one-element list; an
/// unrecognized root is a shape error, which the orchestrator treats like
/// any other per-feed failure.
fn parse_raw_items(xml: &str) -> Result<Vec<RawItem>> {
    let mut reader = Reader::from_str(xml);

    let mut shape: Option<RootShape> = None;
    let mut items: Vec<RawItem> = Vec::new();
    let mut current: Option<RawItem> = None;

    // While inside an item: the field being collected (qualified name,
    // local name, value) and how deep inside its subtree we are. Nested
    // markup contributes text only.
    let mut field: Option<(String, String, RawField)> = None;
    let mut field_depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let qualified = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                match shape {
                    None => {
                        shape = Some(RootShape::detect(&local).ok_or_else(|| {
                            anyhow::anyhow!("unrecognized feed shape: <{}>", qualified)
                        })?);
                    }
                    Some(s) => {
                        if current.is_none() {
                            if local == s.item_name() {
                                current = Some(RawItem::default());
                            }
                        } else if field.is_none() {
                            let attrs = collect_attrs(&e);
                            field = Some((
                                qualified,
                                local,
                                RawField {
                                    text: String::new(),
                                    attrs,
                                },
                            ));
                            field_depth = 1;
                        } else {
                            field_depth += 1;
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let qualified = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                if shape.is_none() {
                    shape = Some(RootShape::detect(&local).ok_or_else(|| {
                        anyhow::anyhow!("unrecognized feed shape: <{}>", qualified)
                    })?);
                    continue;
                }
                if let Some(item) = current.as_mut() {
                    if field.is_none() {
                        let attrs = collect_attrs(&e);
                        item.insert(
                            qualified,
                            local,
                            RawField {
                                text: String::new(),
                                attrs,
                            },
                        );
                    }
                    // Nested self-closing elements inside a field (e.g. <br/>
                    // in inline HTML) carry no text.
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, _, f)) = field.as_mut() {
                    if let Ok(text) = t.unescape() {
                        f.text.push_str(&text);
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, _, f)) = field.as_mut() {
                    f.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if field.is_some() {
                    field_depth -= 1;
                    if field_depth == 0 {
                        if let Some((qualified, local_name, mut f)) = field.take() {
                            f.text = f.text.trim().to_string();
                            if let Some(item) = current.as_mut() {
                                item.insert(qualified, local_name, f);
                            }
                        }
                    }
                } else if let Some(s) = shape {
                    if current.is_some() && local == s.item_name() {
                        if let Some(item) = current.take() {
                            items.push(item);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow::anyhow!("failed to parse feed XML: {}", e));
            }
            Ok(_) => {}
        }
    }

    Ok(items)
}

/// Resolve the article link: a plain `link` string, then an Atom-style
/// `link@href`, then a plain `guid`, then a plain `id`. Unresolvable links
/// become the empty string, never an error.
fn extract_link(item: &RawItem) -> String {
    if let Some(link) = item.plain_string("link") {
        return link.to_string();
    }
    if let Some(href) = item.get("link").and_then(|f| f.attrs.get("href")) {
        return href.clone();
    }
    if let Some(guid) = item.plain_string("guid") {
        return guid.to_string();
    }
    if let Some(id) = item.plain_string("id") {
        return id.to_string();
    }
    String::new()
}

/// Raw (unstripped) description: the first *present* field among
/// `description`, `summary`, `content` gates the chain, even when its text
/// is empty.
fn extract_raw_description(item: &RawItem) -> String {
    for key in ["description", "summary", "content"] {
        if let Some(f) = item.get(key) {
            return f.text.clone();
        }
    }
    String::new()
}

/// Resolve the publication date string under the per-type policy. Always
/// non-empty: items without any resolvable date get the current instant,
/// losing ordering fidelity but keeping a renderable value.
fn extract_publication_date(item: &RawItem, feed_type: FeedType, raw_description: &str) -> String {
    let probed = match feed_type {
        FeedType::Sciencedirect => extract_date_from_html(raw_description).or_else(|| {
            item.first_nonempty(&["prism:coverDate", "dc:date", "prism:publicationDate", "date"])
                .map(str::to_string)
        }),
        FeedType::Standard => item
            .first_nonempty(&["pubDate", "date", "published", "updated"])
            .map(str::to_string),
    };

    probed.unwrap_or_else(|| Utc::now().to_rfc3339())
}

fn extract_title(item: &RawItem) -> String {
    item.get("title")
        .map(|f| f.text.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or("No Title")
        .to_string()
}

/// Normalize one feed body into articles. Articles come back in document
/// order; sorting and truncation belong to the aggregation pass.
pub fn normalize_feed(xml: &str, feed_type: FeedType) -> Result<Vec<Article>> {
    let items = parse_raw_items(xml)?;

    let articles = items
        .iter()
        .map(|item| {
            let raw_description = extract_raw_description(item);
            let publication_date = extract_publication_date(item, feed_type, &raw_description);

            Article {
                title: extract_title(item),
                link: extract_link(item),
                description: strip_html(&raw_description),
                publication_date,
            }
        })
        .collect();

    Ok(articles)
}

static PUB_DATE_RE: OnceLock<Regex> = OnceLock::new();

/// Pull a publication period out of description HTML shaped like
/// `<p>Publication date: March 2025</p>`. The tags match case-insensitively
/// but the label itself is exact.
pub fn extract_date_from_html(html: &str) -> Option<String> {
    let re = PUB_DATE_RE.get_or_init(|| {
        Regex::new(r"(?i:<p>)Publication date: ([^<]+)(?i:</p>)").expect("publication date pattern")
    });

    re.captures(html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|date| !date.is_empty())
}

/// Strip HTML tags and decode entities into readable plain text, collapsing
/// runs of whitespace. Stripping an empty string yields an empty string.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();
    let mut in_tag = false;

    while let Some(ch) = chars.next() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => {
                let mut entity = String::new();
                let mut terminated = false;
                while let Some(&c) = chars.peek() {
                    if c == ';' {
                        chars.next();
                        terminated = true;
                        break;
                    }
                    // Entities are short; a stray ampersand is kept as-is
                    if c == '&' || c == '<' || entity.len() > 10 {
                        break;
                    }
                    entity.push(c);
                    chars.next();
                }
                match decode_entity(&entity) {
                    Some(c) if terminated => out.push(c),
                    _ => {
                        out.push('&');
                        out.push_str(&entity);
                        if terminated {
                            out.push(';');
                        }
                    }
                }
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))?;
            char::from_u32(code)
        }
    }
}

/// Best-effort parse of the heterogeneous date strings feeds produce.
/// Issue periods like "March 2025" map to the first of the month.
pub fn parse_publication_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d %B %Y"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("1 {}", value), "%d %B %Y"))
        .ok()?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Sort newest-first. The comparator is non-strict: when either date fails
/// to parse the pair compares equal, and the stable sort keeps their input
/// order.
pub fn sort_articles_desc(articles: &mut [Article]) {
    articles.sort_by(|a, b| {
        match (
            parse_publication_date(&a.publication_date),
            parse_publication_date(&b.publication_date),
        ) {
            (Some(da), Some(db)) => db.cmp(&da),
            _ => Ordering::Equal,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, date: &str) -> Article {
        Article {
            title: title.to_string(),
            link: format!("https://example.com/{}", title),
            description: String::new(),
            publication_date: date.to_string(),
        }
    }

    #[test]
    fn normalizes_rss2_items() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Journal Feed</title>
    <item>
      <title>Article One</title>
      <link>https://example.com/1</link>
      <description>&lt;p&gt;A &amp;amp; B&lt;/p&gt;</description>
      <pubDate>Mon, 03 Mar 2025 12:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Article Two</title>
      <link>https://example.com/2</link>
      <description><![CDATA[<b>Bold</b> summary]]></description>
      <pubDate>Tue, 04 Mar 2025 12:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Article One");
        assert_eq!(articles[0].link, "https://example.com/1");
        assert_eq!(articles[0].description, "A & B");
        assert_eq!(articles[0].publication_date, "Mon, 03 Mar 2025 12:00:00 GMT");
        assert_eq!(articles[1].description, "Bold summary");
    }

    #[test]
    fn single_item_feed_yields_one_article() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Only One</title>
            <link>https://example.com/only</link>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Only One");
    }

    #[test]
    fn normalizes_atom_entries() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Journal</title>
  <entry>
    <id>urn:uuid:1</id>
    <title>Atom Entry</title>
    <link href="https://example.com/entry"/>
    <summary>Entry summary</summary>
    <updated>2025-01-01T00:00:00Z</updated>
  </entry>
</feed>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Atom Entry");
        // Atom links are structured elements, resolved through @href
        assert_eq!(articles[0].link, "https://example.com/entry");
        assert_eq!(articles[0].description, "Entry summary");
        assert_eq!(articles[0].publication_date, "2025-01-01T00:00:00Z");
    }

    #[test]
    fn normalizes_rdf_items() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.com/">
    <title>RDF Journal</title>
  </channel>
  <item rdf:about="https://example.com/rdf-1">
    <title>RDF Article</title>
    <link>https://example.com/rdf-1</link>
    <dc:date>2025-02-10</dc:date>
  </item>
</rdf:RDF>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "RDF Article");
        // dc:date is reachable through its prefix-stripped name
        assert_eq!(articles[0].publication_date, "2025-02-10");
    }

    #[test]
    fn unknown_root_is_a_shape_error() {
        let xml = r#"<html><body>not a feed</body></html>"#;
        assert!(normalize_feed(xml, FeedType::Standard).is_err());
    }

    #[test]
    fn link_falls_back_to_plain_guid() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>No Link</title>
            <guid>https://example.com/from-guid</guid>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles[0].link, "https://example.com/from-guid");
    }

    #[test]
    fn guid_with_attributes_is_not_a_plain_string() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Permalink Guid</title>
            <guid isPermaLink="true">https://example.com/from-guid</guid>
            <id>https://example.com/from-id</id>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        // The structured guid is skipped; the plain id wins
        assert_eq!(articles[0].link, "https://example.com/from-id");
    }

    #[test]
    fn unresolvable_link_is_empty_not_an_error() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Linkless</title>
            <guid isPermaLink="false">tag:example,2025:1</guid>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles[0].link, "");
    }

    #[test]
    fn description_chain_gates_on_first_present_field() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Summary Only</title>
            <summary>from summary</summary>
            <content>from content</content>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles[0].description, "from summary");
    }

    #[test]
    fn missing_description_strips_to_empty() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Bare</title>
            <link>https://example.com/bare</link>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles[0].description, "");
    }

    #[test]
    fn standard_date_probe_order() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Dated</title>
            <published>2025-03-01</published>
            <updated>2025-04-01</updated>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert_eq!(articles[0].publication_date, "2025-03-01");
    }

    #[test]
    fn missing_date_defaults_to_now() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>Undated</title>
            <link>https://example.com/undated</link>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Standard).expect("normalize");
        assert!(!articles[0].publication_date.is_empty());
        // The fallback is a real timestamp, not a sentinel
        assert!(parse_publication_date(&articles[0].publication_date).is_some());
    }

    #[test]
    fn sciencedirect_html_date_beats_structured_fields() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>SD Article</title>
            <description><![CDATA[<p>Publication date: March 2025</p><p>Author(s): Someone</p>]]></description>
            <prism:coverDate xmlns:prism="http://prismstandard.org/namespaces/basic/2.0/">2024-12-31</prism:coverDate>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Sciencedirect).expect("normalize");
        assert_eq!(articles[0].publication_date, "March 2025");
    }

    #[test]
    fn sciencedirect_falls_back_to_structured_probes() {
        let xml = r#"<rss version="2.0"><channel><item>
            <title>SD Article</title>
            <description><![CDATA[<p>Author(s): Someone</p>]]></description>
            <prism:coverDate xmlns:prism="http://prismstandard.org/namespaces/basic/2.0/">2024-12-31</prism:coverDate>
        </item></channel></rss>"#;

        let articles = normalize_feed(xml, FeedType::Sciencedirect).expect("normalize");
        assert_eq!(articles[0].publication_date, "2024-12-31");
    }

    #[test]
    fn extract_date_from_html_matches_exact_label() {
        assert_eq!(
            extract_date_from_html("<p>Publication date: March 2025</p>"),
            Some("March 2025".to_string())
        );
        // Tag case does not matter
        assert_eq!(
            extract_date_from_html("<P>Publication date: Available online 4 March 2025</P>"),
            Some("Available online 4 March 2025".to_string())
        );
        // Label case does
        assert_eq!(
            extract_date_from_html("<p>publication date: March 2025</p>"),
            None
        );
        assert_eq!(extract_date_from_html("<p>No date here</p>"), None);
        assert_eq!(extract_date_from_html(""), None);
    }

    #[test]
    fn strip_html_removes_tags_and_decodes_entities() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<div><b>Nested</b> text</div>"), "Nested text");
        assert_eq!(strip_html("&lt;tag&gt; &amp; &quot;x&quot;"), "<tag> & \"x\"");
        assert_eq!(strip_html("&#65;&#x42;"), "AB");
        assert_eq!(strip_html("A&nbsp;B"), "A B");
        assert_eq!(strip_html("  spaced \n out  "), "spaced out");
        assert_eq!(strip_html(""), "");
        // Unknown entities survive as written
        assert_eq!(strip_html("&unknown;"), "&unknown;");
    }

    #[test]
    fn parse_publication_date_formats() {
        assert!(parse_publication_date("Mon, 03 Mar 2025 12:00:00 GMT").is_some());
        assert!(parse_publication_date("2025-03-03T12:00:00Z").is_some());
        assert!(parse_publication_date("2025-03-03").is_some());
        assert!(parse_publication_date("3 March 2025").is_some());
        assert!(parse_publication_date("March 2025").is_some());
        assert!(parse_publication_date("sometime soon").is_none());
        assert!(parse_publication_date("").is_none());
    }

    #[test]
    fn sort_is_descending_by_parsed_date() {
        let mut articles = vec![
            article("old", "2025-01-01"),
            article("new", "2025-03-01"),
            article("middle", "2025-02-01"),
        ];
        sort_articles_desc(&mut articles);
        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "middle", "old"]);
    }

    #[test]
    fn sort_keeps_order_of_unparseable_pairs() {
        let mut articles = vec![
            article("first", "Spring issue"),
            article("second", "Summer issue"),
            article("third", "Autumn issue"),
        ];
        sort_articles_desc(&mut articles);
        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }
}
