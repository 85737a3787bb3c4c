use anyhow::Result;
use lol_html::{element, HtmlRewriter, Settings};
use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};
use tracing::warn;

const LINK_CLASS: &str = "cast-inline-link";
const LINK_RELS: &[&str] = &["noopener", "noreferrer"];

/// Render markdown-capable free text as safe HTML. All anchors are forced to
/// open in a new window with `rel="noopener noreferrer"`. With `inline`,
/// block-level wrappers (paragraphs, headings) are omitted. Newlines are
/// stripped from the result; they carry no meaning in HTML and make
/// comparisons awkward.
pub fn sanitize(text: &str, inline: bool) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    let parser = Parser::new_ext(text, options);

    let mut rendered = String::new();
    if inline {
        let events = parser.filter(|event| {
            !matches!(
                event,
                Event::Start(Tag::Paragraph)
                    | Event::End(TagEnd::Paragraph)
                    | Event::Start(Tag::Heading { .. })
                    | Event::End(TagEnd::Heading(_))
            )
        });
        html::push_html(&mut rendered, events);
    } else {
        html::push_html(&mut rendered, parser);
    }

    let hardened = match harden_links(&rendered) {
        Ok(out) => out,
        Err(e) => {
            warn!("could not harden links, keeping rendered text: {e:#}");
            rendered
        }
    };

    hardened.replace('\n', "")
}

/// Rewrite every anchor in `html` to open safely in a new window. Merging the
/// `rel` and `class` tokens (rather than overwriting) keeps this idempotent:
/// already-hardened anchors come out unchanged.
fn harden_links(html: &str) -> Result<String> {
    let mut out = Vec::new();
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("a", |el| {
                let rel = merge_tokens(el.get_attribute("rel").as_deref(), LINK_RELS);
                el.set_attribute("rel", &rel)?;
                el.set_attribute("target", "_blank")?;
                let class = merge_tokens(el.get_attribute("class").as_deref(), &[LINK_CLASS]);
                el.set_attribute("class", &class)?;
                Ok(())
            })],
            ..Settings::default()
        },
        |chunk: &[u8]| out.extend_from_slice(chunk),
    );
    rewriter.write(html.as_bytes())?;
    rewriter.end()?;
    Ok(String::from_utf8(out)?)
}

/// Existing whitespace-separated tokens followed by `wanted`, deduplicated,
/// original order preserved.
fn merge_tokens(existing: Option<&str>, wanted: &[&str]) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    for token in existing
        .unwrap_or_default()
        .split_whitespace()
        .chain(wanted.iter().copied())
    {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens.join(" ")
}
