//! Legacy HTML to block document conversion.
//!
//! The block grammar wraps each top-level element in comment markers:
//!
//! ```text
//! <!-- wp:heading {"level":2} -->
//! <h2>Title</h2>
//! <!-- /wp:heading -->
//! ```
//!
//! [`transform`] runs a fixed sequence of named stages. Every stage is a pure
//! `fn(&str) -> String` that leaves markup it produced itself untouched, so the
//! whole pipeline is a fixed point on its own output. Wrapped tables hold bare
//! cell content and are hidden from the stages that add markers. Elements only get
//! wrapped when both their opening and closing tags are present, which keeps
//! every opened marker closed even for malformed input.

use std::io::Write as _;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::{Captures, Regex};

use crate::cli::TransformArgs;

pub type Stage = fn(&str) -> String;

/// Stage order matters: later stages assume earlier ones already ran.
pub const STAGES: &[(&str, Stage)] = &[
    ("paragraphs", wrap_paragraphs),
    ("headings", wrap_headings),
    ("images", wrap_images),
    ("lists", wrap_lists),
    ("quotes", wrap_quotes),
    ("code", wrap_preformatted),
    ("tables", wrap_tables),
    ("containers", strip_legacy_containers),
    ("embeds", wrap_embeds),
    ("inline", normalize_inline),
    ("whitespace", clean_whitespace),
];

const QUOTE_STYLE: &str = "is-style-quote";
const IMAGE_FIGURE: &str = r#"<figure class="wp-block-image">"#;
const TABLE_FIGURE: &str = r#"<figure class="wp-block-table">"#;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid block regex")
}

static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| re(r"(?is)<p(?:\s[^>]*)?>.*?</p>"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)<h([1-6])(?:\s[^>]*)?>.*?</h([1-6])>"));
static IMAGE: LazyLock<Regex> = LazyLock::new(|| re(r"(?is)<img\s[^>]*>"));
static PARAGRAPH_SOLE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)<!-- wp:paragraph -->\s*<p(?:\s[^>]*)?>\s*(<img\s[^>]*>)\s*</p>\s*<!-- /wp:paragraph -->")
});
static LIST_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<(/?)(ul|ol)(?:\s[^>]*)?>"));
static LIST_ITEM_OPEN: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<li(?:\s[^>]*)?>"));
static LIST_ITEM_SOLE_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)\A\s*<!-- wp:paragraph -->\s*<p(?:\s[^>]*)?>(.*?)</p>\s*<!-- /wp:paragraph -->\s*</li>")
});
static QUOTE_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<(/?)(blockquote)(?:\s[^>]*)?>"));
static QUOTE_SOLE_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)\A<blockquote(?:\s[^>]*)?>\s*<!-- wp:paragraph -->\s*<p(?:\s[^>]*)?>(.*?)</p>\s*<!-- /wp:paragraph -->\s*</blockquote>\z")
});
static PRE: LazyLock<Regex> = LazyLock::new(|| re(r"(?is)<pre(?:\s[^>]*)?>.*?</pre>"));
static CODE_OPEN: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<code(?:\s[^>]*)?>"));
static TABLE_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<(/?)(table)(?:\s[^>]*)?>"));
static TABLE_SECTION: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)<(thead|tbody|tfoot)\s[^>]*>"));
static PARAGRAPH_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)<!-- wp:paragraph(?: [^>]*?)? -->\s*<p(?:\s[^>]*)?>(.*?)</p>\s*<!-- /wp:paragraph -->\s*")
});
static CELL_MARKER: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)\s*<!-- /?wp:[^>]*?-->\s*"));
static WRAPPED_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?s)<!-- wp:table --><figure class="wp-block-table">.*?</figure><!-- /wp:table -->"#)
});
static DIV_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<(/?)(div)(?:\s[^>]*)?>"));
static LEGACY_CONTAINER_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?i)\bclass\s*=\s*["'][^"']*\bsqs-(?:block|html|layout|row|col)"#)
});
static IFRAME: LazyLock<Regex> = LazyLock::new(|| re(r"(?is)<iframe(?:\s[^>]*)?>.*?</iframe>"));
static PARAGRAPH_SOLE_IFRAME: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)<!-- wp:paragraph -->\s*<p(?:\s[^>]*)?>\s*(<iframe(?:\s[^>]*)?>.*?</iframe>)\s*</p>\s*<!-- /wp:paragraph -->")
});
static BOLD: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<(/?)b(\s[^>]*)?>"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<(/?)i(\s[^>]*)?>"));
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<br(\s[^>]*?)?\s*/?>"));
static RULE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)<hr(\s[^>]*?)?\s*/?>"));
static EMPTY_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)<!-- wp:paragraph(?: [^>]*?)? -->\s*(?:<p(?:\s[^>]*)?>(?:\s|&nbsp;|&#160;|<br />)*</p>\s*)?<!-- /wp:paragraph -->")
});
static NEWLINE_RUN: LazyLock<Regex> = LazyLock::new(|| re(r"\n{3,}"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| re(r"\s{3,}"));

pub fn run(args: TransformArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let html = std::fs::read_to_string(&input)
        .with_context(|| format!("read input: {}", input.display()))?;

    let document = transform(&html);
    let document = document.trim_end();

    match args.out.as_deref() {
        Some(out) => std::fs::write(out, format!("{document}\n"))
            .with_context(|| format!("write output: {out}"))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{document}").context("write stdout")?;
        }
    }
    Ok(())
}

pub fn is_block_document(html: &str) -> bool {
    html.trim_start().starts_with("<!-- wp:")
}

pub fn transform(html: &str) -> String {
    if is_block_document(html) {
        tracing::debug!("input is already a block document; leaving unchanged");
        return html.to_owned();
    }

    STAGES.iter().fold(html.to_owned(), |doc, (name, stage)| {
        let out = stage(&doc);
        tracing::trace!(stage = name, before = doc.len(), after = out.len(), "block stage");
        out
    })
}

fn open_marker(name: &str, attrs: Option<&str>) -> String {
    match attrs {
        Some(attrs) => format!("<!-- wp:{name} {attrs} -->"),
        None => format!("<!-- wp:{name} -->"),
    }
}

fn close_marker(name: &str) -> String {
    format!("<!-- /wp:{name} -->")
}

fn wrap_block(name: &str, attrs: Option<&str>, inner: &str) -> String {
    format!(
        "{}\n{inner}\n{}\n\n",
        open_marker(name, attrs),
        close_marker(name)
    )
}

/// True when the text right before an element is the opening marker of `name`.
fn preceded_by_marker(before: &str, name: &str) -> bool {
    let before = before.trim_end();
    if !before.ends_with("-->") {
        return false;
    }
    let Some(start) = before.rfind("<!--") else {
        return false;
    };
    before[start..]
        .strip_prefix("<!-- wp:")
        .and_then(|rest| rest.strip_prefix(name))
        .is_some_and(|rest| rest.starts_with(' '))
}

fn preceded_by(before: &str, prefix: &str) -> bool {
    before.trim_end().ends_with(prefix)
}

/// Replaces each match of `pattern`; `f` receives the text before the match and
/// the match itself and returns `None` to keep the match as is.
fn replace_matches(
    input: &str,
    pattern: &Regex,
    mut f: impl FnMut(&str, &Captures<'_>) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for caps in pattern.captures_iter(input) {
        let Some(m) = caps.get(0) else {
            continue;
        };
        out.push_str(&input[cursor..m.start()]);
        match f(&input[..m.start()], &caps) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(m.as_str()),
        }
        cursor = m.end();
    }
    out.push_str(&input[cursor..]);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Element {
    range: Range<usize>,
    name: String,
}

/// Outermost complete elements whose tags match `tag` (group 1: `/` for
/// closing tags, group 2: tag name). Unclosed elements are not returned.
fn find_elements(html: &str, tag: &Regex) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<(usize, String)> = None;

    for caps in tag.captures_iter(html) {
        let Some(m) = caps.get(0) else {
            continue;
        };
        let closing = caps.get(1).is_some_and(|g| !g.as_str().is_empty());
        if !closing {
            if depth == 0 {
                let name = caps.get(2).map_or("", |g| g.as_str()).to_ascii_lowercase();
                open = Some((m.start(), name));
            }
            depth += 1;
            continue;
        }
        if depth == 0 {
            continue;
        }
        depth -= 1;
        if depth > 0 {
            continue;
        }
        if let Some((start, name)) = open.take() {
            elements.push(Element {
                range: start..m.end(),
                name,
            });
        }
    }

    elements
}

fn replace_elements(
    html: &str,
    tag: &Regex,
    mut f: impl FnMut(&str, &Element, &str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for element in find_elements(html, tag) {
        let Range { start, end } = element.range.clone();
        out.push_str(&html[cursor..start]);
        match f(&html[..start], &element, &html[start..end]) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(&html[start..end]),
        }
        cursor = end;
    }
    out.push_str(&html[cursor..]);
    out
}

/// Runs `stage` with every already wrapped table hidden behind a placeholder.
/// Cells of a wrapped table hold bare content, and stages that add markers
/// must not wrap it again.
fn outside_tables(html: &str, stage: impl FnOnce(&str) -> String) -> String {
    if !html.contains(TABLE_FIGURE) {
        return stage(html);
    }
    let mut store = TokenStore::default();
    let protected = WRAPPED_TABLE.replace_all(html, |caps: &Captures<'_>| store.insert(caps[0].to_owned()));
    store.restore(&stage(&protected))
}

pub fn wrap_paragraphs(html: &str) -> String {
    outside_tables(html, |html| {
        replace_matches(html, &PARAGRAPH, |before, caps| {
            if preceded_by_marker(before, "paragraph") {
                return None;
            }
            Some(wrap_block("paragraph", None, &caps[0]))
        })
    })
}

pub fn wrap_headings(html: &str) -> String {
    outside_tables(html, |html| {
        replace_matches(html, &HEADING, |before, caps| {
            if caps[1] != caps[2] || preceded_by_marker(before, "heading") {
                return None;
            }
            let attrs = format!(r#"{{"level":{}}}"#, &caps[1]);
            Some(wrap_block("heading", Some(&attrs), &caps[0]))
        })
    })
}

pub fn wrap_images(html: &str) -> String {
    outside_tables(html, |html| {
        let lifted = PARAGRAPH_SOLE_IMAGE.replace_all(html, "$1");
        replace_matches(&lifted, &IMAGE, |before, caps| {
            if preceded_by(before, IMAGE_FIGURE) {
                return None;
            }
            let figure = format!("{IMAGE_FIGURE}{}</figure>", &caps[0]);
            Some(wrap_block("image", None, &figure))
        })
    })
}

pub fn wrap_lists(html: &str) -> String {
    outside_tables(html, |html| {
        replace_elements(html, &LIST_TAG, |before, element, list| {
            if preceded_by_marker(before, "list") {
                return None;
            }
            let attrs = (element.name == "ol").then_some(r#"{"ordered":true}"#);
            Some(wrap_block("list", attrs, &strip_item_paragraphs(list)))
        })
    })
}

/// `<li>` + paragraph block + `</li>` becomes `<li>` + inline content + `</li>`.
fn strip_item_paragraphs(list: &str) -> String {
    let mut out = String::with_capacity(list.len());
    let mut cursor = 0;
    for open in LIST_ITEM_OPEN.find_iter(list) {
        if open.start() < cursor {
            continue;
        }
        let rest = &list[open.end()..];
        let Some(caps) = LIST_ITEM_SOLE_PARAGRAPH.captures(rest) else {
            continue;
        };
        let inner = caps.get(1).map_or("", |m| m.as_str());
        if is_single_paragraph_body(inner) {
            let consumed = caps.get(0).map_or(0, |m| m.end());
            out.push_str(&list[cursor..open.end()]);
            out.push_str(inner.trim());
            out.push_str("</li>");
            cursor = open.end() + consumed;
        }
    }
    out.push_str(&list[cursor..]);
    out
}

/// A lazily captured paragraph body that did not run into a second paragraph.
fn is_single_paragraph_body(inner: &str) -> bool {
    !inner.contains("</p>") && !inner.contains("<!-- wp:") && !inner.contains("<!-- /wp:")
}

pub fn wrap_quotes(html: &str) -> String {
    outside_tables(html, |html| {
        replace_elements(html, &QUOTE_TAG, |before, _, quote| {
            if preceded_by_marker(before, "quote") {
                return None;
            }
            let sole = QUOTE_SOLE_PARAGRAPH
                .captures(quote)
                .filter(|caps| is_single_paragraph_body(&caps[1]));
            if let Some(caps) = sole {
                let attrs = format!(r#"{{"className":"{QUOTE_STYLE}"}}"#);
                let paragraph = format!(r#"<p class="{QUOTE_STYLE}">{}</p>"#, caps[1].trim());
                return Some(wrap_block("paragraph", Some(&attrs), &paragraph));
            }
            Some(wrap_block("quote", None, quote))
        })
    })
}

pub fn wrap_preformatted(html: &str) -> String {
    outside_tables(html, |html| {
        replace_matches(html, &PRE, |before, caps| {
            if preceded_by_marker(before, "code") || preceded_by_marker(before, "preformatted") {
                return None;
            }
            let name = if CODE_OPEN.is_match(&caps[0]) {
                "code"
            } else {
                "preformatted"
            };
            Some(wrap_block(name, None, &caps[0]))
        })
    })
}

pub fn wrap_tables(html: &str) -> String {
    replace_elements(html, &TABLE_TAG, |before, _, table| {
        if preceded_by(before, TABLE_FIGURE) {
            return None;
        }
        let table = PARAGRAPH_BLOCK.replace_all(table, |caps: &Captures<'_>| {
            if is_single_paragraph_body(&caps[1]) {
                caps[1].trim().to_owned()
            } else {
                caps[0].to_owned()
            }
        });
        let table = CELL_MARKER.replace_all(&table, "");
        let table = TABLE_SECTION.replace_all(&table, "<$1>");
        Some(format!(
            "{}{TABLE_FIGURE}{}</figure>{}",
            open_marker("table", None),
            table.trim(),
            close_marker("table")
        ))
    })
}

/// Removes legacy rich-text container `<div>`s and their matching closing
/// tags. Content stays in place; no group block is introduced.
pub fn strip_legacy_containers(html: &str) -> String {
    let mut doc = html.to_owned();
    while let Some((open, close)) = find_legacy_container(&doc) {
        if let Some(close) = close {
            doc.replace_range(close, "");
        }
        doc.replace_range(open, "");
    }
    doc
}

fn find_legacy_container(html: &str) -> Option<(Range<usize>, Option<Range<usize>>)> {
    let mut stack: Vec<(Range<usize>, bool)> = Vec::new();
    for caps in DIV_TAG.captures_iter(html) {
        let m = caps.get(0)?;
        let closing = caps.get(1).is_some_and(|g| !g.as_str().is_empty());
        if !closing {
            let legacy = LEGACY_CONTAINER_CLASS.is_match(m.as_str());
            stack.push((m.range(), legacy));
            continue;
        }
        if let Some((open, true)) = stack.pop() {
            return Some((open, Some(m.range())));
        }
    }
    stack
        .into_iter()
        .find(|(_, legacy)| *legacy)
        .map(|(open, _)| (open, None))
}

pub fn wrap_embeds(html: &str) -> String {
    outside_tables(html, |html| {
        let lifted = PARAGRAPH_SOLE_IFRAME.replace_all(html, |caps: &Captures<'_>| {
            if caps[1].matches("</iframe>").count() == 1 && !caps[1].contains("</p>") {
                caps[1].to_owned()
            } else {
                caps[0].to_owned()
            }
        });
        replace_matches(&lifted, &IFRAME, |before, caps| {
            if preceded_by_marker(before, "html") {
                return None;
            }
            Some(wrap_block("html", None, &caps[0]))
        })
    })
}

pub fn normalize_inline(html: &str) -> String {
    let html = BOLD.replace_all(html, "<${1}strong${2}>");
    let html = ITALIC.replace_all(&html, "<${1}em${2}>");
    let html = LINE_BREAK.replace_all(&html, "<br${1} />");
    RULE.replace_all(&html, "<hr${1} />").into_owned()
}

pub fn clean_whitespace(html: &str) -> String {
    let mut store = TokenStore::default();
    let normalized = html.replace("\r\n", "\n");
    let protected = PRE.replace_all(&normalized, |caps: &Captures<'_>| store.insert(caps[0].to_owned()));

    let text = EMPTY_PARAGRAPH.replace_all(&protected, "");
    let text = NEWLINE_RUN.replace_all(&text, "\n\n");
    let text = WHITESPACE_RUN.replace_all(&text, " ");

    store.restore(text.trim())
}

/// Placeholders for spans a stage must pass through verbatim.
#[derive(Debug, Default)]
struct TokenStore {
    tokens: Vec<String>,
}

impl TokenStore {
    fn insert(&mut self, original: String) -> String {
        let idx = self.tokens.len();
        self.tokens.push(original);
        format!("{{{{BLOCK_TOKEN_{idx:06}}}}}")
    }

    fn restore(&self, input: &str) -> String {
        let mut out = input.to_owned();
        for (idx, original) in self.tokens.iter().enumerate() {
            let token = format!("{{{{BLOCK_TOKEN_{idx:06}}}}}");
            out = out.replace(&token, original);
        }
        out
    }
}
