//! Agenda page parsing: the `Bookmarks: [...]` literal carries timing, the
//! `AgendaItem` div structure carries ordered titles. Everything else on the
//! page is ignored.

use std::sync::OnceLock;

use cv_types::{AgendaData, AgendaItem, Bookmark};
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum AgendaParseError {
    #[error("Bookmarks literal is not valid JSON: {0}")]
    BadBookmarks(#[from] serde_json::Error),
}

/// Parse the agenda page into items joined with their bookmarks, sorted the
/// way the chapter description wants them. A page without a `Bookmarks:`
/// literal yields untimed items only.
pub fn parse_agenda(html: &str) -> Result<AgendaData, AgendaParseError> {
    let bookmarks = match bookmarks_literal(html) {
        Some(literal) => serde_json::from_str::<Vec<Bookmark>>(literal)?,
        None => {
            tracing::warn!("agenda page has no Bookmarks literal");
            Vec::new()
        }
    };

    let items = agenda_items(html)
        .into_iter()
        .map(|(id, title)| AgendaItem {
            id,
            title,
            bookmark: bookmarks.iter().copied().find(|b| b.agenda_item_id == id),
        })
        .collect();

    Ok(AgendaData { items, bookmarks }.sorted())
}

/// The balanced `[...]` following `Bookmarks:`.
fn bookmarks_literal(html: &str) -> Option<&str> {
    let at = html.find("Bookmarks:")?;
    let rest = &html[at + "Bookmarks:".len()..];
    let start = rest.find('[')?;

    let mut depth = 0usize;
    for (i, c) in rest[start..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// `(id, title)` pairs in page order from the repeated
/// `<DIV class="AgendaItem AgendaItemN">…<DIV class="AgendaItemTitle">…<a>title</a>` blocks.
fn agenda_items(html: &str) -> Vec<(i64, String)> {
    static ITEM_RE: OnceLock<Regex> = OnceLock::new();
    let re = ITEM_RE.get_or_init(|| {
        Regex::new(
            r#"(?is)<div[^>]+class="AgendaItem AgendaItem(\d+)[^"]*".*?<div[^>]+class="AgendaItemTitle[^"]*"[^>]*>.*?<a[^>]*>(.*?)</a>"#,
        )
        .expect("agenda item regex is valid")
    });

    re.captures_iter(html)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().parse().ok()?;
            let title = decode_entities(caps.get(2)?.as_str().trim());
            Some((id, title))
        })
        .collect()
}

/// The handful of entities agenda titles actually contain.
fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
