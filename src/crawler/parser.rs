//! HTML parser for listing and item pages
//!
//! This module handles parsing HTML content to extract:
//! - Item identifiers from a listing page (thumbnails and post links)
//! - Asset link candidates from an item page
//!
//! Both functions only collect raw strings; URL resolution and validity
//! checks happen in the resolver.

use crate::state::ItemId;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

const POST_LINK_MARKER: &str = "s=view&id=";
const ORIGINAL_LINK_TEXT: &str = "original image";

/// Asset link candidates found on an item page, grouped by extraction rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCandidates {
    /// Rule 1: links labelled "Original image"
    pub original: Vec<String>,

    /// Rule 2: every link and video source, in document order
    pub media_links: Vec<String>,
}

/// Extracts the item identifiers referenced on a listing page
///
/// # Extraction Rules
///
/// 1. `<img src=".../thumbnails/<dir>/thumbnail_<hash>.jpg?<id>">`: the
///    numeric query string is the item id
/// 2. `<a href="...page=post&s=view&id=<id>...">`
///
/// The result keeps first-seen order and contains no duplicates. An empty
/// result means the listing is exhausted.
///
/// # Example
///
/// ```
/// use sumi_harvest::crawler::extract_item_ids;
///
/// let html = r#"<a href="index.php?page=post&amp;s=view&amp;id=42">x</a>"#;
/// let ids = extract_item_ids(html);
/// assert_eq!(ids[0].as_str(), "42");
/// ```
pub fn extract_item_ids(html: &str) -> Vec<ItemId> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    let mut push = |id: String| {
        if seen.insert(id.clone()) {
            ids.push(ItemId::new(id));
        }
    };

    if let Ok(img_selector) = Selector::parse("img[src]") {
        for element in document.select(&img_selector) {
            if let Some(id) = element.value().attr("src").and_then(thumbnail_item_id) {
                push(id);
            }
        }
    }

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if let Some(id) = element.value().attr("href").and_then(post_link_item_id) {
                push(id);
            }
        }
    }

    ids
}

/// Extracts asset link candidates from an item page
pub fn extract_asset_candidates(html: &str) -> AssetCandidates {
    let document = Html::parse_document(html);
    let mut candidates = AssetCandidates::default();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if is_original_link(&element) {
                if let Some(href) = element.value().attr("href") {
                    candidates.original.push(href.trim().to_string());
                }
            }
        }
    }

    if let Ok(media_selector) = Selector::parse("a[href], video[src], source[src]") {
        for element in document.select(&media_selector) {
            let value = element.value();
            if let Some(link) = value.attr("href").or_else(|| value.attr("src")) {
                let link = link.trim();
                if !link.is_empty() {
                    candidates.media_links.push(link.to_string());
                }
            }
        }
    }

    candidates
}

fn is_original_link(element: &ElementRef) -> bool {
    let text: String = element.text().collect();
    text.trim().eq_ignore_ascii_case(ORIGINAL_LINK_TEXT)
}

/// `.../thumbnails/123/thumbnail_abcdef.jpg?456` -> "456"
fn thumbnail_item_id(src: &str) -> Option<String> {
    let (path, query) = src.split_once('?')?;

    if !path.contains("/thumbnails/") {
        return None;
    }

    let file = path.rsplit('/').next()?;
    let hash = file.strip_prefix("thumbnail_")?;
    let hash = hash
        .strip_suffix(".jpg")
        .or_else(|| hash.strip_suffix(".JPG"))?;
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let id = query.split('&').next()?;
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// `index.php?page=post&s=view&id=456` -> "456"
fn post_link_item_id(href: &str) -> Option<String> {
    if !href.contains("page=post") {
        return None;
    }

    let start = href.find(POST_LINK_MARKER)? + POST_LINK_MARKER.len();
    let id: String = href[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}
