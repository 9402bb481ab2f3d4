//! The host media library, seen only through what generation needs: image
//! records, candidates lacking alt text, and alt-text writes.

use crate::error::MediaError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// An image attachment as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: u64,
    pub url: String,
    pub filename: String,
    /// Empty when the image has no alt text.
    pub alt_text: String,
    pub title: String,
}

impl ImageRecord {
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        let url = url.into();
        Self { id, filename: filename_from_url(&url), url, alt_text: String::new(), title: String::new() }
    }

    pub fn with_alt_text(mut self, alt: impl Into<String>) -> Self {
        self.alt_text = alt.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Eligible for generation: no alt text yet.
    pub fn is_candidate(&self) -> bool {
        self.alt_text.trim().is_empty()
    }
}

/// Counts behind the library overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub total_images: u64,
    pub missing_alt: u64,
}

#[async_trait]
pub trait MediaLibrary: Send + Sync + std::fmt::Debug {
    /// Resolve an image reference. Non-images and images without a URL are
    /// errors.
    async fn image(&self, id: u64) -> Result<ImageRecord, MediaError>;

    /// Up to `limit` images lacking alt text, in the library's own order.
    async fn candidates(&self, limit: usize) -> Result<Vec<ImageRecord>, MediaError>;

    async fn set_alt_text(&self, id: u64, alt: &str) -> Result<(), MediaError>;

    async fn clear_alt_text(&self, id: u64) -> Result<(), MediaError>;

    async fn stats(&self) -> Result<LibraryStats, MediaError>;
}

#[derive(Debug, Clone)]
struct Attachment {
    record: ImageRecord,
    is_image: bool,
}

/// In-memory media library ordered by attachment id. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMediaLibrary {
    items: Arc<Mutex<BTreeMap<u64, Attachment>>>,
}

impl InMemoryMediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ImageRecord) {
        self.lock().insert(record.id, Attachment { record, is_image: true });
    }

    /// Add a non-image attachment (a PDF, say) under `id`.
    pub fn insert_document(&self, id: u64, url: impl Into<String>) {
        self.lock().insert(id, Attachment { record: ImageRecord::new(id, url), is_image: false });
    }

    /// Current alt text of `id`, if the attachment exists.
    pub fn alt_text(&self, id: u64) -> Option<String> {
        self.lock().get(&id).map(|a| a.record.alt_text.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Attachment>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MediaLibrary for InMemoryMediaLibrary {
    async fn image(&self, id: u64) -> Result<ImageRecord, MediaError> {
        let guard = self.lock();
        let attachment = guard.get(&id).ok_or(MediaError::NotFound(id))?;
        if !attachment.is_image {
            return Err(MediaError::NotAnImage(id));
        }
        if attachment.record.url.trim().is_empty() {
            return Err(MediaError::MissingUrl(id));
        }
        Ok(attachment.record.clone())
    }

    async fn candidates(&self, limit: usize) -> Result<Vec<ImageRecord>, MediaError> {
        Ok(self
            .lock()
            .values()
            .filter(|a| a.is_image && a.record.is_candidate() && !a.record.url.trim().is_empty())
            .take(limit)
            .map(|a| a.record.clone())
            .collect())
    }

    async fn set_alt_text(&self, id: u64, alt: &str) -> Result<(), MediaError> {
        let mut guard = self.lock();
        let attachment = guard.get_mut(&id).ok_or(MediaError::NotFound(id))?;
        attachment.record.alt_text = alt.to_string();
        Ok(())
    }

    async fn clear_alt_text(&self, id: u64) -> Result<(), MediaError> {
        self.set_alt_text(id, "").await
    }

    async fn stats(&self) -> Result<LibraryStats, MediaError> {
        let guard = self.lock();
        let images = guard.values().filter(|a| a.is_image);
        let (total, missing) = images.fold((0, 0), |(t, m), a| (t + 1, m + u64::from(a.record.is_candidate())));
        Ok(LibraryStats { total_images: total, missing_alt: missing })
    }
}

/// Last path segment of `url`, without query or fragment.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string()
}

/// Make generated text safe to store as alt text: drop markup and control
/// characters, collapse whitespace, trim.
///
/// A `<` only opens a tag when followed by a letter, `/` or `!`; anything else
/// is text. An unterminated tag is kept as text. `<script>` and `<style>`
/// elements are dropped with their contents.
pub fn sanitize_alt_text(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('<') {
        push_text(&mut stripped, &rest[..open]);
        let after = &rest[open + 1..];
        if !opens_tag(after) {
            stripped.push('<');
            rest = after;
            continue;
        }
        let Some(close) = after.find('>') else {
            push_text(&mut stripped, &rest[open..]);
            rest = "";
            break;
        };
        let tag = &after[..close];
        rest = &after[close + 1..];
        stripped.push(' ');
        if let Some(name) = raw_text_element(tag) {
            rest = skip_element_body(rest, name);
        }
    }
    push_text(&mut stripped, rest);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_text(out: &mut String, text: &str) {
    out.extend(text.chars().map(|c| if c.is_control() { ' ' } else { c }));
}

fn opens_tag(after: &str) -> bool {
    after.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
}

/// `script` or `style` when `tag` (the text between `<` and `>`) opens one.
fn raw_text_element(tag: &str) -> Option<&'static str> {
    let name: String = tag.chars().take_while(char::is_ascii_alphanumeric).collect();
    ["script", "style"].into_iter().find(|el| name.eq_ignore_ascii_case(el))
}

/// Text after the closing tag of `name`; empty if it is never closed.
fn skip_element_body<'a>(rest: &'a str, name: &str) -> &'a str {
    let lower = rest.to_ascii_lowercase();
    let Some(start) = lower.find(&format!("</{name}")) else {
        return "";
    };
    match lower[start..].find('>') {
        Some(end) => &rest[start + end + 1..],
        None => "",
    }
}
