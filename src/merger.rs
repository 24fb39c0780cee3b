//! Cross-page reconciliation.
//!
//! A publication that starts near the bottom of page N and continues on page
//! N+1 shows up on N+1 as a head of text before the first process number. When
//! that head carries a trigger term, the record belongs to whatever was open at
//! the end of the previous page, so we fetch it and stitch the two halves.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::MergerSettings;
use crate::fetch::{page_number, page_url, PageFetcher};
use crate::model::{ExtractionMethod, SourcePage};
use crate::parser::blocks::{first_process_number, first_record_offset, last_record_offset};
use crate::parser::contains_required_term;

/// Per-producer page state: the page being processed and a bounded cache of
/// pages already processed or fetched. Cleared at the start of each run.
#[derive(Debug, Default)]
pub struct PageMergeContext {
    pub current_page: Option<u32>,
    pub current_text: String,
    cache: HashMap<u32, String>,
    order: VecDeque<u32>,
    capacity: usize,
}

impl PageMergeContext {
    pub fn new(capacity: usize) -> Self {
        PageMergeContext {
            capacity: capacity.max(1),
            ..Default::default()
        }
    }

    pub fn begin_page(&mut self, page: Option<u32>, text: &str) {
        self.current_page = page;
        self.current_text = text.to_string();
    }

    pub fn cached(&self, page: u32) -> Option<&str> {
        self.cache.get(&page).map(String::as_str)
    }

    /// Insert, evicting the oldest entry once over capacity.
    pub fn remember(&mut self, page: u32, text: String) {
        if self.cache.insert(page, text).is_none() {
            self.order.push_back(page);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
    }

    pub fn clear(&mut self) {
        self.current_page = None;
        self.current_text.clear();
        self.cache.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// A slice of page text ready for the parser, tagged with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub method: ExtractionMethod,
}

impl Segment {
    fn direct(text: &str) -> Self {
        Segment {
            text: text.to_string(),
            method: ExtractionMethod::Direct,
        }
    }
}

pub struct ContentMerger {
    fetcher: Arc<dyn PageFetcher>,
    settings: MergerSettings,
    required_terms: Vec<String>,
    context: PageMergeContext,
}

impl ContentMerger {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        settings: MergerSettings,
        required_terms: Vec<String>,
    ) -> Self {
        let context = PageMergeContext::new(settings.cache_capacity);
        ContentMerger {
            fetcher,
            settings,
            required_terms,
            context,
        }
    }

    /// Drop cached pages. Called at the start of every run.
    pub fn reset(&mut self) {
        self.context.clear();
    }

    pub fn context(&self) -> &PageMergeContext {
        &self.context
    }

    /// Does the page open with a trigger term before its first process number?
    pub fn needs_merge(&self, text: &str) -> bool {
        let head = match first_record_offset(text) {
            Some(offset) => &text[..offset],
            None => text,
        };
        contains_required_term(head, &self.required_terms)
    }

    /// Split a page into parser segments, stitching the head onto the previous
    /// page's last record when the page opens mid-publication.
    ///
    /// Never fails: a missing predecessor or a fetch error leaves the page as is.
    pub async fn prepare(&mut self, page: &SourcePage) -> Vec<Segment> {
        let current = page_number(&page.url, &self.settings.page_param);
        self.context.begin_page(current, &page.text);
        if let Some(n) = current {
            self.context.remember(n, page.text.clone());
        }

        if !self.needs_merge(&page.text) {
            return vec![Segment::direct(&page.text)];
        }

        let first_offset = first_record_offset(&page.text);
        match self.merge_with_previous(page).await {
            Some(merged) if self.accepts(&merged) => {
                info!(url = %page.url, "Merged publication split across pages");
                let mut segments = vec![Segment {
                    text: merged,
                    method: ExtractionMethod::Merged,
                }];
                if let Some(offset) = first_offset {
                    segments.push(Segment::direct(&page.text[offset..]));
                }
                segments
            }
            Some(_) => {
                warn!(url = %page.url, "Merged text lacks trigger or process number, using page as is");
                vec![Segment {
                    text: page.text.clone(),
                    method: ExtractionMethod::MergeFallback,
                }]
            }
            None => vec![Segment::direct(&page.text)],
        }
    }

    /// Previous-page tail + separator + current-page head, or `None` when there
    /// is no predecessor or it cannot be fetched.
    pub async fn merge_with_previous(&mut self, page: &SourcePage) -> Option<String> {
        let current = page_number(&page.url, &self.settings.page_param)?;
        if current <= 1 {
            debug!(url = %page.url, "First page, nothing to merge with");
            return None;
        }
        let previous = self.previous_page_text(&page.url, current - 1).await?;

        let tail = match last_record_offset(&previous) {
            Some(offset) => previous[offset..].trim_end(),
            None => "",
        };
        let head = match first_record_offset(&page.text) {
            Some(offset) => &page.text[..offset],
            None => page.text.as_str(),
        };
        Some(format!("{}{}{}", tail, self.settings.separator, head.trim()))
    }

    fn accepts(&self, merged: &str) -> bool {
        contains_required_term(merged, &self.required_terms) && first_process_number(merged).is_some()
    }

    async fn previous_page_text(&mut self, url: &str, previous: u32) -> Option<String> {
        if let Some(text) = self.context.cached(previous) {
            debug!(page = previous, "Previous page served from cache");
            return Some(text.to_string());
        }
        let previous_url = page_url(url, &self.settings.page_param, previous)?;
        match self.fetcher.fetch_page(&previous_url).await {
            Ok(text) => {
                self.context.remember(previous, text.clone());
                Some(text)
            }
            Err(e) => {
                warn!(url = %previous_url, error = %e, "Could not fetch previous page, skipping merge");
                None
            }
        }
    }
}
