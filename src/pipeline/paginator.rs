use crate::config::catalog::Pagination;
use crate::config::PipelineConfig;
use crate::models::{RawPage, RawRow, Window};
use crate::scraper::SourceAdapter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on windows in one sweep, whatever the configured total says.
pub const MAX_WINDOWS: u32 = 500;

#[derive(Debug, Clone, Copy)]
pub struct PageSettings {
    pub attempts: u32,
    pub retry_base: Duration,
    pub window_delay: Duration,
}

impl From<&PipelineConfig> for PageSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            attempts: cfg.page_attempts.max(1),
            retry_base: cfg.page_retry_base(),
            window_delay: cfg.window_delay(),
        }
    }
}

/// Walks a source's windows and gathers every row it returns.
pub struct Paginator {
    adapter: Arc<dyn SourceAdapter>,
    pagination: Pagination,
    settings: PageSettings,
}

impl Paginator {
    pub fn new(adapter: Arc<dyn SourceAdapter>, pagination: Pagination, settings: PageSettings) -> Self {
        Self { adapter, pagination, settings }
    }

    /// Rows in upstream order.
    pub async fn fetch_all(&self) -> Vec<RawRow> {
        match self.pagination {
            Pagination::Sequential { window_size, total, first_page } => {
                self.walk(window_size, total, first_page).await
            }
            Pagination::FanOut { page_size, first_page, max_pages } => {
                self.fan_out(page_size, first_page, max_pages).await
            }
        }
    }

    async fn walk(&self, window_size: u32, total: u32, first_page: u32) -> Vec<RawRow> {
        let mut rows = Vec::new();
        if window_size == 0 {
            return rows;
        }

        let mut start = 0u32;
        let mut n = 0u32;
        while start < total && n < MAX_WINDOWS {
            let end = start.saturating_add(window_size).min(total);
            let window = Window { page: first_page + n, start, end };

            match fetch_with_retry(self.adapter.as_ref(), window, &self.settings).await {
                Some(page) => {
                    let got = page.rows.len();
                    debug!("Window {}..{}: {} rows", start, end, got);
                    rows.extend(page.rows);
                    if (got as u32) < window.size() {
                        debug!("Short window, end of data");
                        break;
                    }
                    if end < total {
                        tokio::time::sleep(self.settings.window_delay).await;
                    }
                }
                None => warn!("Skipping window {}..{} after {} attempts", start, end, self.settings.attempts),
            }

            start = end;
            n += 1;
        }
        rows
    }

    async fn fan_out(&self, page_size: u32, first_page: u32, max_pages: u32) -> Vec<RawRow> {
        let window = |page: u32| {
            let start = (page - first_page) * page_size;
            Window { page, start, end: start + page_size }
        };

        let Some(first) = fetch_with_retry(self.adapter.as_ref(), window(first_page), &self.settings).await else {
            warn!("First page unavailable, nothing fetched");
            return Vec::new();
        };

        let total_pages = first.total_pages.unwrap_or(1).clamp(1, max_pages.max(1));
        let last_page = first_page + total_pages - 1;
        info!("Fan-out over {} pages", total_pages);

        let mut rows = first.rows;
        let mut handles = Vec::new();
        for page in (first_page + 1)..=last_page {
            let adapter = Arc::clone(&self.adapter);
            let settings = self.settings;
            let w = window(page);
            let handle =
                tokio::spawn(async move { fetch_with_retry(adapter.as_ref(), w, &settings).await });
            handles.push((page, handle));
        }

        for (page, handle) in handles {
            match handle.await {
                Ok(Some(p)) => rows.extend(p.rows),
                Ok(None) => warn!("Page {} unavailable", page),
                Err(e) => error!("Task panic for page {}: {}", page, e),
            }
        }
        rows
    }
}

/// Page-level retry: `attempts` tries, waiting `n * retry_base` after the
/// n-th miss. Empty pages count as misses.
async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    window: Window,
    settings: &PageSettings,
) -> Option<RawPage> {
    for attempt in 1..=settings.attempts {
        match adapter.fetch_page(window).await {
            Ok(Some(page)) if !page.rows.is_empty() => return Some(page),
            Ok(_) => debug!("Page {} empty or unavailable (attempt {})", window.page, attempt),
            Err(e) => warn!("Page {} failed (attempt {}): {:#}", window.page, attempt, e),
        }
        if attempt < settings.attempts {
            tokio::time::sleep(settings.retry_base * attempt).await;
        }
    }
    None
}
