//! Report fetching with page stitching.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::api::{ReportApi, ReportCursor, ReportPaging};
use crate::error::{ApiError, Error};
use crate::model::{QueryMode, QuerySpec, RawReport};

/// Runs one logical report per query and stitches its pages.
#[derive(Clone)]
pub struct ReportFetcher {
    api: Arc<dyn ReportApi>,
    max_pages: usize,
}

impl ReportFetcher {
    pub fn new(api: Arc<dyn ReportApi>, max_pages: usize) -> Self {
        Self {
            api,
            max_pages: max_pages.max(1),
        }
    }

    /// Run the report the query's mode calls for.
    pub async fn fetch(
        &self,
        spec: &QuerySpec,
        cancel: &CancellationToken,
    ) -> Result<RawReport, Error> {
        match spec.mode {
            QueryMode::Realtime => self.run_realtime_report(spec, cancel).await,
            QueryMode::Table | QueryMode::TimeSeries => self.run_report(spec, cancel).await,
        }
    }

    /// Run a date-range report. Follow-up pages are requested until the
    /// reported total is reached (offset paging) or no continuation token is
    /// returned (token paging), unless the query disables continuation.
    /// Any page failure fails the whole report.
    pub async fn run_report(
        &self,
        spec: &QuerySpec,
        cancel: &CancellationToken,
    ) -> Result<RawReport, Error> {
        let started = Instant::now();
        let paging = self.api.paging();

        let mut cursor = ReportCursor {
            offset: spec.offset,
            page_token: spec.page_token.clone(),
        };
        let mut report = self.page(spec, &cursor, cancel).await?;
        let mut pages = 1;

        while spec.use_next_page {
            let fetched = spec.offset + report.rows.len() as u64;
            cursor = match paging {
                ReportPaging::Offset if fetched < report.row_count => ReportCursor {
                    offset: fetched,
                    page_token: None,
                },
                ReportPaging::Token => match report.next_page_token.take() {
                    Some(token) => ReportCursor {
                        offset: fetched,
                        page_token: Some(token),
                    },
                    None => break,
                },
                ReportPaging::Offset => break,
            };

            if pages >= self.max_pages {
                tracing::error!(
                    ref_id = %spec.ref_id,
                    max_pages = self.max_pages,
                    "report pagination did not terminate"
                );
                return Err(ApiError::PageLimit {
                    what: format!("report {}", spec.ref_id),
                    max_pages: self.max_pages,
                }
                .into());
            }

            let next = self.page(spec, &cursor, cancel).await?;
            pages += 1;
            if next.rows.is_empty() {
                tracing::warn!(
                    ref_id = %spec.ref_id,
                    fetched,
                    row_count = report.row_count,
                    "empty continuation page, stopping"
                );
                break;
            }
            report.rows.extend(next.rows);
            report.row_count = next.row_count.max(report.row_count);
            report.next_page_token = next.next_page_token;
        }

        tracing::debug!(
            ref_id = %spec.ref_id,
            rows = report.rows.len(),
            row_count = report.row_count,
            pages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "report fetched"
        );
        Ok(report)
    }

    /// Run a realtime report over the trailing minute window. Realtime
    /// results are a single page.
    pub async fn run_realtime_report(
        &self,
        spec: &QuerySpec,
        cancel: &CancellationToken,
    ) -> Result<RawReport, Error> {
        let started = Instant::now();
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            report = self.api.run_realtime_report(spec) => report?,
        };

        if report.row_count > report.rows.len() as u64 {
            tracing::warn!(
                ref_id = %spec.ref_id,
                rows = report.rows.len(),
                row_count = report.row_count,
                "realtime report truncated to its first page"
            );
        }
        tracing::debug!(
            ref_id = %spec.ref_id,
            rows = report.rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "realtime report fetched"
        );
        Ok(report)
    }

    async fn page(
        &self,
        spec: &QuerySpec,
        cursor: &ReportCursor,
        cancel: &CancellationToken,
    ) -> Result<RawReport, Error> {
        tracing::debug!(ref_id = %spec.ref_id, offset = cursor.offset, token = ?cursor.page_token, "requesting report page");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            page = self.api.run_report(spec, cursor) => Ok(page?),
        }
    }
}

impl std::fmt::Debug for ReportFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportFetcher")
            .field("paging", &self.api.paging())
            .field("max_pages", &self.max_pages)
            .finish()
    }
}
