//! Google Analytics API clients.
//!
//! The engines talk to the remote APIs only through the traits below, one
//! per concern. `v3` implements them against the Management and Reporting
//! APIs, `v4` against the Admin and Data APIs.

pub mod http;
pub mod v3;
pub mod v4;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::model::{AccountSummary, CatalogItem, QuerySpec, RawReport, ResourceNode};

pub use v3::UniversalAnalyticsClient;
pub use v4::Ga4Client;

/// Where the next page of a listing starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// 1-based index paging (Management API).
    Index { start_index: u32, items_per_page: u32 },
    /// Opaque continuation token (Admin API).
    Token(String),
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    #[cfg(test)]
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Position of a report page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportCursor {
    pub offset: u64,
    pub page_token: Option<String>,
}

/// How a report API continues a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPaging {
    /// Row offset against the reported total (Data API).
    Offset,
    /// `nextPageToken` continuation (Reporting API v4).
    Token,
}

/// Paged listing of the account → property → profile tree.
#[async_trait]
pub trait HierarchyApi: Send + Sync {
    async fn list_accounts(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError>;

    async fn list_properties(
        &self,
        account_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError>;

    async fn list_profiles(
        &self,
        account_id: &str,
        property_id: &str,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<ResourceNode>, ApiError>;

    /// Single property, with timezone and service tier where the API has them.
    async fn get_property(
        &self,
        account_id: &str,
        property_id: &str,
    ) -> Result<ResourceNode, ApiError>;

    async fn list_account_summaries(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<Page<AccountSummary>, ApiError>;
}

/// Report execution. Each call returns one page; stitching is the caller's.
#[async_trait]
pub trait ReportApi: Send + Sync {
    fn paging(&self) -> ReportPaging;

    async fn run_report(
        &self,
        spec: &QuerySpec,
        cursor: &ReportCursor,
    ) -> Result<RawReport, ApiError>;

    async fn run_realtime_report(&self, spec: &QuerySpec) -> Result<RawReport, ApiError>;
}

/// Dimension/metric catalog source.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Unfiltered catalog for a property.
    async fn fetch_catalog(&self, property_id: &str) -> Result<Vec<CatalogItem>, ApiError>;
}
