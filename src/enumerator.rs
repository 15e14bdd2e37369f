//! Hierarchy enumeration: accounts → properties → profiles.
//!
//! Every listing is stitched from its pages in request order. The profile
//! level of a full enumeration fans out one task per property; each task
//! retries transient failures on its own, and the first task that fails
//! for good aborts the rest.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::{HierarchyApi, Page, PageCursor};
use crate::config::RetryConfig;
use crate::error::{ApiError, EnumerationError};
use crate::model::{AccountSummary, ResourceNode};

/// Walks the resource tree of one API generation.
#[derive(Clone)]
pub struct Enumerator {
    api: Arc<dyn HierarchyApi>,
    max_attempts: u32,
    retry_delay: Duration,
    max_pages: usize,
}

impl Enumerator {
    pub fn new(api: Arc<dyn HierarchyApi>, retry: &RetryConfig, max_pages: usize) -> Self {
        Self {
            api,
            max_attempts: retry.max_attempts.max(1),
            retry_delay: retry.delay(),
            max_pages: max_pages.max(1),
        }
    }

    pub async fn list_accounts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceNode>, EnumerationError> {
        let api = &self.api;
        self.collect_pages("accounts", cancel, move |cursor| async move {
            api.list_accounts(cursor.as_ref()).await
        })
        .await
    }

    pub async fn list_properties(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceNode>, EnumerationError> {
        let api = &self.api;
        let what = format!("properties of account {}", account_id);
        self.collect_pages(&what, cancel, move |cursor| async move {
            api.list_properties(account_id, cursor.as_ref()).await
        })
        .await
    }

    pub async fn list_profiles(
        &self,
        account_id: &str,
        property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceNode>, EnumerationError> {
        let api = &self.api;
        let what = format!("profiles of property {}", property_id);
        self.collect_pages(&what, cancel, move |cursor| async move {
            api.list_profiles(account_id, property_id, cursor.as_ref())
                .await
        })
        .await
    }

    pub async fn get_property(
        &self,
        account_id: &str,
        property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResourceNode, EnumerationError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EnumerationError::Cancelled),
            property = self.api.get_property(account_id, property_id) => Ok(property?),
        }
    }

    /// Account summaries, without accounts that have no properties.
    pub async fn list_account_summaries(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<AccountSummary>, EnumerationError> {
        let api = &self.api;
        let summaries = self
            .collect_pages("account summaries", cancel, move |cursor| async move {
                api.list_account_summaries(cursor.as_ref()).await
            })
            .await?;
        Ok(summaries
            .into_iter()
            .filter(|summary| !summary.property_summaries.is_empty())
            .collect())
    }

    /// Every profile of every property of every account.
    ///
    /// Accounts and properties are listed sequentially; profiles are listed
    /// concurrently, one task per property. Order across properties is
    /// completion order. If any task fails for good, every other task is
    /// aborted and nothing is returned.
    pub async fn list_all_profiles(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceNode>, EnumerationError> {
        let accounts = self.list_accounts(cancel).await?;

        let mut properties = Vec::new();
        for account in &accounts {
            for property in self.list_properties(&account.id, cancel).await? {
                properties.push((account.id.clone(), property.id));
            }
        }
        tracing::debug!(
            accounts = accounts.len(),
            properties = properties.len(),
            "listing profiles"
        );

        let mut tasks = JoinSet::new();
        for (account_id, property_id) in properties {
            let this = self.clone();
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                this.list_profiles_with_retry(&account_id, &property_id, &cancel)
                    .await
            });
        }

        let mut profiles = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(EnumerationError::TaskFailed(e.to_string())),
            };
            match outcome {
                Ok(batch) => profiles.extend(batch),
                Err(e) => {
                    tracing::error!(error = %e, "profile enumeration aborted");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(profiles)
    }

    /// List one property's profiles, retrying transient failures with a
    /// fixed delay. Permanent failures are returned on the first attempt.
    async fn list_profiles_with_retry(
        &self,
        account_id: &str,
        property_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceNode>, EnumerationError> {
        let mut attempt = 1;
        loop {
            let error = match self.list_profiles(account_id, property_id, cancel).await {
                Ok(profiles) => return Ok(profiles),
                Err(EnumerationError::Api(e)) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.max_attempts {
                tracing::error!(
                    account_id,
                    property_id,
                    attempts = attempt,
                    error = %error,
                    "profile listing retries exhausted"
                );
                return Err(EnumerationError::RetryExhausted {
                    account_id: account_id.to_string(),
                    property_id: property_id.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            tracing::warn!(
                account_id,
                property_id,
                attempt,
                error = %error,
                "profile listing failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EnumerationError::Cancelled),
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
            attempt += 1;
        }
    }

    /// Fetch pages until the API stops returning a cursor.
    async fn collect_pages<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> Result<Vec<T>, EnumerationError>
    where
        F: FnMut(Option<PageCursor>) -> Fut,
        Fut: Future<Output = Result<Page<T>, ApiError>>,
    {
        let mut items = Vec::new();
        let mut cursor = None;

        for page_number in 1..=self.max_pages {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EnumerationError::Cancelled),
                page = fetch(cursor.take()) => page?,
            };
            tracing::debug!(what, page = page_number, items = page.items.len(), "page fetched");

            items.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }

        tracing::error!(what, max_pages = self.max_pages, "pagination did not terminate");
        Err(ApiError::PageLimit {
            what: what.to_string(),
            max_pages: self.max_pages,
        }
        .into())
    }
}

impl std::fmt::Debug for Enumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enumerator")
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::model::PropertySummary;

    fn unavailable() -> ApiError {
        ApiError::HttpError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "backend error".to_string(),
        }
    }

    fn forbidden() -> ApiError {
        ApiError::Google {
            code: 403,
            reason: "PERMISSION_DENIED".to_string(),
            message: "no access".to_string(),
        }
    }

    fn rate_limited() -> ApiError {
        ApiError::Google {
            code: 403,
            reason: "userRateLimitExceeded".to_string(),
            message: "User Rate Limit Exceeded".to_string(),
        }
    }

    /// Two accounts (the second on a second page), two properties each,
    /// two profiles per property. Profile listings for `failing` properties
    /// fail the configured number of times first.
    #[derive(Default)]
    struct StubHierarchy {
        transient_failures: HashMap<String, u32>,
        throttled: HashMap<String, u32>,
        permanent_failure: Option<String>,
        endless_accounts: bool,
        profile_calls: Mutex<HashMap<String, u32>>,
        account_calls: AtomicU32,
    }

    impl StubHierarchy {
        fn calls_for(&self, property_id: &str) -> u32 {
            self.profile_calls
                .lock()
                .unwrap()
                .get(property_id)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl HierarchyApi for StubHierarchy {
        async fn list_accounts(
            &self,
            cursor: Option<&PageCursor>,
        ) -> Result<Page<ResourceNode>, ApiError> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            if self.endless_accounts {
                return Ok(Page {
                    items: vec![ResourceNode::new("loop", "Loop", "")],
                    next: Some(PageCursor::Token("again".to_string())),
                });
            }
            match cursor {
                None => Ok(Page {
                    items: vec![ResourceNode::new("a1", "Account 1", "")],
                    next: Some(PageCursor::Token("p2".to_string())),
                }),
                Some(PageCursor::Token(t)) if t == "p2" => {
                    Ok(Page::last(vec![ResourceNode::new("a2", "Account 2", "")]))
                }
                other => panic!("unexpected cursor {:?}", other),
            }
        }

        async fn list_properties(
            &self,
            account_id: &str,
            _cursor: Option<&PageCursor>,
        ) -> Result<Page<ResourceNode>, ApiError> {
            Ok(Page::last(
                (1..=2)
                    .map(|i| {
                        ResourceNode::new(format!("{}-p{}", account_id, i), "Property", account_id)
                    })
                    .collect(),
            ))
        }

        async fn list_profiles(
            &self,
            _account_id: &str,
            property_id: &str,
            cursor: Option<&PageCursor>,
        ) -> Result<Page<ResourceNode>, ApiError> {
            let call = {
                let mut calls = self.profile_calls.lock().unwrap();
                let entry = calls.entry(property_id.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            if self.permanent_failure.as_deref() == Some(property_id) {
                return Err(forbidden());
            }
            if let Some(failures) = self.transient_failures.get(property_id) {
                if call <= *failures {
                    return Err(unavailable());
                }
            }
            if let Some(failures) = self.throttled.get(property_id) {
                if call <= *failures {
                    return Err(rate_limited());
                }
            }
            // Index paging: profile 1 on the first page, profile 2 on the second.
            match cursor {
                None => Ok(Page {
                    items: vec![ResourceNode::new(format!("{}-v1", property_id), "View", property_id)],
                    next: Some(PageCursor::Index {
                        start_index: 2,
                        items_per_page: 1,
                    }),
                }),
                Some(_) => Ok(Page::last(vec![ResourceNode::new(
                    format!("{}-v2", property_id),
                    "View",
                    property_id,
                )])),
            }
        }

        async fn get_property(
            &self,
            account_id: &str,
            property_id: &str,
        ) -> Result<ResourceNode, ApiError> {
            Ok(ResourceNode::new(property_id, "Property", account_id))
        }

        async fn list_account_summaries(
            &self,
            _cursor: Option<&PageCursor>,
        ) -> Result<Page<AccountSummary>, ApiError> {
            Ok(Page::last(vec![
                AccountSummary {
                    account: "accounts/1".to_string(),
                    display_name: "Empty".to_string(),
                    property_summaries: vec![],
                },
                AccountSummary {
                    account: "accounts/2".to_string(),
                    display_name: "Main".to_string(),
                    property_summaries: vec![PropertySummary {
                        property: "properties/7".to_string(),
                        display_name: "Web".to_string(),
                        parent: "accounts/2".to_string(),
                    }],
                },
            ]))
        }
    }

    fn enumerator(stub: Arc<StubHierarchy>) -> Enumerator {
        Enumerator::new(stub, &RetryConfig::default(), 50)
    }

    fn sorted_ids(nodes: &[ResourceNode]) -> Vec<String> {
        let mut ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_pages_are_stitched_in_order() {
        let stub = Arc::new(StubHierarchy::default());
        let accounts = enumerator(stub.clone())
            .list_accounts(&CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(stub.account_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_index_cursor_pages_are_stitched() {
        let stub = Arc::new(StubHierarchy::default());
        let profiles = enumerator(stub)
            .list_profiles("a1", "a1-p1", &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<_> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a1-p1-v1", "a1-p1-v2"]);
    }

    #[tokio::test]
    async fn test_get_property_honours_cancellation() {
        let enumerator = enumerator(Arc::new(StubHierarchy::default()));
        let property = enumerator
            .get_property("a1", "a1-p1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(property.parent_id, "a1");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = enumerator.get_property("a1", "a1-p1", &cancel).await;
        assert!(matches!(result, Err(EnumerationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_list_all_profiles_covers_every_property() {
        let stub = Arc::new(StubHierarchy::default());
        let profiles = enumerator(stub)
            .list_all_profiles(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(profiles.len(), 8);
        assert_eq!(
            sorted_ids(&profiles),
            vec![
                "a1-p1-v1", "a1-p1-v2", "a1-p2-v1", "a1-p2-v2", "a2-p1-v1", "a2-p1-v2",
                "a2-p2-v1", "a2-p2-v2",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_nine_transient_failures_then_success() {
        let stub = Arc::new(StubHierarchy {
            transient_failures: HashMap::from([("a1-p2".to_string(), 9)]),
            ..StubHierarchy::default()
        });
        let profiles = enumerator(stub.clone())
            .list_all_profiles(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(profiles.len(), 8);
        // Nine failed first pages, then two successful pages.
        assert_eq!(stub.calls_for("a1-p2"), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_after_exactly_ten_attempts() {
        let stub = Arc::new(StubHierarchy {
            transient_failures: HashMap::from([("a2-p1".to_string(), u32::MAX)]),
            ..StubHierarchy::default()
        });
        let err = enumerator(stub.clone())
            .list_all_profiles(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            EnumerationError::RetryExhausted {
                account_id,
                property_id,
                attempts,
                source,
            } => {
                assert_eq!(account_id, "a2");
                assert_eq!(property_id, "a2-p1");
                assert_eq!(attempts, 10);
                assert!(source.is_transient());
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(stub.calls_for("a2-p1"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_forbidden_is_retried() {
        let stub = Arc::new(StubHierarchy {
            throttled: HashMap::from([("a2-p2".to_string(), 3)]),
            ..StubHierarchy::default()
        });
        let profiles = enumerator(stub.clone())
            .list_all_profiles(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(profiles.len(), 8);
        assert_eq!(stub.calls_for("a2-p2"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let stub = Arc::new(StubHierarchy {
            permanent_failure: Some("a1-p1".to_string()),
            ..StubHierarchy::default()
        });
        let err = enumerator(stub.clone())
            .list_all_profiles(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EnumerationError::Api(ApiError::Google { code: 403, .. })));
        assert_eq!(stub.calls_for("a1-p1"), 1);
    }

    #[tokio::test]
    async fn test_endless_pagination_hits_page_limit() {
        let stub = Arc::new(StubHierarchy {
            endless_accounts: true,
            ..StubHierarchy::default()
        });
        let err = Enumerator::new(stub.clone(), &RetryConfig::default(), 3)
            .list_accounts(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EnumerationError::Api(ApiError::PageLimit { max_pages: 3, .. })
        ));
        assert_eq!(stub.account_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_enumeration() {
        let stub = Arc::new(StubHierarchy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = enumerator(stub.clone())
            .list_all_profiles(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EnumerationError::Cancelled));
        assert_eq!(stub.account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_backoff() {
        let stub = Arc::new(StubHierarchy {
            transient_failures: HashMap::from([("a1-p1".to_string(), u32::MAX)]),
            ..StubHierarchy::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });

        let err = enumerator(stub.clone())
            .list_all_profiles(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EnumerationError::Cancelled));
        assert!(stub.calls_for("a1-p1") < 10);
    }

    #[tokio::test]
    async fn test_account_summaries_skip_empty_accounts() {
        let stub = Arc::new(StubHierarchy::default());
        let summaries = enumerator(stub)
            .list_account_summaries(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].display_name, "Main");
    }
}
