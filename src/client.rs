//! Gmail API client with concurrency limiting and retry logic

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use google_gmail1::api::{Label, ModifyMessageRequest};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::models::{
    BatchOperation, LabelInfo, MessageDetails, MessageHeader, MessagePage, OperationOutcome,
};

const USER_ID: &str = "me";
const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote mail service operations the labeler depends on
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a label shown in both the label list and the message list.
    /// Returns [`GmailError::Conflict`] when the name is already taken.
    async fn create_label(&self, name: &str) -> Result<String>;

    /// Fetch one page of message ids matching `query`
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<String>,
        page_size: u32,
    ) -> Result<MessagePage>;

    /// Fetch the headers and current labels of a message
    async fn get_message(&self, id: &str) -> Result<MessageDetails>;

    /// Submit a batch of per-message label changes.
    ///
    /// Operations run concurrently and complete in any order; one outcome is
    /// reported per operation. The call returns once every operation has
    /// reported and never fails as a whole.
    async fn modify_messages(&self, operations: Vec<BatchOperation>) -> Vec<OperationOutcome>;
}

/// Production Gmail client
///
/// - Semaphore-bounded concurrency
/// - Per-call timeout
/// - Bounded exponential backoff for transient errors
pub struct ProductionGmailClient {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
    max_concurrent: usize,
    max_retries: u32,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent requests
    pub fn new(hub: GmailHub, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_retries: 3,
        }
    }

    /// Set how many times a transient failure is retried (0 disables retry)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check if an error is retryable
    fn should_retry(error: &GmailError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    if let GmailError::RateLimitExceeded { retry_after } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after));
                    }
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a single API call under the concurrency limit and call timeout
    async fn limited<T, Fut>(&self, operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            GmailError::Unknown(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation_name, CALL_TIMEOUT);
                Err(GmailError::NetworkError(format!(
                    "API call timed out after {:?}",
                    CALL_TIMEOUT
                )))
            }
        }
    }

    async fn modify_one(&self, operation: &BatchOperation) -> Result<()> {
        Self::with_retry("modify_message", self.max_retries, || async {
            self.limited("modify_message", async {
                let request = ModifyMessageRequest {
                    add_label_ids: Some(vec![operation.add_label_id.clone()]),
                    remove_label_ids: Some(vec![operation.remove_label_id.clone()]),
                };

                self.hub
                    .users()
                    .messages_modify(request, USER_ID, &operation.message_id)
                    .add_scope(MODIFY_SCOPE)
                    .doit()
                    .await?;
                Ok::<_, GmailError>(())
            })
            .await
        })
        .await
    }
}

/// Convert a Gmail API message into headers and labels
fn parse_message_details(msg: google_gmail1::api::Message) -> Result<MessageDetails> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|header| match (header.name, header.value) {
            (Some(name), Some(value)) => Some(MessageHeader { name, value }),
            _ => None,
        })
        .collect();

    Ok(MessageDetails {
        id,
        label_ids: msg.label_ids.unwrap_or_default(),
        headers,
    })
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", self.max_retries, || async {
            let (_, response) = self
                .limited("list_labels", async {
                    debug!("Calling Gmail API to list labels...");
                    Ok::<_, GmailError>(self
                        .hub
                        .users()
                        .labels_list(USER_ID)
                        .add_scope(MODIFY_SCOPE)
                        .doit()
                        .await?)
                })
                .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        Self::with_retry("create_label", self.max_retries, || async {
            let label = Label {
                name: Some(name.to_string()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };

            let (_, created_label) = self
                .limited("create_label", async {
                    Ok::<_, GmailError>(self
                        .hub
                        .users()
                        .labels_create(label, USER_ID)
                        .add_scope(MODIFY_SCOPE)
                        .doit()
                        .await?)
                })
                .await?;

            created_label
                .id
                .ok_or_else(|| GmailError::LabelError("Created label has no ID".to_string()))
        })
        .await
    }

    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<String>,
        page_size: u32,
    ) -> Result<MessagePage> {
        Self::with_retry("list_messages", self.max_retries, || async {
            let (_, response) = self
                .limited("list_messages", async {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list(USER_ID)
                        .q(query)
                        .max_results(page_size);

                    if let Some(token) = page_token.as_deref() {
                        call = call.page_token(token);
                    }

                    Ok::<_, GmailError>(call.add_scope(MODIFY_SCOPE).doit().await?)
                })
                .await?;

            let message_ids = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|msg_ref| msg_ref.id)
                .collect();

            Ok(MessagePage {
                message_ids,
                next_page_token: response.next_page_token,
            })
        })
        .await
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetails> {
        Self::with_retry("get_message", self.max_retries, || async {
            let (_, msg) = self
                .limited("get_message", async {
                    Ok::<_, GmailError>(self
                        .hub
                        .users()
                        .messages_get(USER_ID, id)
                        .format("metadata")
                        .add_metadata_headers("From")
                        .add_scope(MODIFY_SCOPE)
                        .doit()
                        .await?)
                })
                .await?;

            parse_message_details(msg)
        })
        .await
    }

    async fn modify_messages(&self, operations: Vec<BatchOperation>) -> Vec<OperationOutcome> {
        stream::iter(operations)
            .map(|operation| async move {
                match self.modify_one(&operation).await {
                    Ok(()) => OperationOutcome::success(operation.message_id),
                    Err(e) => OperationOutcome::failure(operation.message_id, e.to_string()),
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }
}
