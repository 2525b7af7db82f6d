//! Lazy page-by-page message listing and ordered detail fetching

use crate::client::GmailClient;
use crate::error::Result;
use crate::models::{MessageDetails, MessagePage};
use async_stream::stream;
use chrono::{Duration, NaiveDate, Utc};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Boxed stream of listing pages
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = Result<MessagePage>> + Send + 'a>>;

/// Query matching messages received in the last `period_days` days
pub fn default_query(period_days: u32) -> String {
    query_since(Utc::now().date_naive(), period_days)
}

fn query_since(today: NaiveDate, period_days: u32) -> String {
    let date = today - Duration::days(i64::from(period_days));
    format!("after:{}", date.format("%Y/%m/%d"))
}

/// Stream the pages of a message listing.
///
/// Pages are requested lazily, one per poll. The stream ends after a page
/// without a continuation token, or right after yielding a listing error.
pub fn page_stream<'a>(
    client: &'a dyn GmailClient,
    query: &'a str,
    page_size: u32,
) -> PageStream<'a> {
    Box::pin(stream! {
        let mut page_token: Option<String> = None;
        let mut page_number = 0usize;

        loop {
            page_number += 1;
            debug!("Fetching page {} (token: {:?})", page_number, page_token);

            match client.list_messages(query, page_token.clone(), page_size).await {
                Ok(page) => {
                    info!("Page {} returned {} messages", page_number, page.message_ids.len());
                    let next = page.next_page_token.clone();
                    yield Ok(page);

                    match next {
                        Some(token) => page_token = Some(token),
                        None => break,
                    }
                }
                Err(e) => {
                    warn!("Error listing messages on page {}: {}", page_number, e);
                    yield Err(e);
                    break;
                }
            }
        }
    })
}

/// Fetch details for `message_ids` with at most `concurrency` requests in
/// flight. Results come back in input order, one per id.
pub async fn fetch_details(
    client: &dyn GmailClient,
    message_ids: &[String],
    concurrency: usize,
) -> Vec<(String, Result<MessageDetails>)> {
    stream::iter(message_ids.iter().cloned())
        .map(|id| async move {
            let result = client.get_message(&id).await;
            (id, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
