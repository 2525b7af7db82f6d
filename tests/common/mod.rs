//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use gmail_sender_labels::client::GmailClient;
use gmail_sender_labels::error::{GmailError, Result};
use gmail_sender_labels::models::{
    BatchOperation, LabelInfo, MessageDetails, MessageHeader, MessagePage, OperationOutcome,
};
use mockall::mock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Create a message in the inbox from `from`
pub fn create_test_message(id: &str, from: &str) -> MessageDetails {
    create_labeled_message(id, from, &["INBOX", "UNREAD"])
}

pub fn create_labeled_message(id: &str, from: &str, labels: &[&str]) -> MessageDetails {
    MessageDetails {
        id: id.to_string(),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        headers: vec![
            MessageHeader::new("Subject", format!("Subject of {}", id)),
            MessageHeader::new("From", from),
            MessageHeader::new("To", "me@example.com"),
        ],
    }
}

pub fn create_test_page(ids: &[&str], next_page_token: Option<&str>) -> MessagePage {
    MessagePage {
        message_ids: ids.iter().map(|id| id.to_string()).collect(),
        next_page_token: next_page_token.map(String::from),
    }
}

pub fn create_test_label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

// Mock implementation of GmailClient for testing
mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, name: &str) -> Result<String>;
        async fn list_messages(
            &self,
            query: &str,
            page_token: Option<String>,
            page_size: u32,
        ) -> Result<MessagePage>;
        async fn get_message(&self, id: &str) -> Result<MessageDetails>;
        async fn modify_messages(&self, operations: Vec<BatchOperation>) -> Vec<OperationOutcome>;
    }
}

/// In-memory mailbox that behaves like the Gmail API for the calls the
/// labeler makes: names are unique (409 on duplicates), listings paginate by
/// `page_size`, and modify calls change message labels.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<BTreeMap<String, MessageDetails>>,
    order: Mutex<Vec<String>>,
    labels: Mutex<Vec<LabelInfo>>,
    fail_modify_for: Mutex<HashSet<String>>,
    fail_list_on_call: Mutex<Option<usize>>,
    pub list_message_calls: AtomicUsize,
    pub create_label_calls: AtomicUsize,
    pub list_label_calls: AtomicUsize,
    pub modify_calls: AtomicUsize,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<MessageDetails>) -> Self {
        let mailbox = Self::new();
        for message in messages {
            mailbox.add_message(message);
        }
        mailbox
    }

    pub fn add_message(&self, message: MessageDetails) {
        self.order.lock().unwrap().push(message.id.clone());
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.labels.lock().unwrap().push(create_test_label_info(id, name));
    }

    /// Make modify fail for this message id
    pub fn fail_modify_for(&self, message_id: &str) {
        self.fail_modify_for
            .lock()
            .unwrap()
            .insert(message_id.to_string());
    }

    /// Make the n-th `list_messages` call (1-based) fail
    pub fn fail_list_on_call(&self, call: usize) {
        *self.fail_list_on_call.lock().unwrap() = Some(call);
    }

    pub fn message(&self, id: &str) -> Option<MessageDetails> {
        self.messages.lock().unwrap().get(id).cloned()
    }

    pub fn labels(&self) -> Vec<LabelInfo> {
        self.labels.lock().unwrap().clone()
    }

    pub fn labels_named(&self, name: &str) -> usize {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.name == name)
            .count()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GmailClient for FakeMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.list_label_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.labels())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.create_label_calls.fetch_add(1, Ordering::SeqCst);
        let mut labels = self.labels.lock().unwrap();
        if labels.iter().any(|l| l.name == name) {
            return Err(GmailError::Conflict(format!(
                "Label name exists or conflicts: {}",
                name
            )));
        }
        let id = format!("Label_{}", labels.len() + 1);
        labels.push(create_test_label_info(&id, name));
        Ok(id)
    }

    async fn list_messages(
        &self,
        _query: &str,
        page_token: Option<String>,
        page_size: u32,
    ) -> Result<MessagePage> {
        let call = self.list_message_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_list_on_call.lock().unwrap() == Some(call) {
            return Err(GmailError::ServerError {
                status: 503,
                message: "Backend Error".to_string(),
            });
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| GmailError::BadRequest(format!("bad page token {}", token)))?,
            None => 0,
        };

        let order = self.order.lock().unwrap();
        let end = (offset + page_size as usize).min(order.len());
        let message_ids = order[offset.min(end)..end].to_vec();
        let next_page_token = (end < order.len()).then(|| end.to_string());

        Ok(MessagePage {
            message_ids,
            next_page_token,
        })
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetails> {
        self.message(id)
            .ok_or_else(|| GmailError::NotFound(format!("Message {} not found", id)))
    }

    async fn modify_messages(&self, operations: Vec<BatchOperation>) -> Vec<OperationOutcome> {
        self.modify_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.fail_modify_for.lock().unwrap().clone();
        let mut messages = self.messages.lock().unwrap();

        // Reverse to show callers cannot rely on submission order
        operations
            .into_iter()
            .rev()
            .map(|op| {
                if failing.contains(&op.message_id) {
                    return OperationOutcome::failure(op.message_id, "HTTP 500: Backend Error");
                }
                match messages.get_mut(&op.message_id) {
                    Some(message) => {
                        message.label_ids.retain(|l| *l != op.remove_label_id);
                        if !message.label_ids.contains(&op.add_label_id) {
                            message.label_ids.push(op.add_label_id.clone());
                        }
                        OperationOutcome::success(op.message_id)
                    }
                    None => OperationOutcome::failure(op.message_id, "HTTP 404: Not Found"),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_message() {
        let msg = create_test_message("msg1", "Alice <alice@example.com>");
        assert_eq!(msg.id, "msg1");
        assert!(msg.has_label("INBOX"));
        assert!(msg
            .headers
            .iter()
            .any(|h| h.name == "From" && h.value == "Alice <alice@example.com>"));
    }

    #[tokio::test]
    async fn test_fake_mailbox_paginates() {
        let mailbox = FakeMailbox::with_messages(vec![
            create_test_message("m1", "a@example.com"),
            create_test_message("m2", "b@example.com"),
            create_test_message("m3", "c@example.com"),
        ]);

        let first = mailbox.list_messages("", None, 2).await.unwrap();
        assert_eq!(first.message_ids, vec!["m1", "m2"]);
        let second = mailbox
            .list_messages("", first.next_page_token, 2)
            .await
            .unwrap();
        assert_eq!(second.message_ids, vec!["m3"]);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_fake_mailbox_rejects_duplicate_label() {
        let mailbox = FakeMailbox::new();
        mailbox.create_label("Subscriptions").await.unwrap();
        let result = mailbox.create_label("Subscriptions").await;
        assert!(matches!(result, Err(GmailError::Conflict(_))));
    }
}
