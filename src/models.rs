use serde::{Deserialize, Serialize};

/// Who sent a message, as derived from its `From` header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderIdentity {
    /// Lowercase `local@domain` form; empty when the message had no `From` header
    pub address: String,
    /// Raw display name, possibly empty
    pub display_name: String,
}

impl SenderIdentity {
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into().trim().to_lowercase(),
            display_name: display_name.into(),
        }
    }

    /// Identity for a message with no usable sender header
    pub fn unknown() -> Self {
        Self {
            address: String::new(),
            display_name: String::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.address.is_empty()
    }
}

/// A cached sender → label association
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub sender_address: String,
    pub label_id: String,
}

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// A single message header in the order the server returned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Header data and current labels of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetails {
    pub id: String,
    pub label_ids: Vec<String>,
    pub headers: Vec<MessageHeader>,
}

impl MessageDetails {
    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|l| l == label_id)
    }
}

/// One slice of a paginated message listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub message_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

impl MessagePage {
    /// The listing ends after a page without a continuation token
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// Label change for one message inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    pub message_id: String,
    pub add_label_id: String,
    pub remove_label_id: String,
}

/// Result reported for one operation of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub message_id: String,
    pub result: std::result::Result<(), String>,
}

impl OperationOutcome {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            result: Ok(()),
        }
    }

    pub fn failure(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            result: Err(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
