//! Sender and subject policy applied to every fetched message

use crate::config::GlobalFilterConfig;
use crate::models::Message;

/// Why a message was accepted or turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accepted,
    SenderNotAllowed,
    SubjectNotMatched,
}

/// Sender allow-list plus subject keywords.
///
/// Empty lists are unrestricted. Senders compare exactly (case-sensitive);
/// subject keywords compare as case-insensitive substrings.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    senders: Vec<String>,
    subject_keywords: Vec<String>,
}

impl MessageFilter {
    pub fn new(config: &GlobalFilterConfig) -> Self {
        Self {
            senders: config.sender.clone(),
            subject_keywords: config
                .subject_contains
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    pub fn sender_allowed(&self, sender: &str) -> bool {
        self.senders.is_empty() || self.senders.iter().any(|allowed| allowed == sender)
    }

    pub fn subject_allowed(&self, subject: &str) -> bool {
        if self.subject_keywords.is_empty() {
            return true;
        }
        let subject = subject.to_lowercase();
        self.subject_keywords
            .iter()
            .any(|keyword| subject.contains(keyword))
    }

    pub fn evaluate(&self, message: &Message) -> FilterVerdict {
        if !self.sender_allowed(&message.sender) {
            FilterVerdict::SenderNotAllowed
        } else if !self.subject_allowed(&message.subject) {
            FilterVerdict::SubjectNotMatched
        } else {
            FilterVerdict::Accepted
        }
    }
}
