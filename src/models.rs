use chrono::NaiveDateTime;
use serde::Serialize;

/// A mailbox message normalized by a transport.
///
/// Lives only for the duration of one fetch; nothing here is persisted.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub subject: String,
    /// Local wall-clock receive time
    pub received: NaiveDateTime,
    pub attachments: Vec<Attachment>,
}

/// Where an attachment came from, kept for log lines only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentOrigin {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    content: Vec<u8>,
    pub origin: AttachmentOrigin,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>, origin: AttachmentOrigin) -> Self {
        Self {
            filename: filename.into(),
            content,
            origin,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl Message {
    pub fn origin(&self) -> AttachmentOrigin {
        AttachmentOrigin {
            message_id: self.id.clone(),
            sender: self.sender.clone(),
            subject: self.subject.clone(),
        }
    }
}

/// Counters for one ingestion channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Messages (mail) or candidate files (directory) looked at
    pub items_seen: usize,
    /// Dropped by the time window or sender/subject policy
    pub items_filtered: usize,
    /// New files written to the staging directory
    pub staged: usize,
    /// Already present in staging with identical name or content
    pub duplicates: usize,
    /// Attachments or files that matched no rule
    pub unmatched: usize,
    /// Per-item failures that were logged and skipped
    pub errors: usize,
}

impl ChannelStats {
    pub fn merge(&mut self, other: &ChannelStats) {
        self.items_seen += other.items_seen;
        self.items_filtered += other.items_filtered;
        self.staged += other.staged;
        self.duplicates += other.duplicates;
        self.unmatched += other.unmatched;
        self.errors += other.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_attachment_origin_from_message() {
        let message = Message {
            id: "<abc@company.com>".to_string(),
            sender: "reports@company.com".to_string(),
            subject: "Daily report".to_string(),
            received: NaiveDate::from_ymd_opt(2025, 7, 27)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
            attachments: Vec::new(),
        };

        let attachment = Attachment::new("IB_Calls.csv", b"a,b\n1,2\n".to_vec(), message.origin());
        assert_eq!(attachment.origin.sender, "reports@company.com");
        assert_eq!(attachment.content(), b"a,b\n1,2\n");
        assert_eq!(attachment.size(), 8);
    }

    #[test]
    fn test_channel_stats_merge() {
        let mut total = ChannelStats {
            items_seen: 2,
            staged: 1,
            ..Default::default()
        };
        total.merge(&ChannelStats {
            items_seen: 3,
            duplicates: 1,
            errors: 1,
            ..Default::default()
        });

        assert_eq!(total.items_seen, 5);
        assert_eq!(total.staged, 1);
        assert_eq!(total.duplicates, 1);
        assert_eq!(total.errors, 1);
    }
}
