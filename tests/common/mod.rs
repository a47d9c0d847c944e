//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use mockall::mock;
use report_ingest::config::{Config, RuleConfig, TransportKind};
use report_ingest::error::Result;
use report_ingest::models::{Attachment, Message};
use report_ingest::transport::{FetchRequest, MailTransport, MessageStream};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const REPORT_SENDER: &str = "reports@company.com";

/// Local wall-clock time on 2025-07-27
pub fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 7, 27)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 27).unwrap()
}

/// Create a test message with one attachment per `(filename, content)` pair
pub fn create_test_message(
    sender: &str,
    subject: &str,
    received: NaiveDateTime,
    attachments: &[(&str, &[u8])],
) -> Message {
    let mut message = Message {
        id: format!("<{}@company.com>", received.format("%H%M%S")),
        sender: sender.to_string(),
        subject: subject.to_string(),
        received,
        attachments: Vec::new(),
    };
    let origin = message.origin();
    message.attachments = attachments
        .iter()
        .map(|(name, content)| Attachment::new(*name, content.to_vec(), origin.clone()))
        .collect();
    message
}

/// Create a daily report message carrying `IB_Calls.csv`
pub fn create_report_message(received: NaiveDateTime, content: &[u8]) -> Message {
    create_test_message(
        REPORT_SENDER,
        "Daily report",
        received,
        &[("IB_Calls.csv", content)],
    )
}

pub fn stream_of(items: Vec<Result<Message>>) -> MessageStream {
    Box::pin(futures::stream::iter(items))
}

/// RFC 822 text of a multipart message with CSV attachments
pub fn eml(
    sender: &str,
    subject: &str,
    received: NaiveDateTime,
    attachments: &[(&str, &str)],
) -> String {
    let date = Local
        .from_local_datetime(&received)
        .unwrap()
        .to_rfc2822();

    let mut text = format!(
        "From: Reports <{sender}>\r\n\
         To: ops@company.com\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{id}@company.com>\r\n\
         Date: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"BOUNDARY\"\r\n\
         \r\n\
         --BOUNDARY\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Report attached.\r\n",
        id = received.format("%Y%m%d%H%M%S"),
    );
    for (name, content) in attachments {
        text.push_str(&format!(
            "--BOUNDARY\r\n\
             Content-Type: text/csv; name=\"{name}\"\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\
             \r\n\
             {content}\r\n"
        ));
    }
    text.push_str("--BOUNDARY--\r\n");
    text
}

/// Drop an `.eml` file into a store directory
pub fn write_eml(store_dir: &Path, name: &str, text: &str) -> PathBuf {
    std::fs::create_dir_all(store_dir).unwrap();
    let path = store_dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// Write a file and set its modification time to `modified` (local time)
pub fn write_with_mtime(path: &Path, content: &[u8], modified: NaiveDateTime) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    let local = Local.from_local_datetime(&modified).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(local)).unwrap();
}

/// Configuration with every directory under `root`: `mail/`, `drop/`, `staging/`
pub fn create_test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.global_filter.sender = vec![REPORT_SENDER.to_string()];
    config.global_filter.subject_contains = vec!["daily report".to_string()];
    config.attachment_rules.insert(
        "IB_Calls.csv".to_string(),
        RuleConfig {
            columns: vec!["Date".to_string(), "Agent".to_string(), "Calls".to_string()],
        },
    );
    config.email.transport = TransportKind::Native;
    config.email.native.root = root.join("mail");
    config.directory_scan.enabled = true;
    config.directory_scan.scan_path = root.join("drop");
    config.staging.path = root.join("staging");
    config
}

/// Sorted file names in a directory, empty when it does not exist
pub fn staged_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

mock! {
    pub Transport {}

    #[async_trait::async_trait]
    impl MailTransport for Transport {
        fn name(&self) -> &'static str;
        async fn fetch(&self, request: &FetchRequest) -> Result<MessageStream>;
    }
}
