//! IMAP transport
//!
//! The `imap` client is blocking, so the whole session (connect, search,
//! fetch, logout) runs on the blocking pool. Fetched messages cross over a
//! bounded channel, so at most about one chunk of bodies is buffered ahead of
//! the consumer. The server-side search only narrows by day; the
//! exact window is applied per message against INTERNALDATE.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::mime;
use super::{FetchRequest, MailTransport, MessageStream};
use crate::config::ImapConfig;
use crate::error::{IngestError, Result};
use crate::window::WindowBounds;

type ImapSession = ::imap::Session<::imap::Connection>;

/// One message as returned by `UID FETCH`
#[derive(Debug)]
struct RawMessage {
    uid: u32,
    body: Vec<u8>,
    internal_date: Option<NaiveDateTime>,
}

pub struct ImapTransport {
    config: ImapConfig,
}

impl ImapTransport {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }
}

fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Day-granular `UID SEARCH` criteria covering `bounds`
pub fn search_query(bounds: &WindowBounds) -> String {
    let (first, last) = bounds.days();
    let after_last = last.succ_opt().unwrap_or(last);
    format!("SINCE {} BEFORE {}", imap_date(first), imap_date(after_last))
}

fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let client = ::imap::ClientBuilder::new(config.host.as_str(), config.port)
        .tls_kind(::imap::TlsKind::Native)
        .mode(::imap::ConnectionMode::AutoTls)
        .connect()
        .map_err(|e| {
            IngestError::TransportUnavailable(format!(
                "cannot connect to {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

    client
        .login(&config.username, &config.password)
        .map_err(|e| IngestError::AuthError(format!("login as {} failed: {}", config.username, e.0)))
}

fn fetch_chunk(session: &mut ImapSession, chunk: &[u32]) -> Result<Vec<Result<RawMessage>>> {
    let uid_set = chunk
        .iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let fetches = session
        .uid_fetch(uid_set, "(UID INTERNALDATE RFC822)")
        .map_err(|e| IngestError::Imap(format!("UID FETCH failed: {}", e)))?;

    Ok(fetches
        .iter()
        .map(|fetch| {
            raw_message(
                fetch.message,
                fetch.uid,
                fetch.body(),
                fetch
                    .internal_date()
                    .map(|d| d.with_timezone(&Local).naive_local()),
            )
        })
        .collect())
}

/// A FETCH item without a UID or body is reported rather than dropped
fn raw_message(
    seq: u32,
    uid: Option<u32>,
    body: Option<&[u8]>,
    internal_date: Option<NaiveDateTime>,
) -> Result<RawMessage> {
    let uid = uid.ok_or_else(|| IngestError::Imap(format!("FETCH item {} carries no UID", seq)))?;
    let body = body.ok_or_else(|| {
        IngestError::Imap(format!("FETCH item uid:{} carries no RFC822 body", uid))
    })?;
    Ok(RawMessage {
        uid,
        body: body.to_vec(),
        internal_date,
    })
}

/// Connect, select and search. Failures here mean the transport is unusable.
fn open_window(config: &ImapConfig, bounds: &WindowBounds) -> Result<(ImapSession, Vec<u32>)> {
    let mut session = connect(config)?;

    let mailbox = session
        .select(&config.mailbox)
        .map_err(|e| IngestError::Imap(format!("cannot select {}: {}", config.mailbox, e)))?;
    debug!("Selected {} ({} messages)", config.mailbox, mailbox.exists);

    let query = search_query(bounds);
    let uids = session
        .uid_search(&query)
        .map_err(|e| IngestError::Imap(format!("UID SEARCH {} failed: {}", query, e)))?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();
    info!(
        "IMAP search '{}' in {} matched {} message(s)",
        query,
        config.mailbox,
        uids.len()
    );
    Ok((session, uids))
}

/// Run a whole session on the blocking pool.
///
/// The setup outcome goes to `ready`; messages are then sent one chunk at a
/// time as the consumer drains `tx`. A failed chunk becomes a single `Err`
/// entry so the other chunks still arrive. A dropped receiver ends the
/// session early.
fn run_session(
    config: &ImapConfig,
    bounds: &WindowBounds,
    ready: oneshot::Sender<Result<()>>,
    tx: mpsc::Sender<Result<RawMessage>>,
) {
    let (mut session, uids) = match open_window(config, bounds) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    'chunks: for chunk in uids.chunks(config.fetch_chunk_size.max(1)) {
        let items = match fetch_chunk(&mut session, chunk) {
            Ok(items) => items,
            Err(e) => vec![Err(e)],
        };
        for item in items {
            if tx.blocking_send(item).is_err() {
                debug!("IMAP consumer went away, stopping fetch");
                break 'chunks;
            }
        }
    }

    if let Err(e) = session.logout() {
        debug!("IMAP logout failed: {}", e);
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    fn name(&self) -> &'static str {
        "imap"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<MessageStream> {
        if let Some(account) = &request.account {
            if !account.eq_ignore_ascii_case(&self.config.username) {
                warn!(
                    "Account '{}' differs from IMAP login '{}'; reading mailbox {} of the login",
                    account, self.config.username, self.config.mailbox
                );
            }
        }

        let config = self.config.clone();
        let bounds = request.bounds;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, mut rx) = mpsc::channel(config.fetch_chunk_size.max(1));
        let session = tokio::task::spawn_blocking(move || run_session(&config, &bounds, ready_tx, tx));

        match ready_rx.await {
            Ok(outcome) => outcome?,
            Err(_) => {
                let reason = match session.await {
                    Err(e) => e.to_string(),
                    Ok(()) => "session ended before setup".to_string(),
                };
                return Err(IngestError::TransportUnavailable(format!(
                    "IMAP task failed: {}",
                    reason
                )));
            }
        }

        Ok(Box::pin(stream! {
            while let Some(raw) = rx.recv().await {
                let raw = match raw {
                    Ok(raw) => raw,
                    Err(e) => {
                        yield Err(e);
                        continue;
                    }
                };
                let fallback_id = format!("uid:{}", raw.uid);
                let message = match mime::parse_message(&raw.body, &fallback_id, raw.internal_date) {
                    Ok(message) => message,
                    Err(e) => {
                        yield Err(e);
                        continue;
                    }
                };
                if bounds.contains(message.received) {
                    yield Ok(message);
                } else {
                    debug!("{} received {} is outside {}", message.id, message.received, bounds);
                }
            }
        }))
    }
}
