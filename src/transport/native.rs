//! Native mail access
//!
//! A [`MailNamespace`] is the machine's mail profile: a default inbox plus
//! any number of accounts, each with its own [`MailStore`]. [`LocalNamespace`]
//! implements it over a directory tree of RFC 822 files:
//!
//! ```text
//! <root>/Inbox/*.eml                        default inbox
//! <root>/accounts/<address>/Inbox/*.eml     one store per account
//! ```

use async_stream::stream;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::mime;
use super::{FetchRequest, MailTransport, MessageStream};
use crate::error::{IngestError, Result};
use crate::models::Message;

/// A message as listed by a store, before its body is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Store-specific handle passed back to [`MailStore::load`]
    pub id: String,
    /// `None` when the store could not determine a receive time
    pub received: Option<NaiveDateTime>,
}

/// One message store (an inbox)
#[async_trait]
pub trait MailStore: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`MailStore::list`] returns messages newest first.
    ///
    /// [`NativeTransport`] stops reading at the first message older than the
    /// window when this is true, so a store must only claim it when the order
    /// is guaranteed.
    fn newest_first(&self) -> bool;

    async fn list(&self) -> Result<Vec<StoredMessage>>;

    async fn load(&self, entry: &StoredMessage) -> Result<Message>;
}

/// An account known to the namespace
#[derive(Clone)]
pub struct MailAccount {
    pub address: String,
    pub store: Arc<dyn MailStore>,
}

impl std::fmt::Debug for MailAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailAccount")
            .field("address", &self.address)
            .field("store", &self.store.name())
            .finish()
    }
}

#[async_trait]
pub trait MailNamespace: Send + Sync {
    fn default_inbox(&self) -> Arc<dyn MailStore>;

    async fn accounts(&self) -> Result<Vec<MailAccount>>;
}

/// Picks the store to read for an optional account address
pub struct AccountResolver;

impl AccountResolver {
    /// Resolve `target` to a store.
    ///
    /// Matches addresses case-insensitively and exactly. No target, no match,
    /// or a failed account listing all resolve to the default inbox.
    pub async fn resolve(namespace: &dyn MailNamespace, target: Option<&str>) -> Arc<dyn MailStore> {
        let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
            return namespace.default_inbox();
        };

        match namespace.accounts().await {
            Ok(accounts) => {
                if let Some(account) = accounts
                    .into_iter()
                    .find(|a| a.address.eq_ignore_ascii_case(target))
                {
                    info!("Using mailbox of account {}", account.address);
                    return account.store;
                }
                warn!(
                    "Account '{}' not found, falling back to the default inbox",
                    target
                );
            }
            Err(e) => {
                warn!(
                    "Could not enumerate accounts ({}), falling back to the default inbox",
                    e
                );
            }
        }

        namespace.default_inbox()
    }
}

/// Transport over a [`MailNamespace`]
pub struct NativeTransport<N> {
    namespace: N,
}

impl<N: MailNamespace> NativeTransport<N> {
    pub fn new(namespace: N) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &N {
        &self.namespace
    }
}

#[async_trait]
impl<N: MailNamespace> MailTransport for NativeTransport<N> {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<MessageStream> {
        let store = AccountResolver::resolve(&self.namespace, request.account.as_deref()).await;
        let entries = store.list().await?;
        let newest_first = store.newest_first();
        let bounds = request.bounds;

        info!(
            "Reading {} message(s) from {} for {}",
            entries.len(),
            store.name(),
            bounds
        );

        // Undated entries are reported before the early exit can skip them
        let (undated, dated): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.received.is_none());

        Ok(Box::pin(stream! {
            for entry in undated {
                yield Err(IngestError::InvalidMessageFormat(format!(
                    "{}: no receive time",
                    entry.id
                )));
            }

            for entry in dated {
                let Some(received) = entry.received else {
                    continue;
                };

                if received > bounds.end {
                    continue;
                }
                if received < bounds.start {
                    if newest_first {
                        debug!("Reached messages older than {}, stopping", bounds.start);
                        break;
                    }
                    continue;
                }

                yield store.load(&entry).await;
            }
        }))
    }
}

/// Directory-backed mail namespace
#[derive(Debug, Clone)]
pub struct LocalNamespace {
    root: PathBuf,
}

impl LocalNamespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MailNamespace for LocalNamespace {
    fn default_inbox(&self) -> Arc<dyn MailStore> {
        Arc::new(LocalStore::new("Inbox", self.root.join("Inbox")))
    }

    async fn accounts(&self) -> Result<Vec<MailAccount>> {
        let accounts_dir = self.root.join("accounts");
        let mut dir = match tokio::fs::read_dir(&accounts_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut accounts = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let address = entry.file_name().to_string_lossy().into_owned();
            let store: Arc<dyn MailStore> = Arc::new(LocalStore::new(
                format!("{}/Inbox", address),
                entry.path().join("Inbox"),
            ));
            accounts.push(MailAccount { address, store });
        }
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(accounts)
    }
}

/// A directory of `.eml` files
#[derive(Debug, Clone)]
pub struct LocalStore {
    name: String,
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_message_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("eml"))
}

#[async_trait]
impl MailStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn newest_first(&self) -> bool {
        true
    }

    async fn list(&self) -> Result<Vec<StoredMessage>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            IngestError::TransportUnavailable(format!(
                "cannot open store {} at {}: {}",
                self.name,
                self.dir.display(),
                e
            ))
        })?;

        let mut messages = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !is_message_file(&path) {
                continue;
            }
            let id = path.to_string_lossy().into_owned();
            let received = match tokio::fs::read(&path).await {
                Ok(raw) => match mime::summarize_headers(&raw) {
                    Ok(summary) => summary.date,
                    Err(e) => {
                        warn!("{}: {}", id, e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Cannot read {}: {}", id, e);
                    None
                }
            };
            messages.push(StoredMessage { id, received });
        }

        // Newest first; entries without a time sort last
        messages.sort_by(|a, b| b.received.cmp(&a.received));
        Ok(messages)
    }

    async fn load(&self, entry: &StoredMessage) -> Result<Message> {
        let raw = tokio::fs::read(&entry.id).await.map_err(|e| {
            IngestError::InvalidMessageFormat(format!("{}: unreadable: {}", entry.id, e))
        })?;
        mime::parse_message(&raw, &entry.id, entry.received)
    }
}
