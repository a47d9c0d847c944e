//! Mail transports
//!
//! Every way of reading a mailbox sits behind [`MailTransport`]. The rest of
//! the engine only ever sees [`Message`] values; store handles, IMAP sessions
//! and MIME trees stay inside this module.
//!
//! - [`native`] - the local mail namespace, with per-account stores
//! - [`imap`] - a remote IMAP server
//! - [`mime`] - MIME parsing shared by both

pub mod imap;
pub mod mime;
pub mod native;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::Message;
use crate::window::WindowBounds;

pub use self::imap::ImapTransport;
pub use self::native::{
    AccountResolver, LocalNamespace, LocalStore, MailAccount, MailNamespace, MailStore,
    NativeTransport, StoredMessage,
};

/// Messages produced lazily by a transport.
///
/// Finite and single-pass. A failing message shows up as an `Err` item and the
/// stream keeps going.
pub type MessageStream = BoxStream<'static, Result<Message>>;

/// What to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub bounds: WindowBounds,
    /// Mailbox address to read; the default inbox when `None`
    pub account: Option<String>,
}

/// A way of retrieving mailbox messages.
///
/// Implementations must only yield messages whose receive time lies inside
/// `request.bounds`. An `Err` from `fetch` itself means the mailbox could not
/// be reached at all (connection, authentication, missing store).
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn fetch(&self, request: &FetchRequest) -> Result<MessageStream>;
}
