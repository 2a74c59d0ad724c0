//! Per-invocation reply channel
//!
//! Every invocation owns one [`InvocationState`] shared by the deadline timer
//! and all clones of its [`ReplyChannel`]. Transitions are compare-and-set on
//! a single atomic, so whichever of the timer or a handler gets there first
//! decides how the original HTTP response is completed.
//!
//! ```text
//!  Pending ──handler reply──▶ AnsweredDirect
//!     │
//!     └──deadline / deferred──▶ Acknowledged ──handler reply──▶ AnsweredDeferred
//! ```

use crate::{FallbackDelivery, SlashMessage};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvocationPhase {
    /// HTTP response open, deadline timer running
    Pending = 0,
    /// HTTP response completed with an empty body; no reply sent yet
    Acknowledged = 1,
    /// A handler's reply was written to the HTTP response
    AnsweredDirect = 2,
    /// A handler's reply was posted to the response_url
    AnsweredDeferred = 3,
}

impl InvocationPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Acknowledged,
            2 => Self::AnsweredDirect,
            _ => Self::AnsweredDeferred,
        }
    }

    /// Whether a reply has been sent
    pub fn is_answered(&self) -> bool {
        matches!(self, Self::AnsweredDirect | Self::AnsweredDeferred)
    }
}

/// Shared phase of one invocation
#[derive(Debug)]
pub struct InvocationState {
    phase: AtomicU8,
}

impl InvocationState {
    /// Create a state starting at `initial`
    pub fn new(initial: InvocationPhase) -> Self {
        Self {
            phase: AtomicU8::new(initial as u8),
        }
    }

    /// Current phase
    pub fn phase(&self) -> InvocationPhase {
        InvocationPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Only the first caller for a given `from` wins.
    pub fn transition(&self, from: InvocationPhase, to: InvocationPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn force(&self, to: InvocationPhase) {
        self.phase.store(to as u8, Ordering::Release);
    }
}

/// Body written to the original HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpReply {
    /// `Content-Type`, absent for the empty acknowledgement
    pub content_type: Option<&'static str>,
    /// Response body
    pub body: Bytes,
}

impl HttpReply {
    /// Empty 200 acknowledgement
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reply carrying a handler's message
    pub fn from_message(message: &SlashMessage) -> Self {
        let (content_type, body) = message.http_body();
        Self {
            content_type: Some(content_type),
            body: Bytes::from(body),
        }
    }

    /// Whether this is the empty acknowledgement
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Which path a call to [`ReplyChannel::send`] took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPath {
    /// Written to the still-open HTTP response
    Direct,
    /// Handed to the response_url client
    ResponseUrl,
    /// Dropped: already answered, or no response_url to fall back to
    Ignored,
}

struct ReplyShared {
    invocation_id: Uuid,
    state: InvocationState,
    responder: Mutex<Option<oneshot::Sender<HttpReply>>>,
    timer: Mutex<Option<AbortHandle>>,
    response_url: Option<String>,
    fallback: Arc<dyn FallbackDelivery>,
}

/// The single opportunity to answer one invocation.
///
/// Clones share state: only the first [`send`](Self::send) across all clones
/// has any effect.
#[derive(Clone)]
pub struct ReplyChannel {
    shared: Arc<ReplyShared>,
}

impl std::fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("invocation_id", &self.shared.invocation_id)
            .field("phase", &self.phase())
            .field("response_url", &self.shared.response_url)
            .finish()
    }
}

impl ReplyChannel {
    /// Create a channel bound to an open HTTP response.
    ///
    /// `initial` is [`InvocationPhase::Pending`] in immediate mode and
    /// [`InvocationPhase::Acknowledged`] once the HTTP response is already closed.
    pub fn new(
        invocation_id: Uuid,
        initial: InvocationPhase,
        responder: oneshot::Sender<HttpReply>,
        response_url: Option<String>,
        fallback: Arc<dyn FallbackDelivery>,
    ) -> Self {
        Self {
            shared: Arc::new(ReplyShared {
                invocation_id,
                state: InvocationState::new(initial),
                responder: Mutex::new(Some(responder)),
                timer: Mutex::new(None),
                response_url,
                fallback,
            }),
        }
    }

    /// Reply to the invocation.
    ///
    /// Writes to the HTTP response while it is still open in immediate mode,
    /// otherwise posts to the response_url. Calls after the first are ignored.
    pub fn send(&self, message: impl Into<SlashMessage>) -> ReplyPath {
        let message = message.into();
        let id = self.shared.invocation_id;

        if self
            .shared
            .state
            .transition(InvocationPhase::Pending, InvocationPhase::AnsweredDirect)
        {
            self.cancel_timer();
            if self.complete(HttpReply::from_message(&message)) {
                debug!(invocation_id = %id, "Replied on original HTTP response");
                return ReplyPath::Direct;
            }
            // The caller hung up before we answered
            warn!(invocation_id = %id, "HTTP response gone, falling back to response_url");
            self.shared.state.force(InvocationPhase::AnsweredDeferred);
            return self.deliver_fallback(message);
        }

        if self
            .shared
            .state
            .transition(InvocationPhase::Acknowledged, InvocationPhase::AnsweredDeferred)
        {
            return self.deliver_fallback(message);
        }

        debug!(invocation_id = %id, phase = ?self.phase(), "Invocation already answered, ignoring reply");
        ReplyPath::Ignored
    }

    /// Current phase
    pub fn phase(&self) -> InvocationPhase {
        self.shared.state.phase()
    }

    /// Fallback URL for this invocation
    pub fn response_url(&self) -> Option<&str> {
        self.shared.response_url.as_deref()
    }

    /// Id of the invocation this channel answers
    pub fn invocation_id(&self) -> Uuid {
        self.shared.invocation_id
    }

    /// Close the HTTP response with an empty body if nobody has answered yet.
    ///
    /// Returns `true` if this call closed it.
    pub(crate) fn acknowledge(&self) -> bool {
        if self
            .shared
            .state
            .transition(InvocationPhase::Pending, InvocationPhase::Acknowledged)
        {
            self.complete(HttpReply::empty());
            true
        } else {
            false
        }
    }

    /// Attach the deadline timer so a direct reply can cancel it
    pub(crate) fn arm_timer(&self, handle: AbortHandle) {
        *self.shared.timer.lock() = Some(handle);
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.shared.timer.lock().take() {
            handle.abort();
        }
    }

    /// Write to the HTTP response. Returns `false` if it was already written or the
    /// receiving side is gone; never panics on a second call.
    pub(crate) fn complete(&self, reply: HttpReply) -> bool {
        match self.shared.responder.lock().take() {
            Some(responder) => responder.send(reply).is_ok(),
            None => false,
        }
    }

    fn deliver_fallback(&self, message: SlashMessage) -> ReplyPath {
        let id = self.shared.invocation_id;
        match self.shared.response_url.as_deref() {
            Some(url) if !url.is_empty() => {
                info!(invocation_id = %id, "Replying via response_url");
                self.shared.fallback.deliver(url, message);
                ReplyPath::ResponseUrl
            }
            _ => {
                warn!(invocation_id = %id, "No response_url to deliver late reply");
                ReplyPath::Ignored
            }
        }
    }
}
