//! Request lifecycle: verify, parse, arm the deadline, emit, and wait for the HTTP reply

use crate::command;
use crate::signature::{RequestSigner, headers};
use crate::{
    FallbackDelivery, HttpReply, Invocation, InvocationPhase, ReplyChannel, ResponseMode,
    SlashConfig, SlashEvent, SubscriptionRegistry,
};
use bytes::Bytes;
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Raw inbound request as seen by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Undecoded body, exactly as signed
    pub body: Bytes,
    /// `x-slack-signature`
    pub signature: Option<String>,
    /// `x-slack-request-timestamp`
    pub timestamp: Option<String>,
}

impl InboundRequest {
    /// Unsigned request
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            signature: None,
            timestamp: None,
        }
    }

    /// Attach signature headers
    pub fn signed(mut self, signature: impl Into<String>, timestamp: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Pull the signature headers out of an HTTP header map
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            body,
            signature: header(headers::SIGNATURE),
            timestamp: header(headers::TIMESTAMP),
        }
    }
}

/// Turns inbound requests into invocations and reconciles the HTTP deadline
/// with subscriber replies.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<SlashConfig>,
    registry: SubscriptionRegistry,
    fallback: Arc<dyn FallbackDelivery>,
    signer: Option<RequestSigner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("response_mode", &self.config.response_mode)
            .field("verifying", &self.signer.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// Without a signing secret every request is trusted.
    pub fn new(
        config: Arc<SlashConfig>,
        registry: SubscriptionRegistry,
        fallback: Arc<dyn FallbackDelivery>,
    ) -> Self {
        let signer = config.active_secret().map(|secret| {
            let signer = RequestSigner::new(secret);
            match config.timestamp_tolerance {
                Some(tolerance) => signer.with_tolerance(tolerance),
                None => signer,
            }
        });

        if signer.is_none() {
            warn!("No signing secret configured, request signatures will not be verified");
        }

        Self {
            config,
            registry,
            fallback,
            signer,
        }
    }

    /// The registry events are emitted to
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Handle one request and resolve to the body for the original HTTP response.
    ///
    /// Subscribers are notified before this starts waiting. Unverifiable or
    /// unparsable requests resolve to an empty reply without notifying anyone.
    pub async fn dispatch(&self, request: InboundRequest) -> HttpReply {
        let Some(invocation) = self.accept(&request) else {
            return HttpReply::empty();
        };

        let pending = self.start(invocation);
        // The timer or the deferred path always completes the sender
        pending.await.unwrap_or_default()
    }

    /// Verify and parse. `None` means silently discard.
    fn accept(&self, request: &InboundRequest) -> Option<Invocation> {
        if let Some(signer) = &self.signer {
            let verified = signer.verify(
                &request.body,
                request.signature.as_deref(),
                request.timestamp.as_deref(),
            );
            if !verified {
                warn!("Could not verify request");
                return None;
            }
        }

        match command::parse(&request.body) {
            Ok(parsed) => Some(Invocation::new(parsed)),
            Err(e) => {
                warn!(error = %e, "Discarding malformed slash command");
                None
            }
        }
    }

    /// Bind a reply channel, arm the deadline, and notify subscribers
    fn start(&self, invocation: Invocation) -> oneshot::Receiver<HttpReply> {
        let invocation = Arc::new(invocation);
        let (responder, pending) = oneshot::channel();
        let response_url = invocation.response_url().map(str::to_string);

        info!(
            invocation_id = %invocation.id,
            command = %invocation.command,
            args = invocation.args.len(),
            "Received slash command"
        );

        let channel = match self.config.response_mode {
            ResponseMode::Immediate { deadline } => {
                let channel = ReplyChannel::new(
                    invocation.id,
                    InvocationPhase::Pending,
                    responder,
                    response_url,
                    self.fallback.clone(),
                );
                arm_deadline(&channel, deadline);
                channel
            }
            ResponseMode::Deferred => {
                let channel = ReplyChannel::new(
                    invocation.id,
                    InvocationPhase::Acknowledged,
                    responder,
                    response_url,
                    self.fallback.clone(),
                );
                channel.complete(HttpReply::empty());
                channel
            }
        };

        let event = SlashEvent::new(invocation.clone(), channel);
        let invoked = self.registry.emit(&event);
        if invoked == 0 {
            debug!(
                invocation_id = %invocation.id,
                command = %invocation.command,
                "No subscribers for command"
            );
        }

        pending
    }
}

/// Acknowledge with an empty body once `deadline` passes unless a direct reply cancels it
fn arm_deadline(channel: &ReplyChannel, deadline: Duration) {
    let timer_channel = channel.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if timer_channel.acknowledge() {
            info!(
                invocation_id = %timer_channel.invocation_id(),
                deadline_ms = deadline.as_millis() as u64,
                "Deadline elapsed, acknowledged with empty response"
            );
        }
    });
    channel.arm_timer(timer.abort_handle());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::tests::RecordingDelivery;
    use crate::{ReplyPath, SlashMessage};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    const BODY: &[u8] = b"command=%2Fdeploy&text=%22staging+env%22+now\
&response_url=https%3A%2F%2Fhooks.example.com%2Fcommands%2F42&team_id=T1";

    fn dispatcher(config: SlashConfig) -> (Dispatcher, Arc<RecordingDelivery>) {
        let delivery = Arc::new(RecordingDelivery::default());
        let dispatcher = Dispatcher::new(
            Arc::new(config),
            SubscriptionRegistry::new(),
            delivery.clone(),
        );
        (dispatcher, delivery)
    }

    fn immediate() -> SlashConfig {
        SlashConfig::builder().immediate_ms(2000).build().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reply_before_deadline() {
        let (dispatcher, delivery) = dispatcher(immediate());
        dispatcher.registry().on("deploy", |event| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert_eq!(event.reply("deployed"), ReplyPath::Direct);
            });
        });

        let started = Instant::now();
        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;

        assert_eq!(reply.body, Bytes::from_static(b"deployed"));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(delivery.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_silence_acknowledges_at_deadline() {
        let (dispatcher, delivery) = dispatcher(immediate());
        let held = Arc::new(Mutex::new(None));

        let h = held.clone();
        dispatcher.registry().on("deploy", move |event| {
            *h.lock() = Some(event);
        });

        let started = Instant::now();
        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;

        assert!(reply.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert!(started.elapsed() < Duration::from_millis(2100));

        let event = held.lock().take().unwrap();
        assert_eq!(event.reply("too late"), ReplyPath::ResponseUrl);

        let sent = delivery.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://hooks.example.com/commands/42");
        assert_eq!(sent[0].1, SlashMessage::from("too late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_synchronous_reply_cancels_deadline() {
        let (dispatcher, delivery) = dispatcher(immediate());
        dispatcher.registry().on_any(|event| {
            event.reply(serde_json::json!({"text": "ok"}));
        });

        let started = Instant::now();
        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;

        assert_eq!(reply.content_type, Some("application/json"));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(delivery.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_acknowledges_immediately() {
        let config = SlashConfig::builder().deferred().build().unwrap();
        let (dispatcher, delivery) = dispatcher(config);
        let held = Arc::new(Mutex::new(Vec::new()));

        let h = held.clone();
        dispatcher.registry().on("deploy", move |event| {
            assert_eq!(event.reply("early"), ReplyPath::ResponseUrl);
            h.lock().push(event);
        });

        let started = Instant::now();
        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;

        assert!(reply.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(delivery.sent.lock().len(), 1);
        assert_eq!(delivery.sent.lock()[0].1, SlashMessage::from("early"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_late_reply_goes_to_response_url() {
        let config = SlashConfig::builder().deferred().build().unwrap();
        let (dispatcher, delivery) = dispatcher(config);
        let held = Arc::new(Mutex::new(None));

        let h = held.clone();
        dispatcher.registry().on("deploy", move |event| {
            *h.lock() = Some(event);
        });

        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;
        assert!(reply.is_empty());
        assert!(delivery.sent.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;

        let event = held.lock().take().unwrap();
        assert_eq!(event.reply("late"), ReplyPath::ResponseUrl);
        assert_eq!(event.reply("later"), ReplyPath::Ignored);

        let sent = delivery.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://hooks.example.com/commands/42");
        assert_eq!(sent[0].1, SlashMessage::from("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reply_across_specific_and_generic() {
        let (dispatcher, delivery) = dispatcher(immediate());
        let paths = Arc::new(Mutex::new(Vec::new()));

        let p = paths.clone();
        dispatcher
            .registry()
            .on("deploy", move |event| p.lock().push(event.reply("specific")));
        let p = paths.clone();
        dispatcher
            .registry()
            .on_any(move |event| p.lock().push(event.reply("generic")));

        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;

        assert_eq!(reply.body, Bytes::from_static(b"specific"));
        assert_eq!(*paths.lock(), vec![ReplyPath::Direct, ReplyPath::Ignored]);
        assert!(delivery.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_failure_discards_silently() {
        let config = SlashConfig::builder()
            .signing_secret("s3cr3t")
            .immediate_ms(2000)
            .build()
            .unwrap();
        let (dispatcher, _delivery) = dispatcher(config);
        let called = Arc::new(Mutex::new(false));

        let c = called.clone();
        dispatcher.registry().on_any(move |_| *c.lock() = true);

        let started = Instant::now();
        let forged = InboundRequest::new(BODY).signed("v0=deadbeef", "1531420618");
        let reply = dispatcher.dispatch(forged).await;
        assert!(reply.is_empty());

        let unsigned = dispatcher.dispatch(InboundRequest::new(BODY)).await;
        assert!(unsigned.is_empty());

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!*called.lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_signature_is_dispatched() {
        let config = SlashConfig::builder()
            .signing_secret("s3cr3t")
            .immediate_ms(1000)
            .build()
            .unwrap();
        let (dispatcher, _delivery) = dispatcher(config);
        dispatcher.registry().on("deploy", |event| {
            let text = event.args().join("|");
            event.reply(text);
        });

        let signature = RequestSigner::new("s3cr3t").sign(BODY, "1531420618");
        let request = InboundRequest::new(BODY).signed(signature, "1531420618");
        let reply = dispatcher.dispatch(request).await;

        assert_eq!(reply.body, Bytes::from_static(b"staging env|now"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_command_discards_silently() {
        let (dispatcher, _delivery) = dispatcher(immediate());
        let called = Arc::new(Mutex::new(false));

        let c = called.clone();
        dispatcher.registry().on_any(move |_| *c.lock() = true);

        let started = Instant::now();
        let reply = dispatcher
            .dispatch(InboundRequest::new(&b"text=hello&team_id=T1"[..]))
            .await;

        assert!(reply.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!*called.lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_command_still_acknowledged() {
        let (dispatcher, _delivery) = dispatcher(
            SlashConfig::builder().immediate_ms(500).build().unwrap(),
        );

        let started = Instant::now();
        let reply = dispatcher.dispatch(InboundRequest::new(BODY)).await;

        assert!(reply.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_inbound_request_from_headers() {
        let mut map = HeaderMap::new();
        map.insert(headers::SIGNATURE, "v0=abc".parse().unwrap());
        map.insert(headers::TIMESTAMP, "123".parse().unwrap());

        let request = InboundRequest::from_parts(&map, Bytes::from_static(b"x=1"));
        assert_eq!(request.signature.as_deref(), Some("v0=abc"));
        assert_eq!(request.timestamp.as_deref(), Some("123"));
    }
}
