//! Subscription registry for slash-command handlers

use crate::SlashEvent;
use crate::command::strip_slash;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

/// A subscriber callback. Runs synchronously during dispatch; spawn for async work.
pub type SlashHandler = Arc<dyn Fn(SlashEvent) + Send + Sync>;

/// What a handler is subscribed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// One command (`slash:<command>`)
    Command(String),
    /// Every command (`slash`)
    Any,
}

impl Subscription {
    /// Subscription for a command, with any leading slash removed
    pub fn command(name: impl AsRef<str>) -> Self {
        Self::Command(strip_slash(name.as_ref()).to_string())
    }

    /// Parse an event name: `slash` or `slash:<command>`
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "slash" => Some(Self::Any),
            _ => name
                .strip_prefix("slash:")
                .filter(|c| !c.is_empty())
                .map(Self::command),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(command) => write!(f, "slash:{}", command),
            Self::Any => f.write_str("slash"),
        }
    }
}

/// Handlers keyed by subscription, invoked in registration order
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<RwLock<HashMap<Subscription, Vec<SlashHandler>>>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let counts: HashMap<String, usize> = handlers
            .iter()
            .map(|(sub, list)| (sub.to_string(), list.len()))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    pub fn subscribe(&self, subscription: Subscription, handler: SlashHandler) {
        debug!(subscription = %subscription, "Registered slash handler");
        self.handlers
            .write()
            .entry(subscription)
            .or_default()
            .push(handler);
    }

    /// Handle one command
    pub fn on<F>(&self, command: &str, handler: F)
    where
        F: Fn(SlashEvent) + Send + Sync + 'static,
    {
        self.subscribe(Subscription::command(command), Arc::new(handler));
    }

    /// Handle every command
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(SlashEvent) + Send + Sync + 'static,
    {
        self.subscribe(Subscription::Any, Arc::new(handler));
    }

    /// Handle one command with an async closure spawned on the current runtime
    pub fn on_async<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(SlashEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(Subscription::command(command), spawning(handler));
    }

    /// Handle every command with an async closure spawned on the current runtime
    pub fn on_any_async<F, Fut>(&self, handler: F)
    where
        F: Fn(SlashEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(Subscription::Any, spawning(handler));
    }

    /// Remove every handler for a subscription
    pub fn unsubscribe(&self, subscription: &Subscription) -> usize {
        self.handlers
            .write()
            .remove(subscription)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Number of handlers for a subscription
    pub fn handler_count(&self, subscription: &Subscription) -> usize {
        self.handlers
            .read()
            .get(subscription)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Remove everything
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Call the command's handlers, then the wildcard handlers.
    ///
    /// Returns how many handlers ran. A panicking handler is logged and skipped.
    pub fn emit(&self, event: &SlashEvent) -> usize {
        let (specific, generic) = {
            let handlers = self.handlers.read();
            let specific = handlers
                .get(&Subscription::command(event.command()))
                .cloned()
                .unwrap_or_default();
            let generic = handlers
                .get(&Subscription::Any)
                .cloned()
                .unwrap_or_default();
            (specific, generic)
        };

        let mut invoked = 0;
        for handler in specific.iter().chain(generic.iter()) {
            let handler_event = event.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(handler_event))).is_err() {
                error!(
                    invocation_id = %event.invocation().id,
                    command = event.command(),
                    "Slash handler panicked"
                );
            }
            invoked += 1;
        }
        invoked
    }
}

fn spawning<F, Fut>(handler: F) -> SlashHandler
where
    F: Fn(SlashEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(handler(event));
        }
        Err(e) => error!(error = %e, "No runtime available for async slash handler"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse;
    use crate::reply::tests::RecordingDelivery;
    use crate::{Invocation, InvocationPhase, ReplyChannel};
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    fn event(command: &str) -> SlashEvent {
        let body = format!("command=%2F{}&text=a+b", command);
        let invocation = Arc::new(Invocation::new(parse(body.as_bytes()).unwrap()));
        let (tx, _rx) = oneshot::channel();
        let reply = ReplyChannel::new(
            invocation.id,
            InvocationPhase::Acknowledged,
            tx,
            None,
            Arc::new(RecordingDelivery::default()),
        );
        SlashEvent::new(invocation, reply)
    }

    #[test]
    fn test_subscription_names() {
        assert_eq!(Subscription::command("/deploy").to_string(), "slash:deploy");
        assert_eq!(Subscription::Any.to_string(), "slash");
        assert_eq!(
            Subscription::from_event_name("slash:deploy"),
            Some(Subscription::command("deploy"))
        );
        assert_eq!(Subscription::from_event_name("slash"), Some(Subscription::Any));
        assert_eq!(Subscription::from_event_name("slash:"), None);
        assert_eq!(Subscription::from_event_name("ready"), None);
    }

    #[test]
    fn test_specific_before_generic_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        registry.on_any(move |_| c.lock().push("any-1"));
        let c = calls.clone();
        registry.on("deploy", move |_| c.lock().push("deploy-1"));
        let c = calls.clone();
        registry.on("/deploy", move |_| c.lock().push("deploy-2"));
        let c = calls.clone();
        registry.on_any(move |_| c.lock().push("any-2"));
        let c = calls.clone();
        registry.on("status", move |_| c.lock().push("status"));

        let invoked = registry.emit(&event("deploy"));

        assert_eq!(invoked, 4);
        assert_eq!(*calls.lock(), vec!["deploy-1", "deploy-2", "any-1", "any-2"]);
    }

    #[test]
    fn test_handler_receives_args() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(None));

        let s = seen.clone();
        registry.on("echo", move |event| {
            *s.lock() = Some((event.command().to_string(), event.args().to_vec()));
        });
        registry.emit(&event("echo"));

        assert_eq!(
            *seen.lock(),
            Some(("echo".to_string(), vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn test_unhandled_command_is_not_an_error() {
        let registry = SubscriptionRegistry::new();
        registry.on("deploy", |_| {});
        assert_eq!(registry.emit(&event("unknown")), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(Mutex::new(0));

        registry.on("boom", |_| panic!("handler failure"));
        let c = calls.clone();
        registry.on_any(move |_| *c.lock() += 1);

        assert_eq!(registry.emit(&event("boom")), 2);
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_unsubscribe_and_counts() {
        let registry = SubscriptionRegistry::new();
        registry.on("a", |_| {});
        registry.on("a", |_| {});
        registry.on_any(|_| {});

        assert_eq!(registry.handler_count(&Subscription::command("a")), 2);
        assert_eq!(registry.unsubscribe(&Subscription::command("a")), 2);
        assert_eq!(registry.handler_count(&Subscription::command("a")), 0);

        registry.clear();
        assert_eq!(registry.handler_count(&Subscription::Any), 0);
    }

    #[tokio::test]
    async fn test_async_handler_is_spawned() {
        let registry = SubscriptionRegistry::new();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        registry.on_async("slow", move |event| {
            let tx = tx.lock().take();
            async move {
                tokio::task::yield_now().await;
                if let Some(tx) = tx {
                    let _ = tx.send(event.args().len());
                }
            }
        });

        assert_eq!(registry.emit(&event("slow")), 1);
        assert_eq!(rx.await.unwrap(), 2);
    }
}
