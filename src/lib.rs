//! Slash-command webhooks for chat platforms
//!
//! `slashgate` receives slash-command webhooks, verifies their HMAC
//! signature, splits the command text into arguments, and hands each
//! invocation to subscribed handlers together with a single-use reply
//! channel.
//!
//! # Features
//!
//! - **Signature Verification**: HMAC-SHA256 over `v0:<timestamp>:<body>`
//! - **Argument Parsing**: whitespace tokens with straight or curly quoted groups
//! - **Immediate Replies**: hold the HTTP response open for up to 2 s
//! - **Deferred Replies**: acknowledge at once and post to `response_url`
//! - **Subscriptions**: per-command and wildcard handlers, in registration order
//!
//! # Example
//!
//! ```rust,no_run
//! use slashgate::{ResponseMessage, SlashConfig, SlashEmitter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SlashConfig::builder()
//!         .signing_secret("8f742231b10e8888abcd99yyyzzz85a5")
//!         .immediate_ms(2000)
//!         .port(3000)
//!         .build()?;
//!
//!     let emitter = SlashEmitter::new(config)?;
//!
//!     // `/deploy "staging env" now`
//!     emitter.on("deploy", |event| {
//!         let target = event.args().first().cloned().unwrap_or_default();
//!         event.reply(ResponseMessage::new(format!("Deploying {}", target)).in_channel());
//!     });
//!
//!     // Runs after the command-specific handlers
//!     emitter.on_any(|event| {
//!         tracing::info!(command = event.command(), "slash command received");
//!     });
//!
//!     emitter.listen().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Reply Semantics
//!
//! Every invocation gets exactly one effective reply. In immediate mode a
//! reply sent before the deadline is written to the HTTP response; once the
//! deadline passes the caller gets an empty 200 and the reply is posted to
//! the invocation's `response_url`. Further replies are ignored.

mod client;
pub mod command;
mod config;
mod dispatcher;
mod error;
mod invocation;
pub mod logging;
mod message;
mod registry;
mod reply;
mod server;
pub mod signature;

pub use client::{DeliveryReport, FallbackDelivery, ResponseUrlClient};
pub use command::{FormFields, ParsedCommand};
pub use config::{
    DEFAULT_DEADLINE, DEFAULT_PORT, MAX_DEADLINE, ResponseMode, SlashConfig, SlashConfigBuilder,
};
pub use dispatcher::{Dispatcher, InboundRequest};
pub use error::SlashError;
pub use invocation::{Invocation, SlashEvent};
pub use message::{ResponseMessage, ResponseType, SlashMessage};
pub use registry::{SlashHandler, Subscription, SubscriptionRegistry};
pub use reply::{HttpReply, InvocationPhase, InvocationState, ReplyChannel, ReplyPath};
pub use server::{LifecycleEvent, SlashEmitter};
pub use signature::RequestSigner;

/// Result type for slash-command operations
pub type Result<T> = std::result::Result<T, SlashError>;
