//! HTTP listener and the public entry point

use crate::dispatcher::{Dispatcher, InboundRequest};
use crate::{
    FallbackDelivery, HttpReply, ResponseUrlClient, Result, SlashConfig, SlashError, SlashEvent,
    SubscriptionRegistry,
};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Server lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Listening on `addr`
    Ready { addr: SocketAddr },
    /// The listener could not start
    Error { message: String },
}

/// Slash-command webhook server.
///
/// Owns its listener, subscriptions and configuration; several can run in
/// one process.
///
/// ```rust,no_run
/// use slashgate::{SlashConfig, SlashEmitter};
///
/// #[tokio::main]
/// async fn main() -> slashgate::Result<()> {
///     let emitter = SlashEmitter::new(SlashConfig::builder().immediate_ms(1500).build()?)?;
///
///     emitter.on("deploy", |event| {
///         let target = event.args().first().cloned().unwrap_or_default();
///         event.reply(format!("Deploying {}", target));
///     });
///
///     emitter.listen().await
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SlashEmitter {
    config: Arc<SlashConfig>,
    dispatcher: Dispatcher,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl SlashEmitter {
    /// Create a server that posts late replies with [`ResponseUrlClient`]
    pub fn new(config: SlashConfig) -> Result<Self> {
        let client = ResponseUrlClient::new(&config)?;
        Self::with_delivery(config, Arc::new(client))
    }

    /// Create a server with a custom fallback delivery
    pub fn with_delivery(config: SlashConfig, fallback: Arc<dyn FallbackDelivery>) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let dispatcher = Dispatcher::new(config.clone(), SubscriptionRegistry::new(), fallback);
        let (lifecycle, _) = broadcast::channel(16);

        Ok(Self {
            config,
            dispatcher,
            lifecycle,
        })
    }

    /// Configuration this server was built with
    pub fn config(&self) -> &SlashConfig {
        &self.config
    }

    /// Subscriptions for this server
    pub fn registry(&self) -> &SubscriptionRegistry {
        self.dispatcher.registry()
    }

    /// Subscribe to `slash:<command>`
    pub fn on<F>(&self, command: &str, handler: F)
    where
        F: Fn(SlashEvent) + Send + Sync + 'static,
    {
        self.registry().on(command, handler);
    }

    /// Subscribe to every command
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(SlashEvent) + Send + Sync + 'static,
    {
        self.registry().on_any(handler);
    }

    /// Subscribe to `slash:<command>` with an async handler
    pub fn on_async<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(SlashEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.registry().on_async(command, handler);
    }

    /// Subscribe to every command with an async handler
    pub fn on_any_async<F, Fut>(&self, handler: F)
    where
        F: Fn(SlashEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.registry().on_any_async(handler);
    }

    /// Receive [`LifecycleEvent`]s. Subscribe before calling `listen`.
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Run one request through verification and dispatch without a socket
    pub async fn handle(&self, request: InboundRequest) -> HttpReply {
        self.dispatcher.dispatch(request).await
    }

    /// Bind the configured address and serve forever
    pub async fn listen(&self) -> Result<()> {
        self.listen_until(std::future::pending::<()>()).await
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn listen_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.config.socket_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = SlashError::Bind {
                    addr: addr.to_string(),
                    source,
                };
                error!(addr = %addr, error = %err, "Slash command server failed to start");
                self.notify(LifecycleEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            mode = ?self.config.response_mode,
            "Slash command server listening"
        );
        self.notify(LifecycleEvent::Ready { addr });

        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    info!(addr = %addr, "Slash command server stopped");
                    return Ok(());
                }
            };

            let io = TokioIo::new(stream);
            let dispatcher = self.dispatcher.clone();
            let max_body_size = self.config.max_body_size;

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        Ok::<_, Infallible>(handle_request(req, dispatcher, max_body_size).await)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %err, "Error serving connection");
                }
            });
        }
    }

    fn notify(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.lifecycle.send(event);
    }
}

/// Route, read the body, dispatch, and convert the reply
async fn handle_request(
    req: Request<IncomingBody>,
    dispatcher: Dispatcher,
    max_body_size: usize,
) -> Response<Full<Bytes>> {
    if req.method() != Method::POST || req.uri().path() != "/" {
        debug!(method = %req.method(), path = req.uri().path(), "No route");
        return empty_response(StatusCode::NOT_FOUND);
    }

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(
                path = parts.uri.path(),
                limit = max_body_size,
                error = %e,
                "Discarding unreadable request body"
            );
            return empty_response(StatusCode::OK);
        }
    };

    let reply = dispatcher
        .dispatch(InboundRequest::from_parts(&parts.headers, body))
        .await;
    into_response(reply)
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn into_response(reply: HttpReply) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(reply.body));
    if let Some(content_type) = reply.content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::tests::RecordingDelivery;
    use crate::{ReplyPath, ResponseMode};
    use std::time::Duration;

    fn emitter(config: SlashConfig) -> SlashEmitter {
        SlashEmitter::with_delivery(config, Arc::new(RecordingDelivery::default())).unwrap()
    }

    #[test]
    fn test_rejects_hand_built_config_over_cap() {
        let config = SlashConfig {
            response_mode: ResponseMode::Immediate {
                deadline: Duration::from_millis(2500),
            },
            ..SlashConfig::default()
        };
        let result = SlashEmitter::with_delivery(config, Arc::new(RecordingDelivery::default()));
        assert!(matches!(result, Err(SlashError::Config(_))));
    }

    #[tokio::test]
    async fn test_handle_without_socket() {
        let emitter = emitter(SlashConfig::builder().immediate_ms(2000).build().unwrap());
        emitter.on("ping", |event| {
            assert_eq!(event.reply("pong"), ReplyPath::Direct);
        });

        let reply = emitter
            .handle(InboundRequest::new(&b"command=%2Fping"[..]))
            .await;

        assert_eq!(reply.body, Bytes::from_static(b"pong"));
    }

    #[test]
    fn test_into_response_sets_content_type() {
        let response = into_response(HttpReply::from_message(&"hi".into()));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );

        let response = into_response(HttpReply::empty());
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_serve_reports_ready_and_stops() {
        let emitter = emitter(SlashConfig::default());
        let mut events = emitter.lifecycle();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bound = listener.local_addr().unwrap();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = emitter.clone();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        assert_eq!(
            events.recv().await.unwrap(),
            LifecycleEvent::Ready { addr: bound }
        );

        stop.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
