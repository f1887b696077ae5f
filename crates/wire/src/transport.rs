//! TCP transport: serving, dispatch and outbound calls.
//!
//! Connection lifecycle mirrors the protocol's request/response shape: a
//! caller opens a connection, writes one request frame and (when it expects
//! a reply) reads exactly one reply frame with the same `msg_id`, then
//! closes. The serving side accepts, reads one frame, dispatches it to the
//! handler registered for its type, writes back whatever the handler
//! returns, and closes.
//!
//! Handlers run inside the accept task of their connection. A handler that
//! fails never takes the node down: its error text travels back as an
//! `ERROR` reply.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, warn};

use corelib::NodeRef;

use crate::codec::{read_frame, write_frame};
use crate::error::{Result, WireError};
use crate::message::{Envelope, MessageType};

/// Error type handlers may fail with; the dispatcher turns it into an ERROR
/// reply.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type HandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<Option<Envelope>, HandlerError>> + Send>>;

/// A registered message handler. May reply (`Some`), stay silent (`None`
/// for fire-and-forget messages), or fail.
pub type HandlerFn = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Per-type handler table, assembled once before serving.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, msg_type: MessageType, handler: HandlerFn) {
        self.handlers.insert(msg_type, handler);
    }

    fn get(&self, msg_type: MessageType) -> Option<&HandlerFn> {
        self.handlers.get(&msg_type)
    }
}

/// The listening half of one node.
pub struct Server {
    local: NodeRef,
    registry: HandlerRegistry,
}

impl Server {
    pub fn new(local: NodeRef, registry: HandlerRegistry) -> Self {
        Self { local, registry }
    }

    /// Accept loop. Returns when `shutdown` flips to true; in-flight
    /// connection tasks drain on their own.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(err) = server.handle_connection(stream).await {
                                    // Peers dropping mid-handshake is routine.
                                    debug!(%peer, %err, "connection ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the node is gone; stop either way.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(node = %self.local.id, "listener shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let request = read_frame(&mut stream).await?;
        debug!(
            node = %self.local.id,
            msg_type = %request.msg_type,
            from = request.sender_id.0,
            "received"
        );
        if let Some(reply) = self.dispatch(request).await {
            write_frame(&mut stream, &reply).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, request: Envelope) -> Option<Envelope> {
        let Some(handler) = self.registry.get(request.msg_type) else {
            warn!(node = %self.local.id, msg_type = %request.msg_type, "no handler registered");
            return Some(request.error_reply(
                &self.local,
                format!("no handler for {}", request.msg_type),
            ));
        };
        let handler = Arc::clone(handler);
        match handler(request.clone()).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    node = %self.local.id,
                    msg_type = %request.msg_type,
                    %err,
                    "handler failed"
                );
                Some(request.error_reply(&self.local, err))
            }
        }
    }
}

/// Bind a listener, returning it with the actually-bound address (useful
/// when the port was 0).
pub async fn bind(addr: &str) -> Result<(TcpListener, std::net::SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

/// Send a request and await the single reply frame, all within `timeout`.
///
/// The reply must echo the request's `msg_id`. It is returned as-is, ERROR
/// replies included, so a forwarder can relay those verbatim. Use
/// [`call_checked`] when an ERROR reply should fail the call.
pub async fn call(address: &str, request: &Envelope, timeout: Duration) -> Result<Envelope> {
    let exchange = async {
        let mut stream = TcpStream::connect(address).await?;
        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await
    };
    let reply = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| WireError::Timeout("request/reply exchange"))??;
    if reply.msg_id != request.msg_id {
        return Err(WireError::Correlation {
            sent: request.msg_id.clone(),
            got: reply.msg_id,
        });
    }
    Ok(reply)
}

/// Like [`call`], but an `ERROR` reply surfaces as [`WireError::Remote`].
pub async fn call_checked(
    address: &str,
    request: &Envelope,
    timeout: Duration,
) -> Result<Envelope> {
    call(address, request, timeout).await?.into_checked()
}

/// Send a message without awaiting any reply (fire-and-forget).
pub async fn cast(address: &str, message: &Envelope, timeout: Duration) -> Result<()> {
    let send = async {
        let mut stream = TcpStream::connect(address).await?;
        write_frame(&mut stream, message).await
    };
    tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| WireError::Timeout("fire-and-forget send"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Empty, GetRequest, PongReply};
    use corelib::Id;

    fn local() -> NodeRef {
        NodeRef::new(Id(1), "localhost:0")
    }

    async fn spawn_server(registry: HandlerRegistry) -> (String, watch::Sender<bool>) {
        let (listener, addr) = bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let server = Arc::new(Server::new(local(), registry));
        tokio::spawn(server.serve(listener, rx));
        (addr.to_string(), tx)
    }

    fn pong_handler(replier: NodeRef) -> HandlerFn {
        Arc::new(move |env: Envelope| {
            let replier = replier.clone();
            Box::pin(async move {
                let reply = env.reply(MessageType::Pong, &replier, PongReply::alive())?;
                Ok(Some(reply))
            })
        })
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let mut registry = HandlerRegistry::new();
        registry.register(MessageType::Ping, pong_handler(local()));
        let (addr, _shutdown) = spawn_server(registry).await;

        let request =
            Envelope::request(MessageType::Ping, &local(), Empty::default()).unwrap();
        let reply = call(&addr, &request, Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply.msg_type, MessageType::Pong);
        assert_eq!(reply.msg_id, request.msg_id);
        let pong: PongReply = reply.payload().unwrap();
        assert_eq!(pong.status, "alive");
    }

    #[tokio::test]
    async fn test_unknown_type_yields_error_reply() {
        let (addr, _shutdown) = spawn_server(HandlerRegistry::new()).await;
        let request =
            Envelope::request(MessageType::Get, &local(), GetRequest { key: "k".into() })
                .unwrap();
        match call_checked(&addr, &request, Duration::from_secs(2)).await {
            Err(WireError::Remote(text)) => assert!(text.contains("GET")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_error_reply() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            MessageType::Ping,
            Arc::new(|_env| Box::pin(async { Err::<Option<Envelope>, _>("exploded".into()) })),
        );
        let (addr, _shutdown) = spawn_server(registry).await;
        let request =
            Envelope::request(MessageType::Ping, &local(), Empty::default()).unwrap();
        match call_checked(&addr, &request, Duration::from_secs(2)).await {
            Err(WireError::Remote(text)) => assert_eq!(text, "exploded"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_target_is_unresponsive() {
        // Nothing listens on this port (bound then dropped).
        let (listener, addr) = bind("127.0.0.1:0").await.unwrap();
        drop(listener);
        let request =
            Envelope::request(MessageType::Ping, &local(), Empty::default()).unwrap();
        let err = call(&addr.to_string(), &request, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_unresponsive(), "got {err:?}");
    }
}
