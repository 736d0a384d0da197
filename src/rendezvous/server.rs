// src/rendezvous/server.rs
//
// Networked rendezvous: a TCP listener in front of a `RendezvousHub`.
// One task per connection; each connection carries request/response lines.
// While a blocking request (observe, barrier) is parked, the connection is
// watched for EOF so a client that gave up does not leave a waiter behind.
// Every other request is applied exactly once, whether or not its client is
// still around to read the reply.
//
// The server also hosts the routing nodes of remote workers (`NodeHost`), so
// workers in separate processes share one provider table.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

use super::local::RendezvousHub;
use super::protocol::{encode_line, Request, Response};
use crate::backend::NodeHost;
use crate::constants::{MAX_REQUEST_LINE, SERVER_MAX_WAIT};

pub struct RendezvousServer {
    listener: TcpListener,
    hub: Arc<RendezvousHub>,
    nodes: Arc<NodeHost>,
}

impl RendezvousServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind rendezvous server on {}", addr))?;
        Ok(Self {
            listener,
            hub: RendezvousHub::new(),
            nodes: Arc::new(NodeHost::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read rendezvous listen address")
    }

    /// Hub backing this server, for inspection in tests and status output
    pub fn hub(&self) -> Arc<RendezvousHub> {
        Arc::clone(&self.hub)
    }

    /// Routing nodes hosted for remote workers
    pub fn nodes(&self) -> Arc<NodeHost> {
        Arc::clone(&self.nodes)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!("Rendezvous server listening on {}", addr);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Rendezvous server on {} shutting down", addr);
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!("Accepted rendezvous connection from {}", peer);
                        let hub = Arc::clone(&self.hub);
                        let nodes = Arc::clone(&self.nodes);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(hub, nodes, stream).await {
                                debug!("Rendezvous connection from {} ended with error: {:#}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept rendezvous connection: {}", e),
                },
            }
        }
        Ok(())
    }
}

async fn handle_connection(hub: Arc<RendezvousHub>, nodes: Arc<NodeHost>, stream: TcpStream) -> Result<()> {
    let mut reader = BufReader::new(stream);

    loop {
        let mut line = String::new();
        let n = (&mut reader)
            .take(MAX_REQUEST_LINE as u64 + 1)
            .read_line(&mut line)
            .await
            .context("Failed to read rendezvous request")?;
        if n == 0 {
            return Ok(());
        }
        if line.len() > MAX_REQUEST_LINE {
            let reply = Response::Error {
                message: format!("request exceeds {} bytes", MAX_REQUEST_LINE),
            };
            write_response(&mut reader, &reply).await?;
            return Ok(());
        }

        let request: Request = match serde_json::from_str(line.trim_end()) {
            Ok(request) => request,
            Err(e) => {
                let reply = Response::Error {
                    message: format!("malformed request: {}", e),
                };
                write_response(&mut reader, &reply).await?;
                continue;
            }
        };

        let reply = if request.is_blocking() {
            tokio::select! {
                reply = dispatch(&hub, &nodes, request) => reply,
                _ = wait_for_disconnect(&mut reader) => {
                    trace!("Rendezvous client disconnected while waiting");
                    return Ok(());
                }
            }
        } else {
            dispatch(&hub, &nodes, request).await
        };
        write_response(&mut reader, &reply).await?;
    }
}

async fn dispatch(hub: &RendezvousHub, nodes: &NodeHost, request: Request) -> Response {
    match request {
        Request::SignalEntry { state } => Response::Seq {
            seq: hub.signal_entry(&state),
        },
        Request::Publish { topic, payload } => Response::Seq {
            seq: hub.publish(&topic, payload),
        },
        Request::Observe { topic, count } => {
            match tokio::time::timeout(SERVER_MAX_WAIT, hub.observe(&topic, count)).await {
                Ok(payloads) => Response::Payloads { payloads },
                Err(_) => server_wait_exceeded("observe", &topic),
            }
        }
        Request::Barrier { state, target } => {
            match tokio::time::timeout(SERVER_MAX_WAIT, hub.barrier(&state, target)).await {
                Ok(()) => Response::Ok,
                Err(_) => server_wait_exceeded("barrier", &state),
            }
        }
        Request::Join {
            bucket_size,
            auto_refresh,
        } => Response::Joined {
            info: nodes.join(bucket_size, auto_refresh),
        },
        Request::Backend { node, call } => nodes.call(&node, call).await,
    }
}

fn server_wait_exceeded(op: &str, name: &str) -> Response {
    Response::Error {
        message: format!(
            "{} on '{}' exceeded server wait limit of {}s",
            op,
            name,
            SERVER_MAX_WAIT.as_secs()
        ),
    }
}

/// Resolves once the peer closes its half of the connection
async fn wait_for_disconnect(reader: &mut BufReader<TcpStream>) {
    let mut buf = [0u8; 1];
    // Clients never pipeline, so any read completion means the exchange is over
    let _ = reader.read(&mut buf).await;
}

async fn write_response(reader: &mut BufReader<TcpStream>, reply: &Response) -> Result<()> {
    let line = encode_line(reply).context("Failed to encode rendezvous response")?;
    reader
        .get_mut()
        .write_all(line.as_bytes())
        .await
        .context("Failed to write rendezvous response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    async fn roundtrip(addr: SocketAddr, line: &str) -> String {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut stream = BufReader::new(stream);
        stream.get_mut().write_all(line.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_line(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_reply() {
        let server = RendezvousServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        let reply = roundtrip(addr, "not json\n").await;
        let parsed: Response = serde_json::from_str(reply.trim_end()).unwrap();
        assert!(matches!(parsed, Response::Error { .. }));

        let reply = roundtrip(addr, "{\"op\":\"signal_entry\",\"state\":\"setup\"}\n").await;
        let parsed: Response = serde_json::from_str(reply.trim_end()).unwrap();
        assert_eq!(parsed, Response::Seq { seq: 1 });

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_signal_entry_counted_when_client_hangs_up() {
        let server = RendezvousServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let hub = server.hub();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        // Send and close the write half at once; the entry must still land exactly once
        for _ in 0..10 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"{\"op\":\"signal_entry\",\"state\":\"setup\"}\n")
                .await
                .unwrap();
            stream.shutdown().await.unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        }
        assert_eq!(hub.counter("setup"), 10);

        let reply = roundtrip(addr, "{\"op\":\"signal_entry\",\"state\":\"setup\"}\n").await;
        let parsed: Response = serde_json::from_str(reply.trim_end()).unwrap();
        assert_eq!(parsed, Response::Seq { seq: 11 });

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_wait_does_not_block_server() {
        let server = RendezvousServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let hub = server.hub();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        // Park a barrier, then walk away
        {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"{\"op\":\"barrier\",\"state\":\"end\",\"target\":5}\n")
                .await
                .unwrap();
        }

        let reply = roundtrip(addr, "{\"op\":\"publish\",\"topic\":\"peers\",\"payload\":{\"a\":1}}\n").await;
        let parsed: Response = serde_json::from_str(reply.trim_end()).unwrap();
        assert_eq!(parsed, Response::Seq { seq: 1 });
        assert_eq!(hub.topic_len("peers"), 1);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
