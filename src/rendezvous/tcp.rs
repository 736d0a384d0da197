// src/rendezvous/tcp.rs
//
// Client side of the networked rendezvous. Each call opens its own connection
// so concurrent waits never share a socket; the whole exchange is bounded by
// the caller's deadline. Dropping the connection on timeout tells the server
// to stop waiting on our behalf.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::trace;

use super::protocol::{encode_line, Request, Response};
use super::{Rendezvous, RendezvousError};
use crate::deadline::Deadline;

#[derive(Debug)]
pub struct TcpRendezvous {
    addr: String,
    released: AtomicBool,
}

impl TcpRendezvous {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            released: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, deadline: &Deadline, request: Request) -> Result<Response, RendezvousError> {
        if self.is_released() {
            return Err(RendezvousError::Released);
        }
        trace!("rendezvous {} -> {}", request.name(), self.addr);
        let response = deadline.run(exchange(&self.addr, &request)).await??;
        match response {
            Response::Error { message } => Err(RendezvousError::Remote(message)),
            other => Ok(other),
        }
    }
}

/// One request/response exchange on a fresh connection to `addr`
pub(crate) async fn exchange(addr: &str, request: &Request) -> Result<Response, RendezvousError> {
    let stream = TcpStream::connect(addr).await?;
    let mut stream = BufReader::new(stream);

    let line = encode_line(request)?;
    stream.get_mut().write_all(line.as_bytes()).await?;

    let mut reply = String::new();
    let n = stream.read_line(&mut reply).await?;
    if n == 0 {
        return Err(RendezvousError::Protocol(format!(
            "{} closed the connection without replying to {}",
            addr,
            request.name()
        )));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

fn unexpected(op: &str, response: &Response) -> RendezvousError {
    RendezvousError::Protocol(format!("unexpected response to {}: {:?}", op, response))
}

#[async_trait]
impl Rendezvous for TcpRendezvous {
    async fn signal_entry(&self, deadline: &Deadline, state: &str) -> Result<i64, RendezvousError> {
        let request = Request::SignalEntry {
            state: state.to_string(),
        };
        match self.call(deadline, request).await? {
            Response::Seq { seq } => Ok(seq),
            other => Err(unexpected("signal_entry", &other)),
        }
    }

    async fn publish(
        &self,
        deadline: &Deadline,
        topic: &str,
        payload: Value,
    ) -> Result<i64, RendezvousError> {
        let request = Request::Publish {
            topic: topic.to_string(),
            payload,
        };
        match self.call(deadline, request).await? {
            Response::Seq { seq } => Ok(seq),
            other => Err(unexpected("publish", &other)),
        }
    }

    async fn observe(
        &self,
        deadline: &Deadline,
        topic: &str,
        count: usize,
    ) -> Result<Vec<Value>, RendezvousError> {
        let request = Request::Observe {
            topic: topic.to_string(),
            count,
        };
        match self.call(deadline, request).await? {
            Response::Payloads { payloads } => Ok(payloads),
            other => Err(unexpected("observe", &other)),
        }
    }

    async fn barrier(&self, deadline: &Deadline, state: &str, target: i64) -> Result<(), RendezvousError> {
        let request = Request::Barrier {
            state: state.to_string(),
            target,
        };
        match self.call(deadline, request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected("barrier", &other)),
        }
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_released_client_does_not_connect() {
        // Nothing listens on this address; a released client must not even try
        let client = TcpRendezvous::new("127.0.0.1:1");
        client.release();
        let deadline = Deadline::after(Duration::from_secs(1));
        let err = client.signal_entry(&deadline, "setup").await.unwrap_err();
        assert!(matches!(err, RendezvousError::Released));
    }

    #[tokio::test]
    async fn test_connection_refused_is_io_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TcpRendezvous::new(addr.to_string());
        let deadline = Deadline::after(Duration::from_secs(2));
        let err = client.signal_entry(&deadline, "setup").await.unwrap_err();
        assert!(matches!(err, RendezvousError::Io(_)));
    }
}
