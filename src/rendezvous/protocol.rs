// src/rendezvous/protocol.rs
//
// Wire format between `TcpRendezvous` and `RendezvousServer`: one JSON object
// per line. A client opens a connection, writes one request line and reads
// one response line.
//
// Besides coordination the server hosts routing nodes for workers in other
// processes: `Join` registers a node on the server's shared network and
// `Backend` runs one routing operation as that node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{PeerId, PeerInfo};
use crate::cid::ContentId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SignalEntry { state: String },
    Publish { topic: String, payload: Value },
    Observe { topic: String, count: usize },
    Barrier { state: String, target: i64 },
    Join { bucket_size: usize, auto_refresh: bool },
    Backend { node: PeerId, call: BackendCall },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::SignalEntry { .. } => "signal_entry",
            Request::Publish { .. } => "publish",
            Request::Observe { .. } => "observe",
            Request::Barrier { .. } => "barrier",
            Request::Join { .. } => "join",
            Request::Backend { call, .. } => call.name(),
        }
    }

    /// Requests that park until other workers catch up
    pub fn is_blocking(&self) -> bool {
        matches!(self, Request::Observe { .. } | Request::Barrier { .. })
    }
}

/// Routing operation run on a hosted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum BackendCall {
    Provide { cid: ContentId, verify: bool },
    FindProviders { cid: ContentId },
    Connect { peer: PeerInfo },
    LookupPeer { peer: PeerId },
    RefreshRoutingTable,
    RandomWalk,
}

impl BackendCall {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCall::Provide { .. } => "provide",
            BackendCall::FindProviders { .. } => "find_providers",
            BackendCall::Connect { .. } => "connect",
            BackendCall::LookupPeer { .. } => "lookup_peer",
            BackendCall::RefreshRoutingTable => "refresh_routing_table",
            BackendCall::RandomWalk => "random_walk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Seq { seq: i64 },
    Payloads { payloads: Vec<Value> },
    Joined { info: PeerInfo },
    Providers { peers: Vec<PeerId> },
    /// Routing table size after a maintenance call
    Routed { table_size: usize },
    Ok,
    Error { message: String },
}

/// Serialize `msg` as a single newline-terminated line
pub fn encode_line<T: Serialize>(msg: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let req = Request::Observe {
            topic: "peers".to_string(),
            count: 4,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"op": "observe", "topic": "peers", "count": 4}));
        assert_eq!(req.name(), "observe");
    }

    #[test]
    fn test_response_unit_variant() {
        let line = encode_line(&Response::Ok).unwrap();
        assert_eq!(line, "{\"status\":\"ok\"}\n");
        let back: Response = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(back, Response::Ok);
    }

    #[test]
    fn test_backend_call_wire_shape() {
        let req = Request::Backend {
            node: PeerId::new("peer-a"),
            call: BackendCall::LookupPeer {
                peer: PeerId::new("peer-b"),
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({"op": "backend", "node": "peer-a", "call": {"call": "lookup_peer", "peer": "peer-b"}})
        );
        assert_eq!(req.name(), "lookup_peer");
        assert!(!req.is_blocking());

        let back: Request = serde_json::from_value(v).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_unknown_op_rejected() {
        let parsed: Result<Request, _> = serde_json::from_str(r#"{"op":"teleport"}"#);
        assert!(parsed.is_err());
    }
}
