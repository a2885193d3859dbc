// author: kodeholic

pub mod message;
pub mod transport;

pub use message::{CandidateInit, ClientSignal, PeerInfo, ServerSignal, SessionDescription};
pub use transport::{SignalingConnector, SignalingTransport, WsConnector};
