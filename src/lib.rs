//! `signalhub`: a connection hub for real-time messaging and WebRTC
//! room signaling.
//!
//! Three layers, innermost first:
//!  - [`socket`] / [`hub`]: admission, the per-connection write pipeline,
//!    and fan-out (broadcast, topic publish, direct-with-offline-spool).
//!  - [`message`] / [`kind`]: the wire protocol — three inbound encodings
//!    normalized to one canonical [`message::Message`], and the kind-tag
//!    routing table.
//!  - [`call`]: the WebRTC room-signaling subsystem (auth, join, SDP/ICE
//!    relay, mute/hold, departure), layered on top of the hub rather than
//!    inside it — a `CallManager` is just another `dispatcher` client.
//!
//! [`transport`] abstracts the underlying socket so the core is testable
//! without a real network; [`auth`] and `call::store` abstract the two
//! external collaborators (identity, call persistence) the same way.

pub mod admin;
pub mod auth;
pub mod call;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod kind;
pub mod message;
pub mod socket;
pub mod transport;
