//! Kind tag table (`t` values 1-30) and the legacy event-name mapping.
//!
//! Tags 25-30 are server-originated only; the dispatcher never expects to
//! receive them from a client. Tag 2 (`private`) is a pure alias for tag 12
//! (`direct`) kept for legacy clients; it is routed identically.

/// A kind tag, named per its routing behavior rather than its wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum KindTag {
    Broadcast = 1,
    Private = 2,
    System = 3,
    Subscribe = 4,
    Unsubscribe = 5,
    Ping = 6,
    Pong = 7,
    Error = 8,
    Ack = 9,
    File = 10,
    Typing = 11,
    Direct = 12,
    Thread = 13,
    UserList = 14,
    SetAlias = 15,
    Auth = 16,
    Join = 17,
    Offer = 18,
    Answer = 19,
    IceCandidate = 20,
    Mute = 21,
    Unmute = 22,
    Hold = 23,
    Dtmf = 24,
    Joined = 25,
    PeerJoined = 26,
    PeerLeft = 27,
    CallStateChanged = 28,
    RecordingStarted = 29,
    RecordingFinished = 30,
}

impl KindTag {
    /// Maps a raw `t` value to a known tag, if any.
    pub fn from_i64(t: i64) -> Option<Self> {
        let tag = match t {
            1 => Self::Broadcast,
            2 => Self::Private,
            3 => Self::System,
            4 => Self::Subscribe,
            5 => Self::Unsubscribe,
            6 => Self::Ping,
            7 => Self::Pong,
            8 => Self::Error,
            9 => Self::Ack,
            10 => Self::File,
            11 => Self::Typing,
            12 => Self::Direct,
            13 => Self::Thread,
            14 => Self::UserList,
            15 => Self::SetAlias,
            16 => Self::Auth,
            17 => Self::Join,
            18 => Self::Offer,
            19 => Self::Answer,
            20 => Self::IceCandidate,
            21 => Self::Mute,
            22 => Self::Unmute,
            23 => Self::Hold,
            24 => Self::Dtmf,
            25 => Self::Joined,
            26 => Self::PeerJoined,
            27 => Self::PeerLeft,
            28 => Self::CallStateChanged,
            29 => Self::RecordingStarted,
            30 => Self::RecordingFinished,
            _ => return None,
        };
        Some(tag)
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Maps a legacy `{event: "..."}` name to its canonical `t` value.
///
/// Unknown event names default to 3 (`system`) rather than erroring — a
/// client using an event name this server doesn't recognize still gets a
/// well-formed `Message`, just routed as an opaque system event.
pub fn legacy_event_to_tag(event: &str) -> i64 {
    match event {
        "broadcast" => 1,
        "private" => 2,
        "system" => 3,
        "subscribe" => 4,
        "unsubscribe" => 5,
        "ping" => 6,
        "pong" => 7,
        "error" => 8,
        "ack" => 9,
        "subscribed" | "unsubscribed" => 9,
        "file" => 10,
        "typing" => 11,
        "direct" => 12,
        "thread" => 13,
        "user_list" => 14,
        "set_alias" => 15,
        "auth" => 16,
        "join" => 17,
        "offer" => 18,
        "answer" => 19,
        // Hyphenated, unlike its neighbors — preserved as observed on the wire.
        "ice-candidate" => 20,
        "mute" => 21,
        "unmute" => 22,
        "hold" => 23,
        "dtmf" => 24,
        "joined" => 25,
        "peer_joined" => 26,
        "peer_left" => 27,
        "call_state_changed" => 28,
        "recording_started" => 29,
        "recording_finished" => 30,
        _ => 3,
    }
}
