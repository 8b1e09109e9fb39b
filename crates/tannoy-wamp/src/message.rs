//! WAMP v1 message taxonomy.

/// The nine WAMP v1 message types, tagged by the integer id that leads
/// every wire frame.
///
/// A frame is a JSON array `[type_id, ...]`; the payload shape depends on
/// the type:
///
/// | id | type | payload |
/// |---|---|---|
/// | 0 | Welcome | `[0, session_id, version, server_id]` |
/// | 1 | Prefix | `[1, prefix, expansion_uri]` |
/// | 2 | Call | `[2, call_id, method_uri, arg...]` |
/// | 3 | CallResult | `[3, call_id, result]` |
/// | 4 | CallError | `[4, call_id, error_uri, description, details?]` |
/// | 5 | Subscribe | `[5, topic_uri]` |
/// | 6 | Unsubscribe | `[6, topic_uri]` |
/// | 7 | Publish | `[7, topic_uri, event, exclude?, eligible?]` |
/// | 8 | Event | `[8, topic_uri, event]` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Welcome = 0,
    Prefix = 1,
    Call = 2,
    CallResult = 3,
    CallError = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    Publish = 7,
    Event = 8,
}

/// Protocol version sent in Welcome frames.
pub const WAMP_VERSION: u64 = 1;

impl MessageType {
    /// Maps a wire type id to a message type.
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            0 => Some(Self::Welcome),
            1 => Some(Self::Prefix),
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            5 => Some(Self::Subscribe),
            6 => Some(Self::Unsubscribe),
            7 => Some(Self::Publish),
            8 => Some(Self::Event),
            _ => None,
        }
    }

    /// The wire type id.
    pub fn id(self) -> u64 {
        self as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for id in 0..=8 {
            let message_type = MessageType::from_id(id).unwrap();
            assert_eq!(message_type.id(), id);
        }
        assert_eq!(MessageType::from_id(9), None);
    }
}
