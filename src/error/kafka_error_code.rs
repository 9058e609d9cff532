//! Kafka protocol error codes for the pre-coordinator request family

/// Kafka protocol error codes
/// See: <https://kafka.apache.org/protocol.html#protocol_error_codes>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaErrorCode {
    /// No error
    NoError = 0,
    /// Unknown server error
    Unknown = -1,
    /// The requested offset is outside the range of offsets on the broker
    OffsetOutOfRange = 1,
    /// Message failed its CRC check or is otherwise corrupt
    InvalidMessage = 2,
    /// Unknown topic or partition
    UnknownTopicOrPartition = 3,
    /// Fetch size smaller than the smallest message on the partition
    InvalidFetchSize = 4,
    /// Leader not available (election in progress)
    LeaderNotAvailable = 5,
    /// The addressed broker is not the leader for the partition
    NotLeaderForPartition = 6,
    /// Request timed out
    RequestTimedOut = 7,
    /// Broker not available
    BrokerNotAvailable = 8,
    /// Replica not available
    ReplicaNotAvailable = 9,
    /// Message too large
    MessageSizeTooLarge = 10,
    /// Stale controller epoch
    StaleControllerEpoch = 11,
    /// Offset metadata string too large
    OffsetMetadataTooLarge = 12,
    /// Stale leader epoch
    StaleLeaderEpoch = 13,
}

impl KafkaErrorCode {
    /// Maps a wire-level code to the table entry, if it is a documented one.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::NoError),
            -1 => Some(Self::Unknown),
            1 => Some(Self::OffsetOutOfRange),
            2 => Some(Self::InvalidMessage),
            3 => Some(Self::UnknownTopicOrPartition),
            4 => Some(Self::InvalidFetchSize),
            5 => Some(Self::LeaderNotAvailable),
            6 => Some(Self::NotLeaderForPartition),
            7 => Some(Self::RequestTimedOut),
            8 => Some(Self::BrokerNotAvailable),
            9 => Some(Self::ReplicaNotAvailable),
            10 => Some(Self::MessageSizeTooLarge),
            11 => Some(Self::StaleControllerEpoch),
            12 => Some(Self::OffsetMetadataTooLarge),
            13 => Some(Self::StaleLeaderEpoch),
            _ => None,
        }
    }

    /// Human-readable description used by error rendering.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NoError => "No Error",
            Self::Unknown => "Unknown Error",
            Self::OffsetOutOfRange => "Offset Out Of Range",
            Self::InvalidMessage => "Invalid Message",
            Self::UnknownTopicOrPartition => "Unknown Topic Or Partition",
            Self::InvalidFetchSize => "Invalid Fetch Size",
            Self::LeaderNotAvailable => "Leader Not Available",
            Self::NotLeaderForPartition => "Not Leader For Partition",
            Self::RequestTimedOut => "Request Timed Out",
            Self::BrokerNotAvailable => "Broker Not Available",
            Self::ReplicaNotAvailable => "Replica Not Available",
            Self::MessageSizeTooLarge => "Message Size Too Large",
            Self::StaleControllerEpoch => "Stale Controller Epoch",
            Self::OffsetMetadataTooLarge => "Offset Metadata Too Large",
            Self::StaleLeaderEpoch => "Stale Leader Epoch",
        }
    }

    /// Returns true if retrying the request against the same or another
    /// broker may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LeaderNotAvailable
                | Self::NotLeaderForPartition
                | Self::RequestTimedOut
                | Self::BrokerNotAvailable
                | Self::ReplicaNotAvailable
        )
    }

    /// Convert to the i16 error code used on the wire
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }
}

/// A wire-level status code carried by an error, known or not.
///
/// Unrecognized codes are preserved as-is so operators see the numeric
/// value the broker actually sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KafkaCode(pub i16);

impl std::fmt::Display for KafkaCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match KafkaErrorCode::from_code(self.0) {
            Some(code) => write!(f, "{} (code {})", code.description(), self.0),
            None => write!(f, "Unrecognized Error Code ({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_codes_round_trip() {
        for code in [-1i16, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13] {
            let entry = KafkaErrorCode::from_code(code).expect("documented code");
            assert_eq!(entry.as_i16(), code);
        }
    }

    #[test]
    fn unknown_code_renders_numeric_value() {
        let rendered = KafkaCode(42).to_string();
        assert_eq!(rendered, "Unrecognized Error Code (42)");
    }

    #[test]
    fn known_code_renders_description() {
        assert_eq!(KafkaCode(1).to_string(), "Offset Out Of Range (code 1)");
    }

    #[test]
    fn leader_errors_are_retriable() {
        assert!(KafkaErrorCode::LeaderNotAvailable.is_retriable());
        assert!(KafkaErrorCode::NotLeaderForPartition.is_retriable());
        assert!(!KafkaErrorCode::OffsetOutOfRange.is_retriable());
    }
}
