//! Relay of chat and file-transfer events between paired identities

pub mod protocol;
pub mod router;

pub use protocol::{
    ChatMessage, ClientEvent, FileMetadata, FileNotice, ProtocolError, Route, ServerEvent,
};
pub use router::{RelayOutcome, RelayRouter};
