//! Wire-level data model for the gridtable synchronization protocol.
//!
//! Shared by the client core and any process that speaks the protocol
//! (test stubs, future servers): entity identifiers, the snapshot schema,
//! the command/envelope types, the JSON codec, and the length-prefixed
//! frame codec the transport uses.

mod envelope;
mod frame;
mod state;

pub use envelope::{
    decode_client_envelope, decode_server_event, encode_client_envelope, encode_error,
    encode_state_replace, ClientEnvelope, CodecError, Command, LinkDirective, ServerEvent,
    TradeRef, KIND_ERROR, KIND_STATE_REPLACE,
};
pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use state::{
    GameId, Holdings, LinkId, LinkState, NodeId, NodeState, PartyId, PartyState, Phase,
    ResourceId, ResourceKind, ResourceState, WorldSnapshot,
};
