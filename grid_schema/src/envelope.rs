use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{GameId, LinkId, PartyId, ResourceId, WorldSnapshot};

/// Inbound envelope kind carrying a full replacement snapshot.
pub const KIND_STATE_REPLACE: &str = "state_replace";
/// Inbound envelope kind carrying a server-reported diagnostic.
pub const KIND_ERROR: &str = "error";

/// Address of a tradable entity. Links and resources occupy separate id
/// spaces, so acquisition commands carry the kind alongside the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TradeRef {
    Link(LinkId),
    Resource(ResourceId),
}

/// Requested operable state for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirective {
    Open,
    Closed,
}

/// An outbound intent. Immutable once enqueued; the wire kind string is the
/// snake_case variant name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Command {
    AcquireRequest { entity: TradeRef },
    UpdateOfferRequest { resource: ResourceId, price: f64 },
    SetLinkStateRequest { link: LinkId, state: LinkDirective },
    EndTurn,
    RequestState,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::AcquireRequest { .. } => "acquire_request",
            Command::UpdateOfferRequest { .. } => "update_offer_request",
            Command::SetLinkStateRequest { .. } => "set_link_state_request",
            Command::EndTurn => "end_turn",
            Command::RequestState => "request_state",
        }
    }
}

/// One outbound wire unit: a command tagged with the session identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub command: Command,
    #[serde(rename = "gameId")]
    pub game: GameId,
    #[serde(rename = "viewerId")]
    pub viewer: PartyId,
}

impl ClientEnvelope {
    pub fn new(command: Command, game: GameId, viewer: PartyId) -> Self {
        Self {
            command,
            game,
            viewer,
        }
    }
}

/// Classification of one inbound frame. Only two kinds are acted on; every
/// other well-formed envelope is reported as `Ignored` so the caller can
/// drop it with a log line.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StateReplace(WorldSnapshot),
    Error(String),
    Ignored(String),
}

/// Error raised when a frame cannot be read as an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "gameId")]
    #[allow(dead_code)]
    game: GameId,
    #[serde(rename = "viewerId")]
    #[allow(dead_code)]
    viewer: PartyId,
}

#[derive(Debug, Deserialize)]
struct StatePayload {
    snapshot: WorldSnapshot,
}

pub fn encode_client_envelope(envelope: &ClientEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn decode_client_envelope(bytes: &[u8]) -> Result<ClientEnvelope, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a full-replacement snapshot envelope addressed to `viewer`.
pub fn encode_state_replace(
    snapshot: &WorldSnapshot,
    viewer: PartyId,
) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::json!({
        "kind": KIND_STATE_REPLACE,
        "payload": { "snapshot": snapshot },
        "gameId": snapshot.game,
        "viewerId": viewer,
    });
    Ok(serde_json::to_vec(&value)?)
}

/// Encode a server diagnostic envelope.
pub fn encode_error(message: &str, game: GameId, viewer: PartyId) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::json!({
        "kind": KIND_ERROR,
        "payload": message,
        "gameId": game,
        "viewerId": viewer,
    });
    Ok(serde_json::to_vec(&value)?)
}

/// Parse one inbound frame and classify it.
pub fn decode_server_event(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    match raw.kind.as_str() {
        KIND_STATE_REPLACE => {
            let payload: StatePayload = serde_json::from_value(raw.payload)?;
            Ok(ServerEvent::StateReplace(payload.snapshot))
        }
        KIND_ERROR => {
            let message: String = serde_json::from_value(raw.payload)?;
            Ok(ServerEvent::Error(message))
        }
        _ => Ok(ServerEvent::Ignored(raw.kind)),
    }
}
