#![allow(dead_code)]

use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use client_core::SessionConfig;
use grid_schema::{
    decode_client_envelope, encode_error, encode_state_replace, read_frame, write_frame,
    ClientEnvelope, GameId, LinkId, LinkState, NodeId, NodeState, PartyId, PartyState, Phase,
    ResourceId, ResourceKind, ResourceState, WorldSnapshot,
};

/// Generous bound for anything that should happen promptly.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimal scripted game server: accepts connections, decodes every inbound
/// envelope onto a channel, and writes whatever frames a test tells it to.
pub struct StubServer {
    addr: SocketAddr,
    connections: Receiver<StubConnection>,
}

impl StubServer {
    pub fn start() -> Result<StubServer> {
        let listener = TcpListener::bind("127.0.0.1:0").context("stub server bind")?;
        let addr = listener.local_addr().context("stub server local addr")?;
        let (conn_tx, conn_rx) = unbounded();
        thread::spawn(move || accept_loop(listener, conn_tx));
        Ok(StubServer {
            addr,
            connections: conn_rx,
        })
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Next client connection, in accept order.
    pub fn accept(&self, timeout: Duration) -> Result<StubConnection> {
        self.connections
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("no client connected within {:?}", timeout))
    }

    /// Assert that no client dials in for the whole window.
    pub fn expect_no_connection(&self, window: Duration) -> Result<()> {
        match self.connections.recv_timeout(window) {
            Ok(_) => Err(anyhow!("unexpected client connection")),
            Err(_) => Ok(()),
        }
    }
}

fn accept_loop(listener: TcpListener, connections: Sender<StubConnection>) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else {
            return;
        };
        let _ = stream.set_nodelay(true);
        let Ok(reader) = stream.try_clone() else {
            return;
        };
        let (frame_tx, frame_rx) = unbounded();
        thread::spawn(move || pump_envelopes(reader, frame_tx));
        if connections
            .send(StubConnection {
                stream,
                frames: frame_rx,
            })
            .is_err()
        {
            return;
        }
    }
}

fn pump_envelopes(mut stream: TcpStream, frames: Sender<ClientEnvelope>) {
    while let Ok(bytes) = read_frame(&mut stream) {
        let Ok(envelope) = decode_client_envelope(&bytes) else {
            return;
        };
        if frames.send(envelope).is_err() {
            return;
        }
    }
}

pub struct StubConnection {
    stream: TcpStream,
    frames: Receiver<ClientEnvelope>,
}

impl StubConnection {
    /// Next envelope the client sent, in wire order.
    pub fn recv(&self, timeout: Duration) -> Result<ClientEnvelope> {
        self.frames
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("no envelope within {:?}", timeout))
    }

    /// Receive one envelope and check its wire kind.
    pub fn expect_kind(&self, kind: &str, timeout: Duration) -> Result<ClientEnvelope> {
        let envelope = self.recv(timeout)?;
        if envelope.command.kind() != kind {
            return Err(anyhow!(
                "expected {} envelope, got {}",
                kind,
                envelope.command.kind()
            ));
        }
        Ok(envelope)
    }

    /// Assert the client stays quiet for the whole window.
    pub fn expect_silence(&self, window: Duration) -> Result<()> {
        match self.frames.recv_timeout(window) {
            Ok(envelope) => Err(anyhow!(
                "unexpected {} envelope",
                envelope.command.kind()
            )),
            Err(_) => Ok(()),
        }
    }

    pub fn send_snapshot(&mut self, snapshot: &WorldSnapshot, viewer: PartyId) -> Result<()> {
        let bytes = encode_state_replace(snapshot, viewer)?;
        write_frame(&mut self.stream, &bytes)?;
        Ok(())
    }

    pub fn send_error(&mut self, message: &str, game: GameId, viewer: PartyId) -> Result<()> {
        let bytes = encode_error(message, game, viewer)?;
        write_frame(&mut self.stream, &bytes)?;
        Ok(())
    }

    /// Write arbitrary bytes as one frame, well-formed or not.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, payload)?;
        Ok(())
    }

    /// Drop the connection the way a crashed server would.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Session config with the reconnect knobs shrunk to test scale.
pub fn test_config(endpoint: &str, game: GameId, viewer: PartyId) -> SessionConfig {
    let mut config = SessionConfig::new(endpoint, game, viewer);
    config.connect_timeout = Duration::from_millis(500);
    config.reconnect_floor = Duration::from_millis(50);
    config.reconnect_ceiling = Duration::from_millis(400);
    config
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A small but fully linked world: two player parties, two nodes, one
/// house link between them, one acquirable house resource (id 30) and one
/// resource owned by party 1 (id 31).
pub fn sample_snapshot(game: GameId, round: u32, phase: Phase) -> WorldSnapshot {
    WorldSnapshot {
        game,
        round,
        phase,
        parties: vec![
            PartyState {
                id: PartyId::HOUSE,
                name: "house".into(),
                color: "#888888".into(),
                balance: 0.0,
                turn_active: false,
                alive: true,
            },
            PartyState {
                id: PartyId(1),
                name: "alice".into(),
                color: "#ff0000".into(),
                balance: 500.0,
                turn_active: true,
                alive: true,
            },
            PartyState {
                id: PartyId(2),
                name: "bob".into(),
                color: "#0000ff".into(),
                balance: 350.0,
                turn_active: false,
                alive: true,
            },
        ],
        nodes: vec![
            NodeState {
                id: NodeId(1),
                owner: PartyId::HOUSE,
                x: -30.0,
                y: -15.0,
                capacity: 4,
                health: 100,
            },
            NodeState {
                id: NodeId(2),
                owner: PartyId::HOUSE,
                x: 30.0,
                y: 15.0,
                capacity: 4,
                health: 100,
            },
        ],
        links: vec![LinkState {
            id: LinkId(10),
            owner: PartyId::HOUSE,
            node_a: NodeId(1),
            node_b: NodeId(2),
            capacity: 50.0,
            health: 100,
            open: true,
            min_price: 20.0,
            for_sale: None,
        }],
        resources: vec![
            ResourceState {
                id: ResourceId(30),
                owner: PartyId::HOUSE,
                node: NodeId(1),
                kind: ResourceKind::Generator,
                output: 40.0,
                health: 100,
                active: true,
                min_price: 40.0,
                offer_price: 0.0,
                for_sale: None,
            },
            ResourceState {
                id: ResourceId(31),
                owner: PartyId(1),
                node: NodeId(2),
                kind: ResourceKind::Load,
                output: -25.0,
                health: 100,
                active: true,
                min_price: 30.0,
                offer_price: 55.0,
                for_sale: Some(false),
            },
        ],
    }
}
