use std::sync::mpsc::{self, Sender};

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use client_core::{SessionConfig, SessionController, Viewport};
use grid_schema::{GameId, PartyId};

mod app;
mod ui;

use app::ConsoleApp;

#[derive(Clone)]
struct ChannelWriter {
    sender: Sender<String>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(text) = String::from_utf8(buf.to_vec()) {
            let _ = self.sender.send(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Gridtable session console", long_about = None)]
struct Cli {
    /// Address of the gridtable game server.
    #[arg(long, default_value = "127.0.0.1:41500")]
    endpoint: String,
    /// Session to join.
    #[arg(long)]
    game: u64,
    /// Party to view and act as.
    #[arg(long)]
    viewer: i64,
    /// Display width entity positions are projected into.
    #[arg(long, default_value_t = 400.0)]
    viewport_width: f64,
    /// Display height entity positions are projected into.
    #[arg(long, default_value_t = 300.0)]
    viewport_height: f64,
    /// Margin kept clear around the projected layout.
    #[arg(long, default_value_t = 20.0)]
    viewport_padding: f64,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    // Route log output into the TUI's log pane instead of stdout, which the
    // terminal backend owns once raw mode is on.
    let (log_tx, log_rx) = mpsc::channel::<String>();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(move || ChannelWriter {
            sender: log_tx.clone(),
        })
        .init();

    let cli = Cli::parse();
    let game = GameId(cli.game);
    let viewer = PartyId(cli.viewer);
    let mut config = SessionConfig::new(cli.endpoint.clone(), game, viewer);
    config.viewport = Viewport::new(
        cli.viewport_width,
        cli.viewport_height,
        cli.viewport_padding,
    );

    info!("Joining game {} as party {} at {}", game, viewer, cli.endpoint);
    let controller = SessionController::start(config)?;
    controller.connect()?;

    let console = ConsoleApp::new(controller, game, viewer, log_rx)?;
    console.run()
}
