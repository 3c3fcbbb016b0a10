use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use tracing::{error, info, warn};

use client_core::{EntityRef, SessionController, SessionError};
use grid_schema::{GameId, LinkDirective, PartyId, TradeRef};

use crate::ui::{draw_ui, UiState, OFFER_STEP};

pub struct ConsoleApp {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    ui_state: UiState,
    controller: SessionController,
    log_receiver: Receiver<String>,
}

impl ConsoleApp {
    pub fn new(
        controller: SessionController,
        game: GameId,
        viewer: PartyId,
        log_receiver: Receiver<String>,
    ) -> Result<Self> {
        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        crossterm::terminal::enable_raw_mode()?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(Self {
            terminal,
            ui_state: UiState::new(game, viewer),
            controller,
            log_receiver,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut last_draw = Instant::now();

        loop {
            while let Ok(line) = self.log_receiver.try_recv() {
                self.ui_state.push_log(line);
            }

            while let Some(message) = self.controller.next_diagnostic() {
                warn!("Server rejected a request: {}", message);
                self.ui_state.push_log(format!("server: {}", message));
            }

            let snapshot = self.controller.snapshot();
            let derived = self.controller.derived();
            self.ui_state.refresh(
                self.controller.status(),
                snapshot.as_deref(),
                derived.as_deref(),
            );

            if last_draw.elapsed() >= Duration::from_millis(100) {
                self.terminal.draw(|frame| draw_ui(frame, &self.ui_state))?;
                last_draw = Instant::now();
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Up => self.ui_state.select_previous(),
                        KeyCode::Down => self.ui_state.select_next(),
                        KeyCode::Char('b') => self.acquire_selected(),
                        KeyCode::Char('o') => self.raise_offer(),
                        KeyCode::Char('l') => self.toggle_link(),
                        KeyCode::Char('e') => {
                            self.report(self.controller.end_turn(), "end turn");
                        }
                        KeyCode::Char('r') => {
                            self.report(self.controller.connect(), "reconnect");
                        }
                        _ => {}
                    }
                }
            }
        }

        self.terminal.show_cursor()?;
        crossterm::terminal::disable_raw_mode()?;
        Ok(())
    }

    fn acquire_selected(&mut self) {
        let selected = self
            .ui_state
            .selected_row()
            .map(|row| (row.entity, row.acquirable));
        let Some((entity, acquirable)) = selected else {
            self.ui_state.push_log("nothing selected");
            return;
        };
        if !acquirable {
            self.ui_state
                .push_log("selected entity is not acquirable right now");
            return;
        }
        match entity {
            EntityRef::Link(id) => {
                info!("Requesting acquisition of link {}", id);
                self.report(self.controller.acquire(TradeRef::Link(id)), "acquire");
            }
            EntityRef::Resource(id) => {
                info!("Requesting acquisition of resource {}", id);
                self.report(self.controller.acquire(TradeRef::Resource(id)), "acquire");
            }
            EntityRef::Node(_) => self.ui_state.push_log("nodes are not tradable"),
        }
    }

    fn raise_offer(&mut self) {
        let selected = self
            .ui_state
            .selected_row()
            .map(|row| (row.entity, row.biddable, row.offer));
        let Some((EntityRef::Resource(id), biddable, offer)) = selected else {
            self.ui_state
                .push_log("select one of your resources to change its offer");
            return;
        };
        if !biddable {
            self.ui_state
                .push_log("offers need the auction phase and your own resource");
            return;
        }
        let price = offer.unwrap_or(0.0) + OFFER_STEP;
        info!("Raising offer on resource {} to {:.1}", id, price);
        self.report(self.controller.update_offer(id, price), "offer update");
    }

    fn toggle_link(&mut self) {
        let selected = self
            .ui_state
            .selected_row()
            .map(|row| (row.entity, row.owned, row.open));
        let Some((EntityRef::Link(id), owned, open)) = selected else {
            self.ui_state.push_log("select a link to operate it");
            return;
        };
        if !owned {
            self.ui_state.push_log("only your own links can be operated");
            return;
        }
        let directive = if open == Some(true) {
            LinkDirective::Closed
        } else {
            LinkDirective::Open
        };
        info!("Requesting link {} {:?}", id, directive);
        self.report(self.controller.set_link_state(id, directive), "link toggle");
    }

    fn report(&mut self, result: Result<(), SessionError>, label: &str) {
        if let Err(err) = result {
            error!("Failed to send {} request: {}", label, err);
            self.ui_state.push_log(format!("{} failed: {}", label, err));
        }
    }
}
