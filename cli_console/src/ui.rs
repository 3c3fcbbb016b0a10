use std::collections::VecDeque;

use ratatui::layout::{Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use client_core::{ConnectionPhase, ConnectionStatus, DerivedView, DisplayPoint, EntityRef};
use grid_schema::{GameId, PartyId, Phase, ResourceKind, WorldSnapshot};

/// Amount one offer keypress adds to the current asking price.
pub const OFFER_STEP: f64 = 5.0;

pub struct PartyRow {
    pub name: String,
    pub balance: f64,
    pub turn_active: bool,
    pub alive: bool,
    pub is_viewer: bool,
}

/// One selectable line in the entity pane, flattened from the snapshot and
/// its derived view so key handlers never re-derive eligibility.
pub struct EntityRow {
    pub entity: EntityRef,
    pub label: String,
    pub owner: String,
    pub display: DisplayPoint,
    pub acquirable: bool,
    pub biddable: bool,
    pub owned: bool,
    /// Operable state, links only.
    pub open: Option<bool>,
    /// Current asking price, resources only.
    pub offer: Option<f64>,
    pub price: f64,
}

pub struct UiState {
    pub game: GameId,
    pub viewer: PartyId,
    pub status: ConnectionStatus,
    pub round: Option<(u32, Phase)>,
    pub balance: f64,
    pub parties: Vec<PartyRow>,
    pub rows: Vec<EntityRow>,
    pub selected: usize,
    pub logs: VecDeque<String>,
    pub max_logs: usize,
}

impl UiState {
    pub fn new(game: GameId, viewer: PartyId) -> Self {
        Self {
            game,
            viewer,
            status: ConnectionStatus::default(),
            round: None,
            balance: 0.0,
            parties: Vec::new(),
            rows: Vec::new(),
            selected: 0,
            logs: VecDeque::new(),
            max_logs: 12,
        }
    }

    pub fn push_log<S: Into<String>>(&mut self, line: S) {
        let mut text: String = line.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }
        self.logs.push_front(text);
        while self.logs.len() > self.max_logs {
            self.logs.pop_back();
        }
    }

    /// Rebuild every pane source from the latest published state. Rows keep
    /// snapshot order (nodes, then links, then resources) so the selection
    /// index stays meaningful across refreshes.
    pub fn refresh(
        &mut self,
        status: ConnectionStatus,
        snapshot: Option<&WorldSnapshot>,
        derived: Option<&DerivedView>,
    ) {
        self.status = status;
        let (Some(snapshot), Some(derived)) = (snapshot, derived) else {
            return;
        };
        self.round = Some((snapshot.round, snapshot.phase));
        self.balance = derived.balance;

        self.parties = snapshot
            .parties
            .iter()
            .map(|party| PartyRow {
                name: party.name.clone(),
                balance: party.balance,
                turn_active: party.turn_active,
                alive: party.alive,
                is_viewer: party.id == self.viewer,
            })
            .collect();

        let mut rows = Vec::new();
        for node in &snapshot.nodes {
            let Some(view) = derived.entity(EntityRef::Node(node.id)) else {
                continue;
            };
            rows.push(EntityRow {
                entity: EntityRef::Node(node.id),
                label: format!(
                    "node {:<4} cap {:<3} hp {:<3}",
                    node.id.0, node.capacity, node.health
                ),
                owner: owner_name(snapshot, node.owner),
                display: view.display,
                acquirable: view.acquirable,
                biddable: view.biddable,
                owned: view.owned_by_viewer,
                open: None,
                offer: None,
                price: 0.0,
            });
        }
        for link in &snapshot.links {
            let Some(view) = derived.entity(EntityRef::Link(link.id)) else {
                continue;
            };
            rows.push(EntityRow {
                entity: EntityRef::Link(link.id),
                label: format!(
                    "link {:<4} {}-{} {}",
                    link.id.0,
                    link.node_a,
                    link.node_b,
                    if link.open { "open  " } else { "closed" }
                ),
                owner: owner_name(snapshot, link.owner),
                display: view.display,
                acquirable: view.acquirable,
                biddable: view.biddable,
                owned: view.owned_by_viewer,
                open: Some(link.open),
                offer: None,
                price: link.min_price,
            });
        }
        for resource in &snapshot.resources {
            let Some(view) = derived.entity(EntityRef::Resource(resource.id)) else {
                continue;
            };
            let kind = match resource.kind {
                ResourceKind::Generator => "gen ",
                ResourceKind::Load => "load",
            };
            rows.push(EntityRow {
                entity: EntityRef::Resource(resource.id),
                label: format!(
                    "res  {:<4} {} out {:>+7.1} offer {:>7.1}",
                    resource.id.0, kind, resource.output, resource.offer_price
                ),
                owner: owner_name(snapshot, resource.owner),
                display: view.display,
                acquirable: view.acquirable,
                biddable: view.biddable,
                owned: view.owned_by_viewer,
                open: None,
                offer: Some(resource.offer_price),
                price: resource.min_price,
            });
        }
        self.rows = rows;
        if self.selected >= self.rows.len() {
            self.selected = self.rows.len().saturating_sub(1);
        }
    }

    pub fn selected_row(&self) -> Option<&EntityRow> {
        self.rows.get(self.selected)
    }

    pub fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
        }
    }
}

fn owner_name(snapshot: &WorldSnapshot, owner: PartyId) -> String {
    snapshot
        .party(owner)
        .map(|party| party.name.clone())
        .unwrap_or_else(|| owner.to_string())
}

pub fn draw_ui(frame: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(9),
            Constraint::Length(6),
            Constraint::Min(8),
            Constraint::Length(7),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], state);
    draw_commands(frame, chunks[1]);
    draw_parties(frame, chunks[2], state);
    draw_entities(frame, chunks[3], state);
    draw_logs(frame, chunks[4], state);
}

fn draw_header(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Gridtable Console");
    let status = match state.status.phase {
        ConnectionPhase::Connected => {
            Span::styled("connected", Style::default().fg(Color::Green))
        }
        ConnectionPhase::Connecting => {
            Span::styled("connecting", Style::default().fg(Color::Yellow))
        }
        ConnectionPhase::Closing => Span::styled("closing", Style::default().fg(Color::Yellow)),
        ConnectionPhase::Disconnected if state.status.reconnect_pending => Span::styled(
            format!("reconnecting (attempt {})", state.status.attempts),
            Style::default().fg(Color::Yellow),
        ),
        ConnectionPhase::Disconnected => {
            Span::styled("disconnected", Style::default().fg(Color::Red))
        }
    };
    let round = match state.round {
        Some((round, phase)) => format!("round {} {}", round, phase),
        None => "waiting for state".to_string(),
    };
    let line = Line::from(vec![
        status,
        Span::raw(format!(
            " | game {} viewer {} | {} | balance {:.1}",
            state.game, state.viewer, round, state.balance
        )),
    ]);
    let text = Paragraph::new(line).wrap(Wrap { trim: true });
    frame.render_widget(block, area);
    frame.render_widget(
        text,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_commands(frame: &mut Frame, area: Rect) {
    let key = |label: &'static str, help: &'static str| {
        Line::from(vec![
            Span::styled(label, Style::default().fg(Color::Yellow)),
            Span::raw(help),
        ])
    };
    let lines = vec![
        key("up/down", "  select entity"),
        key("b", "        acquire selected (construction phase)"),
        key("o", "        raise offer on own resource (auction phase)"),
        key("l", "        toggle selected link open/closed"),
        key("e", "        end turn"),
        key("r", "        reconnect now"),
        key("q", "        quit"),
    ];
    let block = Block::default().borders(Borders::ALL).title("Commands");
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_parties(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Parties");
    let lines: Vec<Line> = state
        .parties
        .iter()
        .map(|party| {
            let name_style = if party.is_viewer {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::raw(if party.turn_active { "* " } else { "  " }),
                Span::styled(format!("{:<12}", party.name), name_style),
                Span::raw(format!(" {:>9.1}", party.balance)),
                Span::raw(if party.alive { "" } else { "  (out)" }),
                Span::raw(if party.is_viewer { "  (you)" } else { "" }),
            ])
        })
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_entities(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Entities");
    let lines: Vec<Line> = state
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let marker = if index == state.selected { "> " } else { "  " };
            let mut flags = String::new();
            flags.push(if row.acquirable { '$' } else { ' ' });
            flags.push(if row.biddable { 'o' } else { ' ' });
            flags.push(if row.owned { '*' } else { ' ' });
            Line::from(vec![
                Span::styled(marker, Style::default().fg(Color::Green)),
                Span::styled(flags, Style::default().fg(Color::Yellow)),
                Span::raw(" "),
                Span::raw(row.label.clone()),
                Span::styled(
                    format!(" {:<10}", row.owner),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw(format!(
                    " @({:>6.1},{:>6.1})",
                    row.display.x, row.display.y
                )),
                Span::raw(if row.acquirable {
                    format!("  price {:.1}", row.price)
                } else {
                    String::new()
                }),
            ])
        })
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_logs(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Logs");
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|entry| Line::from(Span::raw(entry)))
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}
