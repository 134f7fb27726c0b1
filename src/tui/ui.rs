//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use crate::models::{Message, PeerProfile, Presence};
use crate::sync::SyncState;

use super::app::{App, Pane};
use super::compose;

/// Presence dot symbol and color.
fn presence_indicator(presence: Presence) -> (&'static str, Color) {
    if presence.is_online() {
        ("*", Color::Green)
    } else {
        ("o", Color::DarkGray)
    }
}

/// Main render function.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Layout: header (1 line) + main content + status bar (1 line)
    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    // Split main area: peer sidebar (24 cols) + conversation
    let [sidebar_area, content_area] =
        Layout::horizontal([Constraint::Length(24), Constraint::Fill(1)]).areas(main_area);

    render_peers(
        sidebar_area,
        frame.buffer_mut(),
        app,
        app.active_pane == Pane::Peers,
    );

    let [messages_area, compose_area] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
    ])
    .areas(content_area);

    render_conversation(messages_area, frame.buffer_mut(), app);
    compose::render(
        compose_area,
        frame,
        &app.compose,
        app.active_pane == Pane::Conversation,
    );

    render_status(status_area, frame.buffer_mut(), app);
}

/// Header bar: app title left, signed-in user right.
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = " pairchat";
    let user = format!("{} <{}> ", app.identity.display_name, app.identity.email);
    let padding_width = (area.width as usize)
        .saturating_sub(title.width())
        .saturating_sub(user.width());

    let line = Line::from(vec![
        Span::styled(
            title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" ".repeat(padding_width)),
        Span::styled(user, Style::default().fg(Color::Cyan)),
    ]);
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Peer sidebar: presence dot + display name per row.
fn render_peers(area: Rect, buf: &mut Buffer, app: &App, focused: bool) {
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(border_style)
        .title(" Peers ");
    let inner = block.inner(area);
    block.render(area, buf);

    if app.directory.peers().is_empty() {
        Paragraph::new(Span::styled(
            "(no peers yet)",
            Style::default().fg(Color::DarkGray),
        ))
        .render(inner, buf);
        return;
    }

    let name_width = (inner.width as usize).saturating_sub(2);
    let lines: Vec<Line> = app
        .directory
        .peers()
        .iter()
        .enumerate()
        .map(|(i, peer)| peer_line(peer, name_width, i == app.selected && focused))
        .collect();
    Paragraph::new(lines).render(inner, buf);
}

fn peer_line(peer: &PeerProfile, name_width: usize, selected: bool) -> Line<'static> {
    let (dot, dot_color) = presence_indicator(peer.presence);
    let name = truncate_to_width(&peer.display_name, name_width);
    let name_style = if selected {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };
    Line::from(vec![
        Span::styled(dot.to_string(), Style::default().fg(dot_color)),
        Span::raw(" "),
        Span::styled(name, name_style),
    ])
}

/// Conversation pane: ordered log with read ticks on own messages.
fn render_conversation(area: Rect, buf: &mut Buffer, app: &App) {
    let title = match app.sync.peer() {
        Some(peer) => format!(" {} ", peer.display_name),
        None => " Conversation ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);
    let inner = block.inner(area);
    block.render(area, buf);

    let placeholder = match app.sync.state() {
        SyncState::Idle => Some("Select a peer and press Enter to chat."),
        SyncState::Loading => Some("Loading conversation..."),
        _ => None,
    };
    if let Some(text) = placeholder {
        Paragraph::new(Span::styled(text, Style::default().fg(Color::DarkGray)))
            .render(inner, buf);
        return;
    }

    // Show the tail of the log that fits the pane.
    let visible = inner.height as usize;
    let messages = app.sync.messages();
    let start = messages.len().saturating_sub(visible);
    let lines: Vec<Line> = messages[start..]
        .iter()
        .map(|m| message_line(m, app))
        .collect();
    Paragraph::new(lines).render(inner, buf);
}

fn message_line(message: &Message, app: &App) -> Line<'static> {
    let own = message.sender_id == app.identity.id;
    let sender = if own {
        "you".to_string()
    } else {
        app.sync
            .peer()
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| message.sender_id.clone())
    };

    let mut spans = vec![
        Span::styled(
            message.created_at.format("[%H:%M] ").to_string(),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!("{}: ", sender),
            Style::default().fg(if own { Color::Cyan } else { Color::Green }),
        ),
        Span::raw(message.text.clone()),
    ];
    if own {
        // One tick sent, two ticks read by the peer.
        let (tick, color) = if message.read {
            (" vv", Color::Green)
        } else {
            (" v", Color::DarkGray)
        };
        spans.push(Span::styled(tick.to_string(), Style::default().fg(color)));
    }
    Line::from(spans)
}

/// Status bar: sticky errors first, then state and key hints.
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    if let Some((msg, is_error)) = &app.status {
        let color = if *is_error { Color::Red } else { Color::Green };
        Paragraph::new(Span::styled(
            format!(" {} ", msg),
            Style::default().fg(color).bg(Color::DarkGray),
        ))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
        return;
    }
    if let Some(e) = app.directory.error() {
        Paragraph::new(Span::styled(
            format!(" peer list: {} (r to reconnect) ", e),
            Style::default().fg(Color::Red).bg(Color::DarkGray),
        ))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
        return;
    }
    if let Some(e) = app.sync_error() {
        Paragraph::new(Span::styled(
            format!(" conversation: {} ", e),
            Style::default().fg(Color::Red).bg(Color::DarkGray),
        ))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
        return;
    }

    let state = match app.sync.state() {
        SyncState::Idle => "idle",
        SyncState::Loading => "loading",
        SyncState::Synced => "synced",
        SyncState::Error(_) => "error",
    };
    let sep = Span::styled(" | ", Style::default().fg(Color::DarkGray));
    let line = Line::from(vec![
        Span::styled(format!(" {} ", state), Style::default().fg(Color::Green)),
        sep.clone(),
        Span::styled(
            format!("pane: {}", app.active_pane.as_str()),
            Style::default().fg(Color::Cyan),
        ),
        sep,
        Span::styled(
            "Enter: open/send  Esc: back  q: quit",
            Style::default().fg(Color::Gray),
        ),
    ]);
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Truncate a string to the given display width.
fn truncate_to_width(s: &str, width: usize) -> String {
    if s.width() <= width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > width.saturating_sub(1) {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push('~');
    out
}
