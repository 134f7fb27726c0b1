//! TUI application state and main event loop

use std::sync::Arc;

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures::StreamExt;
use ratatui::DefaultTerminal;

use crate::directory::PeerDirectory;
use crate::models::Identity;
use crate::store::DocumentStore;
use crate::sync::{ConversationSync, SyncState};

use super::compose::ComposeState;
use super::ui;

/// Active pane in the TUI.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    #[default]
    Peers,
    Conversation,
}

impl Pane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pane::Peers => "peers",
            Pane::Conversation => "conversation",
        }
    }
}

/// Application state.
pub struct App {
    /// Whether the app should exit.
    pub should_exit: bool,
    /// Signed-in identity, passed in by the owner.
    pub identity: Identity,
    /// Live peer list.
    pub directory: PeerDirectory,
    /// Active conversation state machine.
    pub sync: ConversationSync,
    /// Compose input.
    pub compose: ComposeState,
    /// Selected row in the peer list.
    pub selected: usize,
    /// Active pane.
    pub active_pane: Pane,
    /// Transient status line: message and whether it is an error.
    pub status: Option<(String, bool)>,
}

impl App {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Identity) -> Self {
        let directory = PeerDirectory::new(Arc::clone(&store), identity.id.clone());
        let sync = ConversationSync::new(store, identity.id.clone());
        Self {
            should_exit: false,
            identity,
            directory,
            sync,
            compose: ComposeState::default(),
            selected: 0,
            active_pane: Pane::default(),
            status: None,
        }
    }

    /// Handle one terminal key press.
    async fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match self.active_pane {
            Pane::Peers => self.handle_peers_key(key.code),
            Pane::Conversation => self.handle_conversation_key(key.code).await,
        }
    }

    fn handle_peers_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') => self.should_exit = true,
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let last = self.directory.peers().len().saturating_sub(1);
                self.selected = (self.selected + 1).min(last);
            }
            KeyCode::Char('r') => {
                // Manual retry of a failed directory stream.
                self.directory.reconnect();
            }
            KeyCode::Enter => {
                if let Some(peer) = self.directory.peers().get(self.selected).cloned() {
                    self.status = None;
                    self.sync.select_peer(peer);
                    self.active_pane = Pane::Conversation;
                }
            }
            _ => {}
        }
    }

    async fn handle_conversation_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => {
                self.sync.clear_peer();
                self.compose = ComposeState::default();
                self.active_pane = Pane::Peers;
            }
            KeyCode::Enter => self.send_current_input().await,
            KeyCode::Backspace => self.compose.backspace(),
            KeyCode::Left => self.compose.move_left(),
            KeyCode::Right => self.compose.move_right(),
            KeyCode::Home => self.compose.move_home(),
            KeyCode::End => self.compose.move_end(),
            KeyCode::Char(c) => self.compose.insert_char(c),
            _ => {}
        }
    }

    /// Send the compose box contents; on failure the text is preserved so
    /// the user can resubmit.
    async fn send_current_input(&mut self) {
        let Some(text) = self.compose.take() else {
            return;
        };
        match self.sync.send_message(&text).await {
            Ok(_) => self.status = None,
            Err(e) => {
                self.status = Some((format!("send failed: {}", e), true));
                self.compose.restore(text);
            }
        }
    }

    /// Retry hint for the status bar when the conversation stream failed.
    pub fn sync_error(&self) -> Option<String> {
        match self.sync.state() {
            SyncState::Error(e) => Some(format!("{} (Enter on the peer to retry)", e)),
            _ => None,
        }
    }

    fn clamp_selection(&mut self) {
        let last = self.directory.peers().len().saturating_sub(1);
        self.selected = self.selected.min(last);
    }
}

/// Run the TUI until the user quits.
pub async fn run(store: Arc<dyn DocumentStore>, identity: Identity) -> Result<()> {
    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, App::new(store, identity)).await;
    ratatui::restore();
    result
}

/// One iteration's wake-up source.
enum Wake {
    Input(Option<std::io::Result<Event>>),
    Directory,
    Sync,
}

async fn run_app(terminal: &mut DefaultTerminal, mut app: App) -> Result<()> {
    let mut events = EventStream::new();

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, &app))?;

        let wake = tokio::select! {
            maybe_event = events.next() => Wake::Input(maybe_event),
            _ = app.directory.next_event() => Wake::Directory,
            _ = app.sync.next_event() => Wake::Sync,
        };

        match wake {
            Wake::Input(Some(Ok(Event::Key(key)))) => app.handle_key(key).await,
            Wake::Input(Some(Ok(_))) => {} // resize etc., handled on next draw
            Wake::Input(Some(Err(e))) => return Err(e.into()),
            Wake::Input(None) => break,
            Wake::Directory => app.clamp_selection(),
            Wake::Sync => {}
        }
    }

    Ok(())
}
