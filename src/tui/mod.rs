//! Terminal user interface
//!
//! Renders the peer directory and the active conversation; all state it
//! shows comes from the directory and synchronizer components.

mod app;
mod compose;
mod ui;

pub use app::run;
