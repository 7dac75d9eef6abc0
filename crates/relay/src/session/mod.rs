//! Session store access.
//!
//! Sessions live in the terminal multiplexer; this module defines the narrow
//! interface the relay uses to reach them and the tmux implementation.

pub mod store;
pub mod tmux;

pub use store::{SessionName, SessionStore, StoreError};
pub use tmux::TmuxStore;
