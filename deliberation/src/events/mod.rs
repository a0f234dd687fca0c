//! Discussion events and the fire-and-forget bus that carries them.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │  Scheduler   │────▶│  Event Bus   │────▶│  Subscribers     │
//! │  (publish)   │     │  (broadcast) │     │  (JSONL sink...) │
//! └──────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! The scheduler never waits on a subscriber and never learns whether an
//! event was delivered.

pub mod bus;
pub mod types;

pub use bus::{EventBus, SharedEventBus};
pub use types::DiscussionEvent;
