//! Agent events and the callback bus that dispatches them.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventCallback};
pub use event::AgentEvent;
