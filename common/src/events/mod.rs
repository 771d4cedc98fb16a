// Event bus module for in-process publish/subscribe

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventHandler, DEFAULT_CAPACITY};
pub use event::{Event, EventType};
