// Command registry and dispatch
//
// Commands are keyed by their textual form (`/restart`) and either run a named
// scheduler job or invoke a handler with one of four call shapes.

pub mod builtin;
pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod relay;
pub mod subsystem;

pub use builtin::BuiltinCommands;
pub use dispatcher::{bind_static_data, CommandDispatcher, DispatchOutcome};
pub use handler::{CallShape, CommandHandler, HandlerFuture};
pub use registry::{Command, CommandAction, CommandInfo, CommandRegistry};
pub use subsystem::CommandSubsystem;
