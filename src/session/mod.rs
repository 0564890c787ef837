pub mod console;
pub mod context;

pub use console::{ConsoleLease, ConsoleSessionManager};
pub use context::SessionContext;
