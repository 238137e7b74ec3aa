pub mod definition;
pub mod loop_;
pub mod registry;
pub mod runner;
pub mod session;

pub use definition::Agent;
pub use loop_::{AgentLoop, TurnOutcome};
pub use registry::ToolRegistry;
pub use runner::Runner;
pub use session::{Content, Event, Part, Session, SessionNotFound, SessionStore};
