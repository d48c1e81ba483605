pub mod session;

pub use session::{SessionCommand, SessionManager};
