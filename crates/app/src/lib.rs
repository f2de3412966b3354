// Operator prompt for first-contact peers
pub mod console;
// Logging, signal handling and the serve loop
pub mod process;
// App state (configuration, paths)
pub mod state;

pub use process::{init_logging, run_server, ServeMode};
pub use state::{AdmissionPolicy, AppConfig, AppState, StateError};
