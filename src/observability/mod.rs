pub mod logging;

pub use logging::{init_daemon_logging, init_logging};
