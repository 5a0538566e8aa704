pub mod alerts;
pub mod logging;

#[cfg(test)]
pub(crate) mod http_stub;

pub use alerts::{AlertManager, EmailMonitor, EmailSender};
pub use logging::init_logging;
