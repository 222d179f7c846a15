//! GaugeLink Publisher Library
//!
//! The structural behavior every northbound publisher shares: a protocol
//! driver capability trait, the reconnect/gate-watch/peek+emit runner, the
//! status sidecar writer and the daemon logging facade.

pub mod driver;
pub mod logging;
pub mod runner;
pub mod signals;
pub mod status;

pub use driver::ProtocolDriver;
pub use runner::{PublisherRunner, RunnerOptions};
pub use signals::spawn_signal_handler;
pub use status::write_component_status;
