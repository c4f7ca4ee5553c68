pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod lease;
pub mod options;
pub mod packet;
pub mod persist;
pub mod server;
pub mod vendor;

pub use config::Config;
pub use error::{Error, Result};
pub use handler::{Handler, LeaseSink};
pub use lease::{Lease, StaticLease};
pub use options::{DhcpOption, MessageType};
pub use packet::DhcpPacket;
pub use persist::{LeaseFile, LeaseStore, LeaseUpdate};
