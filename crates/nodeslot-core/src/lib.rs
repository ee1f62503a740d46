pub mod config;
pub mod device;
pub mod facts;
pub mod indices;
pub mod request;

pub use config::NodeConfig;
pub use device::{DeviceKind, PciDevice};
pub use facts::{ObjectKind, TopologyFacts, TopologyObject};
pub use indices::{IndexList, IndexListError};
pub use request::{Job, Req, ThreadUsage};
