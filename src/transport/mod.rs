pub mod memory;
pub mod mqtt;
pub mod traits;

pub use memory::{MemoryBroker, MemoryConnector, MemoryLink};
pub use mqtt::{MqttConnector, MqttLink, MqttSettings};
pub use traits::{BrokerConnector, BrokerLink, LinkEvent};
