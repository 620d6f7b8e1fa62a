pub mod settings;

pub use settings::{validate, GatewayConfig, ModbusConfig, OpcUaConfig, RtuSlaveConfig, SlaveConfig, TcpSlaveConfig};
