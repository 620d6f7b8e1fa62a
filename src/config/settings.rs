use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::tags::registry::TagDefinition;

fn default_poll_interval() -> f64 {
    1.0
}

fn default_tcp_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_baudrate() -> u32 {
    9600
}

fn default_parity() -> char {
    'N'
}

fn default_stopbits() -> u8 {
    1
}

fn default_databits() -> u8 {
    8
}

fn default_slave_id() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpSlaveConfig {
    pub ip: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub byte_swap: bool,
    #[serde(default)]
    pub word_swap: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtuSlaveConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_parity")]
    pub parity: char,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
    #[serde(default = "default_databits")]
    pub databits: u8,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    #[serde(default)]
    pub byte_swap: bool,
    #[serde(default)]
    pub word_swap: bool,
}

/// Presence of `ip` implies TCP, else RTU. `untagged` tries `Tcp`
/// first, which requires `ip`; a slave without `ip` falls through to `Rtu`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SlaveConfig {
    Tcp(TcpSlaveConfig),
    Rtu(RtuSlaveConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
    pub slaves: HashMap<String, SlaveConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpcUaConfig {
    pub endpoint: String,
    pub namespace: String,
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub modbus: ModbusConfig,
    pub opcua: OpcUaConfig,
    pub nodes: Vec<TagDefinition>,
}

impl GatewayConfig {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(config_path).format(FileFormat::Yaml))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        s.try_deserialize()
    }
}

const VALID_DATATYPES: &[&str] = &[
    "int16", "uint16", "int32", "uint32", "float", "double", "bool", "string",
];

/// Structural validation of an uploaded/loaded configuration document, run
/// on an in-memory YAML document before it ever touches the active config
/// file. Returns `Ok(())` when valid, `Err(message)` otherwise.
pub fn validate(yaml: &str) -> Result<(), String> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| format!("YAML syntax error: {e}"))?;
    let map = doc
        .as_mapping()
        .ok_or_else(|| "configuration root must be a mapping".to_string())?;

    for key in ["modbus", "opcua", "nodes"] {
        if !map.contains_key(key) {
            return Err(format!("missing required section: {key}"));
        }
    }

    let modbus = &map["modbus"];
    let slaves = modbus
        .get("slaves")
        .and_then(|s| s.as_mapping())
        .ok_or_else(|| "no modbus slaves defined".to_string())?;
    if slaves.is_empty() {
        return Err("no modbus slaves defined".to_string());
    }
    let slave_names: Vec<String> = slaves
        .keys()
        .filter_map(|k| k.as_str().map(|s| s.to_string()))
        .collect();
    for (name, slave) in slaves {
        let name = name.as_str().unwrap_or("<unknown>");
        let has_ip = slave.get("ip").is_some();
        let has_port = slave.get("port").is_some();
        if !has_ip && !has_port {
            return Err(format!(
                "slave '{name}' needs an 'ip' (TCP) or 'port' (RTU)"
            ));
        }
    }

    let nodes = map
        .get("nodes")
        .and_then(|n| n.as_sequence())
        .ok_or_else(|| "nodes must be a list".to_string())?;
    for node in nodes {
        let name = node
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("unknown");
        for key in ["node_id", "name", "modbus"] {
            if node.get(key).is_none() {
                return Err(format!("node '{name}' missing required key: {key}"));
            }
        }
        let m = &node["modbus"];
        let slave = m
            .get("slave")
            .and_then(|s| s.as_str())
            .ok_or_else(|| format!("node '{name}' missing modbus.slave"))?;
        if !slave_names.iter().any(|s| s == slave) {
            return Err(format!(
                "node '{name}' references undefined slave '{slave}'"
            ));
        }
        let datatype = m
            .get("datatype")
            .and_then(|d| d.as_str())
            .ok_or_else(|| format!("node '{name}' missing modbus.datatype"))?;
        if !VALID_DATATYPES.contains(&datatype) {
            return Err(format!(
                "node '{name}' has invalid datatype '{datatype}'"
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r#"
modbus:
  poll_interval: 1.0
  slaves:
    plc1:
      ip: 127.0.0.1
      port: 502
nodes:
  - node_id: "ns=2;s=Temp"
    name: Temp
    modbus:
      slave: plc1
      function: holding
      address: 100
      datatype: float
opcua:
  endpoint: "opc.tcp://0.0.0.0:4840/gateway"
  namespace: "http://example.com/gateway/"
"#;

    #[test]
    fn valid_config_passes_validation() {
        assert!(validate(VALID_YAML).is_ok());
    }

    #[test]
    fn missing_top_level_key_is_rejected() {
        let yaml = "modbus:\n  slaves:\n    a:\n      ip: 1.1.1.1\nnodes: []\n";
        let err = validate(yaml).unwrap_err();
        assert!(err.contains("opcua"));
    }

    #[test]
    fn empty_slave_set_is_rejected() {
        let yaml = "modbus:\n  slaves: {}\nopcua:\n  endpoint: x\n  namespace: y\nnodes: []\n";
        assert!(validate(yaml).unwrap_err().contains("no modbus slaves"));
    }

    #[test]
    fn slave_missing_both_discriminators_is_rejected() {
        let yaml = "modbus:\n  slaves:\n    a:\n      unit_id: 1\nopcua:\n  endpoint: x\n  namespace: y\nnodes: []\n";
        let err = validate(yaml).unwrap_err();
        assert!(err.contains("needs an 'ip'"));
    }

    #[test]
    fn node_referencing_undefined_slave_is_rejected() {
        let yaml = r#"
modbus:
  slaves:
    plc1:
      ip: 127.0.0.1
opcua:
  endpoint: x
  namespace: y
nodes:
  - node_id: "ns=2;s=A"
    name: A
    modbus:
      slave: missing
      function: holding
      address: 1
      datatype: int16
"#;
        let err = validate(yaml).unwrap_err();
        assert!(err.contains("undefined slave"));
    }

    #[test]
    fn invalid_datatype_is_rejected() {
        let yaml = r#"
modbus:
  slaves:
    plc1:
      ip: 127.0.0.1
opcua:
  endpoint: x
  namespace: y
nodes:
  - node_id: "ns=2;s=A"
    name: A
    modbus:
      slave: plc1
      function: holding
      address: 1
      datatype: not_a_type
"#;
        let err = validate(yaml).unwrap_err();
        assert!(err.contains("invalid datatype"));
    }

    #[test]
    fn typed_load_distinguishes_tcp_and_rtu_by_ip_presence() {
        let yaml = r#"
modbus:
  slaves:
    plc1:
      ip: 127.0.0.1
      port: 502
    dev1:
      port: /dev/ttyUSB0
      baudrate: 19200
nodes: []
opcua:
  endpoint: x
  namespace: y
"#;
        let cfg = GatewayConfig::from_str(yaml).unwrap();
        match &cfg.modbus.slaves["plc1"] {
            SlaveConfig::Tcp(t) => assert_eq!(t.ip, "127.0.0.1"),
            SlaveConfig::Rtu(_) => panic!("expected tcp"),
        }
        match &cfg.modbus.slaves["dev1"] {
            SlaveConfig::Rtu(r) => assert_eq!(r.baudrate, 19200),
            SlaveConfig::Tcp(_) => panic!("expected rtu"),
        }
    }
}
