//! Tag registry: the loaded, immutable set of tag definitions.
//!
//! `TagRegistry::build` only validates and indexes tag definitions; OPC UA
//! variable-node construction is performed by `crate::opcua`, which
//! consumes the registry and owns the resulting nodes (the registry only
//! keeps the Modbus mapping).

use std::collections::HashSet;

use serde::Deserialize;

use crate::codec::DataType;
use crate::error::{GatewayError, GatewayResult};

/// Modbus function code family for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Function {
    Holding,
    Input,
    Coil,
}

/// One configured tag as it appears in `nodes[].modbus` in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TagDefinition {
    pub node_id: String,
    pub name: String,
    #[serde(rename = "modbus")]
    pub mapping: RawMapping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMapping {
    pub slave: String,
    pub function: Function,
    pub address: u16,
    pub datatype: DataType,
    #[serde(default)]
    pub length: Option<u16>,
}

/// Validated, link-bound tag mapping used by the scheduler and the OPC UA
/// write handler.
#[derive(Debug, Clone)]
pub struct TagMapping {
    pub node_id: String,
    pub display_name: String,
    pub link_name: String,
    pub function: Function,
    /// 1-based register/coil address as declared in configuration.
    pub address: u16,
    pub datatype: DataType,
    pub length: Option<u16>,
}

impl TagMapping {
    /// Address is declared 1-based; the wire request uses `address - 1`.
    pub fn zero_based_address(&self) -> u16 {
        self.address - 1
    }

    pub fn writable(&self) -> bool {
        self.function != Function::Input
    }
}

/// The closed, immutable set of validated tags.
#[derive(Debug, Default, Clone)]
pub struct TagRegistry {
    entries: Vec<TagMapping>,
}

impl TagRegistry {
    pub fn build(defs: &[TagDefinition], link_names: &HashSet<String>) -> GatewayResult<Self> {
        let mut entries = Vec::with_capacity(defs.len());
        for def in defs {
            Self::validate(def, link_names)?;
            entries.push(TagMapping {
                node_id: def.node_id.clone(),
                display_name: def.name.clone(),
                link_name: def.mapping.slave.clone(),
                function: def.mapping.function,
                address: def.mapping.address,
                datatype: def.mapping.datatype,
                length: def.mapping.length,
            });
        }
        Ok(Self { entries })
    }

    fn validate(def: &TagDefinition, link_names: &HashSet<String>) -> GatewayResult<()> {
        let m = &def.mapping;
        if !link_names.contains(&m.slave) {
            return Err(GatewayError::Configuration(format!(
                "tag '{}' references undefined link '{}'",
                def.name, m.slave
            )));
        }
        if m.function == Function::Coil && m.datatype != DataType::Bool {
            return Err(GatewayError::Configuration(format!(
                "tag '{}' uses function 'coil' with datatype '{:?}'; coil requires bool",
                def.name, m.datatype
            )));
        }
        if m.datatype == DataType::String {
            match m.length {
                Some(len) if len >= 1 => {}
                _ => {
                    return Err(GatewayError::Configuration(format!(
                        "tag '{}' has datatype 'string' but no length >= 1",
                        def.name
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagMapping> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
