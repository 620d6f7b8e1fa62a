//! Link handlers: one instance per physical transport.
//!
//! `LinkHandle` is a tagged variant over TCP and RTU transports — a single
//! capability set, not a trait object, since both transports expose exactly
//! `read`/`write`. The shared request/response logic (address offset,
//! function dispatch, swap handling) lives in this module and is reused by
//! both transports.

mod rtu;
mod tcp;

pub use rtu::RtuLink;
pub use tcp::TcpLink;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::codec::{self, Value};
use crate::config::{ModbusConfig, SlaveConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::tags::registry::{Function, TagMapping};

/// Transient-failure pause imposed on RTU links to avoid reconnect storms
/// against disconnected serial hardware.
pub const RTU_TRANSIENT_PAUSE: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub enum LinkHandle {
    Tcp(Arc<TcpLink>),
    Rtu(Arc<RtuLink>),
}

impl LinkHandle {
    pub fn name(&self) -> &str {
        match self {
            LinkHandle::Tcp(l) => l.name(),
            LinkHandle::Rtu(l) => l.name(),
        }
    }

    pub async fn read(&self, mapping: &TagMapping) -> GatewayResult<Value> {
        match self {
            LinkHandle::Tcp(l) => l.read(mapping).await,
            LinkHandle::Rtu(l) => l.read(mapping).await,
        }
    }

    pub async fn write(&self, mapping: &TagMapping, value: &Value) -> GatewayResult<()> {
        match self {
            LinkHandle::Tcp(l) => l.write(mapping, value).await,
            LinkHandle::Rtu(l) => l.write(mapping, value).await,
        }
    }
}

/// Build one `LinkHandle` per configured slave, sharing a single
/// underlying serial transport across every RTU slave on the same device
/// path.
pub fn build_links(cfg: &ModbusConfig) -> GatewayResult<HashMap<String, LinkHandle>> {
    let mut links = HashMap::new();
    let mut rtu_transports: HashMap<String, Arc<rtu::RtuTransport>> = HashMap::new();

    for (name, slave) in &cfg.slaves {
        match slave {
            SlaveConfig::Tcp(t) => {
                links.insert(name.clone(), LinkHandle::Tcp(Arc::new(TcpLink::new(name.clone(), t))));
            }
            SlaveConfig::Rtu(r) => {
                let transport = rtu_transports
                    .entry(r.port.clone())
                    .or_insert_with(|| Arc::new(rtu::RtuTransport::new(r)))
                    .clone();
                if transport.baudrate() != r.baudrate
                    || transport.parity() != r.parity
                    || transport.stopbits() != r.stopbits
                    || transport.databits() != r.databits
                {
                    return Err(GatewayError::Configuration(format!(
                        "slaves sharing serial port '{}' must agree on baudrate/parity/stopbits/databits",
                        r.port
                    )));
                }
                links.insert(
                    name.clone(),
                    LinkHandle::Rtu(Arc::new(RtuLink::new(name.clone(), transport, r))),
                );
            }
        }
    }

    Ok(links)
}

pub fn link_names(links: &HashMap<String, LinkHandle>) -> HashSet<String> {
    links.keys().cloned().collect()
}

/// Register count for a read/write: string uses the declared length,
/// everything else uses the fixed type-table count, coil uses a single bit.
fn register_count(mapping: &TagMapping) -> GatewayResult<u16> {
    if mapping.function == Function::Coil {
        return Ok(1);
    }
    match mapping.datatype.register_count() {
        Some(n) => Ok(n),
        None => mapping.length.ok_or_else(|| {
            GatewayError::Configuration(format!(
                "tag '{}' is a string without a configured length",
                mapping.node_id
            ))
        }),
    }
}

/// Shared read transaction against an already-open context, reused by both
/// the TCP and RTU link handlers.
async fn read_via_context(
    ctx: &mut Context,
    mapping: &TagMapping,
    byte_swap: bool,
    word_swap: bool,
    link_name: &str,
) -> GatewayResult<Value> {
    let addr = mapping.zero_based_address();
    let count = register_count(mapping)?;

    if mapping.function == Function::Coil {
        let bits = ctx
            .read_coils(addr, count)
            .await
            .map_err(|e| GatewayError::Transport {
                link: link_name.to_string(),
                source: e,
            })?
            .map_err(|code| GatewayError::Protocol {
                link: link_name.to_string(),
                code,
            })?;
        return Ok(Value::Bool(bits.first().copied().unwrap_or(false)));
    }

    let registers = match mapping.function {
        Function::Holding => ctx.read_holding_registers(addr, count).await,
        Function::Input => ctx.read_input_registers(addr, count).await,
        Function::Coil => unreachable!("handled above"),
    }
    .map_err(|e| GatewayError::Transport {
        link: link_name.to_string(),
        source: e,
    })?
    .map_err(|code| GatewayError::Protocol {
        link: link_name.to_string(),
        code,
    })?;

    let bytes = codec::bytes_of(&registers);
    codec::decode(&bytes, mapping.datatype, byte_swap, word_swap)
}

/// Shared write transaction against an already-open context.
async fn write_via_context(
    ctx: &mut Context,
    mapping: &TagMapping,
    value: &Value,
    byte_swap: bool,
    word_swap: bool,
    link_name: &str,
) -> GatewayResult<()> {
    let addr = mapping.zero_based_address();

    if mapping.function == Function::Coil {
        ctx.write_single_coil(addr, value.as_bool())
            .await
            .map_err(|e| GatewayError::Transport {
                link: link_name.to_string(),
                source: e,
            })?
            .map_err(|code| GatewayError::Protocol {
                link: link_name.to_string(),
                code,
            })?;
        return Ok(());
    }

    let string_length = mapping.length;
    let bytes = codec::encode(value, byte_swap, word_swap, string_length)?;
    let registers = codec::registers_of(&bytes);
    ctx.write_multiple_registers(addr, &registers)
        .await
        .map_err(|e| GatewayError::Transport {
            link: link_name.to_string(),
            source: e,
        })?
        .map_err(|code| GatewayError::Protocol {
            link: link_name.to_string(),
            code,
        })?;
    Ok(())
}

/// RTU's 100ms transient-failure pause, applied by the RTU link after any
/// read/write failure before the caller proceeds.
pub(crate) async fn rtu_transient_pause() {
    sleep(RTU_TRANSIENT_PAUSE).await;
}
