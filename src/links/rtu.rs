use std::io;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;
use tokio_modbus::Slave;
use tokio_serial::{DataBits, Parity as SerialParity, SerialPortBuilderExt, StopBits};
use tracing::{error, warn};

use super::{read_via_context, rtu_transient_pause, write_via_context};
use crate::codec::Value;
use crate::config::RtuSlaveConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::tags::registry::TagMapping;

/// One serial port, shared by every RTU slave id configured on that path —
/// opening the port once and multiplexing slave ids over it, rather than
/// one handler per slave id racing for the same physical port.
pub struct RtuTransport {
    device_path: String,
    baudrate: u32,
    parity: char,
    stopbits: u8,
    databits: u8,
    ctx: Mutex<Option<Context>>,
}

impl RtuTransport {
    pub fn new(cfg: &RtuSlaveConfig) -> Self {
        RtuTransport {
            device_path: cfg.port.clone(),
            baudrate: cfg.baudrate,
            parity: cfg.parity,
            stopbits: cfg.stopbits,
            databits: cfg.databits,
            ctx: Mutex::new(None),
        }
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }
    pub fn parity(&self) -> char {
        self.parity
    }
    pub fn stopbits(&self) -> u8 {
        self.stopbits
    }
    pub fn databits(&self) -> u8 {
        self.databits
    }

    fn open_port(&self) -> io::Result<tokio_serial::SerialStream> {
        let parity = match self.parity {
            'E' => SerialParity::Even,
            'O' => SerialParity::Odd,
            _ => SerialParity::None,
        };
        let stop_bits = if self.stopbits >= 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
        let data_bits = if self.databits <= 7 {
            DataBits::Seven
        } else {
            DataBits::Eight
        };
        let builder = tokio_serial::new(&self.device_path, self.baudrate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits);
        builder.open_native_async()
    }
}

/// One named RTU slave: a view over a shared `RtuTransport` plus its own
/// slave id and swap flags.
pub struct RtuLink {
    name: String,
    transport: Arc<RtuTransport>,
    slave_id: u8,
    byte_swap: bool,
    word_swap: bool,
}

impl RtuLink {
    pub fn new(name: String, transport: Arc<RtuTransport>, cfg: &RtuSlaveConfig) -> Self {
        RtuLink {
            name,
            transport,
            slave_id: cfg.slave_id,
            byte_swap: cfg.byte_swap,
            word_swap: cfg.word_swap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_open<'a>(
        &self,
        guard: &'a mut Option<Context>,
    ) -> GatewayResult<&'a mut Context> {
        if guard.is_none() {
            let port = self.transport.open_port().map_err(|e| GatewayError::Transport {
                link: self.name.clone(),
                source: e,
            })?;
            *guard = Some(rtu::attach_slave(port, Slave(self.slave_id)));
        }
        let ctx = guard.as_mut().unwrap();
        ctx.set_slave(Slave(self.slave_id));
        Ok(ctx)
    }

    pub async fn read(&self, mapping: &TagMapping) -> GatewayResult<Value> {
        let mut guard = self.transport.ctx.lock().await;
        let ctx = match self.ensure_open(&mut guard).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(link = %self.name, error = %e, "rtu port open failed");
                rtu_transient_pause().await;
                return Err(e);
            }
        };
        match read_via_context(ctx, mapping, self.byte_swap, self.word_swap, &self.name).await {
            Ok(v) => Ok(v),
            Err(e) => {
                if matches!(e, GatewayError::Transport { .. }) {
                    *guard = None;
                    rtu_transient_pause().await;
                }
                warn!(link = %self.name, node = %mapping.node_id, error = %e, "modbus read failed");
                Err(e)
            }
        }
    }

    pub async fn write(&self, mapping: &TagMapping, value: &Value) -> GatewayResult<()> {
        let mut guard = self.transport.ctx.lock().await;
        let ctx = match self.ensure_open(&mut guard).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(link = %self.name, error = %e, "rtu port open failed");
                rtu_transient_pause().await;
                return Err(e);
            }
        };
        let result = write_via_context(
            ctx,
            mapping,
            value,
            self.byte_swap,
            self.word_swap,
            &self.name,
        )
        .await;
        if let Err(ref e) = result {
            if matches!(e, GatewayError::Transport { .. }) {
                *guard = None;
                rtu_transient_pause().await;
            }
            error!(link = %self.name, node = %mapping.node_id, error = %e, "modbus write failed");
        }
        result
    }
}
