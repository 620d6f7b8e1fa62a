use std::net::SocketAddr;

use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::Slave;
use tracing::{error, warn};

use super::{read_via_context, write_via_context};
use crate::codec::Value;
use crate::config::TcpSlaveConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::tags::registry::TagMapping;

/// One Modbus TCP connection to one host:port, exclusively owned and
/// serialized by `ctx`'s mutex.
pub struct TcpLink {
    name: String,
    addr: SocketAddr,
    unit_id: u8,
    byte_swap: bool,
    word_swap: bool,
    ctx: Mutex<Option<Context>>,
}

impl TcpLink {
    pub fn new(name: String, cfg: &TcpSlaveConfig) -> Self {
        let addr: SocketAddr = format!("{}:{}", cfg.ip, cfg.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
        TcpLink {
            name,
            addr,
            unit_id: cfg.unit_id,
            byte_swap: cfg.byte_swap,
            word_swap: cfg.word_swap,
            ctx: Mutex::new(None),
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
            let ctx = tcp::connect_slave(self.addr, Slave(self.unit_id))
                .await
                .map_err(|e| GatewayError::Transport {
                    link: self.name.clone(),
                    source: e,
                })?;
            *guard = Some(ctx);
        }
        Ok(guard.as_mut().unwrap())
    }

    pub async fn read(&self, mapping: &TagMapping) -> GatewayResult<Value> {
        let mut guard = self.ctx.lock().await;
        let ctx = match self.ensure_open(&mut guard).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(link = %self.name, error = %e, "tcp link open failed");
                return Err(e);
            }
        };
        match read_via_context(ctx, mapping, self.byte_swap, self.word_swap, &self.name).await {
            Ok(v) => Ok(v),
            Err(e) => {
                if matches!(e, GatewayError::Transport { .. }) {
                    *guard = None; // force reconnect on next call
                }
                warn!(link = %self.name, node = %mapping.node_id, error = %e, "modbus read failed");
                Err(e)
            }
        }
    }

    pub async fn write(&self, mapping: &TagMapping, value: &Value) -> GatewayResult<()> {
        let mut guard = self.ctx.lock().await;
        let ctx = match self.ensure_open(&mut guard).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(link = %self.name, error = %e, "tcp link open failed");
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
            }
            error!(link = %self.name, node = %mapping.node_id, error = %e, "modbus write failed");
        }
        result
    }
}
