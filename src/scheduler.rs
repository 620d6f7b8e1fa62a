//! Polling scheduler: reads every configured tag once per `poll_interval`,
//! in registry order, on a dedicated blocking thread that never yields
//! cooperatively to the async reactor mid-cycle.
//!
//! Modbus I/O here is driven through the same async `LinkHandle` used by the
//! OPC UA write path, but this loop is not itself a cooperative task: it
//! runs under `tokio::task::spawn_blocking` and drives each async call to
//! completion with `Handle::block_on`, keeping transactions against a given
//! link strictly half-duplex and one-request-in-flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::context::GatewayContext;
use crate::opcua;
use crate::tags::TagPayload;

pub fn spawn(ctx: Arc<GatewayContext>, poll_interval: Duration) {
    tokio::task::spawn_blocking(move || {
        let handle = tokio::runtime::Handle::current();
        loop {
            let cycle_start = Instant::now();

            for mapping in ctx.registry.iter() {
                let Some(link) = ctx.links.get(&mapping.link_name) else {
                    warn!(link = %mapping.link_name, node = %mapping.node_id, "no handler for configured link");
                    continue;
                };

                let payload = match handle.block_on(link.read(mapping)) {
                    Ok(value) => {
                        if let Some(node_id) = ctx.node_ids.get(&mapping.node_id) {
                            opcua::publish_value(&ctx.node_manager, node_id, &value);
                        }
                        TagPayload::read_ok(mapping.display_name.clone(), value)
                    }
                    Err(e) => {
                        warn!(link = %mapping.link_name, node = %mapping.node_id, error = %e, "poll read failed");
                        TagPayload::read_failed(mapping.display_name.clone())
                    }
                };

                ctx.cache.set(&mapping.node_id, payload.clone());
                let _ = ctx.tx.send((mapping.node_id.clone(), payload));
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < poll_interval {
                std::thread::sleep(poll_interval - elapsed);
            }
        }
    });
}
