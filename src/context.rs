//! Process-wide shared state: one `Arc<GatewayContext>` passed into the
//! scheduler, the OPC UA write watcher, and the websocket layer, rather
//! than module-level globals.

use std::collections::HashMap;
use std::sync::Arc;

use opcua::server::node_manager::memory::SimpleNodeManager;
use opcua::types::NodeId;
use tokio::sync::broadcast;

use crate::links::LinkHandle;
use crate::tags::{TagCache, TagMapping, TagPayload, TagRegistry};

/// Capacity of the cache -> websocket broadcast channel. A slow or absent
/// reader falls behind and silently drops the oldest unread payloads
/// instead of applying backpressure to the poller.
pub const BROADCAST_CAPACITY: usize = 1024;

pub struct GatewayContext {
    pub registry: TagRegistry,
    pub cache: Arc<TagCache>,
    pub links: Arc<HashMap<String, LinkHandle>>,
    pub node_manager: Arc<SimpleNodeManager>,
    pub node_ids: Arc<HashMap<String, NodeId>>,
    pub tx: broadcast::Sender<(String, TagPayload)>,
    pub config_path: std::path::PathBuf,
}

impl GatewayContext {
    pub fn new(
        registry: TagRegistry,
        links: HashMap<String, LinkHandle>,
        node_manager: Arc<SimpleNodeManager>,
        node_table: &HashMap<NodeId, TagMapping>,
        config_path: std::path::PathBuf,
    ) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let node_ids = node_table
            .iter()
            .map(|(id, mapping)| (mapping.node_id.clone(), id.clone()))
            .collect();
        Arc::new(GatewayContext {
            registry,
            cache: Arc::new(TagCache::new()),
            links: Arc::new(links),
            node_manager,
            node_ids: Arc::new(node_ids),
            tx,
            config_path,
        })
    }
}
