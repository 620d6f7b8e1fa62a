//! OPC UA server integration: node construction, security setup, and the
//! write path that bridges an OPC UA client write back to Modbus.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use opcua::server::address_space::Variable;
use opcua::server::diagnostics::NamespaceMetadata;
use opcua::server::node_manager::memory::{simple_node_manager, SimpleNodeManager};
use opcua::server::{Server, ServerBuilder, ServerEndpoint, ServerUserToken};
use opcua::types::{DateTime, MessageSecurityMode, NodeId, SecurityPolicy, StatusCode, Variant};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::codec::{DataType, Value};
use crate::links::LinkHandle;
use crate::tags::{TagCache, TagMapping, TagPayload, TagRegistry};

/// How often the gateway re-reads writable nodes to detect an OPC UA
/// client write. The in-memory node manager used here has no write-hook
/// extension point, so external writes are observed the same way the
/// dashboard cache is: by polling, on a cycle independent of (and much
/// faster than) the Modbus poll interval.
const WRITE_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Everything the rest of the gateway needs after the OPC UA server is
/// built: the running server handle, the address space, and the
/// node-id -> tag mapping used by both the scheduler and the write watcher.
pub struct OpcUaServer {
    pub server: Server,
    pub node_manager: Arc<SimpleNodeManager>,
    pub node_table: HashMap<NodeId, TagMapping>,
}

/// Parse a `ns=<u16>;s=<string>` or `ns=<u16>;i=<u32>` node id.
fn parse_node_id(raw: &str) -> crate::error::GatewayResult<NodeId> {
    let (ns_part, id_part) = raw
        .split_once(';')
        .ok_or_else(|| crate::error::GatewayError::Configuration(format!("invalid node id '{raw}'")))?;
    let ns: u16 = ns_part
        .trim_start_matches("ns=")
        .parse()
        .map_err(|_| crate::error::GatewayError::Configuration(format!("invalid namespace in '{raw}'")))?;
    if let Some(s) = id_part.strip_prefix("s=") {
        Ok(NodeId::new(ns, s))
    } else if let Some(i) = id_part.strip_prefix("i=") {
        let numeric: u32 = i
            .parse()
            .map_err(|_| crate::error::GatewayError::Configuration(format!("invalid numeric id in '{raw}'")))?;
        Ok(NodeId::new(ns, numeric))
    } else {
        Err(crate::error::GatewayError::Configuration(format!(
            "unsupported node id identifier in '{raw}'"
        )))
    }
}

fn variant_type(datatype: DataType) -> Variant {
    match datatype {
        DataType::Int16 => Variant::Int16(0),
        DataType::Uint16 => Variant::UInt16(0),
        DataType::Int32 => Variant::Int32(0),
        DataType::Uint32 => Variant::UInt32(0),
        DataType::Float => Variant::Float(0.0),
        DataType::Double => Variant::Double(0.0),
        DataType::Bool => Variant::Boolean(false),
        DataType::String => Variant::from(""),
    }
}

fn value_to_variant(value: &Value) -> Variant {
    match value {
        Value::Int16(v) => Variant::Int16(*v),
        Value::Uint16(v) => Variant::UInt16(*v),
        Value::Int32(v) => Variant::Int32(*v),
        Value::Uint32(v) => Variant::UInt32(*v),
        Value::Float(v) => Variant::Float(*v),
        Value::Double(v) => Variant::Double(*v),
        Value::Bool(v) => Variant::Boolean(*v),
        Value::String(v) => Variant::from(v.as_str()),
    }
}

fn variant_to_value(variant: &Variant, datatype: DataType) -> Option<Value> {
    match (variant, datatype) {
        (Variant::Int16(v), DataType::Int16) => Some(Value::Int16(*v)),
        (Variant::UInt16(v), DataType::Uint16) => Some(Value::Uint16(*v)),
        (Variant::Int32(v), DataType::Int32) => Some(Value::Int32(*v)),
        (Variant::UInt32(v), DataType::Uint32) => Some(Value::Uint32(*v)),
        (Variant::Float(v), DataType::Float) => Some(Value::Float(*v)),
        (Variant::Double(v), DataType::Double) => Some(Value::Double(*v)),
        (Variant::Boolean(v), DataType::Bool) => Some(Value::Bool(*v)),
        (Variant::String(v), DataType::String) => Some(Value::String(v.value.clone().unwrap_or_default())),
        _ => None,
    }
}

/// Parse `opc.tcp://host:port/path` into its host/port/path parts. Only
/// host and port are passed to the server builder; the path segment is
/// accepted but not separately enforced (single-endpoint gateway).
fn parse_endpoint(endpoint: &str) -> (String, u16, String) {
    let rest = endpoint.trim_start_matches("opc.tcp://");
    let (hostport, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(4840)),
        None => (hostport.to_string(), 4840),
    };
    (host, port, path.to_string())
}

fn security_policies() -> Vec<SecurityPolicy> {
    vec![
        SecurityPolicy::None,
        SecurityPolicy::Basic128Rsa15,
        SecurityPolicy::Basic256,
        SecurityPolicy::Basic256Sha256,
        SecurityPolicy::Aes128Sha256RsaOaep,
        SecurityPolicy::Aes256Sha256RsaPss,
    ]
}

/// Build the OPC UA server and its address space from the tag registry.
/// Every tag becomes one writable-or-read-only variable node under the
/// Objects folder, keyed by its configured `node_id`.
pub fn build(cfg: &crate::config::OpcUaConfig, registry: &TagRegistry) -> crate::error::GatewayResult<OpcUaServer> {
    let (host, port, _path) = parse_endpoint(&cfg.endpoint);

    let cert_path = env::var("CERT_PATH").unwrap_or_else(|_| "server_cert.pem".to_string());
    let key_path = env::var("KEY_PATH").unwrap_or_else(|_| "server_key.pem".to_string());
    let auto_accept = env::var("AUTO_ACCEPT_CERTS")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false);
    let have_certs = Path::new(&cert_path).exists() && Path::new(&key_path).exists();
    if !have_certs {
        warn!("security certificates missing at {cert_path}/{key_path}; encrypted policies will not work");
    }

    let user_cred = env::var("OPC_UA_USER").ok();
    let users: Vec<(String, String)> = match &user_cred {
        Some(cred) => cred
            .split_once(':')
            .map(|(u, p)| vec![(u.to_string(), p.to_string())])
            .unwrap_or_default(),
        None => cfg.users.iter().map(|(u, p)| (u.clone(), p.clone())).collect(),
    };

    let namespace_uri = cfg.namespace.clone();
    let mut builder = ServerBuilder::new()
        .application_name("NeoEdgeSecureGateway")
        .application_uri(&namespace_uri)
        .host(host)
        .port(port)
        .with_node_manager(simple_node_manager(
            NamespaceMetadata {
                namespace_uri: namespace_uri.clone(),
                ..Default::default()
            },
            "gateway",
        ));

    if have_certs {
        builder = builder
            .certificate_path(cert_path.into())
            .private_key_path(key_path.into())
            .trust_client_certs(auto_accept);
    }

    for (i, (user, pass)) in users.iter().enumerate() {
        builder = builder.user_token(format!("user{i}"), ServerUserToken::user_pass(user, pass));
    }

    let mut endpoints = Vec::new();
    for policy in security_policies() {
        let mode = if policy == SecurityPolicy::None {
            MessageSecurityMode::None
        } else {
            MessageSecurityMode::SignAndEncrypt
        };
        endpoints.push(ServerEndpoint::new(
            "/gateway",
            policy,
            mode,
            &users.iter().enumerate().map(|(i, _)| format!("user{i}")).collect::<Vec<_>>(),
        ));
    }
    if !endpoints.is_empty() {
        builder = builder.endpoints(endpoints);
    }

    let (server, handle) = builder.build().map_err(|e| {
        crate::error::GatewayError::Configuration(format!("failed to build opc ua server: {e}"))
    })?;

    let node_manager = handle
        .node_managers()
        .get_of_type::<SimpleNodeManager>()
        .ok_or_else(|| crate::error::GatewayError::Configuration("node manager missing".into()))?;

    let mut node_table = HashMap::new();
    {
        let address_space = node_manager.address_space();
        let mut space = address_space.write();
        let mut variables = Vec::with_capacity(registry.len());
        for tag in registry.iter() {
            let node_id = parse_node_id(&tag.node_id)?;
            let mut variable = Variable::new(
                &node_id,
                tag.display_name.as_str(),
                tag.display_name.as_str(),
                variant_type(tag.datatype),
            );
            variable.set_writable(tag.writable());
            variables.push(variable);
            node_table.insert(node_id, tag.clone());
        }
        let _ = space.add_variables(variables, &NodeId::objects_folder_id());
    }

    info!(
        nodes = node_table.len(),
        policies = security_policies().len(),
        "opc ua server built"
    );

    Ok(OpcUaServer {
        server,
        node_manager,
        node_table,
    })
}

/// Push a freshly-polled value into the server's address space so OPC UA
/// clients reading the node see it, independent of the dashboard cache.
pub fn publish_value(node_manager: &SimpleNodeManager, node_id: &NodeId, value: &Value) {
    let address_space = node_manager.address_space();
    let mut space = address_space.write();
    if let Some(variable) = space.find_variable_mut(node_id) {
        let now = DateTime::now();
        variable.set_value_direct(value_to_variant(value), StatusCode::Good, &now, &now);
    }
}

/// Whether a freshly re-read address-space value represents a genuine OPC UA
/// client write rather than the gateway's own last known-good value. There
/// is nothing to compare against — and so nothing is ever reported as a
/// client write — until the cache holds a successful read for this node:
/// before the first poll commits one (cache holds the `init` payload, or the
/// tag is currently offline) the cached value is `None`, and a bare address-
/// space read is never treated as a write target in that state. Once a
/// known-good value exists, plain equality decides it, including for floats:
/// a client writing back the exact value the gateway just read is correctly
/// suppressed, but two floats that print the same yet differ in their last
/// bit are not.
fn is_client_write(cached: Option<&TagPayload>, new_value: &Value) -> bool {
    match cached.and_then(|prior| prior.value.as_ref()) {
        Some(known_good) => known_good != new_value,
        None => false,
    }
}

/// Spawns the write-watch loop: on each tick, re-read every writable node's
/// current value out of the address space; if it differs from the gateway's
/// own last known-good value for that node, treat it as a client write,
/// forward it to Modbus, and update the cache + broadcast.
pub fn spawn_write_watch(
    node_manager: Arc<SimpleNodeManager>,
    node_table: Arc<HashMap<NodeId, TagMapping>>,
    links: Arc<HashMap<String, LinkHandle>>,
    cache: Arc<TagCache>,
    tx: broadcast::Sender<(String, TagPayload)>,
) {
    tokio::spawn(async move {
        let mut ticker = interval(WRITE_WATCH_INTERVAL);
        loop {
            ticker.tick().await;
            for (node_id, mapping) in node_table.iter() {
                if !mapping.writable() {
                    continue;
                }
                let current = {
                    let space = node_manager.address_space().read();
                    space
                        .find_variable(node_id)
                        .and_then(|v| v.value(..).value)
                        .and_then(|v| variant_to_value(&v, mapping.datatype))
                };
                let Some(new_value) = current else { continue };

                if !is_client_write(cache.get(&mapping.node_id).as_ref(), &new_value) {
                    continue;
                }

                let Some(link) = links.get(&mapping.link_name) else {
                    error!(link = %mapping.link_name, "no handler for write target");
                    continue;
                };
                match link.write(mapping, &new_value).await {
                    Ok(()) => {
                        let payload = TagPayload::write_ok(mapping.display_name.clone(), new_value);
                        cache.set(&mapping.node_id, payload.clone());
                        let _ = tx.send((mapping.node_id.clone(), payload));
                    }
                    Err(e) => {
                        error!(node = %mapping.node_id, error = %e, "modbus write from opc ua client failed");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node_id_string_identifier() {
        let id = parse_node_id("ns=2;s=Temperature").unwrap();
        assert_eq!(id, NodeId::new(2, "Temperature"));
    }

    #[test]
    fn parse_node_id_numeric_identifier() {
        let id = parse_node_id("ns=3;i=42").unwrap();
        assert_eq!(id, NodeId::new(3, 42u32));
    }

    #[test]
    fn parse_node_id_rejects_malformed_input() {
        assert!(parse_node_id("not-a-node-id").is_err());
        assert!(parse_node_id("ns=x;s=Foo").is_err());
        assert!(parse_node_id("ns=2;x=Foo").is_err());
    }

    #[test]
    fn parse_endpoint_splits_host_port_and_path() {
        let (host, port, path) = parse_endpoint("opc.tcp://0.0.0.0:4840/gateway");
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 4840);
        assert_eq!(path, "/gateway");
    }

    #[test]
    fn parse_endpoint_defaults_port_and_path_when_absent() {
        let (host, port, path) = parse_endpoint("opc.tcp://plant-gateway");
        assert_eq!(host, "plant-gateway");
        assert_eq!(port, 4840);
        assert_eq!(path, "/");
    }

    #[test]
    fn value_and_variant_round_trip_every_datatype() {
        let values = vec![
            Value::Int16(-7),
            Value::Uint16(7),
            Value::Int32(-70000),
            Value::Uint32(70000),
            Value::Float(1.5),
            Value::Double(2.5),
            Value::Bool(true),
            Value::String("hi".into()),
        ];
        for value in values {
            let datatype = value.datatype();
            let variant = value_to_variant(&value);
            let back = variant_to_value(&variant, datatype).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn variant_to_value_rejects_datatype_mismatch() {
        let variant = Variant::Int16(5);
        assert!(variant_to_value(&variant, DataType::Bool).is_none());
    }

    #[test]
    fn matching_value_is_not_a_client_write() {
        let payload = TagPayload::write_ok("Setpoint", Value::Int16(42));
        assert!(!is_client_write(Some(&payload), &Value::Int16(42)));
    }

    #[test]
    fn differing_value_is_a_client_write() {
        let payload = TagPayload::write_ok("Setpoint", Value::Int16(42));
        assert!(is_client_write(Some(&payload), &Value::Int16(43)));
    }

    #[test]
    fn no_cache_entry_yet_is_never_a_client_write() {
        // Before the poller's first successful read commits a value there
        // is nothing to compare against, so the node's initial 0/"" value
        // must not be reported as a write target.
        assert!(!is_client_write(None, &Value::Int16(43)));
    }

    #[test]
    fn offline_tag_is_never_a_client_write() {
        // A failed read overwrites the cache entry's value with `None` while
        // the address-space node keeps holding its last-good value; that
        // held value must not be re-reported as a write on every tick.
        let payload = TagPayload::read_failed("Setpoint");
        assert!(!is_client_write(Some(&payload), &Value::Int16(42)));
    }
}
