#[tokio::main]
async fn main() {
    let _log_guard = modbus_opcua_gateway::logging::init_logging(None);
    modbus_opcua_gateway::run().await;
}
