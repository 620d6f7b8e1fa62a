//! Shared test helpers: a minimal in-process Modbus TCP slave, used by the
//! link-handler integration tests instead of spawning a real device.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

pub struct SlaveState {
    pub holding: Mutex<Vec<u16>>,
    pub coils: Mutex<Vec<bool>>,
}

impl SlaveState {
    fn new() -> Arc<Self> {
        Arc::new(SlaveState {
            holding: Mutex::new(vec![0u16; 200]),
            coils: Mutex::new(vec![false; 200]),
        })
    }
}

/// A running dummy Modbus TCP slave. `go_offline` closes the listener and
/// every already-accepted connection (as a pulled network cable would);
/// `come_back_online` rebinds the same port and resumes serving.
pub struct DummySlave {
    pub port: u16,
    pub state: Arc<SlaveState>,
    accept_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl DummySlave {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = SlaveState::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = spawn_accept_loop(listener, state.clone(), shutdown_rx);
        DummySlave { port, state, accept_task, shutdown_tx }
    }

    /// Stop accepting connections and drop every live connection, simulating
    /// the device going offline.
    pub fn go_offline(&self) {
        self.accept_task.abort();
        let _ = self.shutdown_tx.send(true);
    }

    /// Rebind the same port and resume serving, simulating reconnection.
    pub async fn come_back_online(&mut self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..50 {
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", self.port)).await {
                self.accept_task = spawn_accept_loop(listener, self.state.clone(), shutdown_rx);
                self.shutdown_tx = shutdown_tx;
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("could not rebind dummy modbus slave port {}", self.port);
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    state: Arc<SlaveState>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let state = state.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let _ = serve_connection(stream, state, &mut shutdown_rx).await;
            });
        }
    })
}

async fn serve_connection(
    mut stream: TcpStream,
    state: Arc<SlaveState>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; 7];
        tokio::select! {
            result = stream.read_exact(&mut header) => {
                if result.is_err() {
                    return Ok(());
                }
            }
            _ = shutdown_rx.changed() => return Ok(()),
        }
        let transaction = [header[0], header[1]];
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit_id = header[6];
        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).await?;

        let response_pdu = handle_pdu(&pdu, &state).await;
        let mut frame = Vec::with_capacity(7 + response_pdu.len());
        frame.extend_from_slice(&transaction);
        frame.extend_from_slice(&[0, 0]); // protocol id
        frame.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(&response_pdu);
        stream.write_all(&frame).await?;
    }
}

async fn handle_pdu(pdu: &[u8], state: &SlaveState) -> Vec<u8> {
    let function = pdu[0];
    match function {
        0x01 => {
            // Read Coils
            let addr = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            let qty = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
            let coils = state.coils.lock().await;
            let byte_count = (qty + 7) / 8;
            let mut bytes = vec![0u8; byte_count];
            for i in 0..qty {
                if coils.get(addr + i).copied().unwrap_or(false) {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }
            let mut out = vec![function, byte_count as u8];
            out.extend_from_slice(&bytes);
            out
        }
        0x03 => {
            // Read Holding Registers
            let addr = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            let qty = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
            let regs = state.holding.lock().await;
            let mut out = vec![function, (qty * 2) as u8];
            for i in 0..qty {
                let v = regs.get(addr + i).copied().unwrap_or(0);
                out.extend_from_slice(&v.to_be_bytes());
            }
            out
        }
        0x05 => {
            // Write Single Coil
            let addr = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            let on = u16::from_be_bytes([pdu[3], pdu[4]]) == 0xFF00;
            let mut coils = state.coils.lock().await;
            if addr >= coils.len() {
                coils.resize(addr + 1, false);
            }
            coils[addr] = on;
            pdu.to_vec()
        }
        0x10 => {
            // Write Multiple Registers
            let addr = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            let qty = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
            let data = &pdu[6..];
            let mut regs = state.holding.lock().await;
            if addr + qty > regs.len() {
                regs.resize(addr + qty, 0);
            }
            for i in 0..qty {
                regs[addr + i] = u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
            }
            vec![function, pdu[1], pdu[2], pdu[3], pdu[4]]
        }
        other => vec![other | 0x80, 0x01], // illegal function
    }
}
