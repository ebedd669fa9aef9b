//! Ammeter device emulators.
//!
//! Each emulator is a tokio TCP server that answers its kind's command with
//! a simulated current reading and closes the connection. Anything else is
//! answered with an error line, which clients see as a malformed reading.

use std::net::SocketAddr;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reply sent for commands the emulator does not recognise.
pub const UNKNOWN_COMMAND_REPLY: &str = "ERROR: unknown command";

/// Supported ammeter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorKind {
    Greenlee,
    Entes,
    Circutor,
}

impl EmulatorKind {
    /// Get all emulator kinds.
    pub fn all() -> &'static [EmulatorKind] {
        &[
            EmulatorKind::Greenlee,
            EmulatorKind::Entes,
            EmulatorKind::Circutor,
        ]
    }

    /// Profile name used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            EmulatorKind::Greenlee => "greenlee",
            EmulatorKind::Entes => "entes",
            EmulatorKind::Circutor => "circutor",
        }
    }

    /// Port the stock configuration expects.
    pub fn default_port(&self) -> u16 {
        match self {
            EmulatorKind::Greenlee => 5000,
            EmulatorKind::Entes => 5001,
            EmulatorKind::Circutor => 5002,
        }
    }

    /// Command string the device answers.
    pub fn command(&self) -> &'static str {
        match self {
            EmulatorKind::Greenlee => "MEASURE_GREENLEE -get_measurement",
            EmulatorKind::Entes => "MEASURE_ENTES -get_data",
            EmulatorKind::Circutor => "MEASURE_CIRCUTOR -get_measurement -current",
        }
    }

    /// Range of simulated readings, in amperes.
    pub fn current_range(&self) -> (f64, f64) {
        match self {
            EmulatorKind::Greenlee => (0.5, 10.0),
            EmulatorKind::Entes => (0.1, 5.0),
            EmulatorKind::Circutor => (1.0, 20.0),
        }
    }

    /// Produce one simulated reading.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let (low, high) = self.current_range();
        rng.gen_range(low..high)
    }

    /// Build the reply for one request chunk.
    pub fn reply(&self, request: &[u8], rng: &mut impl Rng) -> String {
        let matches = std::str::from_utf8(request)
            .map(|r| r.trim() == self.command())
            .unwrap_or(false);

        if matches {
            format!("{:.4}", self.sample(rng))
        } else {
            UNKNOWN_COMMAND_REPLY.to_string()
        }
    }
}

impl std::fmt::Display for EmulatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A bound emulator ready to serve.
pub struct AmmeterEmulator {
    kind: EmulatorKind,
    listener: TcpListener,
}

impl AmmeterEmulator {
    /// Bind an emulator on `127.0.0.1:port`; port 0 picks a free port.
    pub async fn bind(kind: EmulatorKind, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self { kind, listener })
    }

    pub fn kind(&self) -> EmulatorKind {
        self.kind
    }

    /// Address the emulator is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until the task is aborted.
    pub async fn serve(self) {
        info!(kind = %self.kind, addr = ?self.listener.local_addr().ok(), "Emulator listening");

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    let kind = self.kind;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(kind, socket).await {
                            warn!(kind = %kind, peer = %peer, error = %e, "Emulator connection failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(kind = %self.kind, error = %e, "Emulator accept failed");
                }
            }
        }
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.local_addr()?;
        Ok((addr, tokio::spawn(self.serve())))
    }
}

/// Read one request chunk, write one reply, close.
async fn handle_connection(kind: EmulatorKind, mut socket: TcpStream) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let n = socket.read(&mut buf).await?;

    // Scope the thread-local rng so it is not held across an await
    let reply = {
        let mut rng = rand::thread_rng();
        kind.reply(&buf[..n], &mut rng)
    };

    debug!(kind = %kind, reply = %reply, "Emulator reply");
    socket.write_all(reply.as_bytes()).await?;
    socket.shutdown().await
}

/// Start every emulator kind on its default port.
pub async fn start_all() -> std::io::Result<Vec<(EmulatorKind, SocketAddr, JoinHandle<()>)>> {
    let mut started = Vec::with_capacity(EmulatorKind::all().len());
    for &kind in EmulatorKind::all() {
        let emulator = AmmeterEmulator::bind(kind, kind.default_port()).await?;
        let (addr, handle) = emulator.spawn()?;
        started.push((kind, addr, handle));
    }
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DeviceProfile, Endpoint, SamplingDefaults};
    use crate::sampling::{SamplingEngine, SamplingOverrides};
    use crate::store::ResultStore;
    use crate::transport::{MeasurementTransport, TcpTransport, TransportError};

    #[test]
    fn test_reply_matches_command() {
        let mut rng = rand::thread_rng();
        for &kind in EmulatorKind::all() {
            let reply = kind.reply(kind.command().as_bytes(), &mut rng);
            let value: f64 = reply.parse().expect("numeric reply");
            let (low, high) = kind.current_range();
            assert!(value >= low && value <= high, "{} out of range for {}", value, kind);
        }
    }

    #[test]
    fn test_reply_unknown_command() {
        let mut rng = rand::thread_rng();
        let reply = EmulatorKind::Entes.reply(b"MEASURE_GREENLEE -get_measurement", &mut rng);
        assert_eq!(reply, UNKNOWN_COMMAND_REPLY);
    }

    #[test]
    fn test_default_ports_are_distinct() {
        let ports: Vec<u16> = EmulatorKind::all().iter().map(|k| k.default_port()).collect();
        assert_eq!(ports, vec![5000, 5001, 5002]);
    }

    async fn spawn_emulator(kind: EmulatorKind) -> (Endpoint, JoinHandle<()>) {
        let emulator = AmmeterEmulator::bind(kind, 0).await.unwrap();
        let (addr, handle) = emulator.spawn().unwrap();
        (Endpoint::new("127.0.0.1", addr.port()), handle)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tcp_transport_against_emulator() {
        let (endpoint, handle) = spawn_emulator(EmulatorKind::Circutor).await;

        let result = tokio::task::spawn_blocking(move || {
            let transport = TcpTransport::new();
            let ok = transport.measure(&endpoint, EmulatorKind::Circutor.command().as_bytes());
            let bad = transport.measure(&endpoint, b"MEASURE_ENTES -get_data");
            (ok, bad)
        })
        .await
        .unwrap();

        let value = result.0.unwrap();
        assert!((1.0..=20.0).contains(&value));
        assert!(matches!(result.1, Err(TransportError::MalformedReading { .. })));

        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_against_emulator() {
        let (endpoint, handle) = spawn_emulator(EmulatorKind::Greenlee).await;
        let tmp = tempfile::tempdir().unwrap();

        let profile = DeviceProfile {
            name: "greenlee".to_string(),
            endpoint,
            command: EmulatorKind::Greenlee.command().as_bytes().to_vec(),
        };
        let engine = SamplingEngine::new(
            Config::new([profile], SamplingDefaults::default()),
            ResultStore::new(tmp.path()).unwrap(),
        );

        let result = tokio::task::spawn_blocking(move || {
            engine.run_session(
                "greenlee",
                &TcpTransport::new(),
                &SamplingOverrides::count(5),
                true,
            )
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result.data.len(), 5);
        assert!(result.stats.min >= 0.5 && result.stats.max <= 10.0);
        assert!(tmp.path().join(format!("{}.json", result.run_id)).exists());

        handle.abort();
    }
}
