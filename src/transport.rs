//! Measurement transport for ammeter devices.
//!
//! A device is a line-oriented TCP service: the client connects, sends one
//! command payload, reads one reply chunk and parses it as a current
//! reading. There is no reconnection and no accumulation across reads; a
//! reply split over several deliveries fails to parse.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::config::Endpoint;

/// Size of the single read performed per request.
pub const REPLY_BUFFER_SIZE: usize = 1024;

/// Errors that can occur while taking one reading.
#[derive(Debug)]
pub enum TransportError {
    /// Could not open a connection to the device
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Sending the command or reading the reply failed
    Io(std::io::Error),

    /// The device closed the connection without sending anything
    NoDataReceived { endpoint: String },

    /// The reply was not valid UTF-8
    Decode(std::str::Utf8Error),

    /// The reply text is not a floating-point literal
    MalformedReading { text: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect { endpoint, source } => {
                write!(f, "Failed to connect to {}: {}", endpoint, source)
            }
            TransportError::Io(e) => write!(f, "Transport I/O error: {}", e),
            TransportError::NoDataReceived { endpoint } => {
                write!(f, "No data received from {}", endpoint)
            }
            TransportError::Decode(e) => write!(f, "Reply is not valid UTF-8: {}", e),
            TransportError::MalformedReading { text } => {
                write!(f, "Reply is not a numeric reading: {:?}", text)
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Connect { source, .. } => Some(source),
            TransportError::Io(e) => Some(e),
            TransportError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}

/// Capability to take one reading from a device.
///
/// Implementations block until the reading arrives or fails. The sampling
/// engine calls `measure` sequentially, one request in flight at a time.
pub trait MeasurementTransport {
    /// Send `command` to `endpoint` and return the parsed reading.
    fn measure(&self, endpoint: &Endpoint, command: &[u8]) -> Result<f64, TransportError>;
}

impl<F> MeasurementTransport for F
where
    F: Fn(&Endpoint, &[u8]) -> Result<f64, TransportError>,
{
    fn measure(&self, endpoint: &Endpoint, command: &[u8]) -> Result<f64, TransportError> {
        self(endpoint, command)
    }
}

/// Blocking TCP transport, one connection per reading.
///
/// # Example
///
/// ```no_run
/// use ammeter_harness::config::Endpoint;
/// use ammeter_harness::transport::{MeasurementTransport, TcpTransport};
///
/// let transport = TcpTransport::new();
/// let amps = transport
///     .measure(&Endpoint::localhost(5000), b"MEASURE_GREENLEE -get_measurement")
///     .expect("reading");
/// println!("{} A", amps);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    /// Optional read timeout; `None` blocks until the peer replies
    read_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Create a transport with no read timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that gives up on a silent device after `timeout`.
    pub fn with_read_timeout(timeout: Duration) -> Self {
        Self {
            read_timeout: Some(timeout),
        }
    }

    /// Get the configured read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}

impl MeasurementTransport for TcpTransport {
    fn measure(&self, endpoint: &Endpoint, command: &[u8]) -> Result<f64, TransportError> {
        let address = (endpoint.host.as_str(), endpoint.port);
        let mut stream = TcpStream::connect(address).map_err(|source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        stream.set_read_timeout(self.read_timeout)?;

        stream.write_all(command)?;

        let mut buf = [0u8; REPLY_BUFFER_SIZE];
        let n = stream.read(&mut buf)?;

        debug!(endpoint = %endpoint, bytes = n, "Received reply");

        if n == 0 {
            return Err(TransportError::NoDataReceived {
                endpoint: endpoint.to_string(),
            });
        }

        parse_reading(&buf[..n])
    }
}

/// Decode a reply chunk as UTF-8, trim it and parse a float.
pub fn parse_reading(reply: &[u8]) -> Result<f64, TransportError> {
    let text = std::str::from_utf8(reply).map_err(TransportError::Decode)?;
    let trimmed = text.trim();

    let malformed = || TransportError::MalformedReading {
        text: trimmed.to_string(),
    };

    // NaN and infinities cannot be persisted as JSON numbers
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one connection, replying with `reply` after reading the request.
    fn serve_once(reply: &'static [u8]) -> (Endpoint, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            let n = socket.read(&mut buf).unwrap();
            if !reply.is_empty() {
                socket.write_all(reply).unwrap();
            }
            buf[..n].to_vec()
        });

        (Endpoint::new("127.0.0.1", port), handle)
    }

    #[test]
    fn test_parse_reading_trims_whitespace() {
        assert_eq!(parse_reading(b"  3.25\r\n").unwrap(), 3.25);
        assert_eq!(parse_reading(b"-0.5").unwrap(), -0.5);
        assert_eq!(parse_reading(b"1e-3\n").unwrap(), 0.001);
    }

    #[test]
    fn test_parse_reading_malformed() {
        match parse_reading(b"ERROR: unknown command") {
            Err(TransportError::MalformedReading { text }) => {
                assert_eq!(text, "ERROR: unknown command");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_reading_rejects_non_finite() {
        for reply in [&b"nan"[..], b"NaN\n", b"inf", b"-infinity"] {
            assert!(
                matches!(parse_reading(reply), Err(TransportError::MalformedReading { .. })),
                "accepted {:?}",
                reply
            );
        }
    }

    #[test]
    fn test_parse_reading_invalid_utf8() {
        assert!(matches!(
            parse_reading(&[0xff, 0xfe, 0x31]),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_tcp_measure_sends_command_and_parses_reply() {
        let (endpoint, server) = serve_once(b"1.5\n");
        let transport = TcpTransport::new();

        let value = transport.measure(&endpoint, b"MEASURE_TEST").unwrap();
        assert_eq!(value, 1.5);
        assert_eq!(server.join().unwrap(), b"MEASURE_TEST".to_vec());
    }

    #[test]
    fn test_tcp_measure_no_data() {
        let (endpoint, server) = serve_once(b"");
        let transport = TcpTransport::new();

        let result = transport.measure(&endpoint, b"MEASURE_TEST");
        server.join().unwrap();
        assert!(matches!(result, Err(TransportError::NoDataReceived { .. })));
    }

    #[test]
    fn test_tcp_measure_connection_refused() {
        // Bind then drop to get a port that is very likely closed
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = TcpTransport::new();

        let result = transport.measure(&Endpoint::new("127.0.0.1", port), b"X");
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_closure_is_a_transport() {
        let transport = |_: &Endpoint, command: &[u8]| -> Result<f64, TransportError> {
            Ok(command.len() as f64)
        };
        let value = transport.measure(&Endpoint::localhost(1), b"abcd").unwrap();
        assert_eq!(value, 4.0);
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::NoDataReceived {
            endpoint: "localhost:5000".to_string(),
        };
        assert_eq!(format!("{}", err), "No data received from localhost:5000");

        let err = TransportError::MalformedReading {
            text: "abc".to_string(),
        };
        assert!(format!("{}", err).contains("abc"));
    }

    #[test]
    fn test_read_timeout_setting() {
        assert_eq!(TcpTransport::new().read_timeout(), None);
        let t = TcpTransport::with_read_timeout(Duration::from_secs(2));
        assert_eq!(t.read_timeout(), Some(Duration::from_secs(2)));
    }
}
