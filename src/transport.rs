// transport.rs - blocking UDP transport (spec.md §4.3)
//
// One request, one response, per call. The read timeout is a wall-clock
// deadline spanning every partial read, not a per-syscall timeout: a server
// that trickles bytes in under the deadline still succeeds.

use std::net::{ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::codec::HEADER_LEN;
use crate::error::{RadiusError, Result};

/// A bound UDP socket talking to one RADIUS server endpoint.
pub struct Transport {
    socket: UdpSocket,
    timeout: Duration,
}

impl Transport {
    /// Binds an ephemeral local socket and connects it to `addr`. `connect`
    /// on a `UdpSocket` only fixes the default peer for `send`/`recv`; no
    /// handshake occurs over the wire.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| RadiusError::SendFailed(format!("bind failed: {e}")))?;
        socket
            .connect(addr)
            .map_err(|e| RadiusError::SendFailed(format!("connect failed: {e}")))?;
        // Individual recv calls still get a short timeout so the
        // deadline loop below can re-check elapsed wall-clock time instead
        // of blocking past it.
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(|e| RadiusError::SendFailed(format!("set_read_timeout failed: {e}")))?;
        Ok(Transport { socket, timeout })
    }

    /// Sends `packet` and blocks until a complete RADIUS datagram is read,
    /// the deadline elapses, or an I/O error other than a plain timeout
    /// occurs.
    pub fn round_trip(&self, packet: &[u8]) -> Result<Vec<u8>> {
        self.socket
            .send(packet)
            .map_err(|e| RadiusError::SendFailed(e.to_string()))?;
        debug!(bytes = packet.len(), "sent RADIUS request");

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; crate::codec::MAX_PACKET_LEN];
        let mut filled = 0usize;
        let mut declared_len: Option<usize> = None;

        loop {
            if Instant::now() >= deadline {
                return Err(RadiusError::TimedOut);
            }

            match self.socket.recv(&mut buf[filled..]) {
                Ok(0) => return Err(RadiusError::ReceiveFailed("connection closed".into())),
                Ok(n) => {
                    filled += n;

                    if declared_len.is_none() && filled >= 4 {
                        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
                        if len < HEADER_LEN {
                            return Err(RadiusError::InvalidResponse(format!(
                                "declared length {len} smaller than RADIUS header"
                            )));
                        }
                        declared_len = Some(len);
                    }

                    if let Some(len) = declared_len {
                        if filled >= len {
                            debug!(bytes = filled, "received RADIUS response");
                            buf.truncate(filled);
                            return Ok(buf);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(RadiusError::ReceiveFailed(e.to_string())),
            }
        }
    }
}
