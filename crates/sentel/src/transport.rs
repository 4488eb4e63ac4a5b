// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sentel.dev

//! UDP socket construction and bounded datagram I/O.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// A UDP socket with the datagram ceiling and receive timeout the
/// protocol calls for. Both binaries speak through this; nothing else
/// in the workspace touches a socket directly.
pub struct TelemetrySocket {
    socket: UdpSocket,
    max_packet_size: usize,
}

impl TelemetrySocket {
    /// Bind at `addr`. `read_timeout` bounds every receive so callers
    /// can interleave housekeeping (timeout sweeps, shutdown checks)
    /// with socket waits.
    pub fn bind(
        addr: SocketAddr,
        max_packet_size: usize,
        read_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(read_timeout)?;
        log::debug!("bound udp socket at {}", socket.local_addr()?);

        Ok(TelemetrySocket {
            socket,
            max_packet_size,
        })
    }

    /// Receive one datagram into `buf`, which should be at least
    /// `max_packet_size` bytes. Returns `Ok(None)` when the read
    /// timeout elapses with nothing to read.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, origin)) => Ok(Some((len, origin))),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Send one datagram, refusing anything over the configured ceiling.
    pub fn send_to(&self, datagram: &[u8], to: SocketAddr) -> io::Result<usize> {
        if datagram.len() > self.max_packet_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "datagram of {} bytes exceeds the {}-byte ceiling",
                    datagram.len(),
                    self.max_packet_size
                ),
            ));
        }
        self.socket.send_to(datagram, to)
    }

    /// Adjust the receive timeout after binding (registration waits
    /// differ from steady-state waits).
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}
