//! UDP transport adapter and port-pair allocation.
//!
//! A track uses two datagram sockets: RTP on an even port, RTCP on the
//! next odd port (RFC 3550 §11). In the source role the sockets are bound
//! to the server's allocated pair and every send is addressed to the
//! peer's `client_port` pair. In the sink role the sockets are bound to
//! the client's allocated pair and a receive thread per socket feeds the
//! session's [`RtpHandler`].

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::RngExt;

use crate::error::{Result, RtspError};
use crate::session::transport::{TransportConfig, TransportRole};

use super::{RtpHandler, TransportAdapter};

/// Inclusive probe range for dynamically allocated pairs.
const PORT_RANGE_START: u16 = 6000;
const PORT_RANGE_END: u16 = 65000;
const PORT_PROBE_ATTEMPTS: u32 = 128;

/// Poll interval for the sink receive threads' shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Bind a free even/odd UDP port pair.
///
/// When `preferred_rtp` is nonzero only that exact pair is tried;
/// otherwise random even ports in the dynamic range are probed until a
/// pair binds. Returns the two sockets and the RTP port number.
pub fn bind_udp_pair(preferred_rtp: u16) -> Result<(UdpSocket, UdpSocket, u16)> {
    let try_pair = |rtp_port: u16| -> Option<(UdpSocket, UdpSocket)> {
        let rtp = UdpSocket::bind(("0.0.0.0", rtp_port)).ok()?;
        let rtcp = UdpSocket::bind(("0.0.0.0", rtp_port + 1)).ok()?;
        Some((rtp, rtcp))
    };

    if preferred_rtp != 0 {
        let rtp_port = preferred_rtp & !1;
        return try_pair(rtp_port)
            .map(|(rtp, rtcp)| (rtp, rtcp, rtp_port))
            .ok_or(RtspError::PortRangeExhausted);
    }

    let mut rng = rand::rng();
    for _ in 0..PORT_PROBE_ATTEMPTS {
        let port = rng.random_range(PORT_RANGE_START..PORT_RANGE_END) & !1;
        if let Some((rtp, rtcp)) = try_pair(port) {
            tracing::trace!(rtp_port = port, rtcp_port = port + 1, "allocated UDP port pair");
            return Ok((rtp, rtcp, port));
        }
    }
    Err(RtspError::PortRangeExhausted)
}

/// UDP transport adapter for one track.
///
/// Sockets live for the lifetime of the session's transport; the
/// `active` flag makes sends after [`close`](TransportAdapter::close)
/// fail without touching a socket.
pub struct UdpTransportAdapter {
    config: TransportConfig,
    rtp_socket: Option<Arc<UdpSocket>>,
    rtcp_socket: Option<Arc<UdpSocket>>,
    handler: Option<Arc<dyn RtpHandler>>,
    active: Arc<AtomicBool>,
    recv_threads: Vec<thread::JoinHandle<()>>,
}

impl UdpTransportAdapter {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            rtp_socket: None,
            rtcp_socket: None,
            handler: None,
            active: Arc::new(AtomicBool::new(false)),
            recv_threads: Vec::new(),
        }
    }

    /// Install the receive callbacks (sink role only, before setup).
    pub fn set_handler(&mut self, handler: Arc<dyn RtpHandler>) {
        self.handler = Some(handler);
    }

    /// Server port pair bound during source-role setup.
    pub fn bound_ports(&self) -> (u16, u16) {
        (self.config.server_rtp_port, self.config.server_rtcp_port)
    }

    /// Where sends go: sources target the client's ports, sinks target
    /// the server's (for RTCP receiver reports).
    fn peer_addr(&self, rtcp: bool) -> SocketAddr {
        let port = match (self.config.role, rtcp) {
            (TransportRole::Source, false) => self.config.client_rtp_port,
            (TransportRole::Source, true) => self.config.client_rtcp_port,
            (TransportRole::Sink, false) => self.config.server_rtp_port,
            (TransportRole::Sink, true) => self.config.server_rtcp_port,
        };
        SocketAddr::new(self.config.peer_ip, port)
    }

    /// Record the server port pair learned from the SETUP response
    /// (sink role), making RTCP receiver reports routable.
    pub fn set_server_ports(&mut self, rtp: u16, rtcp: u16) {
        self.config.server_rtp_port = rtp;
        self.config.server_rtcp_port = rtcp;
    }

    /// The bound RTCP socket, for out-of-band receiver-report sends.
    pub fn rtcp_socket(&self) -> Option<Arc<UdpSocket>> {
        self.rtcp_socket.clone()
    }

    /// Destination for outbound RTCP on this flow.
    pub fn rtcp_peer_addr(&self) -> SocketAddr {
        self.peer_addr(true)
    }

    fn setup_source(&mut self) -> Result<()> {
        let (rtp, rtcp, port) = bind_udp_pair(self.config.server_rtp_port)?;
        self.config.server_rtp_port = port;
        self.config.server_rtcp_port = port + 1;
        self.rtp_socket = Some(Arc::new(rtp));
        self.rtcp_socket = Some(Arc::new(rtcp));

        // Source still listens for peer RTCP (receiver reports) when enabled.
        if self.config.rtcp_enabled()
            && let Some(handler) = &self.handler
        {
            self.spawn_recv(self.rtcp_socket.as_ref().unwrap().clone(), handler.clone(), true)?;
        }
        Ok(())
    }

    fn setup_sink(&mut self) -> Result<()> {
        let (rtp, rtcp, port) = bind_udp_pair(self.config.client_rtp_port)?;
        self.config.client_rtp_port = port;
        self.config.client_rtcp_port = port + 1;
        self.rtp_socket = Some(Arc::new(rtp));
        self.rtcp_socket = Some(Arc::new(rtcp));

        let handler = self
            .handler
            .clone()
            .ok_or_else(|| RtspError::TransportNotConfigured("sink without handler".into()))?;
        self.spawn_recv(self.rtp_socket.as_ref().unwrap().clone(), handler.clone(), false)?;
        self.spawn_recv(self.rtcp_socket.as_ref().unwrap().clone(), handler, true)?;
        Ok(())
    }

    fn spawn_recv(
        &mut self,
        socket: Arc<UdpSocket>,
        handler: Arc<dyn RtpHandler>,
        rtcp: bool,
    ) -> Result<()> {
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let active = self.active.clone();
        let label = if rtcp { "rtcp" } else { "rtp" };
        let handle = thread::Builder::new()
            .name(format!("udp-{label}-recv"))
            .spawn(move || {
                let mut buf = [0u8; 65536];
                while active.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, _peer)) => {
                            if rtcp {
                                handler.on_rtcp(&buf[..len]);
                            } else {
                                handler.on_rtp(&buf[..len]);
                            }
                        }
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            if active.load(Ordering::Relaxed) {
                                tracing::warn!(error = %e, "UDP receive error");
                            }
                            break;
                        }
                    }
                }
            })?;
        self.recv_threads.push(handle);
        Ok(())
    }
}

impl Default for UdpTransportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportAdapter for UdpTransportAdapter {
    fn setup(&mut self, config: &mut TransportConfig) -> bool {
        self.config = config.clone();
        self.active.store(true, Ordering::Relaxed);

        let result = match self.config.role {
            TransportRole::Source => self.setup_source(),
            TransportRole::Sink => self.setup_sink(),
        };
        match result {
            Ok(()) => {
                *config = self.config.clone();
                tracing::info!(
                    info = %self.transport_info(),
                    rtcp = self.config.rtcp_enabled(),
                    "UDP transport ready"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "UDP transport setup failed");
                self.close();
                false
            }
        }
    }

    fn send_rtp(&self, data: &[u8]) -> bool {
        if !self.active.load(Ordering::Relaxed) {
            return false;
        }
        let Some(socket) = &self.rtp_socket else {
            return false;
        };
        match socket.send_to(data, self.peer_addr(false)) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "RTP send failed");
                false
            }
        }
    }

    fn send_rtcp(&self, data: &[u8]) -> bool {
        if !self.active.load(Ordering::Relaxed) || !self.config.rtcp_enabled() {
            return false;
        }
        let Some(socket) = &self.rtcp_socket else {
            return false;
        };
        match socket.send_to(data, self.peer_addr(true)) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "RTCP send failed");
                false
            }
        }
    }

    fn close(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        for handle in self.recv_threads.drain(..) {
            let _ = handle.join();
        }
        self.rtp_socket = None;
        self.rtcp_socket = None;
    }

    fn transport_info(&self) -> String {
        format!(
            "UDP;unicast;client_port={}-{};server_port={}-{}",
            self.config.client_rtp_port,
            self.config.client_rtcp_port,
            self.config.server_rtp_port,
            self.config.server_rtcp_port
        )
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

impl Drop for UdpTransportAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

/// The local IP a server should advertise to reach `peer`.
///
/// Connecting a datagram socket performs the route lookup without sending
/// traffic; falls back to the wildcard address on failure.
pub fn local_ip_for(peer: IpAddr) -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect(SocketAddr::new(peer, 9))?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Collector {
        rtp: Mutex<Vec<Vec<u8>>>,
        rtcp: Mutex<Vec<Vec<u8>>>,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                rtp: Mutex::new(Vec::new()),
                rtcp: Mutex::new(Vec::new()),
            })
        }
    }

    impl RtpHandler for Collector {
        fn on_rtp(&self, data: &[u8]) {
            self.rtp.lock().push(data.to_vec());
        }
        fn on_rtcp(&self, data: &[u8]) {
            self.rtcp.lock().push(data.to_vec());
        }
    }

    #[test]
    fn port_pair_is_even_odd() {
        let (rtp, rtcp, port) = bind_udp_pair(0).unwrap();
        assert_eq!(port % 2, 0);
        assert_eq!(rtp.local_addr().unwrap().port(), port);
        assert_eq!(rtcp.local_addr().unwrap().port(), port + 1);
    }

    #[test]
    fn preferred_port_is_honored() {
        // Find a free pair first, release it, then re-request it exactly.
        let (a, b, port) = bind_udp_pair(0).unwrap();
        drop((a, b));
        let (_rtp, _rtcp, bound) = bind_udp_pair(port).unwrap();
        assert_eq!(bound, port);
    }

    #[test]
    fn pairs_never_overlap() {
        let (_a1, _a2, p1) = bind_udp_pair(0).unwrap();
        let (_b1, _b2, p2) = bind_udp_pair(0).unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn source_sends_to_sink() {
        // Sink: bind a pair and collect datagrams.
        let collector = Collector::new();
        let mut sink = UdpTransportAdapter::new();
        sink.set_handler(collector.clone());
        let mut sink_config = TransportConfig {
            role: TransportRole::Sink,
            ..Default::default()
        };
        assert!(sink.setup(&mut sink_config));
        let (rtp_port, rtcp_port) = (sink.config.client_rtp_port, sink.config.client_rtcp_port);

        // Source aimed at the sink's ports.
        let mut source = UdpTransportAdapter::new();
        let mut source_config = TransportConfig {
            role: TransportRole::Source,
            peer_ip: "127.0.0.1".parse().unwrap(),
            client_rtp_port: rtp_port,
            client_rtcp_port: rtcp_port,
            ..Default::default()
        };
        assert!(source.setup(&mut source_config));

        assert!(source.send_rtp(&[1, 2, 3]));
        assert!(source.send_rtcp(&[4, 5]));

        // Allow the receive threads to pick the datagrams up.
        for _ in 0..50 {
            if !collector.rtp.lock().is_empty() && !collector.rtcp.lock().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(collector.rtp.lock().as_slice(), &[vec![1, 2, 3]]);
        assert_eq!(collector.rtcp.lock().as_slice(), &[vec![4, 5]]);

        source.close();
        sink.close();
    }

    #[test]
    fn send_after_close_fails_cleanly() {
        let mut source = UdpTransportAdapter::new();
        let mut config = TransportConfig {
            role: TransportRole::Source,
            peer_ip: "127.0.0.1".parse().unwrap(),
            client_rtp_port: 9,
            client_rtcp_port: 10,
            ..Default::default()
        };
        assert!(source.setup(&mut config));
        source.close();
        assert!(!source.send_rtp(&[1]));
        assert!(!source.send_rtcp(&[1]));
        assert!(!source.is_active());
    }

    #[test]
    fn rtcp_disabled_without_client_port() {
        let mut source = UdpTransportAdapter::new();
        let mut config = TransportConfig {
            role: TransportRole::Source,
            peer_ip: "127.0.0.1".parse().unwrap(),
            client_rtp_port: 5004,
            client_rtcp_port: 0,
            ..Default::default()
        };
        assert!(source.setup(&mut config));
        assert!(source.send_rtp(&[1]));
        assert!(!source.send_rtcp(&[1]));
    }
}
