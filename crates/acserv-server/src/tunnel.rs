//! CONNECT handshake and the raw tunnel loop
//!
//! After a `CONNECT` request the gateway answers with the CSTP session
//! parameters and stops speaking HTTP on that connection. Everything the
//! client sends afterwards is tunnel traffic, which is only read and counted
//! here until a data plane takes it over.

use bytes::Bytes;
use http::Request;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

use crate::{RunningFlag, ServerError};

/// Size of the buffer used to read tunnel traffic
pub const RELAY_BUFFER_SIZE: usize = 2048;

/// Session parameters announced in the CONNECT response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelProfile {
    pub server_name: String,
    pub dpd_secs: u32,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns: Vec<IpAddr>,
    pub split_include_ip6: Vec<String>,
    pub tunnel_all_dns: bool,
    pub split_exclude: Vec<String>,
    pub keepalive_secs: u32,
    pub idle_timeout_secs: Option<u64>,
    pub smartcard_removal_disconnect: bool,
    pub dyn_dns: bool,
    pub rekey_time_secs: u64,
    pub rekey_method: String,
    pub session_timeout_secs: Option<u64>,
    pub disconnected_timeout_secs: Option<u64>,
    pub keep: bool,
    pub tcp_keepalive: bool,
    pub license: String,
    pub dtls_dpd_secs: u32,
    pub dtls_port: u16,
    pub dtls_rekey_time_secs: u64,
    pub dtls_rekey_method: String,
    pub dtls_keepalive_secs: u32,
    pub dtls_session_id: String,
    pub dtls12_cipher_suite: String,
    pub dtls_mtu: u16,
    pub base_mtu: u16,
    pub mtu: u16,
    pub dtls_content_encoding: String,
    pub cstp_content_encoding: String,
}

impl Default for TunnelProfile {
    fn default() -> Self {
        Self {
            server_name: concat!("acserv ", env!("CARGO_PKG_VERSION")).to_string(),
            dpd_secs: 1800,
            address: Ipv4Addr::new(192, 168, 35, 222),
            netmask: Ipv4Addr::new(255, 255, 240, 0),
            dns: vec![IpAddr::V4(Ipv4Addr::new(119, 29, 29, 29))],
            split_include_ip6: vec!["2000::/3".to_string()],
            tunnel_all_dns: false,
            split_exclude: [
                "10.0.0.0/255.0.0.0",
                "192.168.0.0/255.255.0.0",
                "192.168.0.0/255.255.255.0",
                "172.16.0.0/255.240.0.0",
                "100.64.0.0/255.192.0.0",
                "224.0.0.0/255.0.0.0",
                "169.254.0.0/255.255.0.0",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            keepalive_secs: 32400,
            idle_timeout_secs: None,
            smartcard_removal_disconnect: true,
            dyn_dns: true,
            rekey_time_secs: 172782,
            rekey_method: "ssl".to_string(),
            session_timeout_secs: None,
            disconnected_timeout_secs: None,
            keep: true,
            tcp_keepalive: true,
            license: "accept".to_string(),
            dtls_dpd_secs: 1800,
            dtls_port: 1443,
            dtls_rekey_time_secs: 172792,
            dtls_rekey_method: "ssl".to_string(),
            dtls_keepalive_secs: 32400,
            dtls_session_id: "459a879b197f41b97646541b2d43e3130ddd4d88c82448f2f93ca09547083729"
                .to_string(),
            dtls12_cipher_suite: "AES256-GCM-SHA384".to_string(),
            dtls_mtu: 1434,
            base_mtu: 1500,
            mtu: 1434,
            dtls_content_encoding: "lzs".to_string(),
            cstp_content_encoding: "lzs".to_string(),
        }
    }
}

impl TunnelProfile {
    /// The `200 CONNECTED` response, terminated by the empty line
    pub fn handshake_response(&self, hostname: &str) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str("HTTP/1.1 200 CONNECTED\r\n");

        header(&mut out, "X-CSTP-Version", 1);
        header(&mut out, "X-CSTP-Server-Name", &self.server_name);
        header(&mut out, "X-CSTP-Hostname", hostname);
        header(&mut out, "X-CSTP-DPD", self.dpd_secs);
        header(&mut out, "X-CSTP-Address", self.address);
        header(&mut out, "X-CSTP-Netmask", self.netmask);
        for dns in &self.dns {
            header(&mut out, "X-CSTP-DNS", dns);
        }
        for route in &self.split_include_ip6 {
            header(&mut out, "X-CSTP-Split-Include-IP6", route);
        }
        header(&mut out, "X-CSTP-Tunnel-All-DNS", self.tunnel_all_dns);
        for route in &self.split_exclude {
            header(&mut out, "X-CSTP-Split-Exclude", route);
        }
        header(&mut out, "X-CSTP-Keepalive", self.keepalive_secs);
        header(&mut out, "X-CSTP-Idle-Timeout", timeout(self.idle_timeout_secs));
        header(
            &mut out,
            "X-CSTP-Smartcard-Removal-Disconnect",
            self.smartcard_removal_disconnect,
        );
        header(&mut out, "X-CSTP-DynDNS", self.dyn_dns);
        header(&mut out, "X-CSTP-Rekey-Time", self.rekey_time_secs);
        header(&mut out, "X-CSTP-Rekey-Method", &self.rekey_method);
        header(&mut out, "X-CSTP-Session-Timeout", timeout(self.session_timeout_secs));
        header(
            &mut out,
            "X-CSTP-Disconnected-Timeout",
            timeout(self.disconnected_timeout_secs),
        );
        header(&mut out, "X-CSTP-Keep", self.keep);
        header(&mut out, "X-CSTP-TCP-Keepalive", self.tcp_keepalive);
        header(&mut out, "X-CSTP-License", &self.license);
        header(&mut out, "X-DTLS-DPD", self.dtls_dpd_secs);
        header(&mut out, "X-DTLS-Port", self.dtls_port);
        header(&mut out, "X-DTLS-Rekey-Time", self.dtls_rekey_time_secs);
        header(&mut out, "X-DTLS-Rekey-Method", &self.dtls_rekey_method);
        header(&mut out, "X-DTLS-Keepalive", self.dtls_keepalive_secs);
        header(&mut out, "X-DTLS-Session-ID", &self.dtls_session_id);
        header(&mut out, "X-DTLS12-CipherSuite", &self.dtls12_cipher_suite);
        header(&mut out, "X-DTLS-MTU", self.dtls_mtu);
        header(&mut out, "X-CSTP-Base-MTU", self.base_mtu);
        header(&mut out, "X-CSTP-MTU", self.mtu);
        header(&mut out, "X-DTLS-Content-Encoding", &self.dtls_content_encoding);
        header(&mut out, "X-CSTP-Content-Encoding", &self.cstp_content_encoding);

        out.push_str("\r\n");
        out
    }
}

fn header(out: &mut String, name: &str, value: impl Display) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(&value.to_string());
    out.push_str("\r\n");
}

fn timeout(secs: Option<u64>) -> String {
    secs.map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Owns a connection after its `CONNECT` request
pub struct TunnelNegotiator<'a> {
    profile: &'a TunnelProfile,
    running: RunningFlag,
    idle_timeout: Option<Duration>,
}

impl<'a> TunnelNegotiator<'a> {
    pub fn new(profile: &'a TunnelProfile, running: RunningFlag, idle_timeout: Option<Duration>) -> Self {
        Self {
            profile,
            running,
            idle_timeout,
        }
    }

    /// Send the handshake, then read tunnel traffic until the client goes
    /// away or the server stops
    pub async fn negotiate<S>(&mut self, request: &Request<Bytes>, stream: &mut S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let hostname = request
            .headers()
            .get("x-cstp-hostname")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let response = self.profile.handshake_response(hostname);
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        info!("Tunnel connected (client hostname: {:?})", hostname);
        let received = self.relay(stream).await?;
        info!("Tunnel closed after {} bytes", received);
        Ok(())
    }

    async fn relay<S>(&mut self, stream: &mut S) -> Result<u64, ServerError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buffer = [0u8; RELAY_BUFFER_SIZE];
        let mut received = 0u64;

        while self.running.is_running() {
            let read = tokio::select! {
                _ = self.running.stopped() => {
                    debug!("Tunnel relay interrupted by shutdown");
                    break;
                }
                read = read_with_deadline(stream, &mut buffer, self.idle_timeout) => read,
            };

            match read {
                Ok(0) => break,
                Ok(n) => {
                    received += n as u64;
                    trace!("Tunnel read {} bytes", n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    debug!("Tunnel read error: {}", e);
                    return Err(e.into());
                }
            }
        }

        Ok(received)
    }
}

async fn read_with_deadline<S>(
    stream: &mut S,
    buffer: &mut [u8],
    deadline: Option<Duration>,
) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    match deadline {
        Some(duration) => tokio::time::timeout(duration, stream.read(buffer))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tunnel read timed out"))?,
        None => stream.read(buffer).await,
    }
}
