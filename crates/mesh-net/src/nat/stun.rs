//! STUN client for NAT discovery (RFC 5389 subset)
//!
//! Only what the NAT-classification algorithm in §4.4 needs: a binding
//! request/response round trip and the XOR-MAPPED-ADDRESS attribute.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::NetworkError;
use crate::nat::types::NatType;
use crate::Result;

/// RFC 5389 magic cookie.
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE_SUCCESS: u16 = 0x0101;
const XOR_MAPPED_ADDRESS: u16 = 0x0020;
const MAPPED_ADDRESS: u16 = 0x0001;
const CHANGE_REQUEST: u16 = 0x0003;

/// CHANGE-REQUEST flag: ask the server to reply from a different IP.
const CHANGE_IP_FLAG: u32 = 0x0000_0004;
/// CHANGE-REQUEST flag: ask the server to reply from a different port.
const CHANGE_PORT_FLAG: u32 = 0x0000_0002;

/// A well-known public STUN server, used as a sane default.
pub const DEFAULT_STUN_SERVER: &str = "stun.l.google.com:19302";

/// Result of a successful STUN binding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StunResult {
    /// The public address and port this request was seen from.
    pub mapped_addr: SocketAddr,
}

/// A minimal STUN client bound to a single local UDP socket.
pub struct StunClient {
    socket: UdpSocket,
    timeout: Duration,
}

impl StunClient {
    /// Bind a fresh socket on `local_port` (0 = OS-chosen) for STUN requests.
    pub async fn bind(local_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        Ok(Self {
            socket,
            timeout: Duration::from_secs(3),
        })
    }

    /// Use an already-bound socket (so the discovered mapping applies to the
    /// exact port the caller's transport will keep using).
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            timeout: Duration::from_secs(3),
        }
    }

    /// Override the per-request timeout (default 3s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The local address this client's socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(NetworkError::from)
    }

    /// Send a single STUN binding request to `server` and return the
    /// mapped address from its response.
    pub async fn binding_request(&self, server: SocketAddr) -> Result<StunResult> {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        let request = encode_binding_request(&transaction_id);

        self.socket
            .send_to(&request, server)
            .await
            .map_err(|e| NetworkError::SocketError(e.to_string()))?;

        let mut buf = [0u8; 512];
        let (len, _from) = timeout(self.timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::SocketError(e.to_string()))?;

        decode_binding_response(&buf[..len], &transaction_id)
    }

    /// Classify this socket's NAT type by probing two distinct STUN
    /// servers and comparing mapped ports, per §4.4:
    ///
    /// 1. Mapped address equals the local bound address → `public`.
    /// 2. Same mapped port from both servers → cone family; a secondary
    ///    filter-test request distinguishes full/restricted/port-restricted.
    /// 3. Different mapped ports → `symmetric`.
    /// 4. Any network failure or inconclusive exchange → `unknown`.
    pub async fn detect_nat_type(&self, servers: &[SocketAddr]) -> (NatType, Option<SocketAddr>) {
        if servers.len() < 2 {
            return match servers.first() {
                Some(&server) => match self.binding_request(server).await {
                    Ok(result) => {
                        let nat = self.classify_single(server, result.mapped_addr).await;
                        (nat, Some(result.mapped_addr))
                    }
                    Err(_) => (NatType::Unknown, None),
                },
                None => (NatType::Unknown, None),
            };
        }

        let first = self.binding_request(servers[0]).await;
        let second = self.binding_request(servers[1]).await;

        match (first, second) {
            (Ok(a), Ok(b)) => {
                if self.is_public(a.mapped_addr) {
                    (NatType::Public, Some(a.mapped_addr))
                } else if a.mapped_addr.port() == b.mapped_addr.port() {
                    let nat = self.classify_cone_subtype(servers[0]).await;
                    (nat, Some(a.mapped_addr))
                } else {
                    (NatType::Symmetric, Some(a.mapped_addr))
                }
            }
            (Ok(a), Err(_)) => {
                let nat = self.classify_single(servers[0], a.mapped_addr).await;
                (nat, Some(a.mapped_addr))
            }
            _ => (NatType::Unknown, None),
        }
    }

    async fn classify_single(&self, server: SocketAddr, mapped: SocketAddr) -> NatType {
        if self.is_public(mapped) {
            NatType::Public
        } else {
            self.classify_cone_subtype(server).await
        }
    }

    /// Distinguish full/restricted/port-restricted cone NATs via the
    /// CHANGE-REQUEST filter tests (§4.4 step 3): ask `server` to reply from
    /// a different IP and port in turn, and see which ones make it through.
    ///
    /// Many modern public STUN servers ignore CHANGE-REQUEST entirely, which
    /// this client treats the same as a NAT that filters it — the
    /// conservative (more restricted) classification, consistent with
    /// `classify_single`'s existing fallback rule.
    async fn classify_cone_subtype(&self, server: SocketAddr) -> NatType {
        if self
            .filter_test(server, CHANGE_IP_FLAG | CHANGE_PORT_FLAG)
            .await
            .is_ok()
        {
            return NatType::FullCone;
        }
        if self.filter_test(server, CHANGE_PORT_FLAG).await.is_ok() {
            return NatType::RestrictedCone;
        }
        NatType::PortRestrictedCone
    }

    /// Send a single CHANGE-REQUEST binding request to `server`, asking it
    /// to reply from an alternate address per `flags`. `Ok` means a reply
    /// made it back through any NAT between us and the server; `Err` (most
    /// often `Timeout`) means it was filtered.
    async fn filter_test(&self, server: SocketAddr, flags: u32) -> Result<StunResult> {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        let request = encode_change_request(&transaction_id, flags);

        self.socket
            .send_to(&request, server)
            .await
            .map_err(|e| NetworkError::SocketError(e.to_string()))?;

        let mut buf = [0u8; 512];
        let (len, _from) = timeout(self.timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::SocketError(e.to_string()))?;

        decode_binding_response(&buf[..len], &transaction_id)
    }

    fn is_public(&self, mapped: SocketAddr) -> bool {
        self.socket
            .local_addr()
            .map(|local| local.port() == mapped.port() && same_host_family(local, mapped))
            .unwrap_or(false)
    }
}

fn same_host_family(local: SocketAddr, mapped: SocketAddr) -> bool {
    // We can't know our own public IP without asking, so "public" is
    // inferred purely from the port matching what we bound (a NAT would
    // have remapped the port in nearly all real-world configurations).
    local.is_ipv4() == mapped.is_ipv4()
}

fn encode_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // message length, no attributes
    out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    out.extend_from_slice(transaction_id);
    out
}

fn encode_change_request(transaction_id: &[u8; 12], flags: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(28);
    out.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    out.extend_from_slice(&8u16.to_be_bytes()); // one attribute: 4-byte header + 4-byte value
    out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    out.extend_from_slice(transaction_id);
    out.extend_from_slice(&CHANGE_REQUEST.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out
}

fn decode_binding_response(data: &[u8], expected_transaction_id: &[u8; 12]) -> Result<StunResult> {
    if data.len() < 20 {
        return Err(NetworkError::DecodeError("STUN message too short".into()));
    }
    let message_type = u16::from_be_bytes([data[0], data[1]]);
    let message_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if cookie != MAGIC_COOKIE {
        return Err(NetworkError::DecodeError("bad STUN magic cookie".into()));
    }
    if &data[8..20] != expected_transaction_id {
        return Err(NetworkError::DecodeError("STUN transaction id mismatch".into()));
    }
    if message_type != BINDING_RESPONSE_SUCCESS {
        return Err(NetworkError::DecodeError(format!(
            "unexpected STUN message type {:#06x}",
            message_type
        )));
    }

    let attrs_end = (20 + message_len).min(data.len());
    let mut offset = 20;
    while offset + 4 <= attrs_end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > data.len() {
            break;
        }
        let value = &data[value_start..value_end];

        if attr_type == XOR_MAPPED_ADDRESS {
            if let Some(addr) = decode_xor_mapped_address(value) {
                return Ok(StunResult { mapped_addr: addr });
            }
        } else if attr_type == MAPPED_ADDRESS {
            if let Some(addr) = decode_mapped_address(value) {
                return Ok(StunResult { mapped_addr: addr });
            }
        }

        // Attributes are padded to a 4-byte boundary.
        let padded_len = attr_len.div_ceil(4) * 4;
        offset = value_start + padded_len;
    }

    Err(NetworkError::DecodeError(
        "no (XOR-)MAPPED-ADDRESS attribute in STUN response".into(),
    ))
}

/// Decode XOR-MAPPED-ADDRESS: port is XORed with the upper 16 bits of the
/// magic cookie; the address is XORed with the full cookie (IPv4) or the
/// cookie followed by the transaction id (IPv6, not needed here).
fn decode_xor_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let family = value[1];
    let cookie_bytes = MAGIC_COOKIE.to_be_bytes();
    let port = u16::from_be_bytes([value[2], value[3]]) ^ u16::from_be_bytes([cookie_bytes[0], cookie_bytes[1]]);

    match family {
        0x01 => {
            if value.len() < 8 {
                return None;
            }
            let mut octets = [0u8; 4];
            for i in 0..4 {
                octets[i] = value[4 + i] ^ cookie_bytes[i];
            }
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        0x02 => {
            // IPv6 XOR key is cookie || transaction-id, which we don't have
            // here; unused by this client's classification path today.
            None
        }
        _ => None,
    }
}

fn decode_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]);
    match family {
        0x01 => {
            let octets: [u8; 4] = value[4..8].try_into().ok()?;
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        0x02 => {
            if value.len() < 20 {
                return None;
            }
            let octets: [u8; 16] = value[4..20].try_into().ok()?;
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_response(transaction_id: &[u8; 12], addr: SocketAddr) -> Vec<u8> {
        let xor_value = match addr {
            SocketAddr::V4(v4) => {
                let cookie_bytes = MAGIC_COOKIE.to_be_bytes();
                let xport = v4.port() ^ u16::from_be_bytes([cookie_bytes[0], cookie_bytes[1]]);
                let mut v = vec![0u8, 0x01];
                v.extend_from_slice(&xport.to_be_bytes());
                for (i, b) in v4.ip().octets().iter().enumerate() {
                    v.push(b ^ cookie_bytes[i]);
                }
                v
            }
            SocketAddr::V6(_) => panic!("test only builds v4 responses"),
        };

        let mut attr = Vec::new();
        attr.extend_from_slice(&XOR_MAPPED_ADDRESS.to_be_bytes());
        attr.extend_from_slice(&(xor_value.len() as u16).to_be_bytes());
        attr.extend_from_slice(&xor_value);

        let mut out = Vec::new();
        out.extend_from_slice(&BINDING_RESPONSE_SUCCESS.to_be_bytes());
        out.extend_from_slice(&(attr.len() as u16).to_be_bytes());
        out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(transaction_id);
        out.extend_from_slice(&attr);
        out
    }

    #[test]
    fn decodes_xor_mapped_address_round_trip() {
        let transaction_id = [7u8; 12];
        let addr: SocketAddr = "203.0.113.5:54321".parse().unwrap();
        let response = build_response(&transaction_id, addr);
        let decoded = decode_binding_response(&response, &transaction_id).unwrap();
        assert_eq!(decoded.mapped_addr, addr);
    }

    #[test]
    fn rejects_wrong_transaction_id() {
        let transaction_id = [1u8; 12];
        let other_id = [2u8; 12];
        let addr: SocketAddr = "203.0.113.5:1234".parse().unwrap();
        let response = build_response(&transaction_id, addr);
        assert!(decode_binding_response(&response, &other_id).is_err());
    }

    #[test]
    fn rejects_short_message() {
        assert!(decode_binding_response(&[0u8; 10], &[0u8; 12]).is_err());
    }

    #[tokio::test]
    async fn binding_request_round_trips_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = StunClient::bind(0).await.unwrap();
        let client_local = client.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let transaction_id: [u8; 12] = buf[8..20].try_into().unwrap();
            let response = build_response(&transaction_id, client_local);
            server.send_to(&response, from).await.unwrap();
            let _ = len;
        });

        let result = client.binding_request(server_addr).await.unwrap();
        assert_eq!(result.mapped_addr, client_local);
        server_task.await.unwrap();
    }

    /// Parses the CHANGE-REQUEST attribute flags out of a raw request, if
    /// present, so a fake server can decide whether to "honor" it.
    fn change_request_flags(data: &[u8]) -> Option<u32> {
        let message_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let attrs_end = (20 + message_len).min(data.len());
        let mut offset = 20;
        while offset + 4 <= attrs_end {
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let value_start = offset + 4;
            let value_end = value_start + attr_len;
            if value_end > data.len() {
                break;
            }
            if attr_type == CHANGE_REQUEST && attr_len == 4 {
                return Some(u32::from_be_bytes(data[value_start..value_end].try_into().unwrap()));
            }
            let padded_len = attr_len.div_ceil(4) * 4;
            offset = value_start + padded_len;
        }
        None
    }

    /// Runs a fake STUN server that always replies to a plain binding
    /// request, and replies to a CHANGE-REQUEST only when its flags are a
    /// subset of `honored_flags` (simulating a NAT/server that lets some
    /// filter tests through and not others).
    fn spawn_fake_server(server: UdpSocket, reply_addr: SocketAddr, honored_flags: u32) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (len, from) = match server.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let transaction_id: [u8; 12] = buf[8..20].try_into().unwrap();
                let honored = match change_request_flags(&buf[..len]) {
                    Some(flags) => flags & !honored_flags == 0,
                    None => true,
                };
                if honored {
                    let response = build_response(&transaction_id, reply_addr);
                    let _ = server.send_to(&response, from).await;
                }
            }
        })
    }

    #[tokio::test]
    async fn cone_subtype_is_full_cone_when_server_honors_both_change_flags() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = StunClient::bind(0).await.unwrap().with_timeout(Duration::from_millis(200));
        let client_local = client.local_addr().unwrap();

        let server_task = spawn_fake_server(server, client_local, CHANGE_IP_FLAG | CHANGE_PORT_FLAG);
        let nat = client.classify_cone_subtype(server_addr).await;
        server_task.abort();
        assert_eq!(nat, NatType::FullCone);
    }

    #[tokio::test]
    async fn cone_subtype_is_restricted_when_only_port_change_is_honored() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = StunClient::bind(0).await.unwrap().with_timeout(Duration::from_millis(200));
        let client_local = client.local_addr().unwrap();

        let server_task = spawn_fake_server(server, client_local, CHANGE_PORT_FLAG);
        let nat = client.classify_cone_subtype(server_addr).await;
        server_task.abort();
        assert_eq!(nat, NatType::RestrictedCone);
    }

    #[tokio::test]
    async fn cone_subtype_is_port_restricted_when_no_change_flags_are_honored() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = StunClient::bind(0).await.unwrap().with_timeout(Duration::from_millis(200));
        let client_local = client.local_addr().unwrap();

        let server_task = spawn_fake_server(server, client_local, 0);
        let nat = client.classify_cone_subtype(server_addr).await;
        server_task.abort();
        assert_eq!(nat, NatType::PortRestrictedCone);
    }
}
