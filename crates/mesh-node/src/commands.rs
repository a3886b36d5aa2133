//! Command handlers

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use mesh_net::error::NetworkError;
use mesh_net::events::TracingEventSink;
use mesh_net::facade::MeshNodeFacade;
use mesh_net::nat::{NatType, StunClient};
use mesh_net::orchestrator::HolePunchResult;
use mesh_net::signaling::{ClientMessage, ServerMessage, SignalingClient};
use mesh_store::config::MeshConfig;

use crate::cli::{ConfigArgs, ConfigCommands, IdArgs, NatProbeArgs, RunArgs};

/// `mesh-node run`: bind the transport, classify our NAT, optionally
/// register with a coordinator, and block until interrupted.
pub async fn run(args: RunArgs, config: MeshConfig, json: bool) -> anyhow::Result<()> {
    let identity = mesh_store::identity::load_or_create()?;
    let machine_id = mesh_store::persistence::machine_id::load_or_create()?;
    tracing::info!(%machine_id, "loaded machine identity");
    let port = args.port.unwrap_or(config.bind_port);
    let network_id = args.network_id.unwrap_or(config.network_id);

    if args.connect.is_some() && args.coordinator.is_none() {
        anyhow::bail!("--connect requires --coordinator");
    }

    let state_dir = config
        .state_dir
        .clone()
        .unwrap_or_else(mesh_store::persistence::state_dir);
    let endpoint_store =
        mesh_net::endpoint_store::PeerEndpointStore::spawn(network_id.clone(), state_dir, config.validation_mode);

    let facade = MeshNodeFacade::new(identity, port, endpoint_store, Arc::new(TracingEventSink)).await?;

    let peer_id = facade.peer_id();
    let bound_port = facade.bound_port();

    let stun = StunClient::bind(0).await?;
    let server = resolve_stun_server(mesh_net::nat::stun::DEFAULT_STUN_SERVER).await?;
    let (nat_type, mapped) = stun.detect_nat_type(&[server]).await;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "peerId": peer_id.to_string(),
                "boundPort": bound_port,
                "networkId": network_id,
                "natType": nat_type,
                "endpoint": mapped.map(|a| a.to_string()),
            })
        );
    } else {
        println!("peer id:    {}", peer_id);
        println!("bound port: {}", bound_port);
        println!("network:    {}", network_id);
        println!("nat type:   {:?}", nat_type);
        if let Some(endpoint) = mapped {
            println!("endpoint:   {}", endpoint);
        }
    }

    if let Some(url) = args.coordinator {
        let client = SignalingClient::connect(&url).await?;
        let facade = facade.clone();
        tokio::spawn(async move {
            if let Err(e) = drive_signaling(facade, client, network_id, mapped, nat_type, args.connect).await {
                tracing::warn!(error = %e, "signaling loop ended");
            }
        });
    }

    tracing::info!("node running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

async fn resolve_stun_server(host: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(host)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve {}", host))
}

/// Keeps the coordinator connection alive for the node's lifetime: registers
/// once, then dispatches every directive the coordinator pushes —
/// `PeerEndpoint`/`HolePunchInitiate` on the invitee side of a connection,
/// `HolePunchStrategy`/`HolePunchNow` on the initiator side of one this node
/// requested via `--connect`.
async fn drive_signaling(
    facade: MeshNodeFacade,
    client: SignalingClient,
    network_id: String,
    mapped: Option<SocketAddr>,
    my_nat_type: NatType,
    connect_target: Option<String>,
) -> anyhow::Result<()> {
    let peer_id = facade.peer_id().to_string();

    client
        .send(ClientMessage::Register {
            peer_id: peer_id.clone(),
            network_id,
        })
        .await?;

    if let Some(endpoint) = mapped {
        client
            .send(ClientMessage::ReportEndpoint {
                endpoint: endpoint.to_string(),
                nat_type: my_nat_type,
            })
            .await?;
    }

    if let Some(target) = &connect_target {
        client
            .send(ClientMessage::RequestConnection {
                target: target.clone(),
                my_public_key: hex_encode(facade.public_key()),
            })
            .await?;
    }

    // `HolePunchInitiate` and `HolePunchNow` each arrive with no peer id of
    // their own; they're correlated with the message that precedes them.
    let mut pending_invite: Option<(String, NatType)> = None;
    let mut pending_simultaneous: Option<bool> = None;
    let pending_target = connect_target;

    loop {
        let message = match client.receive().await {
            Ok(m) => m,
            Err(NetworkError::Timeout) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "signaling connection closed");
                return Ok(());
            }
        };

        match message {
            ServerMessage::Registered { server_time } => {
                tracing::info!(server_time, "registered with coordinator");
            }
            ServerMessage::PeerEndpoint {
                peer_id: from_peer,
                nat_type: from_nat,
                public_key,
                ..
            } => {
                match hex_decode(&public_key) {
                    Ok(key) => facade.learn_public_key(from_peer.clone(), key),
                    Err(_) => tracing::warn!(%from_peer, "coordinator sent a malformed public key"),
                }
                pending_invite = Some((from_peer, from_nat));
            }
            ServerMessage::HolePunchInitiate { target_endpoint } => {
                let Some((from_peer, from_nat)) = pending_invite.take() else {
                    tracing::warn!("HolePunchInitiate with no preceding PeerEndpoint");
                    continue;
                };
                let Ok(target_endpoint) = target_endpoint.parse::<SocketAddr>() else {
                    tracing::warn!(%target_endpoint, "coordinator sent an unparsable endpoint");
                    continue;
                };
                spawn_invite(
                    facade.clone(),
                    client.clone(),
                    peer_id.clone(),
                    my_nat_type,
                    from_peer,
                    target_endpoint,
                    from_nat,
                );
            }
            ServerMessage::HolePunchStrategy { simultaneous } => {
                pending_simultaneous = Some(simultaneous);
            }
            ServerMessage::HolePunchNow { target_endpoint } => {
                let (Some(target), Some(simultaneous)) =
                    (pending_target.clone(), pending_simultaneous.take())
                else {
                    tracing::warn!("HolePunchNow with no pending connection request");
                    continue;
                };
                let Ok(target_endpoint) = target_endpoint.parse::<SocketAddr>() else {
                    tracing::warn!(%target_endpoint, "coordinator sent an unparsable endpoint");
                    continue;
                };
                spawn_execute(facade.clone(), client.clone(), peer_id.clone(), target, target_endpoint, simultaneous);
            }
            ServerMessage::RelayAssigned { endpoint, token } => {
                tracing::info!(%endpoint, %token, "coordinator assigned a relay");
            }
            ServerMessage::HolePunchWait => {
                tracing::debug!("coordinator asked us to wait before punching");
            }
            ServerMessage::HolePunchContinue { new_endpoint } => {
                tracing::debug!(%new_endpoint, "peer reported a new endpoint mid-punch");
            }
            ServerMessage::Pong => {}
            ServerMessage::Error { message } => {
                tracing::warn!(%message, "coordinator reported an error");
            }
        }
    }
}

fn spawn_invite(
    facade: MeshNodeFacade,
    client: SignalingClient,
    my_peer_id: String,
    my_nat_type: NatType,
    from_peer_id: String,
    from_endpoint: SocketAddr,
    from_nat_type: NatType,
) {
    let local_port = facade.bound_port();
    tokio::spawn(async move {
        let result = facade
            .orchestrator()
            .handle_invite(&my_peer_id, my_nat_type, &from_peer_id, from_endpoint, from_nat_type, local_port)
            .await;
        report_result(&client, &from_peer_id, result).await;
    });
}

fn spawn_execute(
    facade: MeshNodeFacade,
    client: SignalingClient,
    my_peer_id: String,
    target_peer_id: String,
    target_endpoint: SocketAddr,
    simultaneous: bool,
) {
    let local_port = facade.bound_port();
    tokio::spawn(async move {
        let result = facade
            .orchestrator()
            .execute_and_await(&my_peer_id, &target_peer_id, target_endpoint, simultaneous, local_port)
            .await;
        report_result(&client, &target_peer_id, result).await;
    });
}

async fn report_result(client: &SignalingClient, target_peer_id: &str, result: HolePunchResult) {
    let (success, actual_endpoint) = match result {
        HolePunchResult::Success { endpoint, .. } => (true, Some(endpoint.to_string())),
        HolePunchResult::Failed(e) => {
            tracing::warn!(peer = %target_peer_id, error = %e, "hole punch failed");
            (false, None)
        }
    };
    let _ = client
        .send(ClientMessage::HolePunchResult {
            target: target_peer_id.to_string(),
            success,
            actual_endpoint,
        })
        .await;
}

/// Hex-encodes a raw Ed25519 public key for wire messages that carry it
/// directly rather than via `PeerId`'s own hex `Display`.
fn hex_encode(bytes: [u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<[u8; 32], ()> {
    if s.len() != 64 {
        return Err(());
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| ())?;
    }
    Ok(out)
}

/// `mesh-node id`: show or regenerate the persisted identity.
pub fn id(args: IdArgs, json: bool) -> anyhow::Result<()> {
    let path = mesh_store::persistence::identity_file();
    if args.regenerate {
        std::fs::create_dir_all(path.parent().unwrap_or(std::path::Path::new(".")))?;
        let fresh = mesh_crypto::IdentityKeyPair::generate();
        std::fs::write(&path, fresh.to_bytes()?)?;
        print_identity(&fresh, json);
        return Ok(());
    }

    let identity = mesh_store::identity::load_or_create()?;
    print_identity(&identity, json);
    Ok(())
}

fn print_identity(identity: &mesh_crypto::IdentityKeyPair, json: bool) {
    let peer_id = identity.peer_id().to_string();
    let fingerprint = mesh_store::identity::fingerprint_hex(&identity.public_key());
    if json {
        println!(
            "{}",
            serde_json::json!({ "peerId": peer_id, "fingerprint": fingerprint })
        );
    } else {
        println!("peer id:     {}", peer_id);
        println!("fingerprint: {}", fingerprint);
    }
}

/// `mesh-node nat-probe`: classify this node's NAT type against a STUN server.
pub async fn nat_probe(args: NatProbeArgs, json: bool) -> anyhow::Result<()> {
    let stun = StunClient::bind(args.port).await?;
    let server = resolve_stun_server(&args.stun_server).await?;
    let (nat_type, mapped) = stun.detect_nat_type(&[server]).await;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "natType": nat_type,
                "mappedEndpoint": mapped.map(|a| a.to_string()),
                "stunServer": args.stun_server,
            })
        );
    } else {
        println!("stun server:     {}", args.stun_server);
        println!("nat type:        {:?}", nat_type);
        match mapped {
            Some(addr) => println!("mapped endpoint: {}", addr),
            None => println!("mapped endpoint: (none — request failed or timed out)"),
        }
    }
    Ok(())
}

/// `mesh-node config show` / `mesh-node config path`.
pub fn config(args: ConfigArgs, config: MeshConfig, config_path: PathBuf, json: bool) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Path => println!("{}", config_path.display()),
        ConfigCommands::Show => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }
    Ok(())
}
