//! Per-connection dispatcher: reads frames, routes them to `Client`
//! operations, and replies with ACK/NACK.

use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::client::Client;
use crate::codec::{self, PacketType, Role};
use crate::error::{Result, ServerError};
use crate::supervisor::ServerState;

/// Drives one connection until EOF or a transport error, then tears down
/// the Client's state and removes it from the registry. `reader` is the
/// read half of the same socket whose write half `client` already owns.
pub async fn run<R>(mut reader: R, client: Arc<Client>, state: Arc<ServerState>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match codec::recv(&mut reader).await {
            Ok(None) => break,
            Ok(Some((header, payload))) => {
                let Some(kind) = PacketType::from_wire(header.kind) else {
                    if let Err(err) = client.reply(PacketType::Nack, header.id, &[]).await {
                        state.log.warn(format!("client {}: reply failed: {err}", client.id));
                        break;
                    }
                    continue;
                };

                let outcome = dispatch(&client, &state, kind, header.id, header.role, &payload).await;
                let (ack_kind, ack_id, ack_payload) = match outcome {
                    Ok((id, payload)) => (PacketType::Ack, id, payload),
                    Err(err) => {
                        state.log.debug(format!("client {}: {kind:?} rejected: {err}", client.id));
                        (PacketType::Nack, header.id, Vec::new())
                    }
                };
                if let Err(err) = client.reply(ack_kind, ack_id, &ack_payload).await {
                    state.log.warn(format!("client {}: reply failed: {err}", client.id));
                    break;
                }
            }
            Err(_) => break,
        }
    }

    if client.is_logged_in() {
        if let Err(err) = client.logout().await {
            state.log.warn(format!("client {}: logout on disconnect failed: {err}", client.id));
        }
    }
    state.clients.unregister(&client).await;
}

/// Executes one request. Returns the (id, payload) to echo back in the ACK.
async fn dispatch(
    client: &Arc<Client>,
    state: &Arc<ServerState>,
    kind: PacketType,
    id: u8,
    role: u8,
    payload: &[u8],
) -> Result<(u8, Vec<u8>)> {
    match kind {
        PacketType::Login => {
            if client.is_logged_in() {
                return Err(ServerError::Duplicate("already logged in"));
            }
            let name = std::str::from_utf8(payload)
                .map_err(|_| ServerError::Protocol("username is not utf-8".into()))?
                .trim();
            if name.is_empty() {
                return Err(ServerError::Protocol("username is empty".into()));
            }
            if state.clients.lookup(name).await.is_some() {
                return Err(ServerError::Duplicate("username already taken"));
            }
            let player = state.players.register(name).await;
            client.login(player)?;
            Ok((id, Vec::new()))
        }

        PacketType::Users => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            let players = state.clients.snapshot_players().await;
            let mut out = String::new();
            for p in players {
                out.push_str(&format!("{}\t{}\n", p.name(), p.rating()));
            }
            Ok((id, out.into_bytes()))
        }

        PacketType::Invite => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            let name = std::str::from_utf8(payload)
                .map_err(|_| ServerError::Protocol("target username is not utf-8".into()))?
                .trim();
            let target = state
                .clients
                .lookup(name)
                .await
                .ok_or(ServerError::NotFound("no such user"))?;
            let target_role =
                Role::from_wire(role).filter(|r| *r != Role::None).ok_or(ServerError::Protocol("invalid role".into()))?;
            let source_role = target_role.other();
            let source_id = client.make_invitation(target, source_role, target_role).await?;
            Ok((source_id, Vec::new()))
        }

        PacketType::Revoke => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            client.revoke_invitation(id).await?;
            Ok((id, Vec::new()))
        }

        PacketType::Decline => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            client.decline_invitation(id).await?;
            Ok((id, Vec::new()))
        }

        PacketType::Accept => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            let initial_state = client.accept_invitation(id).await?;
            Ok((id, initial_state.unwrap_or_default().into_bytes()))
        }

        PacketType::Move => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            let text = std::str::from_utf8(payload)
                .map_err(|_| ServerError::Protocol("move is not utf-8".into()))?;
            client.make_move(id, text).await?;
            Ok((id, Vec::new()))
        }

        PacketType::Resign => {
            if !client.is_logged_in() {
                return Err(ServerError::BadState("not logged in"));
            }
            client.resign_game(id).await?;
            Ok((id, Vec::new()))
        }

        PacketType::Ack
        | PacketType::Nack
        | PacketType::Invited
        | PacketType::Revoked
        | PacketType::Declined
        | PacketType::Accepted
        | PacketType::Moved
        | PacketType::Resigned
        | PacketType::Ended => Err(ServerError::Protocol("server-only packet type received from client".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use crate::player::Player;
    use crate::registry::{ClientRegistry, PlayerRegistry};

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            players: PlayerRegistry::new(),
            clients: ClientRegistry::new(8),
            log: Arc::new(Logger::new(0)),
        })
    }

    #[tokio::test]
    async fn login_rejects_duplicate_username() {
        let state = state();
        let c1 = Client::new_for_test(1);
        let c2 = Client::new_for_test(2);
        state.clients.register(c1.clone()).await.unwrap();
        state.clients.register(c2.clone()).await.unwrap();

        dispatch(&c1, &state, PacketType::Login, 0, 0, b"alice").await.unwrap();
        let err = dispatch(&c2, &state, PacketType::Login, 0, 0, b"alice").await.unwrap_err();
        assert!(matches!(err, ServerError::Duplicate(_)));
    }

    #[tokio::test]
    async fn users_lists_logged_in_players_as_tsv() {
        let state = state();
        let c1 = Client::new_for_test(1);
        state.clients.register(c1.clone()).await.unwrap();
        c1.login(Arc::new(Player::create("alice"))).unwrap();

        let (_, payload) = dispatch(&c1, &state, PacketType::Users, 0, 0, &[]).await.unwrap();
        assert_eq!(String::from_utf8(payload).unwrap(), "alice\t1500\n");
    }

    #[tokio::test]
    async fn invite_requires_a_valid_target_role() {
        let state = state();
        let c1 = Client::new_for_test(1);
        let c2 = Client::new_for_test(2);
        state.clients.register(c1.clone()).await.unwrap();
        state.clients.register(c2.clone()).await.unwrap();
        c1.login(Arc::new(Player::create("alice"))).unwrap();
        c2.login(Arc::new(Player::create("bob"))).unwrap();

        let err = dispatch(&c1, &state, PacketType::Invite, 0, 0, b"bob").await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));

        let (source_id, _) = dispatch(&c1, &state, PacketType::Invite, 0, Role::First.to_wire(), b"bob")
            .await
            .unwrap();
        assert_eq!(source_id, 0);
    }

    #[tokio::test]
    async fn unknown_packet_type_is_rejected_without_touching_state() {
        let state = state();
        let c1 = Client::new_for_test(1);
        state.clients.register(c1.clone()).await.unwrap();
        let err = dispatch(&c1, &state, PacketType::Ack, 0, 0, &[]).await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }
}
