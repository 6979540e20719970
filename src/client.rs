//! Per-connection state: login, owned invitations with local ids, and a
//! write lock that serializes outbound packets to this client's socket.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::{self, Header, PacketType, Role};
use crate::error::{Result, ServerError};
use crate::invitation::{Invitation, InvitationState};
use crate::logger::Logger;
use crate::player::{Outcome, Player};

struct ClientState {
    username: Option<String>,
    player: Option<Arc<Player>>,
    invitations: Vec<(u8, Arc<Invitation>)>,
}

pub struct Client {
    /// Stands in for the original's raw file descriptor: a monotonically
    /// assigned connection id, also used as the stable total order for
    /// paired-lock acquisition (§9 of SPEC_FULL.md).
    pub id: u64,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    state: Mutex<ClientState>,
    next_invitation_id: AtomicU8,
    log: Arc<Logger>,
}

impl Client {
    pub fn new(id: u64, writer: Box<dyn AsyncWrite + Unpin + Send>, log: Arc<Logger>) -> Arc<Client> {
        Arc::new(Client {
            id,
            writer: AsyncMutex::new(writer),
            state: Mutex::new(ClientState {
                username: None,
                player: None,
                invitations: Vec::new(),
            }),
            next_invitation_id: AtomicU8::new(0),
            log,
        })
    }

    #[cfg(test)]
    pub fn new_for_test(id: u64) -> Arc<Client> {
        Client::new(id, Box::new(tokio::io::sink()), Arc::new(Logger::new(0)))
    }

    pub fn username(&self) -> Option<String> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).username.clone()
    }

    pub fn player(&self) -> Option<Arc<Player>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).player.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).username.is_some()
    }

    /// Half-closes the write half of this client's socket so its session
    /// loop's next read observes EOF. Used by `shutdown_all`.
    pub async fn shutdown_write_half(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(ServerError::Transport)
    }

    // ---- login/logout -----------------------------------------------------

    pub fn login(&self, player: Arc<Player>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.username.is_some() {
            return Err(ServerError::Duplicate("already logged in"));
        }
        state.username = Some(player.name().to_string());
        state.player = Some(player);
        Ok(())
    }

    /// Closes every local invitation (resigning in-progress games, revoking
    /// as source, declining as target), then releases the player reference.
    /// Per §4.6: complete list mutations before releasing peer locks;
    /// notifications are best-effort.
    pub async fn logout(self: &Arc<Client>) -> Result<()> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.username.is_none() {
                return Err(ServerError::NotFound("not logged in"));
            }
        }

        let ids: Vec<u8> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.invitations.iter().map(|(id, _)| *id).collect()
        };

        for id in ids {
            let Some(inv) = self.find_invitation(id) else {
                continue;
            };
            let is_source = Arc::ptr_eq(&inv.source, self);
            let result = if inv.game().is_some() {
                self.resign_game(id).await
            } else if is_source {
                self.revoke_invitation(id).await
            } else {
                self.decline_invitation(id).await
            };
            if let Err(err) = result {
                self.log.warn(format!("logout: cleanup of invitation {id} failed: {err}"));
            }
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.username = None;
        state.player = None;
        Ok(())
    }

    // ---- invitation list bookkeeping --------------------------------------

    fn add_invitation(&self, inv: Arc<Invitation>) -> u8 {
        let id = self.next_invitation_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.invitations.push((id, inv));
        id
    }

    fn remove_invitation(&self, inv: &Arc<Invitation>) -> Option<u8> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let pos = state.invitations.iter().position(|(_, i)| Arc::ptr_eq(i, inv))?;
        let (id, _) = state.invitations.remove(pos);
        Some(id)
    }

    fn find_invitation(&self, id: u8) -> Option<Arc<Invitation>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.invitations.iter().find(|(i, _)| *i == id).map(|(_, inv)| inv.clone())
    }

    /// Removes `inv` from both endpoints' lists. The two removals never
    /// overlap in time (each locks only its own Client), but are always
    /// issued in the fixed `id`-ascending order mandated by §5, so that a
    /// future change coupling list mutation to another lock cannot
    /// reintroduce an AB/BA deadlock.
    fn remove_from_both(a: &Arc<Client>, b: &Arc<Client>, inv: &Arc<Invitation>) -> (Option<u8>, Option<u8>) {
        if a.id <= b.id {
            let ida = a.remove_invitation(inv);
            let idb = b.remove_invitation(inv);
            (ida, idb)
        } else {
            let idb = b.remove_invitation(inv);
            let ida = a.remove_invitation(inv);
            (ida, idb)
        }
    }

    // ---- outbound notifications --------------------------------------------

    async fn send_frame(&self, kind: PacketType, id: u8, role: Role, payload: &[u8]) -> Result<()> {
        let header = Header::new(kind, id, role, payload.len() as u16);
        let mut writer = self.writer.lock().await;
        codec::send(&mut *writer, &header, payload).await
    }

    /// Sends a notification to a peer, logging (not propagating) failure —
    /// the invitation state has already changed and the server's view is
    /// authoritative (§7).
    async fn notify(&self, kind: PacketType, id: u8, role: Role, payload: &[u8]) {
        if let Err(err) = self.send_frame(kind, id, role, payload).await {
            self.log.warn(format!("notify {kind:?} to client {} failed: {err}", self.id));
        }
    }

    /// Convenience for the session loop: ACK/NACK replies to the requesting
    /// client's own command are not best-effort — a failed ACK write is a
    /// transport error that should tear down this session.
    pub async fn reply(&self, kind: PacketType, id: u8, payload: &[u8]) -> Result<()> {
        self.send_frame(kind, id, Role::None, payload).await
    }

    // ---- invitation operations ----------------------------------------------

    pub async fn make_invitation(
        self: &Arc<Client>,
        target: Arc<Client>,
        source_role: Role,
        target_role: Role,
    ) -> Result<u8> {
        if Arc::ptr_eq(self, &target) {
            return Err(ServerError::BadState("cannot invite yourself"));
        }

        let inv = Invitation::new(self.clone(), target.clone(), source_role, target_role);
        let source_id = self.add_invitation(inv.clone());
        let target_id = target.add_invitation(inv);

        let username = self.username().unwrap_or_default();
        target.notify(PacketType::Invited, target_id, target_role, username.as_bytes()).await;

        Ok(source_id)
    }

    pub async fn revoke_invitation(self: &Arc<Client>, id: u8) -> Result<()> {
        let inv = self.find_invitation(id).ok_or(ServerError::NotFound("no such invitation"))?;
        if !Arc::ptr_eq(&inv.source, self) {
            return Err(ServerError::BadState("only the source may revoke"));
        }
        if inv.state() != InvitationState::Open {
            return Err(ServerError::BadState("invitation is not open"));
        }

        inv.close(Role::None)?;
        let target = inv.target.clone();
        let (_, target_local_id) = Client::remove_from_both(self, &target, &inv);

        if let Some(target_id) = target_local_id {
            target.notify(PacketType::Revoked, target_id, Role::None, &[]).await;
        }
        Ok(())
    }

    pub async fn decline_invitation(self: &Arc<Client>, id: u8) -> Result<()> {
        let inv = self.find_invitation(id).ok_or(ServerError::NotFound("no such invitation"))?;
        if !Arc::ptr_eq(&inv.target, self) {
            return Err(ServerError::BadState("only the target may decline"));
        }
        if inv.state() != InvitationState::Open {
            return Err(ServerError::BadState("invitation is not open"));
        }

        inv.close(Role::None)?;
        let source = inv.source.clone();
        let (source_local_id, _) = Client::remove_from_both(&source, self, &inv);

        if let Some(source_id) = source_local_id {
            source.notify(PacketType::Declined, source_id, Role::None, &[]).await;
        }
        Ok(())
    }

    pub async fn accept_invitation(self: &Arc<Client>, id: u8) -> Result<Option<String>> {
        let inv = self.find_invitation(id).ok_or(ServerError::NotFound("no such invitation"))?;
        if !Arc::ptr_eq(&inv.target, self) {
            return Err(ServerError::BadState("only the target may accept"));
        }

        let game = inv.accept()?;
        let initial_state = game.lock().unwrap_or_else(|e| e.into_inner()).unparse_state();

        let source = inv.source.clone();
        let source_local_id = {
            let state = source.state.lock().unwrap_or_else(|e| e.into_inner());
            state.invitations.iter().find(|(_, i)| Arc::ptr_eq(i, &inv)).map(|(id, _)| *id)
        };

        if let Some(source_id) = source_local_id {
            let payload = if inv.source_role == Role::First {
                initial_state.as_bytes()
            } else {
                &[]
            };
            source.notify(PacketType::Accepted, source_id, inv.source_role, payload).await;
        }

        if inv.target_role == Role::First {
            Ok(Some(initial_state))
        } else {
            Ok(None)
        }
    }

    pub async fn resign_game(self: &Arc<Client>, id: u8) -> Result<()> {
        let inv = self.find_invitation(id).ok_or(ServerError::NotFound("no such invitation"))?;
        let my_role = inv.role_of(self).ok_or(ServerError::NotFound("no such invitation"))?;
        if inv.state() != InvitationState::Accepted {
            return Err(ServerError::BadState("game is not in progress"));
        }

        inv.close(my_role)?;

        let opponent = inv.peer_of(self).cloned().ok_or(ServerError::NotFound("no opponent"))?;
        self.settle_ratings(&opponent);

        let (my_local_id, opp_local_id) = Client::remove_from_both(self, &opponent, &inv);

        if let Some(opp_id) = opp_local_id {
            opponent.notify(PacketType::Resigned, opp_id, Role::None, &[]).await;
        }

        let winner = my_role.other();
        if let Some(mine) = my_local_id {
            self.notify(PacketType::Ended, mine, winner, &[]).await;
        }
        if let Some(opp_id) = opp_local_id {
            opponent.notify(PacketType::Ended, opp_id, winner, &[]).await;
        }
        Ok(())
    }

    pub async fn make_move(self: &Arc<Client>, id: u8, text: &str) -> Result<()> {
        let inv = self.find_invitation(id).ok_or(ServerError::NotFound("no such invitation"))?;
        let my_role = inv.role_of(self).ok_or(ServerError::NotFound("no such invitation"))?;
        if inv.state() != InvitationState::Accepted {
            return Err(ServerError::BadState("game is not in progress"));
        }

        let mut mv = crate::game::Game::parse_move(text)?;
        if mv.role == Role::None {
            mv.role = my_role;
        } else if mv.role != my_role {
            return Err(ServerError::InvalidMove("piece does not match your role"));
        }

        let game = inv.game().ok_or(ServerError::BadState("no game for this invitation"))?;
        let (over, state_text, to_move_line) = {
            let mut g = game.lock().unwrap_or_else(|e| e.into_inner());
            if g.is_over() {
                return Err(ServerError::InvalidMove("game already over"));
            }
            g.apply_move(mv)?;
            (g.is_over(), g.unparse_state(), g.to_move_line())
        };

        let opponent = inv.peer_of(self).cloned().ok_or(ServerError::NotFound("no opponent"))?;

        let mut payload = format!("\n{state_text}");
        if let Some(line) = &to_move_line {
            payload.push('\n');
            payload.push_str(line);
            payload.push('\n');
        }
        let opp_local_id = {
            let state = opponent.state.lock().unwrap_or_else(|e| e.into_inner());
            state.invitations.iter().find(|(_, i)| Arc::ptr_eq(i, &inv)).map(|(id, _)| *id)
        };
        if let Some(opp_id) = opp_local_id {
            opponent.notify(PacketType::Moved, opp_id, Role::None, payload.as_bytes()).await;
        }

        if over {
            let winner = game.lock().unwrap_or_else(|e| e.into_inner()).winner();
            self.settle_ratings_from_winner(&opponent, my_role, winner);

            inv.close(winner)?;
            let (my_local_id, opp_local_id) = Client::remove_from_both(self, &opponent, &inv);

            if let Some(mine) = my_local_id {
                self.notify(PacketType::Ended, mine, winner, &[]).await;
            }
            if let Some(opp_id) = opp_local_id {
                opponent.notify(PacketType::Ended, opp_id, winner, &[]).await;
            }
        }

        Ok(())
    }

    /// Resolves (P1, P2) = (self's player, opponent's player) POV and posts
    /// the result of a resignation: self resigned, so the opponent always wins.
    fn settle_ratings(&self, opponent: &Arc<Client>) {
        if let (Some(me), Some(them)) = (self.player(), opponent.player()) {
            Player::post_result(&me, &them, Outcome::P2Wins);
        }
    }

    fn settle_ratings_from_winner(&self, opponent: &Arc<Client>, my_role: Role, winner: Role) {
        if let (Some(me), Some(them)) = (self.player(), opponent.player()) {
            let outcome = if winner == Role::None {
                Outcome::Draw
            } else if winner == my_role {
                Outcome::P1Wins
            } else {
                Outcome::P2Wins
            };
            Player::post_result(&me, &them, outcome);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client {{ id: {} }}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn login_then_duplicate_login_fails() {
        let c = Client::new_for_test(1);
        let p = Arc::new(Player::create("alice"));
        c.login(p.clone()).unwrap();
        assert!(c.login(p).is_err());
    }

    #[tokio::test]
    async fn make_invitation_assigns_local_ids_to_both_sides() {
        let source = Client::new_for_test(1);
        let target = Client::new_for_test(2);
        source.login(Arc::new(Player::create("alice"))).unwrap();
        target.login(Arc::new(Player::create("bob"))).unwrap();

        let source_id = source.make_invitation(target.clone(), Role::First, Role::Second).await.unwrap();
        assert_eq!(source_id, 0);
        assert!(target.find_invitation(0).is_some());
    }

    #[tokio::test]
    async fn cannot_invite_self() {
        let c = Client::new_for_test(1);
        c.login(Arc::new(Player::create("alice"))).unwrap();
        assert!(c.make_invitation(c.clone(), Role::First, Role::Second).await.is_err());
    }

    #[tokio::test]
    async fn revoke_removes_from_both_lists() {
        let source = Client::new_for_test(1);
        let target = Client::new_for_test(2);
        source.login(Arc::new(Player::create("alice"))).unwrap();
        target.login(Arc::new(Player::create("bob"))).unwrap();

        let id = source.make_invitation(target.clone(), Role::First, Role::Second).await.unwrap();
        source.revoke_invitation(id).await.unwrap();

        assert!(source.find_invitation(id).is_none());
        assert!(source.revoke_invitation(id).await.is_err());
    }

    #[tokio::test]
    async fn decline_requires_being_the_target() {
        let source = Client::new_for_test(1);
        let target = Client::new_for_test(2);
        source.login(Arc::new(Player::create("alice"))).unwrap();
        target.login(Arc::new(Player::create("bob"))).unwrap();

        let id = source.make_invitation(target.clone(), Role::First, Role::Second).await.unwrap();
        assert!(source.decline_invitation(id).await.is_err());
    }

    #[tokio::test]
    async fn full_game_to_resignation_updates_ratings() {
        let source = Client::new_for_test(1);
        let target = Client::new_for_test(2);
        source.login(Arc::new(Player::create("alice"))).unwrap();
        target.login(Arc::new(Player::create("bob"))).unwrap();

        let source_id = source.make_invitation(target.clone(), Role::First, Role::Second).await.unwrap();
        let target_local_id = target.find_invitation_id_for(&source).unwrap();

        target.accept_invitation(target_local_id).await.unwrap();
        source.resign_game(source_id).await.unwrap();

        assert_eq!(source.player().unwrap().rating(), 1484);
        assert_eq!(target.player().unwrap().rating(), 1516);
    }

    #[tokio::test]
    async fn second_role_resigner_loses_rating_not_wins() {
        let source = Client::new_for_test(1);
        let target = Client::new_for_test(2);
        source.login(Arc::new(Player::create("alice"))).unwrap();
        target.login(Arc::new(Player::create("bob"))).unwrap();

        let source_id = source.make_invitation(target.clone(), Role::First, Role::Second).await.unwrap();
        let target_local_id = target.find_invitation_id_for(&source).unwrap();

        target.accept_invitation(target_local_id).await.unwrap();
        // target plays SECOND and resigns; source (FIRST) must be credited the win.
        target.resign_game(target_local_id).await.unwrap();

        assert_eq!(source.player().unwrap().rating(), 1516);
        assert_eq!(target.player().unwrap().rating(), 1484);
    }

    impl Client {
        /// Test helper: finds the local id this client assigned to an
        /// invitation whose other endpoint is `peer`.
        fn find_invitation_id_for(&self, peer: &Arc<Client>) -> Option<u8> {
            let state = self.state.lock().unwrap();
            state
                .invitations
                .iter()
                .find(|(_, inv)| Arc::ptr_eq(&inv.source, peer) || Arc::ptr_eq(&inv.target, peer))
                .map(|(id, _)| *id)
        }
    }
}
