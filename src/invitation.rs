//! Pair-wise OPEN -> ACCEPTED -> CLOSED state machine binding two Clients
//! and, once accepted, a Game.

use std::sync::{Arc, Mutex};

use crate::client::Client;
use crate::codec::Role;
use crate::error::{Result, ServerError};
use crate::game::Game;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationState {
    Open,
    Accepted,
    Closed,
}

struct Inner {
    state: InvitationState,
    game: Option<Arc<Mutex<Game>>>,
}

pub struct Invitation {
    pub source: Arc<Client>,
    pub target: Arc<Client>,
    pub source_role: Role,
    pub target_role: Role,
    inner: Mutex<Inner>,
}

impl Invitation {
    pub fn new(source: Arc<Client>, target: Arc<Client>, source_role: Role, target_role: Role) -> Arc<Invitation> {
        debug_assert_ne!(source_role, target_role);
        Arc::new(Invitation {
            source,
            target,
            source_role,
            target_role,
            inner: Mutex::new(Inner {
                state: InvitationState::Open,
                game: None,
            }),
        })
    }

    pub fn state(&self) -> InvitationState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn game(&self) -> Option<Arc<Mutex<Game>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).game.clone()
    }

    /// Returns the role this client plays in the invitation, if it is one
    /// of the two endpoints.
    pub fn role_of(&self, client: &Arc<Client>) -> Option<Role> {
        if Arc::ptr_eq(client, &self.source) {
            Some(self.source_role)
        } else if Arc::ptr_eq(client, &self.target) {
            Some(self.target_role)
        } else {
            None
        }
    }

    pub fn peer_of<'a>(&'a self, client: &Arc<Client>) -> Option<&'a Arc<Client>> {
        if Arc::ptr_eq(client, &self.source) {
            Some(&self.target)
        } else if Arc::ptr_eq(client, &self.target) {
            Some(&self.source)
        } else {
            None
        }
    }

    /// OPEN -> ACCEPTED, creating the Game.
    pub fn accept(&self) -> Result<Arc<Mutex<Game>>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != InvitationState::Open {
            return Err(ServerError::BadState("invitation is not open"));
        }
        let game = Arc::new(Mutex::new(Game::create()));
        inner.state = InvitationState::Accepted;
        inner.game = Some(game.clone());
        Ok(game)
    }

    /// Closes the invitation. From OPEN, `role` is ignored (no game to
    /// resign). From ACCEPTED, `role = None` is only legal if the game is
    /// already over; `role != None` resigns the game on that role's behalf.
    pub fn close(&self, role: Role) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            InvitationState::Open => {
                inner.state = InvitationState::Closed;
                Ok(())
            }
            InvitationState::Accepted => {
                let game = inner.game.clone().expect("accepted invitation always has a game");
                {
                    let mut g = game.lock().unwrap_or_else(|e| e.into_inner());
                    if role == Role::None {
                        if !g.is_over() {
                            return Err(ServerError::BadState("game still in progress"));
                        }
                    } else if !g.is_over() {
                        g.resign(role)?;
                    }
                }
                inner.state = InvitationState::Closed;
                Ok(())
            }
            InvitationState::Closed => Err(ServerError::BadState("invitation already closed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    fn pair() -> (Arc<Client>, Arc<Client>) {
        (Client::new_for_test(1), Client::new_for_test(2))
    }

    #[test]
    fn accept_transitions_open_to_accepted_and_creates_game() {
        let (source, target) = pair();
        let inv = Invitation::new(source, target, Role::First, Role::Second);
        assert_eq!(inv.state(), InvitationState::Open);
        assert!(inv.game().is_none());

        inv.accept().unwrap();
        assert_eq!(inv.state(), InvitationState::Accepted);
        assert!(inv.game().is_some());
    }

    #[test]
    fn double_accept_is_bad_state() {
        let (source, target) = pair();
        let inv = Invitation::new(source, target, Role::First, Role::Second);
        inv.accept().unwrap();
        assert!(inv.accept().is_err());
    }

    #[test]
    fn close_from_open_does_not_require_a_role() {
        let (source, target) = pair();
        let inv = Invitation::new(source, target, Role::First, Role::Second);
        inv.close(Role::None).unwrap();
        assert_eq!(inv.state(), InvitationState::Closed);
    }

    #[test]
    fn close_accepted_with_role_resigns_game() {
        let (source, target) = pair();
        let inv = Invitation::new(source, target, Role::First, Role::Second);
        let game = inv.accept().unwrap();
        inv.close(Role::First).unwrap();
        assert_eq!(inv.state(), InvitationState::Closed);
        assert!(game.lock().unwrap().is_over());
        assert_eq!(game.lock().unwrap().winner(), Role::Second);
    }

    #[test]
    fn close_accepted_with_none_requires_game_already_over() {
        let (source, target) = pair();
        let inv = Invitation::new(source, target, Role::First, Role::Second);
        inv.accept().unwrap();
        assert!(inv.close(Role::None).is_err());
    }

    #[test]
    fn closed_is_terminal() {
        let (source, target) = pair();
        let inv = Invitation::new(source, target, Role::First, Role::Second);
        inv.close(Role::None).unwrap();
        assert!(inv.close(Role::None).is_err());
        assert!(inv.accept().is_err());
    }

    #[test]
    fn role_of_resolves_each_endpoint() {
        let (source, target) = pair();
        let inv = Invitation::new(source.clone(), target.clone(), Role::First, Role::Second);
        assert_eq!(inv.role_of(&source), Some(Role::First));
        assert_eq!(inv.role_of(&target), Some(Role::Second));
    }
}
