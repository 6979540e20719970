//! Named, rated identity. Ratings update via the Elo formula, K=32, divisor 400.

use std::sync::Mutex;

const INITIAL_RATING: i32 = 1500;
const K_FACTOR: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Draw,
    P1Wins,
    P2Wins,
}

pub struct Player {
    name: String,
    rating: Mutex<i32>,
}

impl Player {
    pub fn create(name: impl Into<String>) -> Self {
        Player {
            name: name.into(),
            rating: Mutex::new(INITIAL_RATING),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rating(&self) -> i32 {
        *self.rating.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Updates both players' ratings atomically with respect to any
    /// concurrent reader. Locks are taken in a fixed order (by name) so
    /// that two concurrent `post_result` calls involving the same pair
    /// never deadlock.
    pub fn post_result(p1: &Player, p2: &Player, outcome: Outcome) {
        let (s1, s2) = match outcome {
            Outcome::Draw => (0.5, 0.5),
            Outcome::P1Wins => (1.0, 0.0),
            Outcome::P2Wins => (0.0, 1.0),
        };

        if p1.name <= p2.name {
            let mut r1 = p1.rating.lock().unwrap_or_else(|e| e.into_inner());
            let mut r2 = p2.rating.lock().unwrap_or_else(|e| e.into_inner());
            let (n1, n2) = elo_update(*r1, *r2, s1, s2);
            *r1 = n1;
            *r2 = n2;
        } else {
            let mut r2 = p2.rating.lock().unwrap_or_else(|e| e.into_inner());
            let mut r1 = p1.rating.lock().unwrap_or_else(|e| e.into_inner());
            let (n1, n2) = elo_update(*r1, *r2, s1, s2);
            *r1 = n1;
            *r2 = n2;
        }
    }
}

fn elo_update(r1: i32, r2: i32, s1: f64, s2: f64) -> (i32, i32) {
    let e1 = 1.0 / (1.0 + 10f64.powf((r2 - r1) as f64 / 400.0));
    let e2 = 1.0 / (1.0 + 10f64.powf((r1 - r2) as f64 / 400.0));
    let n1 = (r1 as f64 + K_FACTOR * (s1 - e1)).round() as i32;
    let n2 = (r2 as f64 + K_FACTOR * (s2 - e2)).round() as i32;
    (n1, n2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_match_win_moves_16_points() {
        let alice = Player::create("alice");
        let bob = Player::create("bob");
        Player::post_result(&alice, &bob, Outcome::P2Wins);
        assert_eq!(alice.rating(), 1484);
        assert_eq!(bob.rating(), 1516);
    }

    #[test]
    fn draw_between_equals_is_a_no_op() {
        let alice = Player::create("alice");
        let bob = Player::create("bob");
        Player::post_result(&alice, &bob, Outcome::Draw);
        assert_eq!(alice.rating(), 1500);
        assert_eq!(bob.rating(), 1500);
    }

    #[test]
    fn rating_sum_is_preserved_within_rounding() {
        let alice = Player::create("alice");
        let bob = Player::create("zed");
        let before = alice.rating() + bob.rating();
        Player::post_result(&alice, &bob, Outcome::P1Wins);
        let after = alice.rating() + bob.rating();
        assert!((before - after).abs() <= 1);
    }

    #[test]
    fn new_player_starts_at_1500() {
        let p = Player::create("carol");
        assert_eq!(p.rating(), 1500);
    }
}
