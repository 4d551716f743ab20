//! Payout Calculator
//!
//! Maps a game's dice outcome to a token payout. Coefficients are exact
//! rationals stored as `(numerator, denominator)` pairs so no floating
//! point ever enters settlement math.
//!
//! # Determinism Guarantee
//!
//! `payout` is a pure function of `(game, rank, stake)`. It is replayed
//! when auditing settled wagers, so the same inputs must always produce
//! the same result.
//!
//! # Example
//!
//! ```
//! use casino_settlement::core::payout::{payout, GameKind};
//!
//! // Dice rank 6 pays 2x the stake.
//! assert_eq!(payout(GameKind::Dice, 6, 10), 20);
//! // Rank 4 is breakeven.
//! assert_eq!(payout(GameKind::Dice, 4, 10), 10);
//! ```

use serde::{Deserialize, Serialize};

/// A payout coefficient as an exact rational (numerator, denominator).
type Coef = (u128, u128);

/// Six-sided dice: 0, 0.3, 0.5, 1, 1.6, 2.
const DICE: &[Coef] = &[(0, 1), (3, 10), (1, 2), (1, 1), (8, 5), (2, 1)];

/// Basketball throw, five outcomes: 0, 0, 0.5, 2, 2.
const BASKETBALL: &[Coef] = &[(0, 1), (0, 1), (1, 2), (2, 1), (2, 1)];

/// Football penalty, five outcomes: 0, 0, 1.5, 1.5, 1.5.
const FOOTBALL: &[Coef] = &[(0, 1), (0, 1), (3, 2), (3, 2), (3, 2)];

/// Darts: 0, 0.1, 0.3, 0.5, 1.5, 3.
const DARTS: &[Coef] = &[(0, 1), (1, 10), (3, 10), (1, 2), (3, 2), (3, 1)];

/// Bowling: 0, 0.1, 0.3, 1, 1.5, 2.5.
const BOWLING: &[Coef] = &[(0, 1), (1, 10), (3, 10), (1, 1), (3, 2), (5, 2)];

/// Slot machine outcome domain (3 reels, 4 symbols each).
const SLOT_RANKS: usize = 64;

/// Winning slot combinations: `(rank, coefficient)`. Every rank not
/// listed here pays zero.
const SLOT_WINS: &[(usize, Coef)] = &[
    (1, (9, 1)),   // bar bar bar
    (22, (9, 1)),  // grape x3
    (43, (9, 1)),  // lemon x3
    (64, (30, 1)), // 777
];

/// The games a wager can be placed on.
///
/// Each variant corresponds to one chat dice emoji and one fixed
/// coefficient table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// 🎲 - six outcomes.
    Dice,
    /// 🏀 - five outcomes.
    Basketball,
    /// ⚽️ - five outcomes.
    Football,
    /// 🎯 - six outcomes.
    Darts,
    /// 🎳 - six outcomes.
    Bowling,
    /// 🎰 - 64 outcomes, sparse wins.
    Slot,
}

impl GameKind {
    /// All supported games, in display order.
    pub const ALL: &'static [GameKind] = &[
        GameKind::Dice,
        GameKind::Basketball,
        GameKind::Football,
        GameKind::Darts,
        GameKind::Bowling,
        GameKind::Slot,
    ];

    /// Parse the chat emoji for this game.
    pub fn from_emoji(emoji: &str) -> Option<Self> {
        match emoji {
            "🎲" => Some(GameKind::Dice),
            "🏀" => Some(GameKind::Basketball),
            "⚽️" | "⚽" => Some(GameKind::Football),
            "🎯" => Some(GameKind::Darts),
            "🎳" => Some(GameKind::Bowling),
            "🎰" => Some(GameKind::Slot),
            _ => None,
        }
    }

    /// The chat emoji for this game.
    pub fn emoji(self) -> &'static str {
        match self {
            GameKind::Dice => "🎲",
            GameKind::Basketball => "🏀",
            GameKind::Football => "⚽️",
            GameKind::Darts => "🎯",
            GameKind::Bowling => "🎳",
            GameKind::Slot => "🎰",
        }
    }

    /// Number of outcome ranks in this game's domain.
    pub fn rank_count(self) -> usize {
        match self {
            GameKind::Dice => DICE.len(),
            GameKind::Basketball => BASKETBALL.len(),
            GameKind::Football => FOOTBALL.len(),
            GameKind::Darts => DARTS.len(),
            GameKind::Bowling => BOWLING.len(),
            GameKind::Slot => SLOT_RANKS,
        }
    }

    /// Coefficient for a 1-based outcome rank.
    ///
    /// # Panics
    ///
    /// Panics if `rank` is outside this game's outcome domain. The chat
    /// transport's dice values are the only source of ranks, so an
    /// out-of-range rank is a precondition violation, not user input.
    fn coefficient(self, rank: u8) -> Coef {
        let rank = rank as usize;
        assert!(
            rank >= 1 && rank <= self.rank_count(),
            "outcome rank {} out of range for {:?} (1..={})",
            rank,
            self,
            self.rank_count(),
        );

        match self {
            GameKind::Dice => DICE[rank - 1],
            GameKind::Basketball => BASKETBALL[rank - 1],
            GameKind::Football => FOOTBALL[rank - 1],
            GameKind::Darts => DARTS[rank - 1],
            GameKind::Bowling => BOWLING[rank - 1],
            GameKind::Slot => SLOT_WINS
                .iter()
                .find(|(r, _)| *r == rank)
                .map(|(_, c)| *c)
                .unwrap_or((0, 1)),
        }
    }
}

/// Compute the payout for a 1-based outcome `rank`, as
/// `floor(coefficient * stake)` in whole tokens.
///
/// # Panics
///
/// Panics if `rank` is outside the game's outcome domain (see
/// [`GameKind::rank_count`]).
pub fn payout(game: GameKind, rank: u8, stake: u128) -> u128 {
    let (num, den) = game.coefficient(rank);
    stake * num / den
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dice_table_at_stake_ten() {
        let expected = [0, 3, 5, 10, 16, 20];
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(payout(GameKind::Dice, i as u8 + 1, 10), *want);
        }
    }

    #[test]
    fn dice_rank_four_is_breakeven() {
        assert_eq!(payout(GameKind::Dice, 4, 10), 10);
    }

    #[test]
    fn dice_rank_six_doubles() {
        assert_eq!(payout(GameKind::Dice, 6, 10), 20);
    }

    #[test]
    fn slot_unlisted_ranks_pay_zero() {
        let winning: Vec<u8> = SLOT_WINS.iter().map(|(r, _)| *r as u8).collect();
        for rank in 1..=64u8 {
            let p = payout(GameKind::Slot, rank, 10);
            if winning.contains(&rank) {
                assert!(p > 0, "rank {} should win", rank);
            } else {
                assert_eq!(p, 0, "rank {} should pay zero", rank);
            }
        }
    }

    #[test]
    fn slot_jackpot_pays_thirty_to_one() {
        assert_eq!(payout(GameKind::Slot, 64, 10), 300);
    }

    #[test]
    fn floor_rounding_truncates() {
        // 0.3 * 5 = 1.5 -> 1
        assert_eq!(payout(GameKind::Dice, 2, 5), 1);
        // 1.6 * 5 = 8
        assert_eq!(payout(GameKind::Dice, 5, 5), 8);
    }

    #[test]
    fn emoji_round_trip() {
        for game in GameKind::ALL {
            assert_eq!(GameKind::from_emoji(game.emoji()), Some(*game));
        }
        assert_eq!(GameKind::from_emoji("🃏"), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_rank_panics() {
        payout(GameKind::Dice, 7, 10);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn rank_zero_panics() {
        payout(GameKind::Dice, 0, 10);
    }

    proptest! {
        /// Scaling the stake by an integer scales the payout by the same
        /// integer whenever the denominator divides the stake exactly.
        #[test]
        fn payout_scales_linearly(rank in 1u8..=6, k in 1u128..1000) {
            let base = 10u128; // every table denominator divides 10
            prop_assert_eq!(
                payout(GameKind::Dice, rank, k * base),
                k * payout(GameKind::Dice, rank, base)
            );
        }

        /// Determinism: repeated evaluation never diverges.
        #[test]
        fn payout_is_deterministic(rank in 1u8..=6, stake in 0u128..1_000_000) {
            prop_assert_eq!(
                payout(GameKind::Bowling, rank, stake),
                payout(GameKind::Bowling, rank, stake)
            );
        }
    }
}
