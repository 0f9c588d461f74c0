//! Token-budget context trimming
//!
//! Selection is a greedy walk from the newest turn backward. A leading system
//! turn is priced up front and, when affordable, re-inserted three slots from
//! the end of the window so it sits close to the reply.

use super::models::{Turn, TrimmedWindow};
use super::token_encoder::TokenCounter;
use std::sync::Arc;
use tracing::debug;

/// Ceiling applied when a caller passes a zero budget
pub const DEFAULT_BUDGET: usize = 4096;

/// Distance from the end of the window at which a retained system turn is placed
const SYSTEM_TURN_OFFSET: usize = 3;

/// Selects which turns of a history fit into a completion request
#[derive(Clone)]
pub struct ContextTrimmer {
    counter: Arc<dyn TokenCounter>,
}

impl ContextTrimmer {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    fn cost(&self, turn: &Turn) -> usize {
        self.counter.count_turns(std::slice::from_ref(turn))
    }

    /// Select the window for `history` under `budget` tokens.
    ///
    /// Pure: the same history and budget always give the same window.
    pub fn select(&self, history: &[Turn], budget: usize) -> TrimmedWindow {
        let budget = if budget == 0 { DEFAULT_BUDGET } else { budget };

        let Some(first) = history.first() else {
            return TrimmedWindow::default();
        };

        let mut total = 0;
        let mut retain_system = false;

        if first.is_system() {
            let system_cost = self.cost(first);
            if system_cost < budget {
                total += system_cost;
                retain_system = true;
            } else {
                debug!(system_cost, budget, "System turn exceeds budget, dropping it");
            }
        }

        // Built newest-first, reversed once the walk stops.
        let mut selected: Vec<Turn> = Vec::new();
        for turn in history[1..].iter().rev() {
            let cost = self.cost(turn);
            if total + cost > budget {
                break;
            }
            total += cost;
            selected.push(turn.clone());
        }
        selected.reverse();

        if retain_system {
            let index = selected.len().saturating_sub(SYSTEM_TURN_OFFSET);
            selected.insert(index, first.clone());
        } else if !first.is_system() {
            let first_cost = self.cost(first);
            if total + first_cost < budget {
                total += first_cost;
                selected.insert(0, first.clone());
            }
        }

        debug!(
            history_len = history.len(),
            window_len = selected.len(),
            tokens = total,
            budget,
            "Trimmed conversation window"
        );

        TrimmedWindow::new(selected, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Prices a turn at the character length of its content
    struct ContentLength;

    impl TokenCounter for ContentLength {
        fn count_turns(&self, turns: &[Turn]) -> usize {
            turns.iter().map(|t| t.content().len()).sum()
        }
    }

    fn trimmer() -> ContextTrimmer {
        ContextTrimmer::new(Arc::new(ContentLength))
    }

    fn contents(window: &TrimmedWindow) -> Vec<&str> {
        window.turns().iter().map(|t| t.content()).collect()
    }

    #[test]
    fn test_full_history_fits() {
        let history = vec![
            Turn::user("aa"),
            Turn::assistant("bb"),
            Turn::user("cc"),
        ];
        let window = trimmer().select(&history, 100);
        assert_eq!(window.turns(), history.as_slice());
        assert_eq!(window.tokens(), 6);
    }

    #[test]
    fn test_newest_turns_win() {
        let history = vec![
            Turn::user("1111"),
            Turn::assistant("2222"),
            Turn::user("3333"),
            Turn::assistant("4444"),
        ];
        let window = trimmer().select(&history, 9);
        assert_eq!(contents(&window), vec!["3333", "4444"]);
    }

    #[test]
    fn test_walk_never_resumes_after_rejection() {
        // "big" is rejected; the cheaper turn before it must not be picked up.
        let history = vec![
            Turn::user("x"),
            Turn::user("y"),
            Turn::assistant("bigbigbig"),
            Turn::user("zz"),
        ];
        let window = trimmer().select(&history, 5);
        assert_eq!(contents(&window), vec!["x", "zz"]);
    }

    #[test]
    fn test_leading_user_turn_needs_strict_fit() {
        let history = vec![Turn::user("aaa"), Turn::assistant("bb")];
        // 2 + 3 == 5 is not strictly below the budget.
        let window = trimmer().select(&history, 5);
        assert_eq!(contents(&window), vec!["bb"]);

        let window = trimmer().select(&history, 6);
        assert_eq!(contents(&window), vec!["aaa", "bb"]);
    }

    #[test]
    fn test_system_scenario_reinserted_at_front() {
        let history = vec![
            Turn::system("S"),
            Turn::user("AAAAAAAAAA"),
            Turn::assistant("B"),
            Turn::user("C"),
        ];
        let window = trimmer().select(&history, 5);
        assert_eq!(contents(&window), vec!["S", "B", "C"]);
        assert!(window.turns()[0].is_system());
    }

    #[test]
    fn test_system_reinserted_three_from_end() {
        let history = vec![
            Turn::system("S"),
            Turn::user("a"),
            Turn::assistant("b"),
            Turn::user("c"),
            Turn::assistant("d"),
            Turn::user("e"),
        ];
        let window = trimmer().select(&history, 100);
        assert_eq!(contents(&window), vec!["a", "b", "S", "c", "d", "e"]);
        // Placement is computed against the window before the system turn joins it.
        let index = window.turns().iter().position(|t| t.is_system()).unwrap();
        assert_eq!(index, (window.len() - 1).saturating_sub(3));
    }

    #[test]
    fn test_unaffordable_system_turn_is_dropped() {
        let history = vec![
            Turn::system("SSSSSSSSSS"),
            Turn::user("a"),
            Turn::assistant("b"),
        ];
        let window = trimmer().select(&history, 10);
        assert_eq!(contents(&window), vec!["a", "b"]);
        assert!(window.turns().iter().all(|t| !t.is_system()));
    }

    #[test]
    fn test_single_system_turn() {
        let history = vec![Turn::system("SSS")];
        assert_eq!(contents(&trimmer().select(&history, 4)), vec!["SSS"]);
        assert!(trimmer().select(&history, 3).is_empty());
    }

    #[test]
    fn test_empty_history() {
        assert!(trimmer().select(&[], 10).is_empty());
    }

    #[test]
    fn test_zero_budget_uses_default() {
        let history = vec![Turn::user("a".repeat(DEFAULT_BUDGET - 1))];
        let window = trimmer().select(&history, 0);
        assert_eq!(window.len(), 1);

        let history = vec![Turn::user("a".repeat(DEFAULT_BUDGET))];
        assert!(trimmer().select(&history, 0).is_empty());
    }

    #[test]
    fn test_select_is_idempotent() {
        let history = vec![
            Turn::system("S"),
            Turn::user("hello"),
            Turn::assistant("world"),
            Turn::user("again"),
        ];
        let t = trimmer();
        assert_eq!(t.select(&history, 12), t.select(&history, 12));
    }

    #[test]
    fn test_output_preserves_relative_order() {
        let history: Vec<Turn> = (0..20).map(|i| Turn::user(format!("m{i:02}"))).collect();
        let window = trimmer().select(&history, 25);
        let positions: Vec<usize> = window
            .turns()
            .iter()
            .map(|t| history.iter().position(|h| h == t).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
