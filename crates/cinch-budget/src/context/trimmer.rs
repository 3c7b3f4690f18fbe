//! History trimming: drop the oldest messages until the history fits.
//!
//! The trimmer only ever removes a prefix of the history. The cut point is
//! chosen in three steps:
//!
//! 1. **Budget**: walk from newest to oldest, accumulating estimated tokens,
//!    and stop before the message that would push the total over budget.
//! 2. **Floor**: never cut into the last `min_preserved` messages, even if
//!    they alone exceed the budget. An overshoot here is left for the
//!    compactor and the overflow escalation to deal with.
//! 3. **Pairs**: never cut between a tool invocation and its outcome. If
//!    the cut falls inside a pair, it moves back to the older half so both
//!    are retained.
//!
//! Each step can only move the cut towards the oldest message, so trimming an
//! already-trimmed history is a no-op.

use crate::Message;
use crate::context::estimator::{TokenEstimator, saturating_total};
use std::collections::{HashMap, VecDeque};

/// What a trim pass did. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimDecision {
    /// Messages removed from the front of the history.
    pub removed_messages: usize,
    /// Estimated tokens in the removed messages.
    pub removed_tokens: usize,
    /// Estimated tokens in the retained history.
    pub retained_tokens: usize,
    /// Budget the pass trimmed against.
    pub budget: usize,
    /// The preserved-message floor kept messages the budget would have removed.
    pub held_by_floor: bool,
    /// A tool invocation/outcome pair kept messages the budget would have removed.
    pub held_by_pair: bool,
}

impl TrimDecision {
    /// Whether any message was discarded.
    pub fn irreversible(&self) -> bool {
        self.removed_messages > 0
    }

    /// Whether the retained history still exceeds the budget.
    pub fn over_budget(&self) -> bool {
        self.retained_tokens > self.budget
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        let mut s = format!(
            "trim: removed {} messages (~{} tokens), retained ~{} of {} budget",
            self.removed_messages, self.removed_tokens, self.retained_tokens, self.budget,
        );
        if self.held_by_floor {
            s.push_str(", held by floor");
        }
        if self.held_by_pair {
            s.push_str(", held by tool pair");
        }
        s
    }
}

/// Trim the oldest messages from `history` so it fits `available_budget`,
/// keeping at least `min_preserved` messages and every tool pair intact.
pub fn trim(
    mut history: Vec<Message>,
    available_budget: usize,
    min_preserved: usize,
    estimator: &dyn TokenEstimator,
) -> (Vec<Message>, TrimDecision) {
    let plan = plan_cut(&history, available_budget, min_preserved, estimator);
    let retained = history.split_off(plan.cut);

    let decision = TrimDecision {
        removed_messages: plan.cut,
        removed_tokens: plan.removed_tokens,
        retained_tokens: plan.total_tokens.saturating_sub(plan.removed_tokens),
        budget: available_budget,
        held_by_floor: plan.held_by_floor,
        held_by_pair: plan.held_by_pair,
    };
    (retained, decision)
}

/// Whether trimming can remove anything more from `history`, at any budget.
///
/// False once the history is down to the preserved floor or every older
/// message is pinned by a tool pair reaching into the floor.
pub fn can_trim_further(
    history: &[Message],
    min_preserved: usize,
    estimator: &dyn TokenEstimator,
) -> bool {
    plan_cut(history, 0, min_preserved, estimator).cut > 0
}

/// Where a trim pass would cut, and why it stopped there.
#[derive(Debug, Clone, Copy)]
struct CutPlan {
    cut: usize,
    removed_tokens: usize,
    total_tokens: usize,
    held_by_floor: bool,
    held_by_pair: bool,
}

fn plan_cut(
    history: &[Message],
    available_budget: usize,
    min_preserved: usize,
    estimator: &dyn TokenEstimator,
) -> CutPlan {
    let tokens: Vec<usize> = history
        .iter()
        .map(|m| m.estimated_tokens(estimator))
        .collect();
    let n = history.len();

    let mut budget_cut = n;
    let mut running = 0usize;
    for (i, &t) in tokens.iter().enumerate().rev() {
        let next = running.saturating_add(t);
        if next > available_budget {
            break;
        }
        running = next;
        budget_cut = i;
    }

    let floor_cut = n.saturating_sub(min_preserved);
    let mut cut = budget_cut.min(floor_cut);

    let spans = pair_spans(history);
    let mut held_by_pair = false;
    // Moving the cut can land it inside another pair; repeat until stable.
    while let Some(start) = spans
        .iter()
        .filter(|&&(lo, hi)| lo < cut && cut <= hi)
        .map(|&(lo, _)| lo)
        .min()
    {
        cut = start;
        held_by_pair = true;
    }

    CutPlan {
        cut,
        removed_tokens: saturating_total(tokens[..cut].iter().copied()),
        total_tokens: saturating_total(tokens.iter().copied()),
        held_by_floor: floor_cut < budget_cut,
        held_by_pair,
    }
}

/// Message index spans `(invocation, outcome)` covered by each complete tool pair.
///
/// Pairs are matched in history order: an outcome closes the oldest still
/// unanswered invocation with the same call ID, so hosts that reuse IDs
/// across turns get one span per exchange. Invocations with no outcome yet
/// and outcomes whose invocation is gone do not constrain the cut.
pub(crate) fn pair_spans(history: &[Message]) -> Vec<(usize, usize)> {
    let mut pending: HashMap<&str, VecDeque<usize>> = HashMap::new();
    let mut spans = Vec::new();
    for (idx, msg) in history.iter().enumerate() {
        for id in msg.invocation_ids() {
            pending.entry(id).or_default().push_back(idx);
        }
        for id in msg.outcome_ids() {
            if let Some(lo) = pending.get_mut(id).and_then(VecDeque::pop_front)
                && lo < idx
            {
                spans.push((lo, idx));
            }
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::estimator::CharRatioEstimator;

    /// A user message estimated at exactly `tokens` with the default estimator.
    fn sized(tokens: usize) -> Message {
        Message::user("x".repeat(tokens * 4))
    }

    #[test]
    fn empty_history_is_noop() {
        let e = CharRatioEstimator::default();
        let (out, decision) = trim(Vec::new(), 100, 2, &e);
        assert!(out.is_empty());
        assert!(!decision.irreversible());
        assert_eq!(decision.retained_tokens, 0);
    }

    #[test]
    fn fitting_history_untouched() {
        let e = CharRatioEstimator::default();
        let history = vec![sized(10), sized(10), sized(10)];
        let (out, decision) = trim(history.clone(), 100, 2, &e);
        assert_eq!(out, history);
        assert!(!decision.irreversible());
        assert!(!decision.over_budget());
    }

    #[test]
    fn removes_oldest_first() {
        let e = CharRatioEstimator::default();
        let history = vec![
            Message::user("a".repeat(200)),
            Message::user("b".repeat(200)),
            Message::user("c".repeat(200)),
        ];
        let (out, decision) = trim(history.clone(), 100, 1, &e);
        assert_eq!(out, history[1..].to_vec());
        assert_eq!(decision.removed_messages, 1);
        assert_eq!(decision.removed_tokens, 50);
        assert_eq!(decision.retained_tokens, 100);
    }

    #[test]
    fn floor_beats_budget() {
        let e = CharRatioEstimator::default();
        let history: Vec<Message> = (0..5).map(|_| sized(250)).collect();
        let (out, decision) = trim(history, 100, 2, &e);
        assert_eq!(out.len(), 2);
        assert!(decision.held_by_floor);
        assert!(decision.over_budget());
        assert_eq!(decision.removed_messages, 3);
    }

    #[test]
    fn short_history_below_floor_untouched() {
        let e = CharRatioEstimator::default();
        let history = vec![sized(500)];
        let (out, decision) = trim(history, 10, 2, &e);
        assert_eq!(out.len(), 1);
        assert!(!decision.irreversible());
        assert!(decision.over_budget());
    }

    #[test]
    fn cut_inside_pair_keeps_both_halves() {
        let e = CharRatioEstimator::default();
        let history = vec![
            sized(100),
            sized(100),
            Message::assistant_tool_call("c1", "get_quote", "x".repeat(392)),
            Message::tool_result("c1", "y".repeat(200)),
            sized(50),
        ];
        // Budget admits messages 3 and 4 (100 tokens) but not message 2.
        let (out, decision) = trim(history.clone(), 120, 1, &e);
        assert_eq!(out, history[2..].to_vec());
        assert!(decision.held_by_pair);
        assert!(decision.over_budget());
    }

    #[test]
    fn pair_removed_as_unit_when_both_old() {
        let e = CharRatioEstimator::default();
        let history = vec![
            Message::assistant_tool_call("c1", "kb_search", "{}"),
            Message::tool_result("c1", "z".repeat(400)),
            sized(50),
            sized(50),
        ];
        let (out, decision) = trim(history.clone(), 100, 1, &e);
        assert_eq!(out, history[2..].to_vec());
        assert!(!decision.held_by_pair);
    }

    #[test]
    fn chained_pairs_move_cut_repeatedly() {
        let e = CharRatioEstimator::default();
        // c1 spans 0..=2, c2 spans 1..=3; a cut at 3 must fall back to 0.
        let history = vec![
            Message::assistant_tool_call("c1", "a", ""),
            Message::assistant_tool_call("c2", "b", ""),
            Message::tool_result("c1", "x".repeat(400)),
            Message::tool_result("c2", "x".repeat(400)),
            sized(10),
        ];
        let (out, decision) = trim(history.clone(), 120, 1, &e);
        assert_eq!(out, history);
        assert!(decision.held_by_pair);
    }

    #[test]
    fn unanswered_invocation_does_not_pin() {
        let e = CharRatioEstimator::default();
        let history = vec![
            Message::assistant_tool_call("c1", "a", "x".repeat(400)),
            sized(50),
        ];
        let (out, _) = trim(history, 60, 1, &e);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn idempotent() {
        let e = CharRatioEstimator::default();
        let history = vec![
            sized(80),
            Message::assistant_tool_call("c1", "a", "x".repeat(100)),
            Message::tool_result("c1", "y".repeat(300)),
            sized(40),
            sized(40),
        ];
        let (once, _) = trim(history, 150, 2, &e);
        let (twice, decision) = trim(once.clone(), 150, 2, &e);
        assert_eq!(once, twice);
        assert!(!decision.irreversible());
    }

    #[test]
    fn can_trim_further_respects_floor_and_pairs() {
        let e = CharRatioEstimator::default();
        let two = vec![sized(10), sized(10)];
        assert!(!can_trim_further(&two, 2, &e));
        assert!(can_trim_further(&two, 1, &e));

        // The only older message is pinned by a pair reaching into the floor.
        let pinned = vec![
            Message::assistant_tool_call("c1", "a", ""),
            Message::tool_result("c1", "ok"),
        ];
        assert!(!can_trim_further(&pinned, 1, &e));
    }

    #[test]
    fn pair_spans_ignores_orphans() {
        let history = vec![
            Message::tool_result("gone", "orphan"),
            Message::assistant_tool_call("c1", "a", ""),
            Message::tool_result("c1", "ok"),
            Message::assistant_tool_call("pending", "b", ""),
        ];
        assert_eq!(pair_spans(&history), vec![(1, 2)]);
    }

    #[test]
    fn reused_call_ids_pair_in_order() {
        let e = CharRatioEstimator::default();
        // Some local models emit `call_0` for every tool call.
        let history: Vec<Message> = (0..5)
            .flat_map(|i| {
                [
                    Message::assistant_tool_call("call_0", "lookup", "{}"),
                    Message::tool_result("call_0", format!("{i}").repeat(2000)),
                ]
            })
            .collect();
        assert_eq!(
            pair_spans(&history),
            vec![(0, 1), (2, 3), (4, 5), (6, 7), (8, 9)]
        );

        let (out, decision) = trim(history.clone(), 600, 2, &e);
        assert_eq!(out, history[8..].to_vec());
        assert_eq!(decision.removed_messages, 8);
        assert!(!decision.held_by_pair);
        assert!(can_trim_further(&history, 2, &e));
    }

    #[test]
    fn huge_estimates_saturate_instead_of_overflowing() {
        let e = CharRatioEstimator::new(1e-300).unwrap();
        let history = vec![Message::user("a"), Message::user("b")];
        assert_eq!(history[0].estimated_tokens(&e), usize::MAX);

        let (out, decision) = trim(history.clone(), 100, 2, &e);
        assert_eq!(out.len(), 2);
        assert_eq!(decision.retained_tokens, usize::MAX);
        assert!(decision.over_budget());

        let (out, decision) = trim(history, 100, 0, &e);
        assert!(out.is_empty());
        assert_eq!(decision.removed_tokens, usize::MAX);
        assert_eq!(decision.retained_tokens, 0);
    }

    #[test]
    fn decision_log_string() {
        let d = TrimDecision {
            removed_messages: 3,
            removed_tokens: 750,
            retained_tokens: 500,
            budget: 800,
            held_by_floor: true,
            held_by_pair: false,
        };
        let s = d.to_log_string();
        assert!(s.contains("removed 3 messages"));
        assert!(s.contains("held by floor"));
        assert!(!s.contains("tool pair"));
    }
}
