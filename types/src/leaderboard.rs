use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Participant;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-indexed position.
    pub rank: u32,
    pub participant_id: Uuid,
    pub user_id: String,
    pub value: f64,
    pub joined_at_ms: u64,
    pub is_original_creator: bool,
}

/// Rank participants for display: current value descending, ties broken by
/// earliest join, then by participant id so the order is fully deterministic.
/// Pure projection; mutates nothing.
pub fn rank_participants(participants: &[Participant]) -> Vec<LeaderboardEntry> {
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    ordered.sort_by(|a, b| {
        b.current_value
            .total_cmp(&a.current_value)
            .then_with(|| a.joined_at_ms.cmp(&b.joined_at_ms))
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
        .into_iter()
        .enumerate()
        .map(|(i, p)| LeaderboardEntry {
            rank: i as u32 + 1,
            participant_id: p.id,
            user_id: p.user_id.clone(),
            value: p.current_value,
            joined_at_ms: p.joined_at_ms,
            is_original_creator: p.is_original_creator,
        })
        .collect()
}
