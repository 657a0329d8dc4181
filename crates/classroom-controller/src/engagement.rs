//! Engagement Scorer.
//!
//! Pure functions over the durable log. Nothing is cached: every call
//! recomputes from the events it is given, so repeated calls on the same log
//! return identical output.

use crate::store::{AnswerRecord, FocusEvent};
use chrono::{DateTime, Utc};
use common::types::{FocusKind, RoomCode};
use serde::Serialize;
use std::collections::BTreeMap;

/// Score every participant starts from.
pub const INITIAL_SCORE: u8 = 100;

/// Derived per-participant engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngagementRecord {
    pub participant: String,
    /// 0..=100.
    pub score: u8,
    pub distractions: u32,
    /// Timestamp of the participant's latest focus event.
    pub last_active: DateTime<Utc>,
}

/// Class-level summary for the end-of-session report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub room: RoomCode,
    pub participant_count: usize,
    /// Rounded class average; 0 with no participants.
    pub average_score: u8,
    pub total_distractions: u32,
    pub answers_total: usize,
    pub answers_correct: usize,
    pub participants: Vec<EngagementRecord>,
}

/// Compute engagement records from a room's focus log.
///
/// Events are ordered by timestamp before scoring. Exact duplicates (same
/// participant, kind, and timestamp) count once. Consecutive `FOCUS_LOST`
/// events at distinct timestamps each count as a distraction.
#[must_use]
pub fn score(events: &[FocusEvent], penalty: u8) -> BTreeMap<String, EngagementRecord> {
    let mut ordered: Vec<&FocusEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.participant.cmp(&b.participant))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    ordered.dedup();

    let mut records: BTreeMap<String, EngagementRecord> = BTreeMap::new();
    for event in ordered {
        let record = records
            .entry(event.participant.clone())
            .or_insert_with(|| EngagementRecord {
                participant: event.participant.clone(),
                score: INITIAL_SCORE,
                distractions: 0,
                last_active: event.timestamp,
            });

        if event.kind == FocusKind::Lost {
            record.score = record.score.saturating_sub(penalty);
            record.distractions = record.distractions.saturating_add(1);
        }
        record.last_active = event.timestamp;
    }

    records
}

/// Aggregate scored records and quiz answers into a report.
#[must_use]
pub fn summarize(
    room: &RoomCode,
    records: &BTreeMap<String, EngagementRecord>,
    answers: &[AnswerRecord],
) -> SessionReport {
    let participants: Vec<EngagementRecord> = records.values().cloned().collect();
    let participant_count = participants.len();

    let total: u64 = participants.iter().map(|r| u64::from(r.score)).sum();
    let average_score = match u64::try_from(participant_count) {
        Ok(count) if count > 0 => {
            // Round half up; result is within 0..=100.
            u8::try_from((total + count / 2) / count).unwrap_or(INITIAL_SCORE)
        }
        _ => 0,
    };

    SessionReport {
        room: room.clone(),
        participant_count,
        average_score,
        total_distractions: participants.iter().map(|r| r.distractions).sum(),
        answers_total: answers.len(),
        answers_correct: answers.iter().filter(|a| a.is_correct).count(),
        participants,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(who: &str, kind: FocusKind, secs: i64) -> FocusEvent {
        FocusEvent {
            participant: who.to_string(),
            kind,
            timestamp: at(secs),
        }
    }

    fn room() -> RoomCode {
        "K3ZQ9A".parse().unwrap()
    }

    #[test]
    fn test_lost_gained_lost_scores_eighty() {
        let log = vec![
            event("Alice", FocusKind::Lost, 1),
            event("Alice", FocusKind::Gained, 2),
            event("Alice", FocusKind::Lost, 3),
        ];

        let records = score(&log, 10);
        let alice = &records["Alice"];
        assert_eq!(alice.score, 80);
        assert_eq!(alice.distractions, 2);
        assert_eq!(alice.last_active, at(3));
    }

    #[test]
    fn test_empty_log_yields_empty_records_and_zero_average() {
        let records = score(&[], 10);
        assert!(records.is_empty());

        let report = summarize(&room(), &records, &[]);
        assert_eq!(report.participant_count, 0);
        assert_eq!(report.average_score, 0);
        assert_eq!(report.total_distractions, 0);
    }

    #[test]
    fn test_score_is_idempotent() {
        let log = vec![
            event("Alice", FocusKind::Lost, 5),
            event("Bob", FocusKind::Lost, 1),
            event("Alice", FocusKind::Gained, 9),
        ];
        assert_eq!(score(&log, 10), score(&log, 10));
    }

    #[test]
    fn test_exact_duplicates_penalize_once() {
        let lost = event("Alice", FocusKind::Lost, 1);
        let log = vec![lost.clone(), lost.clone(), lost];

        let records = score(&log, 10);
        assert_eq!(records["Alice"].score, 90);
        assert_eq!(records["Alice"].distractions, 1);
    }

    #[test]
    fn test_consecutive_lost_at_distinct_times_each_penalize() {
        let log = vec![
            event("Alice", FocusKind::Lost, 1),
            event("Alice", FocusKind::Lost, 2),
        ];
        assert_eq!(score(&log, 10)["Alice"].score, 80);
    }

    #[test]
    fn test_out_of_order_input_matches_sorted_input() {
        let sorted = vec![
            event("Alice", FocusKind::Lost, 1),
            event("Alice", FocusKind::Gained, 2),
            event("Alice", FocusKind::Lost, 3),
        ];
        let shuffled = vec![sorted[2].clone(), sorted[0].clone(), sorted[1].clone()];
        assert_eq!(score(&sorted, 10), score(&shuffled, 10));
    }

    #[test]
    fn test_score_floors_at_zero() {
        let log: Vec<FocusEvent> = (0..15)
            .map(|i| event("Alice", FocusKind::Lost, i))
            .collect();
        let records = score(&log, 10);
        assert_eq!(records["Alice"].score, 0);
        assert_eq!(records["Alice"].distractions, 15);
    }

    #[test]
    fn test_gained_only_participant_keeps_full_score() {
        let records = score(&[event("Bob", FocusKind::Gained, 1)], 10);
        assert_eq!(records["Bob"].score, 100);
        assert_eq!(records["Bob"].distractions, 0);
    }

    #[test]
    fn test_summarize_averages_and_counts() {
        let log = vec![
            event("Alice", FocusKind::Lost, 1),
            event("Bob", FocusKind::Gained, 1),
            event("Cara", FocusKind::Lost, 1),
            event("Cara", FocusKind::Lost, 2),
        ];
        let records = score(&log, 10);

        let answers = vec![
            AnswerRecord {
                participant: "Alice".to_string(),
                topic_id: 1,
                question: "q".to_string(),
                answer_given: "promise".to_string(),
                is_correct: true,
                submitted_at: at(10),
            },
            AnswerRecord {
                participant: "Bob".to_string(),
                topic_id: 1,
                question: "q".to_string(),
                answer_given: "callback".to_string(),
                is_correct: false,
                submitted_at: at(11),
            },
        ];

        let report = summarize(&room(), &records, &answers);
        assert_eq!(report.participant_count, 3);
        // (90 + 100 + 80) / 3 = 90
        assert_eq!(report.average_score, 90);
        assert_eq!(report.total_distractions, 3);
        assert_eq!(report.answers_total, 2);
        assert_eq!(report.answers_correct, 1);
        assert_eq!(report.participants[0].participant, "Alice");
    }

    #[test]
    fn test_average_rounds_half_up() {
        let log = vec![
            event("Alice", FocusKind::Lost, 1),
            event("Bob", FocusKind::Gained, 1),
        ];
        // penalty 5: (95 + 100) / 2 = 97.5 -> 98
        let report = summarize(&room(), &score(&log, 5), &[]);
        assert_eq!(report.average_score, 98);
    }

    fn arb_log() -> impl Strategy<Value = Vec<FocusEvent>> {
        prop::collection::vec(
            (
                prop_oneof![Just("Alice"), Just("Bob"), Just("Cara")],
                any::<bool>(),
                0i64..20,
            )
                .prop_map(|(who, lost, secs)| {
                    let kind = if lost { FocusKind::Lost } else { FocusKind::Gained };
                    event(who, kind, secs)
                }),
            0..40,
        )
    }

    proptest! {
        #[test]
        fn test_score_ignores_input_order(
            (log, shuffled) in arb_log().prop_flat_map(|log| (Just(log.clone()), Just(log).prop_shuffle())),
            penalty in 0u8..=100,
        ) {
            prop_assert_eq!(score(&log, penalty), score(&shuffled, penalty));
        }

        #[test]
        fn test_replayed_log_scores_the_same(log in arb_log(), penalty in 0u8..=100) {
            let mut doubled = log.clone();
            doubled.extend(log.iter().cloned());
            prop_assert_eq!(score(&doubled, penalty), score(&log, penalty));
        }

        #[test]
        fn test_score_counts_distinct_losses(log in arb_log(), penalty in 0u8..=100) {
            let records = score(&log, penalty);

            for (who, record) in &records {
                let losses: BTreeSet<DateTime<Utc>> = log
                    .iter()
                    .filter(|e| &e.participant == who && e.kind == FocusKind::Lost)
                    .map(|e| e.timestamp)
                    .collect();
                let distractions = u32::try_from(losses.len()).unwrap();
                prop_assert_eq!(record.distractions, distractions);

                let expected = u32::from(INITIAL_SCORE)
                    .saturating_sub(u32::from(penalty) * distractions);
                prop_assert_eq!(u32::from(record.score), expected);
                prop_assert!(record.score <= INITIAL_SCORE);
            }
        }
    }
}
