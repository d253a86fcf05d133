//! Property tests for the codec and id scheme.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use engram::git::{NoteCodec, NoteRecord};
use engram::models::{MemoryId, MemoryStatus, Namespace};
use proptest::prelude::*;

fn namespace_strategy() -> impl Strategy<Value = Namespace> {
    prop::sample::select(Namespace::all().to_vec())
}

fn status_strategy() -> impl Strategy<Value = MemoryStatus> {
    prop::sample::select(vec![
        MemoryStatus::Active,
        MemoryStatus::Resolved,
        MemoryStatus::Archived,
        MemoryStatus::Tombstone,
    ])
}

/// Single-line printable summaries, as capture validation guarantees.
fn summary_strategy() -> impl Strategy<Value = String> {
    "[ -~]{1,100}".prop_map(|s| s.trim().to_string()).prop_filter(
        "summary must be non-empty after trim",
        |s| !s.is_empty(),
    )
}

fn body_strategy() -> impl Strategy<Value = String> {
    // Bodies may hold arbitrary markdown-ish lines including rules.
    prop::collection::vec("[ -~]{0,60}", 0..8).prop_map(|lines| {
        if lines.is_empty() {
            String::new()
        } else {
            let mut body = lines.join("\n");
            body.push('\n');
            body
        }
    })
}

fn token_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

fn record_strategy() -> impl Strategy<Value = NoteRecord> {
    (
        namespace_strategy(),
        0i64..2_000_000_000,
        summary_strategy(),
        prop::option::of(token_strategy()),
        prop::option::of(token_strategy()),
        prop::collection::vec(token_strategy(), 0..4),
        status_strategy(),
        body_strategy(),
    )
        .prop_map(
            |(namespace, secs, summary, spec, phase, tags, status, body)| NoteRecord {
                namespace,
                timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
                summary,
                spec,
                phase,
                tags,
                status,
                relates_to: vec![],
                body,
            },
        )
}

proptest! {
    #[test]
    fn prop_single_record_roundtrip(record in record_strategy()) {
        let text = NoteCodec::serialize(&record);
        let parsed = NoteCodec::parse_many(&text).unwrap();
        prop_assert_eq!(parsed, vec![record]);
    }

    #[test]
    fn prop_many_records_roundtrip(records in prop::collection::vec(record_strategy(), 1..5)) {
        let text = NoteCodec::serialize_many(&records);
        let parsed = NoteCodec::parse_many(&text).unwrap();
        prop_assert_eq!(parsed, records);
    }

    #[test]
    fn prop_concatenation_appends(a in record_strategy(), b in record_strategy()) {
        // Concatenating two serialized notes parses as both, in order.
        let combined = format!(
            "{}{}",
            NoteCodec::serialize(&a),
            NoteCodec::serialize(&b)
        );
        let parsed = NoteCodec::parse_many(&combined).unwrap();
        prop_assert_eq!(parsed, vec![a, b]);
    }

    #[test]
    fn prop_id_compose_parts_roundtrip(
        namespace in namespace_strategy(),
        commit in "[0-9a-f]{40}",
        index in 0u32..10_000,
    ) {
        let id = MemoryId::compose(namespace, &commit, index);
        let (ns, prefix, idx) = id.parts().unwrap();
        prop_assert_eq!(ns, namespace);
        prop_assert_eq!(prefix, &commit[..7]);
        prop_assert_eq!(idx, index);
    }

    #[test]
    fn prop_ids_for_same_note_are_sequential(
        namespace in namespace_strategy(),
        commit in "[0-9a-f]{40}",
        count in 1usize..20,
    ) {
        let ids: Vec<MemoryId> = (0..count)
            .map(|i| MemoryId::compose(namespace, &commit, u32::try_from(i).unwrap()))
            .collect();
        let indices: Vec<u32> = ids.iter().map(|id| id.parts().unwrap().2).collect();
        let expected: Vec<u32> = (0..count).map(|i| u32::try_from(i).unwrap()).collect();
        prop_assert_eq!(indices, expected);
    }

    #[test]
    fn prop_transition_dag_has_no_self_edges(status in status_strategy()) {
        prop_assert!(!status.can_transition_to(status));
    }

    #[test]
    fn prop_luhn_rejects_single_digit_mutation(
        base in "[0-9]{15}",
        position in 0usize..15,
        delta in 1u32..10,
    ) {
        // Complete the number to a valid Luhn checksum, then mutate one
        // digit: the checksum must fail.
        let valid = complete_luhn(&base);
        prop_assert!(engram::security::luhn_valid(&valid));

        let mut digits: Vec<u32> = valid.chars().map(|c| c.to_digit(10).unwrap()).collect();
        digits[position] = (digits[position] + delta) % 10;
        let mutated: String = digits.iter().map(ToString::to_string).collect();
        if mutated != valid {
            prop_assert!(!engram::security::luhn_valid(&mutated));
        }
    }
}

/// Appends the check digit making `base` pass Luhn.
fn complete_luhn(base: &str) -> String {
    for check in 0..10 {
        let candidate = format!("{base}{check}");
        if engram::security::luhn_valid(&candidate) {
            return candidate;
        }
    }
    unreachable!("some check digit always completes a Luhn number");
}
