// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use anon_replication_engine::anonymizer::{anonymize, anonymize_email, pseudonym, PSEUDONYM_LEN};
use anon_replication_engine::checkpoint::{format_checkpoint, parse_checkpoint};
use anon_replication_engine::config::parse_window;
use anon_replication_engine::record::{Address, Customer, RecordId};
use anon_replication_engine::resilience::RetryConfig;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2100-01-01, millisecond resolution
    (946_684_800_000i64..4_102_444_800_000i64).prop_map(|ms| Utc.timestamp_millis_opt(ms).unwrap())
}

fn arb_customer() -> impl Strategy<Value = Customer> {
    (
        "[a-z0-9-]{1,12}",
        ".{0,20}",
        ".{0,20}",
        "[a-z.]{0,10}",
        "[a-z.]{1,12}",
        (".{0,30}", ".{0,30}", "[A-Z0-9 ]{0,8}", ".{0,15}", ".{0,15}", "[A-Z]{2}"),
        arb_timestamp(),
    )
        .prop_map(|(id, first, last, local, domain, addr, created_at)| Customer {
            id: RecordId::new(id),
            first_name: first,
            last_name: last,
            email: format!("{}@{}", local, domain),
            address: Address {
                line1: addr.0,
                line2: addr.1,
                postcode: addr.2,
                city: addr.3,
                state: addr.4,
                country: addr.5,
            },
            created_at,
        })
}

// =============================================================================
// Anonymizer Properties
// =============================================================================

proptest! {
    /// Pseudonyms are always 8 lowercase hex characters.
    #[test]
    fn pseudonym_shape(value in ".*") {
        let p = pseudonym(&value);
        prop_assert_eq!(p.len(), PSEUDONYM_LEN);
        prop_assert!(p.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    /// Anonymizing the same source record twice gives identical output.
    #[test]
    fn anonymize_is_deterministic(record in arb_customer()) {
        let a = anonymize(&record).unwrap();
        let b = anonymize(&record).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Identity, timestamp and the coarse address fields pass through untouched.
    #[test]
    fn anonymize_preserves_passthrough_fields(record in arb_customer()) {
        let out = anonymize(&record).unwrap();
        prop_assert_eq!(&out.id, &record.id);
        prop_assert_eq!(out.created_at, record.created_at);
        prop_assert_eq!(&out.address.city, &record.address.city);
        prop_assert_eq!(&out.address.state, &record.address.state);
        prop_assert_eq!(&out.address.country, &record.address.country);
    }

    /// Everything after the first '@' survives email anonymization.
    #[test]
    fn email_domain_preserved(local in "[^@]{0,16}", rest in ".{0,24}") {
        let email = format!("{}@{}", local, rest);
        let out = anonymize_email(&email).unwrap();
        prop_assert_eq!(out, format!("{}@{}", pseudonym(&local), rest));
    }

    /// Strings without '@' are never accepted as emails.
    #[test]
    fn email_without_at_rejected(value in "[^@]*") {
        prop_assert!(anonymize_email(&value).is_none());
    }

    /// A target that equals anonymize(source) needs no patch.
    #[test]
    fn diff_of_fresh_anonymization_is_empty(record in arb_customer()) {
        let target = anonymize(&record).unwrap();
        prop_assert!(target.diff(&anonymize(&record).unwrap()).is_empty());
    }
}

// =============================================================================
// Checkpoint Format Properties
// =============================================================================

proptest! {
    /// Formatting then parsing keeps the instant at millisecond precision.
    #[test]
    fn checkpoint_format_parse(ts in arb_timestamp()) {
        let text = format_checkpoint(&ts);
        prop_assert!(text.ends_with('Z'));
        prop_assert_eq!(parse_checkpoint(&text).unwrap(), ts);
    }

    /// Formatted checkpoints sort the same way as the instants they encode.
    #[test]
    fn checkpoint_text_order_matches_time_order(a in arb_timestamp(), b in arb_timestamp()) {
        prop_assert_eq!(format_checkpoint(&a).cmp(&format_checkpoint(&b)), a.cmp(&b));
    }

    /// Parsing arbitrary text never panics.
    #[test]
    fn checkpoint_parse_never_panics(raw in ".{0,64}") {
        let _ = parse_checkpoint(&raw);
    }
}

// =============================================================================
// Config / Backoff Properties
// =============================================================================

proptest! {
    /// The window is always positive whatever the raw setting is.
    #[test]
    fn window_always_positive(raw in proptest::option::of(".{0,12}")) {
        prop_assert!(parse_window(raw.as_deref()) > 0);
    }

    /// Backoff never exceeds its cap and never decreases with more attempts.
    #[test]
    fn backoff_capped_and_monotonic(attempt in 1usize..10_000) {
        let config = RetryConfig::daemon();
        let now = config.delay_for_attempt(attempt);
        let next = config.delay_for_attempt(attempt + 1);
        prop_assert!(now <= config.max_delay);
        prop_assert!(next >= now);
    }
}
