//! Fuzz target for the anonymizer.
//!
//! Arbitrary field contents must never panic, output must be deterministic,
//! and an email is accepted exactly when it contains an '@'.

#![no_main]

use anon_replication_engine::anonymizer::{anonymize, anonymize_email, pseudonym, PSEUDONYM_LEN};
use anon_replication_engine::record::{Address, Customer, RecordId};
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str, &str, &str, &str, i64)| {
    let (first, last, email, line1, postcode, millis) = data;

    assert_eq!(pseudonym(first).len(), PSEUDONYM_LEN);
    assert_eq!(anonymize_email(email).is_some(), email.contains('@'));

    let Some(created_at) = Utc.timestamp_millis_opt(millis).single() else {
        return;
    };
    let record = Customer {
        id: RecordId::new("fuzz"),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: email.to_string(),
        address: Address {
            line1: line1.to_string(),
            line2: String::new(),
            postcode: postcode.to_string(),
            city: "City".to_string(),
            state: "State".to_string(),
            country: "GB".to_string(),
        },
        created_at,
    };

    match (anonymize(&record), anonymize(&record)) {
        (Ok(a), Ok(b)) => {
            assert_eq!(a, b);
            assert_eq!(a.created_at, record.created_at);
        }
        (Err(_), Err(_)) => assert!(!email.contains('@')),
        _ => panic!("anonymize is not deterministic"),
    }
});
