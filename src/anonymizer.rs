// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Anonymization transform.
//!
//! Personally identifying fields are replaced by the first 8 hex characters of
//! their unsalted SHA-256 digest. The transform is pure: the same source
//! record always yields the same target record, which is what lets the
//! reconciler detect "nothing changed" by plain equality.
//!
//! | Field | Treatment |
//! |-------|-----------|
//! | first/last name | hashed |
//! | email | local part hashed, `@domain` kept |
//! | address line1, line2, postcode | hashed |
//! | city, state, country | unchanged |
//! | id, createdAt | unchanged |

use crate::error::{ReplicationError, Result};
use crate::record::{Address, Customer};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from each digest.
pub const PSEUDONYM_LEN: usize = 8;

/// Hash a single value into its 8-character lowercase hex pseudonym.
pub fn pseudonym(value: &str) -> String {
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    digest[..PSEUDONYM_LEN].to_string()
}

/// Replace the local part of an email with its pseudonym, keeping the domain.
///
/// The split happens at the first `@`. An address with no `@` is rejected.
pub fn anonymize_email(email: &str) -> Option<String> {
    let (local, domain) = email.split_once('@')?;
    Some(format!("{}@{}", pseudonym(local), domain))
}

/// Produce the anonymized form of a source record.
///
/// Fails only when the email has no `@`.
pub fn anonymize(source: &Customer) -> Result<Customer> {
    let email = anonymize_email(&source.email).ok_or_else(|| ReplicationError::MalformedRecord {
        id: source.id.to_string(),
        reason: "email has no '@'".to_string(),
    })?;

    Ok(Customer {
        id: source.id.clone(),
        first_name: pseudonym(&source.first_name),
        last_name: pseudonym(&source.last_name),
        email,
        address: Address {
            line1: pseudonym(&source.address.line1),
            line2: pseudonym(&source.address.line2),
            postcode: pseudonym(&source.address.postcode),
            city: source.address.city.clone(),
            state: source.address.state.clone(),
            country: source.address.country.clone(),
        },
        created_at: source.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;
    use chrono::{TimeZone, Utc};

    fn jane() -> Customer {
        Customer {
            id: RecordId::new("c-1"),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane.doe@example.com".into(),
            address: Address {
                line1: "1 Main Street".into(),
                line2: String::new(),
                postcode: "SW1A1AA".into(),
                city: "London".into(),
                state: "Greater London".into(),
                country: "GB".into(),
            },
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_pseudonym_known_values() {
        assert_eq!(pseudonym("Jane"), "4f23798d");
        assert_eq!(pseudonym("Doe"), "fd53ef83");
        assert_eq!(pseudonym(""), "e3b0c442");
    }

    #[test]
    fn test_pseudonym_shape() {
        let p = pseudonym("anything at all");
        assert_eq!(p.len(), PSEUDONYM_LEN);
        assert!(p.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_email_keeps_domain() {
        assert_eq!(
            anonymize_email("jane.doe@example.com").as_deref(),
            Some("d48722fc@example.com")
        );
    }

    #[test]
    fn test_email_splits_on_first_at() {
        let out = anonymize_email("a@b@c").unwrap();
        assert_eq!(out, format!("{}@b@c", pseudonym("a")));
    }

    #[test]
    fn test_email_without_at_rejected() {
        assert!(anonymize_email("not-an-email").is_none());
    }

    #[test]
    fn test_anonymize_fields() {
        let out = anonymize(&jane()).unwrap();

        assert_eq!(out.id, RecordId::new("c-1"));
        assert_eq!(out.created_at, jane().created_at);
        assert_eq!(out.first_name, "4f23798d");
        assert_eq!(out.last_name, "fd53ef83");
        assert_eq!(out.email, "d48722fc@example.com");
        assert_eq!(out.address.line1, "a03e39f4");
        assert_eq!(out.address.line2, "e3b0c442");
        assert_eq!(out.address.postcode, "5bbec9d0");
        assert_eq!(out.address.city, "London");
        assert_eq!(out.address.state, "Greater London");
        assert_eq!(out.address.country, "GB");
    }

    #[test]
    fn test_anonymize_is_deterministic() {
        let a = anonymize(&jane()).unwrap();
        let b = anonymize(&jane()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_anonymize_malformed_email() {
        let mut record = jane();
        record.email = "jane.example.com".into();

        let err = anonymize(&record).unwrap_err();
        assert!(matches!(err, ReplicationError::MalformedRecord { ref id, .. } if id == "c-1"));
    }
}
