// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record types shared by the source and target collections.
//!
//! Source and target records have the same shape: the target only differs in
//! that its personally identifying fields hold pseudonyms. Identity id and
//! creation timestamp are carried over verbatim; the timestamp doubles as the
//! replication cursor.
//!
//! Field names serialize in camelCase (`firstName`, `createdAt`, ...) so that
//! documents match what the record generator writes into the source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a record, assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Postal address of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: String,
    pub postcode: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

/// A customer record, as stored in either collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Compute the patch that turns `self` into `desired`.
    ///
    /// Only differing fields are set. The identity id is never part of a patch.
    pub fn diff(&self, desired: &Customer) -> RecordPatch {
        fn changed<T: PartialEq + Clone>(current: &T, desired: &T) -> Option<T> {
            (current != desired).then(|| desired.clone())
        }

        RecordPatch {
            first_name: changed(&self.first_name, &desired.first_name),
            last_name: changed(&self.last_name, &desired.last_name),
            email: changed(&self.email, &desired.email),
            address: AddressPatch {
                line1: changed(&self.address.line1, &desired.address.line1),
                line2: changed(&self.address.line2, &desired.address.line2),
                postcode: changed(&self.address.postcode, &desired.address.postcode),
                city: changed(&self.address.city, &desired.address.city),
                state: changed(&self.address.state, &desired.address.state),
                country: changed(&self.address.country, &desired.address.country),
            },
            created_at: changed(&self.created_at, &desired.created_at),
        }
    }
}

/// Field-level update for an address. `None` means "leave as is".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressPatch {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl AddressPatch {
    pub fn is_empty(&self) -> bool {
        self.line1.is_none()
            && self.line2.is_none()
            && self.postcode.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.country.is_none()
    }
}

/// Field-level update for a record, produced by [`Customer::diff`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub address: AddressPatch,
    pub created_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// An empty patch means the record is already up to date.
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.address.is_empty()
            && self.created_at.is_none()
    }

    /// Names of the fields this patch touches (for logging).
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut push = |set: bool, name: &'static str| {
            if set {
                fields.push(name);
            }
        };
        push(self.first_name.is_some(), "firstName");
        push(self.last_name.is_some(), "lastName");
        push(self.email.is_some(), "email");
        push(self.address.line1.is_some(), "address.line1");
        push(self.address.line2.is_some(), "address.line2");
        push(self.address.postcode.is_some(), "address.postcode");
        push(self.address.city.is_some(), "address.city");
        push(self.address.state.is_some(), "address.state");
        push(self.address.country.is_some(), "address.country");
        push(self.created_at.is_some(), "createdAt");
        fields
    }

    /// Apply the patch in place. Fields absent from the patch are untouched.
    pub fn apply_to(&self, record: &mut Customer) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut record.first_name, &self.first_name);
        set(&mut record.last_name, &self.last_name);
        set(&mut record.email, &self.email);
        set(&mut record.address.line1, &self.address.line1);
        set(&mut record.address.line2, &self.address.line2);
        set(&mut record.address.postcode, &self.address.postcode);
        set(&mut record.address.city, &self.address.city);
        set(&mut record.address.state, &self.address.state);
        set(&mut record.address.country, &self.address.country);
        set(&mut record.created_at, &self.created_at);
    }
}
