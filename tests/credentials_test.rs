// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Credential store integration tests.

use lending_ledger::{
    Argon2Hasher, CredentialStore, LedgerError, ProfileUpdate, Requester, Role, UserId,
};
use std::sync::{Arc, Barrier};
use std::thread;

/// Minimum Argon2 cost keeps the suite fast; verification reads the cost
/// back from the stored hash.
fn store() -> CredentialStore {
    CredentialStore::new(Argon2Hasher::with_params(8, 1, 1).unwrap())
}

#[test]
fn register_normalizes_and_defaults_to_member() {
    let store = store();
    let user = store.register("  Ada Lovelace ", " ADA@Example.com", "engine").unwrap();

    assert_eq!(user.id, UserId(1));
    assert_eq!(user.name, "Ada Lovelace");
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.role, Role::Member);
}

#[test]
fn duplicate_email_is_rejected_case_insensitively() {
    let store = store();
    store.register("Ada", "ada@example.com", "engine").unwrap();

    let result = store.register("Imposter", "Ada@Example.COM", "other");
    assert_eq!(result, Err(LedgerError::EmailTaken));
    assert_eq!(store.users().len(), 1);
}

#[test]
fn register_rejects_blank_fields() {
    let store = store();
    assert_eq!(
        store.register(" ", "ada@example.com", "pw"),
        Err(LedgerError::InvalidInput("name"))
    );
    assert_eq!(
        store.register("Ada", "not-an-email", "pw"),
        Err(LedgerError::InvalidInput("email"))
    );
    assert_eq!(
        store.register("Ada", "ada@example.com", ""),
        Err(LedgerError::InvalidInput("password"))
    );
    assert!(store.users().is_empty());
}

#[test]
fn authenticate_with_correct_password() {
    let store = store();
    let registered = store.register("Ada", "ada@example.com", "engine").unwrap();

    let user = store.authenticate(" Ada@example.com ", "engine").unwrap();
    assert_eq!(user, registered);
    assert_eq!(user.requester(), Requester::member(registered.id));
}

#[test]
fn authenticate_failures_are_indistinguishable() {
    let store = store();
    store.register("Ada", "ada@example.com", "engine").unwrap();

    assert_eq!(
        store.authenticate("ada@example.com", "wrong"),
        Err(LedgerError::InvalidCredentials)
    );
    assert_eq!(
        store.authenticate("nobody@example.com", "engine"),
        Err(LedgerError::InvalidCredentials)
    );
}

#[test]
fn snapshot_never_serializes_password() {
    let store = store();
    let user = store.register("Ada", "ada@example.com", "engine").unwrap();

    let json = serde_json::to_value(&user).unwrap();
    assert_eq!(json["email"], "ada@example.com");
    assert_eq!(json["role"], "member");
    assert!(json.get("password").is_none());
    assert!(json.get("password_hash").is_none());
}

#[test]
fn owner_updates_profile_and_password() {
    let store = store();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();

    let update = ProfileUpdate {
        name: Some("Countess Lovelace".into()),
        email: Some("ada@lovelace.org".into()),
        password: Some("analytical".into()),
    };
    let updated = store.update_profile(ada.id, update, ada.requester()).unwrap();
    assert_eq!(updated.name, "Countess Lovelace");
    assert_eq!(updated.email, "ada@lovelace.org");

    assert!(store.authenticate("ada@lovelace.org", "analytical").is_ok());
    assert_eq!(
        store.authenticate("ada@lovelace.org", "engine"),
        Err(LedgerError::InvalidCredentials)
    );
    assert_eq!(
        store.authenticate("ada@example.com", "analytical"),
        Err(LedgerError::InvalidCredentials)
    );
}

#[test]
fn empty_password_keeps_existing_one() {
    let store = store();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();

    let update = ProfileUpdate {
        name: Some("Ada L.".into()),
        password: Some(String::new()),
        ..ProfileUpdate::default()
    };
    store.update_profile(ada.id, update, ada.requester()).unwrap();
    assert!(store.authenticate("ada@example.com", "engine").is_ok());
}

#[test]
fn update_to_taken_email_fails() {
    let store = store();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();
    store.register("Grace", "grace@example.com", "cobol").unwrap();

    let update = ProfileUpdate {
        email: Some("grace@example.com".into()),
        ..ProfileUpdate::default()
    };
    assert_eq!(
        store.update_profile(ada.id, update, ada.requester()),
        Err(LedgerError::EmailTaken)
    );
    assert_eq!(store.user(ada.id).unwrap().email, "ada@example.com");
}

#[test]
fn keeping_same_email_is_allowed() {
    let store = store();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();
    let update = ProfileUpdate {
        email: Some("ADA@example.com".into()),
        ..ProfileUpdate::default()
    };
    store.update_profile(ada.id, update, ada.requester()).unwrap();
    assert!(store.authenticate("ada@example.com", "engine").is_ok());
}

#[test]
fn stranger_cannot_update_profile() {
    let store = store();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();
    let grace = store.register("Grace", "grace@example.com", "cobol").unwrap();

    let update = ProfileUpdate {
        name: Some("Hacked".into()),
        ..ProfileUpdate::default()
    };
    assert_eq!(
        store.update_profile(ada.id, update, grace.requester()),
        Err(LedgerError::Forbidden)
    );
}

#[test]
fn update_missing_user_is_not_found() {
    let store = store();
    assert_eq!(
        store.update_profile(UserId(5), ProfileUpdate::default(), Requester::admin(UserId(1))),
        Err(LedgerError::NotFound("user"))
    );
}

#[test]
fn admin_updates_and_promotes_others() {
    let store = store();
    let root = store
        .register_with_role("Root", "root@example.com", "toor", Role::Admin)
        .unwrap();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();

    let update = ProfileUpdate {
        name: Some("Ada (librarian)".into()),
        ..ProfileUpdate::default()
    };
    store.update_profile(ada.id, update, root.requester()).unwrap();

    let promoted = store.set_role(ada.id, Role::Admin, root.requester()).unwrap();
    assert_eq!(promoted.role, Role::Admin);
    assert_eq!(store.authenticate("ada@example.com", "engine").unwrap().role, Role::Admin);
}

#[test]
fn member_cannot_change_roles() {
    let store = store();
    let ada = store.register("Ada", "ada@example.com", "engine").unwrap();
    assert_eq!(
        store.set_role(ada.id, Role::Admin, ada.requester()),
        Err(LedgerError::Forbidden)
    );
    assert_eq!(
        store.set_role(UserId(99), Role::Admin, Requester::admin(UserId(1))),
        Err(LedgerError::NotFound("user"))
    );
}

#[test]
fn concurrent_registration_of_same_email_admits_one() {
    let store = Arc::new(store());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.register(&format!("User {i}"), "shared@example.com", "pw"))
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .filter(Result::is_ok)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(store.users().len(), 1);
}

#[test]
fn concurrent_email_changes_keep_index_in_step() {
    const ROUNDS: usize = 5_000;
    const ADDRESSES: [&str; 2] = ["old@example.org", "new@example.org"];

    let store = Arc::new(store());
    let user = store.register("Ada", ADDRESSES[0], "pw").unwrap();
    let (user_id, requester) = (user.id, user.requester());
    // Two writers plus the checking thread.
    let barrier = Arc::new(Barrier::new(3));

    let writers: Vec<_> = ADDRESSES
        .iter()
        .map(|address| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let update = ProfileUpdate {
                email: Some(address.to_string()),
                ..ProfileUpdate::default()
            };
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    barrier.wait();
                    store
                        .update_profile(user_id, update.clone(), requester)
                        .unwrap();
                    barrier.wait();
                }
            })
        })
        .collect();

    for round in 0..ROUNDS {
        barrier.wait();
        barrier.wait();

        let email = store.user(user_id).unwrap().email;
        let other = ADDRESSES.iter().find(|a| **a != email).unwrap();
        assert!(
            store.authenticate(&email, "pw").is_ok(),
            "round {round}: current email {email} does not authenticate"
        );
        assert_eq!(
            store.authenticate(other, "pw"),
            Err(LedgerError::InvalidCredentials),
            "round {round}: stale email {other} still authenticates"
        );
    }

    for writer in writers {
        writer.join().expect("Thread panicked");
    }
}
