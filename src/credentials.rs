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

//! User accounts and password credentials.
//!
//! Emails are stored trimmed and lower-cased and are unique across users.
//! Passwords are only ever held as PHC-format hashes produced by a
//! [`CredentialHasher`].
//!
//! # Example
//!
//! ```
//! use lending_ledger::{Argon2Hasher, CredentialStore};
//!
//! let store = CredentialStore::new(Argon2Hasher::with_params(8, 1, 1).unwrap());
//! let user = store.register("Ada", " Ada@Example.com ", "hunter2").unwrap();
//! assert_eq!(user.email, "ada@example.com");
//!
//! let logged_in = store.authenticate("ada@example.com", "hunter2").unwrap();
//! assert_eq!(logged_in.id, user.id);
//! ```

use crate::base::{IdAllocator, Requester, Role, UserId};
use crate::error::LedgerError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;

/// Password hashing seam.
pub trait CredentialHasher: Send + Sync {
    /// Produces a salted hash of `password`.
    fn hash(&self, password: &str) -> Result<String, LedgerError>;

    /// True when `attempt` matches the `stored` hash. Malformed hashes never match.
    fn verify(&self, stored: &str, attempt: &str) -> bool;
}

/// Argon2id hasher with a random salt per password.
#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    /// Uses the `argon2` crate's recommended parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom cost parameters: memory in KiB, iterations, parallelism.
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, LedgerError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| LedgerError::Hashing(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, LedgerError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| LedgerError::Hashing(e.to_string()))
    }

    fn verify(&self, stored: &str, attempt: &str) -> bool {
        PasswordHash::new(stored)
            .map(|parsed| self.argon2.verify_password(attempt.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    name: String,
    email: String,
    password_hash: String,
    role: Role,
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl UserSnapshot {
    /// The requester identity for calls made on this user's behalf.
    pub fn requester(&self) -> Requester {
        Requester::new(self.id, self.role)
    }
}

/// Partial profile edit. Empty or absent password leaves it unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Registered users keyed by id, with a unique email index.
pub struct CredentialStore {
    users: DashMap<UserId, UserRecord>,
    emails: DashMap<String, UserId>,
    ids: IdAllocator,
    hasher: Arc<dyn CredentialHasher>,
}

impl CredentialStore {
    pub fn new<H: CredentialHasher + 'static>(hasher: H) -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            ids: IdAllocator::new("user"),
            hasher: Arc::new(hasher),
        }
    }

    /// Registers a member account.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidInput`] - Blank name, malformed email or empty password.
    /// - [`LedgerError::EmailTaken`] - Email already registered.
    /// - [`LedgerError::Hashing`] - The hasher failed.
    /// - [`LedgerError::IdsExhausted`] - No user id left.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<UserSnapshot, LedgerError> {
        self.register_with_role(name, email, password, Role::Member)
    }

    /// Registers an account with an explicit role, e.g. to seed the first admin.
    pub fn register_with_role(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<UserSnapshot, LedgerError> {
        let name = normalize_name(name)?;
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(LedgerError::InvalidInput("password"));
        }
        // Hash before touching the index; it is the slow part.
        let password_hash = self.hasher.hash(password)?;

        let user_id = match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => return Err(LedgerError::EmailTaken),
            Entry::Vacant(entry) => {
                let user_id = UserId(self.ids.next()?);
                entry.insert(user_id);
                user_id
            }
        };
        let record = UserRecord {
            name,
            email,
            password_hash,
            role,
        };
        let snapshot = snapshot_of(user_id, &record);
        self.users.insert(user_id, record);

        tracing::debug!(user = %user_id, role = %role, "user registered");
        Ok(snapshot)
    }

    /// Checks an email/password pair.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidCredentials`] for an unknown email or a wrong
    /// password alike.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<UserSnapshot, LedgerError> {
        let email = email.trim().to_lowercase();
        let user_id = self
            .emails
            .get(&email)
            .map(|entry| *entry.value())
            .ok_or(LedgerError::InvalidCredentials)?;
        let record = self
            .users
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::InvalidCredentials)?;

        if self.hasher.verify(&record.password_hash, password) {
            Ok(snapshot_of(user_id, &record))
        } else {
            tracing::debug!(user = %user_id, "password rejected");
            Err(LedgerError::InvalidCredentials)
        }
    }

    /// Edits name, email and password of `user_id`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - No such user.
    /// - [`LedgerError::Forbidden`] - Requester is neither the user nor an admin.
    /// - [`LedgerError::InvalidInput`] - Blank name or malformed email.
    /// - [`LedgerError::EmailTaken`] - New email belongs to another user.
    pub fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
        requester: Requester,
    ) -> Result<UserSnapshot, LedgerError> {
        if !self.users.contains_key(&user_id) {
            return Err(LedgerError::NotFound("user"));
        }
        if !requester.may_act_for(user_id) {
            return Err(LedgerError::Forbidden);
        }

        let name = update.name.as_deref().map(normalize_name).transpose()?;
        let email = update.email.as_deref().map(normalize_email).transpose()?;
        let password_hash = match update.password.as_deref() {
            Some(password) if !password.is_empty() => Some(self.hasher.hash(password)?),
            _ => None,
        };

        // The record guard is held until the index matches it again, so
        // concurrent edits of one user apply one at a time. Lock order is
        // users, then emails.
        let mut record = self
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::NotFound("user"))?;

        if let Some(email) = email.filter(|email| *email != record.email) {
            match self.emails.entry(email.clone()) {
                Entry::Occupied(entry) if *entry.get() != user_id => {
                    return Err(LedgerError::EmailTaken);
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(user_id);
                }
            }
            let previous_email = std::mem::replace(&mut record.email, email);
            self.emails
                .remove_if(&previous_email, |_, owner| *owner == user_id);
        }
        if let Some(name) = name {
            record.name = name;
        }
        if let Some(password_hash) = password_hash {
            record.password_hash = password_hash;
        }
        let snapshot = snapshot_of(user_id, &record);
        drop(record);

        tracing::debug!(user = %user_id, by = %requester.user_id, "profile updated");
        Ok(snapshot)
    }

    /// Changes a user's role.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - Requester is not an admin.
    /// - [`LedgerError::NotFound`] - No such user.
    pub fn set_role(&self, user_id: UserId, role: Role, requester: Requester) -> Result<UserSnapshot, LedgerError> {
        if !requester.role.is_admin() {
            return Err(LedgerError::Forbidden);
        }
        let mut record = self
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::NotFound("user"))?;
        record.role = role;

        tracing::debug!(user = %user_id, role = %role, "role changed");
        Ok(snapshot_of(user_id, &record))
    }

    pub fn user(&self, user_id: UserId) -> Option<UserSnapshot> {
        self.users
            .get(&user_id)
            .map(|entry| snapshot_of(user_id, entry.value()))
    }

    /// All users, ordered by ID.
    pub fn users(&self) -> Vec<UserSnapshot> {
        let mut users: Vec<UserSnapshot> = self
            .users
            .iter()
            .map(|entry| snapshot_of(*entry.key(), entry.value()))
            .collect();
        users.sort_by_key(|user| user.id);
        users
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(Argon2Hasher::new())
    }
}

fn snapshot_of(id: UserId, record: &UserRecord) -> UserSnapshot {
    UserSnapshot {
        id,
        name: record.name.clone(),
        email: record.email.clone(),
        role: record.role,
    }
}

fn normalize_name(name: &str) -> Result<String, LedgerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput("name"));
    }
    Ok(name.to_string())
}

/// Trims and lower-cases; requires a non-empty local part and domain.
fn normalize_email(email: &str) -> Result<String, LedgerError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(email)
        }
        _ => Err(LedgerError::InvalidInput("email")),
    }
}
