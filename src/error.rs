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

//! Error types for ledger operations.

use thiserror::Error;

/// Ledger operation errors.
///
/// Every variant is returned to the caller; none of them is fatal to the
/// process. Failed operations leave the ledger unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced item, reservation or user does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Item has no remaining capacity
    #[error("no capacity available")]
    Exhausted,

    /// Requester is neither the owner nor an admin
    #[error("operation not permitted for this user")]
    Forbidden,

    /// Reservation was already resolved; nothing changed
    #[error("reservation already resolved")]
    AlreadyResolved,

    /// Item still has outstanding reservations
    #[error("item has outstanding reservations")]
    Conflict,

    /// Lock contention outlasted the configured retries
    #[error("ledger busy, try again")]
    Busy,

    /// User already holds an outstanding claim on a one-per-user item
    #[error("item already claimed by this user")]
    AlreadyHeld,

    /// Email is registered to another user
    #[error("email already registered")]
    EmailTaken,

    /// Unknown email or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A required field is empty
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Every id of this kind has been handed out
    #[error("no {0} ids left")]
    IdsExhausted(&'static str),

    /// The password hasher failed
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl LedgerError {
    /// True for transient failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Busy)
    }

    /// True for idempotent no-ops that callers report rather than treat as failure.
    pub fn is_soft(&self) -> bool {
        matches!(self, LedgerError::AlreadyResolved)
    }
}
