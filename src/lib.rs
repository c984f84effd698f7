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

//! # Lending Ledger
//!
//! This library tracks limited-capacity items (library book copies, event
//! seats) and the reservations that consume them, keeping every item's
//! `available` counter consistent with its outstanding reservations.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Consistency controller for claims, resolutions and catalog edits
//! - [`Reservation`]: One user's claim on one unit of an item
//! - [`CredentialStore`]: Registered users with hashed passwords and roles
//! - [`LedgerError`]: Typed failures returned by every operation
//!
//! ## Example
//!
//! ```
//! use lending_ledger::{ItemDetails, Ledger, LedgerError, NewItem, Requester, UserId};
//!
//! let ledger = Ledger::new();
//! let admin = Requester::admin(UserId(1));
//!
//! let book = ledger
//!     .add_item(NewItem::new(ItemDetails::new("Dune", "Frank Herbert"), 1), admin)
//!     .unwrap();
//!
//! // The only copy goes to the first borrower.
//! let loan = ledger.claim(UserId(2), book.id).unwrap();
//! assert_eq!(ledger.claim(UserId(3), book.id), Err(LedgerError::Exhausted));
//!
//! // Returning it frees the copy again.
//! ledger.resolve(loan.id(), Requester::member(UserId(2))).unwrap();
//! assert_eq!(ledger.item(book.id).unwrap().available, 1);
//! ```
//!
//! ## Thread Safety
//!
//! Each item carries its own lock. Claims on the same item are serialized so
//! the last unit is never handed out twice; claims on different items run in
//! parallel.

mod base;
mod config;
pub mod credentials;
pub mod error;
mod item;
mod ledger;
mod reservation;
mod reservation_log;

pub use base::{ItemId, ReservationId, Requester, Role, UserId};
pub use config::LedgerConfig;
pub use credentials::{Argon2Hasher, CredentialHasher, CredentialStore, ProfileUpdate, UserSnapshot};
pub use error::LedgerError;
pub use item::{ClaimPolicy, ItemDetails, ItemSnapshot};
pub use ledger::{ItemUpdate, Ledger, NewItem};
pub use reservation::{Reservation, ReservationStatus};
