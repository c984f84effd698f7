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

//! Thread-safe reservation log.
//!
//! Holds every reservation ever issued. Records are never removed; the only
//! mutation is the one-time resolution stamp.

use crate::base::{IdAllocator, ItemId, ReservationId, UserId};
use crate::error::LedgerError;
use crate::reservation::Reservation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::cmp::Reverse;

/// Reservation storage keyed by id, with a monotonic id allocator.
#[derive(Debug)]
pub(crate) struct ReservationLog {
    reservations: DashMap<ReservationId, Reservation>,
    ids: IdAllocator,
}

impl ReservationLog {
    pub(crate) fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            ids: IdAllocator::new("reservation"),
        }
    }

    /// Records a new outstanding reservation and returns a copy of it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::IdsExhausted`] once every reservation id is taken.
    pub(crate) fn open(
        &self,
        user_id: UserId,
        item_id: ItemId,
        issued_at: DateTime<Utc>,
    ) -> Result<Reservation, LedgerError> {
        let id = ReservationId(self.ids.next()?);
        let reservation = Reservation::open(id, user_id, item_id, issued_at);
        self.reservations.insert(id, reservation.clone());
        Ok(reservation)
    }

    pub(crate) fn get(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.get(&id).map(|entry| entry.value().clone())
    }

    /// Stamps `resolved_at` on an outstanding reservation.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - No reservation with this id.
    /// - [`LedgerError::AlreadyResolved`] - Already stamped; nothing changes.
    pub(crate) fn resolve(&self, id: ReservationId, at: DateTime<Utc>) -> Result<Reservation, LedgerError> {
        let mut entry = self
            .reservations
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("reservation"))?;
        entry.resolve(at)?;
        Ok(entry.value().clone())
    }

    /// Reservations accepted by `filter`, most recently issued first.
    pub(crate) fn newest_first<F>(&self, filter: F) -> Vec<Reservation>
    where
        F: Fn(&Reservation) -> bool,
    {
        let mut matching: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|r| Reverse((r.issued_at(), r.id())));
        matching
    }

    pub(crate) fn len(&self) -> usize {
        self.reservations.len()
    }
}

impl Default for ReservationLog {
    fn default() -> Self {
        Self::new()
    }
}
