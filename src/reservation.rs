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

//! Reservation records.
//!
//! A reservation moves through exactly one transition:
//! [`Outstanding`](ReservationStatus::Outstanding) →
//! [`Resolved`](ReservationStatus::Resolved). The resolution timestamp is
//! written once and never changes afterwards.

use crate::base::{ItemId, ReservationId, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Outstanding,
    Resolved,
}

/// One user's claim on one unit of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    user_id: UserId,
    item_id: ItemId,
    issued_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub(crate) fn open(
        id: ReservationId,
        user_id: UserId,
        item_id: ItemId,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            item_id,
            issued_at,
            resolved_at: None,
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn status(&self) -> ReservationStatus {
        match self.resolved_at {
            None => ReservationStatus::Outstanding,
            Some(_) => ReservationStatus::Resolved,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Stamps the resolution time.
    ///
    /// Resolution never precedes issue, even if the clock steps backwards.
    pub(crate) fn resolve(&mut self, at: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.resolved_at.is_some() {
            return Err(LedgerError::AlreadyResolved);
        }
        self.resolved_at = Some(at.max(self.issued_at));
        Ok(())
    }
}
