//! Ordered, deduplicated client collections grown page by page.
//!
//! A [`Collection`] is the value every infinite-scroll list holds. Pages are
//! folded in with [`Collection::merge`]; the load lifecycle around it
//! (busy flag, cursor, generation token) is driven through
//! [`Collection::begin_load`] and [`Collection::complete`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::FIRST_PAGE;

/// An item that carries a stable identity used for deduplication.
pub trait Keyed {
    type Id: Eq + Hash + Clone + fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// One fetch result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: u32,
    /// Explicit server signal; when absent a full batch implies more.
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, limit: u32) -> Self {
        Self {
            items,
            limit,
            has_more: None,
        }
    }

    #[must_use]
    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }

    pub fn has_more(&self) -> bool {
        match self.has_more {
            Some(explicit) => explicit,
            None => self.limit > 0 && self.items.len() == self.limit as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Issued by [`Collection::begin_load`]; must be handed back to
/// [`Collection::complete`] with the fetch result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTicket {
    pub page: u32,
    pub limit: u32,
    pub generation: u64,
}

/// Why a load request was dropped instead of dispatched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadSkipped {
    /// A fetch for this collection is already in flight.
    Busy,
    /// The server signalled that no further pages exist.
    Exhausted,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome<E> {
    Merged {
        added: usize,
        dropped: usize,
        has_more: bool,
    },
    Skipped(LoadSkipped),
    /// The result belonged to a previous generation and was discarded.
    Stale,
    Failed {
        error: E,
        /// No data at all for the first page; the caller should surface it.
        terminal: bool,
    },
}

impl<E> LoadOutcome<E> {
    pub fn is_merged(&self) -> bool {
        matches!(self, LoadOutcome::Merged { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Collection<T: Keyed> {
    items: Vec<T>,
    seen: HashSet<T::Id>,
    has_more: bool,
    cursor: u32,
    busy: bool,
    generation: u64,
}

impl<T: Keyed> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + PartialEq> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
            && self.has_more == other.has_more
            && self.cursor == other.cursor
            && self.busy == other.busy
            && self.generation == other.generation
    }
}

impl<T: Keyed> Collection<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            has_more: true,
            cursor: FIRST_PAGE,
            busy: false,
            generation: 0,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn ids(&self) -> impl Iterator<Item = &T::Id> {
        self.items.iter().map(Keyed::id)
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Page number the next load will request.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Folds `page` into the collection.
    ///
    /// Items whose id is already present (including earlier duplicates within
    /// the same page) are dropped; the rest are appended in page order. The
    /// cursor is not touched here, see [`Collection::complete`].
    #[must_use]
    pub fn merge(mut self, page: Page<T>) -> Self {
        self.absorb(page);
        self
    }

    fn absorb(&mut self, page: Page<T>) -> usize {
        self.has_more = page.has_more();
        let before = self.items.len();

        for item in page.items {
            if self.seen.insert(item.id().clone()) {
                self.items.push(item);
            }
        }

        self.items.len() - before
    }

    /// Check-and-set of the busy flag. Only one ticket per generation can be
    /// outstanding at a time.
    pub fn begin_load(&mut self, limit: u32) -> Result<FetchTicket, LoadSkipped> {
        if self.busy {
            return Err(LoadSkipped::Busy);
        }
        if !self.has_more {
            return Err(LoadSkipped::Exhausted);
        }

        self.busy = true;
        Ok(FetchTicket {
            page: self.cursor,
            limit,
            generation: self.generation,
        })
    }

    /// Applies the result of the fetch described by `ticket`.
    pub fn complete<E>(
        &mut self,
        ticket: FetchTicket,
        result: Result<Page<T>, E>,
    ) -> LoadOutcome<E> {
        if ticket.generation != self.generation {
            return LoadOutcome::Stale;
        }

        self.busy = false;

        match result {
            Ok(page) => {
                let received = page.len();
                let added = self.absorb(page);
                self.cursor = ticket.page.saturating_add(1);
                LoadOutcome::Merged {
                    added,
                    dropped: received - added,
                    has_more: self.has_more,
                }
            }
            Err(error) => LoadOutcome::Failed {
                error,
                terminal: self.items.is_empty() && ticket.page == FIRST_PAGE,
            },
        }
    }

    /// Releases the busy flag for a ticket whose result will never arrive.
    pub fn abandon(&mut self, ticket: FetchTicket) {
        if ticket.generation == self.generation {
            self.busy = false;
        }
    }

    /// Empties the collection and invalidates every outstanding ticket.
    pub fn reset(&mut self) {
        self.items.clear();
        self.seen.clear();
        self.has_more = true;
        self.cursor = FIRST_PAGE;
        self.busy = false;
        self.generation = self.generation.wrapping_add(1);
    }
}
