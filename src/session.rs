use std::ops::{Deref, DerefMut};

use crate::domain::Partition;
use crate::error::HarvestError;

/// The browser-automation capability the harvester drives. Implementations
/// own their waits and timeouts; an error from any call means the wait ran
/// out or the page did not behave.
pub trait AutomationSession {
    /// Partition codes offered by the source, in source order.
    fn enumerate_partitions(&mut self) -> Result<Vec<String>, HarvestError>;
    fn select_partition(&mut self, partition: &Partition) -> Result<(), HarvestError>;
    fn submit_search(&mut self) -> Result<(), HarvestError>;
    /// Whether the current results span more than one page.
    fn is_paginated(&mut self) -> Result<bool, HarvestError>;
    /// Exports the current results page and returns the downloaded bytes.
    fn download_current_page(&mut self) -> Result<Vec<u8>, HarvestError>;
    /// Moves to the next results page. `Ok(false)` means there is none.
    fn advance_to_next_page(&mut self) -> Result<bool, HarvestError>;
    /// Clears the search form so the next partition starts clean.
    fn reset_session(&mut self) -> Result<(), HarvestError>;
}

/// Exclusive loan of the session for one partition. Dropping the checkout
/// resets the session, whichever way the partition's traversal ended.
pub struct SessionCheckout<'a, S: AutomationSession + ?Sized> {
    session: &'a mut S,
    partition: Partition,
}

impl<'a, S: AutomationSession + ?Sized> SessionCheckout<'a, S> {
    pub fn new(session: &'a mut S, partition: Partition) -> Self {
        tracing::debug!("session checked out for {partition}");
        Self { session, partition }
    }
}

impl<S: AutomationSession + ?Sized> Deref for SessionCheckout<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session
    }
}

impl<S: AutomationSession + ?Sized> DerefMut for SessionCheckout<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session
    }
}

impl<S: AutomationSession + ?Sized> Drop for SessionCheckout<'_, S> {
    fn drop(&mut self) {
        match self.session.reset_session() {
            Ok(()) => tracing::debug!("session reset after {}", self.partition),
            Err(err) => tracing::warn!("session reset after {} failed: {err}", self.partition),
        }
    }
}
