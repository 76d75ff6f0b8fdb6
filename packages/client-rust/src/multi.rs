//! Multi-key commands: many single-key commands dispatched as one batch.

use kvdriver_core::{ConfigError, Location};

use crate::command::{Command, DeleteValue, FetchValue, StoreValue};
use crate::fan_out::{BatchHandle, FanOutCoordinator};
use crate::transport::Transport;

/// A batch of commands of one type, dispatched with bounded concurrency.
///
/// The aggregate handle's query info lists the commands' locations in the
/// order they were added; its value holds the item handles in completion order.
#[derive(Debug, Clone)]
pub struct MultiCommand<C> {
    commands: Vec<C>,
    max_in_flight: Option<usize>,
}

/// Fetch many locations at once.
pub type MultiFetch = MultiCommand<FetchValue>;
/// Store many values at once.
pub type MultiStore = MultiCommand<StoreValue>;
/// Delete many locations at once.
pub type MultiDelete = MultiCommand<DeleteValue>;

impl<C> Default for MultiCommand<C> {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            max_in_flight: None,
        }
    }
}

impl<C> MultiCommand<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command. Duplicates are kept and dispatched separately.
    #[must_use]
    pub fn with(mut self, command: C) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: C) {
        self.commands.push(command);
    }

    /// Overrides the coordinator's `max_in_flight` for this batch.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<C: Command + Send + 'static> MultiCommand<C> {
    /// Dispatches every command through `coordinator`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` if an explicit `max_in_flight` of zero was set.
    pub fn execute<T: Transport>(
        self,
        coordinator: &FanOutCoordinator<T>,
    ) -> Result<BatchHandle<C::Kind>, ConfigError> {
        match self.max_in_flight {
            Some(limit) => coordinator.execute_with_limit(self.commands, limit),
            None => Ok(coordinator.execute(self.commands)),
        }
    }
}

impl<C> FromIterator<C> for MultiCommand<C> {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
            max_in_flight: None,
        }
    }
}

impl<C> Extend<C> for MultiCommand<C> {
    fn extend<I: IntoIterator<Item = C>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

impl MultiFetch {
    /// Fetches each location with default options.
    pub fn for_locations<I: IntoIterator<Item = Location>>(locations: I) -> Self {
        locations.into_iter().map(FetchValue::new).collect()
    }
}

impl MultiDelete {
    /// Deletes each location without a causal context.
    pub fn for_locations<I: IntoIterator<Item = Location>>(locations: I) -> Self {
        locations.into_iter().map(DeleteValue::new).collect()
    }
}
