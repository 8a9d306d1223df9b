//! A list view that filters a backing list through an ordered chain of filters.
//!
//! The view is a cached list of backing indices. It is rebuilt in a single full pass
//! whenever the backing list, the filter chain, a filter's parameters, or a filter's
//! enabled flag change, so reads between changes are O(1).
//!
//! Filters are stateful: every pass starts by calling [`ListFilter::reset`] on each of
//! them and then feeds the backing elements in order, stopping at the first filter that
//! rejects an element. A filter that remembers what it has seen (deduplication) therefore
//! only ever sees elements that passed every filter before it.

use std::{
    any::Any,
    sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::trace;

/// Access to a filter as [`Any`], so callers can reach the concrete type to change its
/// parameters.
pub trait AsAny: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A filter over list elements
pub trait ListFilter<T>: AsAny + Send {
    /// Reset any per-pass state before the filter is used
    fn reset(&mut self) {}

    /// Check if we should accept the specified element
    fn accept(&mut self, element: &T) -> bool;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("index {index} is out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("filter at index {index} is not of the requested type")]
    TypeMismatch { index: usize },

    #[error("no filter of the requested type in the chain")]
    NotFound,
}

struct FilterSlot<T> {
    filter: Box<dyn ListFilter<T>>,
    enabled: bool,
}

struct Inner<T> {
    backing: Vec<T>,
    filters: Vec<FilterSlot<T>>,
    indices: Vec<usize>,
}

impl<T: 'static> Inner<T> {
    fn recompute(&mut self) {
        let Inner {
            backing,
            filters,
            indices,
        } = self;

        indices.clear();
        filters.iter_mut().for_each(|slot| slot.filter.reset());

        for (index, element) in backing.iter().enumerate() {
            let accepted = filters
                .iter_mut()
                .filter(|slot| slot.enabled)
                .all(|slot| slot.filter.accept(element));
            if accepted {
                indices.push(index);
            }
        }

        trace!(
            backing = backing.len(),
            visible = indices.len(),
            filters = filters.len(),
            "Recomputed filtered view"
        );
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut FilterSlot<T>, FilterError> {
        let len = self.filters.len();
        self.filters
            .get_mut(index)
            .ok_or(FilterError::OutOfRange { index, len })
    }
}

/// A backing list plus a cached, filtered view of it.
///
/// All reads and writes go through one lock, so a reader never observes a backing list
/// that is half-way through an update or a view that is half-way through a recompute.
pub struct FilteredList<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + Send + 'static> Default for FilteredList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> FilteredList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(backing: Vec<T>) -> Self {
        let mut inner = Inner {
            backing,
            filters: Vec::new(),
            indices: Vec::new(),
        };
        inner.recompute();
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panicking filter leaves the view stale but not unsound; recover the guard
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole filter chain. All filters start enabled.
    pub fn set_filters(&self, filters: Vec<Box<dyn ListFilter<T>>>) {
        let mut inner = self.lock();
        inner.filters = filters
            .into_iter()
            .map(|filter| FilterSlot {
                filter,
                enabled: true,
            })
            .collect();
        inner.recompute();
    }

    /// Add a new filter to the end of the chain
    pub fn push_filter(&self, filter: impl ListFilter<T> + 'static) {
        let mut inner = self.lock();
        inner.filters.push(FilterSlot {
            filter: Box::new(filter),
            enabled: true,
        });
        inner.recompute();
    }

    pub fn filter_count(&self) -> usize {
        self.lock().filters.len()
    }

    /// Enable or disable the filter at `index`. A disabled filter accepts everything.
    pub fn set_enabled(&self, index: usize, enabled: bool) -> Result<(), FilterError> {
        let mut inner = self.lock();
        let slot = inner.slot_mut(index)?;
        if slot.enabled != enabled {
            slot.enabled = enabled;
            inner.recompute();
        }
        Ok(())
    }

    pub fn is_enabled(&self, index: usize) -> Result<bool, FilterError> {
        let mut inner = self.lock();
        Ok(inner.slot_mut(index)?.enabled)
    }

    /// Change the parameters of the filter at `index`, then recompute the view.
    pub fn update_filter<F, R>(
        &self,
        index: usize,
        update: impl FnOnce(&mut F) -> R,
    ) -> Result<R, FilterError>
    where
        F: ListFilter<T> + 'static,
    {
        let mut inner = self.lock();
        let slot = inner.slot_mut(index)?;
        let filter = AsAny::as_any_mut(slot.filter.as_mut())
            .downcast_mut::<F>()
            .ok_or(FilterError::TypeMismatch { index })?;
        let result = update(filter);
        inner.recompute();
        Ok(result)
    }

    /// Change the parameters of the first filter of type `F` in the chain.
    pub fn update_first<F, R>(&self, update: impl FnOnce(&mut F) -> R) -> Result<R, FilterError>
    where
        F: ListFilter<T> + 'static,
    {
        let mut inner = self.lock();
        let filter = inner
            .filters
            .iter_mut()
            .find_map(|slot| AsAny::as_any_mut(slot.filter.as_mut()).downcast_mut::<F>())
            .ok_or(FilterError::NotFound)?;
        let result = update(filter);
        inner.recompute();
        Ok(result)
    }

    /// Recompute the view after the backing list changed
    pub fn notify_backing_changed(&self) {
        self.lock().recompute();
    }

    /// Append to the backing list and recompute, under one lock
    pub fn extend(&self, elements: impl IntoIterator<Item = T>) {
        let mut inner = self.lock();
        let before = inner.backing.len();
        inner.backing.extend(elements);
        trace!(added = inner.backing.len() - before, "Extended backing list");
        inner.recompute();
    }

    /// Mutate the backing list in place and recompute, under one lock
    pub fn mutate_backing<R>(&self, mutate: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let mut inner = self.lock();
        let result = mutate(&mut inner.backing);
        inner.recompute();
        result
    }

    /// Number of elements in the view
    pub fn size(&self) -> usize {
        self.lock().indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn backing_len(&self) -> usize {
        self.lock().backing.len()
    }

    /// The element at `index` in the view
    pub fn element_at(&self, index: usize) -> Result<T, FilterError> {
        let inner = self.lock();
        let len = inner.indices.len();
        inner
            .indices
            .get(index)
            .map(|backing_index| inner.backing[*backing_index].clone())
            .ok_or(FilterError::OutOfRange { index, len })
    }

    /// Indices into the backing list, in view order
    pub fn view_indices(&self) -> Vec<usize> {
        self.lock().indices.clone()
    }

    /// A copy of the view's elements
    pub fn snapshot(&self) -> Vec<T> {
        let inner = self.lock();
        inner
            .indices
            .iter()
            .map(|index| inner.backing[*index].clone())
            .collect()
    }

    /// The first element in view order matching `predicate`
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let inner = self.lock();
        inner
            .indices
            .iter()
            .map(|index| &inner.backing[*index])
            .find(|element| predicate(element))
            .cloned()
    }
}
