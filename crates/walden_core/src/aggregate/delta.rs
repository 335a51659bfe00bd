//! Event lists built from field changes.

/// Collects the events needed to move an aggregate to new field values.
///
/// Only values that differ from the current ones produce an event, so an
/// update that changes nothing writes nothing.
///
/// ```
/// use walden_core::aggregate::AggregateDeltaBuilder;
///
/// #[derive(Debug, PartialEq)]
/// enum Event { Renamed(String), Moved(i32) }
///
/// let mut delta = AggregateDeltaBuilder::new();
/// delta
///     .update("north".to_string(), &"north".to_string(), Event::Renamed)
///     .update(7, &3, Event::Moved);
/// assert_eq!(delta.build(), vec![Event::Moved(7)]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDeltaBuilder<E> {
    events: Vec<E>,
}

impl<E> AggregateDeltaBuilder<E> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Records `make_event(new)` if `new` differs from `current`.
    pub fn update<T, F>(&mut self, new: T, current: &T, make_event: F) -> &mut Self
    where
        T: PartialEq,
        F: FnOnce(T) -> E,
    {
        if new != *current {
            self.events.push(make_event(new));
        }
        self
    }

    /// Records an event unconditionally.
    pub fn push(&mut self, event: E) -> &mut Self {
        self.events.push(event);
        self
    }

    /// Number of events recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The recorded events, in recording order.
    #[must_use]
    pub fn build(self) -> Vec<E> {
        self.events
    }
}

impl<E> Default for AggregateDeltaBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Change {
        Name(String),
        Note(Option<String>),
        Count(u32),
    }

    #[test]
    fn unchanged_values_record_nothing() {
        let mut delta = AggregateDeltaBuilder::new();
        delta
            .update("a".to_string(), &"a".to_string(), Change::Name)
            .update(None, &None, Change::Note);
        assert!(delta.is_empty());
        assert!(delta.build().is_empty());
    }

    #[test]
    fn changes_keep_order() {
        let mut delta = AggregateDeltaBuilder::new();
        delta
            .update(2, &1, Change::Count)
            .update(Some("x".to_string()), &None, Change::Note)
            .push(Change::Name("forced".into()));
        assert_eq!(delta.len(), 3);
        assert_eq!(
            delta.build(),
            vec![
                Change::Count(2),
                Change::Note(Some("x".into())),
                Change::Name("forced".into()),
            ]
        );
    }
}
