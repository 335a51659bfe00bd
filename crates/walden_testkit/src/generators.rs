//! Property-based test generators using proptest.
//!
//! Provides strategies for identifiers, station values and sequences of
//! repository operations.

use crate::station::{StationEvent, StationId, StationState, Wgs84Point};
use proptest::prelude::*;
use walden_core::aggregate::{NanoId, NANO_ID_ALPHABET, NANO_ID_LENGTH};

/// Strategy for valid nano ids.
pub fn nano_id_strategy() -> impl Strategy<Value = NanoId> {
    prop::collection::vec(prop::sample::select(NANO_ID_ALPHABET.to_vec()), NANO_ID_LENGTH)
        .prop_map(|bytes| {
            let text: String = bytes.into_iter().map(char::from).collect();
            NanoId::parse(&text).expect("generated id uses the alphabet")
        })
}

/// Strategy for station ids.
pub fn station_id_strategy() -> impl Strategy<Value = StationId> {
    nano_id_strategy().prop_map(StationId::from)
}

/// Strategy for in-range coordinates.
pub fn point_strategy() -> impl Strategy<Value = Wgs84Point> {
    (-90.0..=90.0f64, -180.0..=180.0f64).prop_map(|(lat, lon)| Wgs84Point::new(lat, lon))
}

/// Strategy for station names, including non-ASCII text.
pub fn station_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-zÅÄÖåäö][A-Za-z0-9ÅÄÖåäö -]{0,31}").expect("Invalid regex")
}

/// Strategy for optional notes.
pub fn note_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(".{0,64}")
}

/// Strategy for complete station states.
pub fn station_state_strategy() -> impl Strategy<Value = StationState> {
    (station_name_strategy(), point_strategy(), note_strategy()).prop_map(
        |(name, location, note)| StationState {
            name,
            location,
            note,
        },
    )
}

/// Strategy for single station events.
pub fn station_event_strategy() -> impl Strategy<Value = StationEvent> {
    prop_oneof![
        station_name_strategy().prop_map(StationEvent::SetName),
        point_strategy().prop_map(StationEvent::SetLocation),
        note_strategy().prop_map(StationEvent::SetNote),
    ]
}

/// One step of a generated repository workload.
///
/// Indices select among the stations created so far, modulo their count.
#[derive(Debug, Clone)]
pub enum StationOp {
    /// Create a station with this state.
    Create(StationState),
    /// Apply an event to a station.
    Apply(usize, StationEvent),
    /// Remove a station.
    Remove(usize),
    /// Take a snapshot.
    Snapshot,
}

/// Strategy for workloads of `1..max_len` operations.
pub fn station_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StationOp>> {
    let op = prop_oneof![
        3 => station_state_strategy().prop_map(StationOp::Create),
        6 => (any::<usize>(), station_event_strategy())
            .prop_map(|(i, event)| StationOp::Apply(i, event)),
        1 => any::<usize>().prop_map(StationOp::Remove),
        1 => Just(StationOp::Snapshot),
    ];
    prop::collection::vec(op, 1..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_ids_parse_back(id in nano_id_strategy()) {
            prop_assert_eq!(id.as_str().len(), NANO_ID_LENGTH);
            prop_assert_eq!(NanoId::parse(id.as_str()).unwrap(), id);
        }

        #[test]
        fn generated_points_are_valid(point in point_strategy()) {
            prop_assert!(point.is_valid());
        }
    }
}
