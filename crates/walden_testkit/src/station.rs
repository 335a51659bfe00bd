//! A sample aggregate: weather stations with a name, a location and a note.
//!
//! Small enough to read in one sitting, but it touches every part of the
//! stack: a nano identifier, a hand-written event codec, a CBOR state
//! codec, delta updates and a repository with retrying creation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use walden_codec::{Codec, CodecError, CodecResult, CborCodec, Reader, Writer};
use walden_core::aggregate::{
    Aggregate, AggregateCodecs, AggregateDeltaBuilder, AggregateKind, NanoIdCodec, Repository,
};
use walden_core::{CoreError, CoreResult, Durability};

walden_core::nano_identifier! {
    /// Identifies a [`Station`].
    pub struct StationId;
}

/// Serde ids of the station codecs start above this group id.
pub const STATION_SERDE_GROUP: u32 = 1000;

/// How many random ids [`create_station`] tries before giving up.
pub const CREATE_ATTEMPTS: usize = 5;

/// A point on the WGS 84 ellipsoid, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Wgs84Point {
    /// Latitude, -90 to 90.
    pub latitude: f64,
    /// Longitude, -180 to 180.
    pub longitude: f64,
}

impl Wgs84Point {
    /// Creates a point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Everything a station is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StationState {
    /// Display name.
    pub name: String,
    /// Where the station stands.
    pub location: Wgs84Point,
    /// Free-form note.
    pub note: Option<String>,
}

/// One change to a station.
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// The station was renamed.
    SetName(String),
    /// The station was moved.
    SetLocation(Wgs84Point),
    /// The note was replaced or cleared.
    SetNote(Option<String>),
}

/// Marker type tying the station types together.
#[derive(Debug)]
pub struct StationKind;

impl AggregateKind for StationKind {
    type Id = StationId;
    type State = StationState;
    type Event = StationEvent;
    const TYPE_NAME: &'static str = "station";

    fn apply(state: &mut StationState, event: &StationEvent) {
        match event {
            StationEvent::SetName(name) => state.name.clone_from(name),
            StationEvent::SetLocation(location) => state.location = *location,
            StationEvent::SetNote(note) => state.note.clone_from(note),
        }
    }
}

/// A station aggregate.
pub type Station = Aggregate<StationKind>;

/// The repository of all stations.
pub type StationRepository = Repository<StationKind>;

/// Writes a [`Wgs84Point`] as two doubles, rejecting out-of-range values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wgs84PointCodec;

impl Codec<Wgs84Point> for Wgs84PointCodec {
    fn encode(&self, value: &Wgs84Point, out: &mut Writer<'_>) -> CodecResult<()> {
        out.put_f64(value.latitude);
        out.put_f64(value.longitude);
        Ok(())
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<Wgs84Point> {
        let point = Wgs84Point::new(input.get_f64()?, input.get_f64()?);
        if !point.is_valid() {
            return Err(CodecError::invalid_structure(format!(
                "coordinates out of range: {}, {}",
                point.latitude, point.longitude
            )));
        }
        Ok(point)
    }
}

const SET_NAME: u8 = 1;
const SET_LOCATION: u8 = 2;
const SET_NOTE: u8 = 3;

/// Tagged encoding of [`StationEvent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StationEventCodec;

impl Codec<StationEvent> for StationEventCodec {
    fn encode(&self, value: &StationEvent, out: &mut Writer<'_>) -> CodecResult<()> {
        match value {
            StationEvent::SetName(name) => {
                out.put_u8(SET_NAME);
                out.put_str(name)
            }
            StationEvent::SetLocation(location) => {
                out.put_u8(SET_LOCATION);
                Wgs84PointCodec.encode(location, out)
            }
            StationEvent::SetNote(note) => {
                out.put_u8(SET_NOTE);
                out.put_opt_str(note.as_deref())
            }
        }
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<StationEvent> {
        match input.get_u8()? {
            SET_NAME => Ok(StationEvent::SetName(input.get_str()?)),
            SET_LOCATION => Ok(StationEvent::SetLocation(Wgs84PointCodec.decode(input)?)),
            SET_NOTE => Ok(StationEvent::SetNote(input.get_opt_str()?)),
            tag => Err(CodecError::invalid_structure(format!(
                "unknown station event tag {tag}"
            ))),
        }
    }
}

/// The codecs to register before opening a log that holds stations.
#[must_use]
pub fn station_codecs() -> AggregateCodecs<StationKind> {
    AggregateCodecs::new(
        STATION_SERDE_GROUP,
        NanoIdCodec,
        CborCodec::<StationState>::new(),
        StationEventCodec,
    )
}

/// Records the changes made through it as station events.
pub struct StationMutator<'a> {
    current: &'a StationState,
    delta: &'a mut AggregateDeltaBuilder<StationEvent>,
}

impl StationMutator<'_> {
    /// Renames the station.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.delta
            .update(name.into(), &self.current.name, StationEvent::SetName);
        self
    }

    /// Moves the station.
    pub fn set_location(&mut self, location: Wgs84Point) -> &mut Self {
        self.delta
            .update(location, &self.current.location, StationEvent::SetLocation);
        self
    }

    /// Replaces or clears the note.
    pub fn set_note(&mut self, note: Option<&str>) -> &mut Self {
        self.delta.update(
            note.map(str::to_string),
            &self.current.note,
            StationEvent::SetNote,
        );
        self
    }
}

/// Station accessors on [`Station`].
pub trait StationOps {
    /// Current name.
    fn name(&self) -> String;

    /// Current location.
    fn location(&self) -> Wgs84Point;

    /// Current note.
    fn note(&self) -> Option<String>;

    /// Applies the changes `f` makes, logging one event per changed field.
    ///
    /// Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the station is not live or the append fails.
    fn edit<F>(&self, durability: Durability, f: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut StationMutator<'_>);
}

impl StationOps for Station {
    fn name(&self) -> String {
        self.read(|s| s.name.clone())
    }

    fn location(&self) -> Wgs84Point {
        self.read(|s| s.location)
    }

    fn note(&self) -> Option<String> {
        self.read(|s| s.note.clone())
    }

    fn edit<F>(&self, durability: Durability, f: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut StationMutator<'_>),
    {
        self.update(durability, |current, delta| {
            f(&mut StationMutator { current, delta });
        })
    }
}

/// Creates a station under a fresh random id and inserts it.
///
/// A colliding id is retried up to [`CREATE_ATTEMPTS`] times.
///
/// # Errors
///
/// Returns [`CoreError::RepositoryAtCapacity`] when the repository is
/// full, `InvalidOperation` if every attempt collided, or the error of
/// the insert.
pub fn create_station(
    stations: &StationRepository,
    name: impl Into<String>,
    location: Wgs84Point,
    durability: Durability,
) -> CoreResult<Arc<Station>> {
    let state = StationState {
        name: name.into(),
        location,
        note: None,
    };
    create_with_ids(stations, state, durability, StationId::random)
}

fn create_with_ids(
    stations: &StationRepository,
    state: StationState,
    durability: Durability,
    mut next_id: impl FnMut() -> StationId,
) -> CoreResult<Arc<Station>> {
    let mut last = None;
    for _ in 0..CREATE_ATTEMPTS {
        let id = next_id();
        let station = Station::new(stations.wal(), id, state.clone());
        match stations.insert(&station, durability) {
            Ok(()) => return Ok(station),
            Err(CoreError::DuplicateIdentifier { .. }) => {
                debug!(%id, "Duplicate station id, retrying");
                last = Some(id);
            }
            Err(e) => return Err(e),
        }
    }
    Err(CoreError::invalid_operation(format!(
        "no unique station id after {CREATE_ATTEMPTS} attempts, last tried {}",
        last.map(|id| id.to_string()).unwrap_or_default()
    )))
}
