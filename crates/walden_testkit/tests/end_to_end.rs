//! End-to-end tests: stations written, reopened and replayed.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use walden_core::aggregate::Repository;
use walden_core::{BoxError, SnapshotWriter};
use walden_testkit::prelude::*;

/// Two stations edited twice each, a third created and removed.
struct Scenario {
    first: StationId,
    second: StationId,
    removed: StationId,
}

fn run_scenario(log: &TestLog, snapshot: bool) -> Scenario {
    let (wal, stations) = log.open_stations();

    let first = create_station(&stations, "Pier", Wgs84Point::new(60.15, 24.95), Durability::None)
        .unwrap();
    let second = create_station(&stations, "Hill", Wgs84Point::new(61.5, 23.8), Durability::None)
        .unwrap();
    let third = create_station(&stations, "Marsh", Wgs84Point::new(62.0, 25.7), Durability::None)
        .unwrap();

    first
        .edit(Durability::Batched, |m| {
            m.set_name("North Pier").set_note(Some("rebuilt 2019"));
        })
        .unwrap();
    first
        .edit(Durability::Batched, |m| {
            m.set_location(Wgs84Point::new(60.16, 24.96));
        })
        .unwrap();
    second
        .edit(Durability::Immediate, |m| {
            m.set_note(Some("mast leaning"));
        })
        .unwrap();
    second
        .edit(Durability::Immediate, |m| {
            m.set_name("Hilltop").set_note(None);
        })
        .unwrap();
    let removed = *third.id();
    assert!(stations.remove(&removed, Durability::Immediate).unwrap().is_some());

    if snapshot {
        let stats = wal.take_snapshot().unwrap();
        assert_eq!(stats.entries, 1);
    }
    wal.close().unwrap();

    Scenario {
        first: *first.id(),
        second: *second.id(),
        removed,
    }
}

fn assert_final_state(stations: &StationRepository, scenario: &Scenario) {
    assert_eq!(stations.len(), 2);
    assert!(!stations.contains(&scenario.removed));

    let first = stations.get(&scenario.first).unwrap();
    assert_eq!(first.name(), "North Pier");
    assert_eq!(first.location(), Wgs84Point::new(60.16, 24.96));
    assert_eq!(first.note().as_deref(), Some("rebuilt 2019"));

    let second = stations.get(&scenario.second).unwrap();
    assert_eq!(
        second.to_state(),
        StationState {
            name: "Hilltop".into(),
            location: Wgs84Point::new(61.5, 23.8),
            note: None,
        }
    );
}

#[test]
fn replay_from_events_restores_final_state() {
    let log = TestLog::new();
    let scenario = run_scenario(&log, false);

    let wal = log.open(&[&station_codecs()]);
    let stations = Repository::open(&wal, TEST_CAPACITY);
    let stats = wal.replay().unwrap();
    assert_eq!(stats.snapshot_entries, 0);
    assert_eq!(stats.events, 8);
    assert_eq!(stats.next_record_number, RecordNumber(9));
    assert_final_state(&stations, &scenario);
}

#[test]
fn replay_from_snapshot_restores_same_state() {
    let log = TestLog::new();
    let scenario = run_scenario(&log, true);
    assert_eq!(log.descriptor().latest_snapshot, "snapshot-000002.bin");
    assert_eq!(log.descriptor().first_record_number, 9);

    let wal = log.open(&[&station_codecs()]);
    let stations = Repository::open(&wal, TEST_CAPACITY);
    let stats = wal.replay().unwrap();
    assert_eq!(stats.snapshot_entries, 1);
    assert_eq!(stats.events, 0);
    assert_final_state(&stations, &scenario);
}

#[test]
fn replayed_stations_keep_accepting_edits() {
    let log = TestLog::new();
    let scenario = run_scenario(&log, true);
    {
        let (wal, stations) = log.open_stations();
        let first = stations.get(&scenario.first).unwrap();
        first
            .edit(Durability::Immediate, |m| {
                m.set_name("South Pier");
            })
            .unwrap();
        assert_eq!(wal.next_record_number().unwrap(), RecordNumber(10));
        wal.close().unwrap();
    }

    let (_wal, stations) = log.open_stations();
    assert_eq!(stations.get(&scenario.first).unwrap().name(), "South Pier");
}

#[test]
fn rotated_files_replay_in_order() {
    let log = TestLog::new();
    let config = || Config::default().max_log_file_size(256);
    let id = {
        let (wal, stations) = log.open_stations_with_config(config());
        let station =
            create_station(&stations, "0", Wgs84Point::default(), Durability::None).unwrap();
        for i in 1..=40 {
            station
                .edit(Durability::None, |m| {
                    m.set_name(i.to_string());
                })
                .unwrap();
        }
        wal.close().unwrap();
        *station.id()
    };

    let descriptor = log.descriptor();
    assert!(descriptor.wal_files.len() > 2, "{descriptor:?}");
    assert!(descriptor.wal_files.windows(2).all(|w| w[0] < w[1]));

    let wal = log.open_with_config(config(), &[&station_codecs()]);
    let stations = Repository::open(&wal, TEST_CAPACITY);
    let stats = wal.replay().unwrap();
    assert_eq!(stats.events, 41);
    assert_eq!(stats.wal_files, descriptor.wal_files.len());
    assert_eq!(stations.get(&id).unwrap().name(), "40");
}

#[test]
fn torn_final_record_loses_only_the_last_edit() {
    let log = TestLog::new();
    let id = {
        let (wal, stations) = log.open_stations();
        let station =
            create_station(&stations, "Dock", Wgs84Point::default(), Durability::None).unwrap();
        station
            .edit(Durability::None, |m| {
                m.set_name("Dock A");
            })
            .unwrap();
        station
            .edit(Durability::None, |m| {
                m.set_name("Dock B");
            })
            .unwrap();
        wal.close().unwrap();
        *station.id()
    };
    chop_bytes(&log.file("wal-000001.log"), 5).unwrap();

    let (wal, stations) = log.open_stations();
    assert_eq!(stations.get(&id).unwrap().name(), "Dock A");
    // The torn record's number is reused by the next append.
    assert_eq!(wal.next_record_number().unwrap(), RecordNumber(3));
}

#[test]
fn zero_filled_tail_is_ignored() {
    let log = TestLog::new();
    {
        let (wal, stations) = log.open_stations();
        create_station(&stations, "Dock", Wgs84Point::default(), Durability::None).unwrap();
        wal.close().unwrap();
    }
    append_zeros(&log.file("wal-000001.log"), 64).unwrap();

    let (wal, stations) = log.open_stations();
    assert_eq!(stations.len(), 1);
    assert_eq!(wal.next_record_number().unwrap(), RecordNumber(2));
}

#[test]
fn corrupt_latest_file_refuses_to_open() {
    let log = TestLog::new();
    {
        let (wal, stations) = log.open_stations();
        for name in ["a", "b", "c"] {
            create_station(&stations, name, Wgs84Point::default(), Durability::None).unwrap();
        }
        wal.close().unwrap();
    }
    flip_byte(&log.file("wal-000001.log"), 40).unwrap();

    let err = WriteAheadLog::open_with(log.path(), Config::default(), &[&station_codecs()])
        .unwrap_err();
    assert!(err.is_fatal(), "{err}");
}

#[test]
fn corrupt_older_file_poisons_replay() {
    let log = TestLog::new();
    let config = || Config::default().max_log_file_size(128);
    {
        let (wal, stations) = log.open_stations_with_config(config());
        for name in ["a", "b", "c", "d"] {
            create_station(&stations, name, Wgs84Point::default(), Durability::None).unwrap();
        }
        wal.close().unwrap();
    }
    assert!(log.descriptor().wal_files.len() > 1);
    flip_byte(&log.file("wal-000001.log"), 40).unwrap();

    let fatal = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fatal);
    let wal = log.open_with_config(
        config().fatal_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        &[&station_codecs()],
    );
    let stations = Repository::open(&wal, TEST_CAPACITY);
    assert!(wal.replay().is_err());
    assert!(wal.is_poisoned());
    assert_eq!(fatal.load(Ordering::SeqCst), 1);
    assert!(matches!(
        create_station(&stations, "e", Wgs84Point::default(), Durability::None),
        Err(CoreError::Poisoned)
    ));
}

#[test]
fn failed_snapshot_keeps_previous_generation() {
    let log = TestLog::new();
    let id = {
        let (wal, stations) = log.open_stations();
        let station =
            create_station(&stations, "Quay", Wgs84Point::default(), Durability::None).unwrap();
        let _failing = wal.register_snapshot_producer(
            |_: &mut SnapshotWriter<'_>| -> Result<(), BoxError> { Err("disk quota".into()) },
        );

        assert!(matches!(
            wal.take_snapshot(),
            Err(CoreError::SnapshotProducer { .. })
        ));
        assert!(!wal.is_poisoned());
        station
            .edit(Durability::None, |m| {
                m.set_name("Quay 2");
            })
            .unwrap();
        wal.close().unwrap();
        *station.id()
    };

    assert_eq!(log.descriptor(), walden_core::Descriptor::default());
    assert!(log.file_names().iter().all(|name| !name.ends_with(".tmp")));
    let (_wal, stations) = log.open_stations();
    assert_eq!(stations.get(&id).unwrap().name(), "Quay 2");
}

#[test]
fn capacity_and_duplicates_are_refused() {
    let log = TestLog::new();
    let wal = log.open(&[&station_codecs()]);
    let stations: Arc<StationRepository> = Repository::open(&wal, 2);
    wal.replay().unwrap();

    let a = create_station(&stations, "a", Wgs84Point::default(), Durability::None).unwrap();
    create_station(&stations, "b", Wgs84Point::default(), Durability::None).unwrap();
    assert!(matches!(
        create_station(&stations, "c", Wgs84Point::default(), Durability::None),
        Err(CoreError::RepositoryAtCapacity { .. })
    ));

    let twin = Station::new(&wal, *a.id(), StationState::default());
    assert!(matches!(
        stations.insert(&twin, Durability::None),
        Err(CoreError::DuplicateIdentifier { .. })
    ));

    stations.set_capacity(3);
    create_station(&stations, "c", Wgs84Point::default(), Durability::None).unwrap();
    assert_eq!(stations.len(), 3);
}

#[test]
fn removed_station_refuses_edits() {
    with_temp_log(|log| {
        let (_wal, stations) = log.open_stations();
        let station =
            create_station(&stations, "Gone", Wgs84Point::default(), Durability::None).unwrap();
        stations.remove(station.id(), Durability::None).unwrap();

        assert!(station.is_removed());
        assert!(matches!(
            station.edit(Durability::None, |m| {
                m.set_name("Back");
            }),
            Err(CoreError::AggregateNotLive { .. })
        ));
    });
}

#[test]
fn concurrent_edits_all_survive() {
    let log = TestLog::new();
    let ids: Vec<StationId> = {
        let (wal, stations) = log.open_stations();
        let created: Vec<_> = (0..4)
            .map(|i| {
                create_station(&stations, i.to_string(), Wgs84Point::default(), Durability::None)
                    .unwrap()
            })
            .collect();

        std::thread::scope(|scope| {
            for station in &created {
                scope.spawn(move || {
                    for n in 0..50 {
                        station
                            .edit(Durability::Batched, |m| {
                                m.set_note(Some(&n.to_string()));
                            })
                            .unwrap();
                    }
                });
            }
            let wal = &wal;
            scope.spawn(move || {
                for _ in 0..5 {
                    wal.take_snapshot().unwrap();
                }
            });
        });
        assert_eq!(log.descriptor().latest_snapshot, "snapshot-000006.bin");
        wal.close().unwrap();
        created.iter().map(|s| *s.id()).collect()
    };

    let (_wal, stations) = log.open_stations();
    for id in &ids {
        assert_eq!(stations.get(id).unwrap().note().as_deref(), Some("49"));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn random_workloads_survive_reopen(ops in station_ops_strategy(40)) {
        let log = TestLog::new();
        let mut model: HashMap<StationId, StationState> = HashMap::new();
        let mut order: Vec<StationId> = Vec::new();
        {
            let (wal, stations) = log.open_stations();
            for op in ops {
                match op {
                    StationOp::Create(state) => {
                        let station = Station::new(&wal, StationId::random(), state.clone());
                        stations.insert(&station, Durability::None).unwrap();
                        model.insert(*station.id(), state);
                        order.push(*station.id());
                    }
                    StationOp::Apply(i, event) if !order.is_empty() => {
                        let id = order[i % order.len()];
                        let station = stations.get(&id).unwrap();
                        station.append_to_wal(event.clone(), Durability::None).unwrap();
                        let state = model.get_mut(&id).unwrap();
                        <StationKind as walden_core::aggregate::AggregateKind>::apply(state, &event);
                    }
                    StationOp::Remove(i) if !order.is_empty() => {
                        let id = order.remove(i % order.len());
                        stations.remove(&id, Durability::None).unwrap();
                        model.remove(&id);
                    }
                    StationOp::Snapshot => {
                        wal.take_snapshot().unwrap();
                    }
                    StationOp::Apply(..) | StationOp::Remove(_) => {}
                }
            }
            wal.close().unwrap();
        }

        let (_wal, stations) = log.open_stations();
        prop_assert_eq!(stations.len(), model.len());
        for (id, state) in &model {
            prop_assert_eq!(&stations.get(id).unwrap().to_state(), state);
        }
    }
}
