//! Session aggregation fed from decoded frames.

use chrono::{Duration, Utc};
use heartlink::core::{BodyProfile, SessionAggregator, SessionError, ZoneConfig};
use heartlink::protocol::decode;
use heartlink::sink::{JsonDirSink, MemorySink, SessionSink};
use std::sync::Arc;
use std::thread;

fn rr_frame(bpm: u8, rr_raw: &[u16]) -> Vec<u8> {
    let mut frame = vec![0x10, bpm];
    for raw in rr_raw {
        frame.extend_from_slice(&raw.to_le_bytes());
    }
    frame
}

#[test]
fn test_concurrent_samples_are_all_counted() {
    let aggregator = Arc::new(SessionAggregator::new(
        ZoneConfig::default(),
        BodyProfile::default(),
    ));
    aggregator.start();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let aggregator = aggregator.clone();
            thread::spawn(move || {
                let sample = decode(&rr_frame(90, &[683])).unwrap();
                for _ in 0..250 {
                    aggregator.on_sample(&sample).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let sink = MemorySink::new();
    let aggregate = aggregator.finalize(&sink).unwrap();
    assert_eq!(aggregate.sample_count, 1000);
    assert_eq!(aggregate.hrv.sample_count, 1000);
    assert_eq!(aggregate.max_hr, 90);
    assert!((aggregate.average_hr - 90.0).abs() < 1e-9);
    assert_eq!(sink.sessions().len(), 1);
}

#[test]
fn test_stop_races_with_samples() {
    let aggregator = Arc::new(SessionAggregator::new(
        ZoneConfig::default(),
        BodyProfile::default(),
    ));
    aggregator.start();

    let producer = {
        let aggregator = aggregator.clone();
        thread::spawn(move || {
            let sample = decode(&rr_frame(70, &[878])).unwrap();
            let mut accepted = 0u64;
            for _ in 0..10_000 {
                match aggregator.on_sample(&sample) {
                    Ok(_) => accepted += 1,
                    Err(SessionError::Closed) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            accepted
        })
    };

    let aggregate = aggregator.stop().unwrap();
    let accepted = producer.join().unwrap();

    // Every sample the aggregator accepted made it into the aggregate.
    assert_eq!(aggregate.sample_count, accepted);
    assert_eq!(aggregate.hrv.sample_count as u64, accepted);
}

#[test]
fn test_decoded_session_persists_to_directory() {
    let dir = std::env::temp_dir().join(format!("heartlink-session-{}", uuid::Uuid::new_v4()));
    let sink = JsonDirSink::new(&dir);
    let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());

    let t0 = Utc::now();
    let id = aggregator.start_at(t0);
    // 800, 810, 790, 850, 800 ms
    let frames = [rr_frame(74, &[819, 829]), rr_frame(75, &[809]), rr_frame(72, &[870, 819])];
    for (i, frame) in frames.iter().enumerate() {
        let sample = decode(frame).unwrap();
        let record = aggregator
            .on_sample_at(&sample, t0 + Duration::seconds(i as i64))
            .unwrap();
        assert_eq!(record.session_id, id);
        assert_eq!(record.zone, 1);
        sink.record_sample(&record).unwrap();
    }

    let aggregate = aggregator.stop_at(t0 + Duration::seconds(3)).unwrap();
    sink.persist_session(&aggregate).unwrap();

    assert_eq!(aggregate.zone_times_ms, [3000, 0, 0, 0, 0]);
    assert!((aggregate.hrv.rmssd_ms - 40.620_192_023_179_8).abs() < 1e-9);
    assert_eq!(aggregate.hrv.score, 80);

    let loaded = sink.load_sessions().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].session_id, id);
    assert_eq!(loaded[0].hrv.score, 80);

    let samples = std::fs::read_to_string(dir.join(format!("samples_{}.jsonl", id.simple())))
        .unwrap();
    assert_eq!(samples.lines().count(), 3);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_restart_discards_previous_intervals() {
    let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
    let first = aggregator.start();
    aggregator
        .on_sample(&decode(&rr_frame(60, &[1024])).unwrap())
        .unwrap();
    aggregator.stop().unwrap();

    let second = aggregator.start();
    assert_ne!(first, second);
    assert!(aggregator.rr_snapshot().is_empty());
    assert_eq!(aggregator.current_metrics().sample_count, 0);
}
