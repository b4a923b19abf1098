mod common;

use std::io::{ErrorKind, Write};

use common::{frame_bytes, sync_prefix, Stream};
use rand::{rngs::StdRng, Rng, SeedableRng};
use test_case::test_case;
use xv11::frame::{
    self, patch_checksum, CRC_FAILURE, FRAMES_PER_REVOLUTION, INDEX_BASE,
};
use xv11::{Decoder, DecoderOpts, Error, Event, Status, Summary, SyncState};

fn index(pos: usize) -> u8 {
    INDEX_BASE + u8::try_from(pos).unwrap()
}

fn locked(dat: &[u8], frames_per_read: usize, crc_tolerance_percent: u8) -> Decoder<&[u8]> {
    Decoder::new(dat, DecoderOpts::new(frames_per_read, crc_tolerance_percent))
        .expect("decoder should sync")
}

#[test_case(1)]
#[test_case(10)]
#[test_case(45)]
#[test_case(90)]
fn clean_stream_decodes_in_order(frames_per_read: usize) {
    let dat = sync_prefix().revolution().revolution().build();
    let mut decoder = locked(&dat, frames_per_read, 10);

    let mut count = 0;
    while count < 2 * FRAMES_PER_REVOLUTION {
        let batch = decoder.decode_batch().unwrap();
        assert_eq!(batch.status, Status::Success);
        assert!(batch.events.is_empty(), "{:?}", batch.events);
        assert_eq!(batch.frames.len(), frames_per_read);
        for frame in batch.frames {
            let pos = count % FRAMES_PER_REVOLUTION;
            assert_eq!(frame.index, index(pos));
            assert_eq!(frame.encode(), frame_bytes(pos));
            assert!(frame.readings.iter().all(|r| !r.invalid_data));
            count += 1;
        }
    }
    assert_eq!(decoder.state(), SyncState::Locked);
}

#[test]
fn corrupt_frame_is_replaced() {
    let dat = sync_prefix().revolution_with(&[30]).build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 10);

    let batch = decoder.decode_batch().unwrap();

    assert_eq!(batch.status, Status::Success);
    assert_eq!(decoder.crc_failures(), 1);
    assert_eq!(
        batch.events,
        vec![Event::ChecksumFailure {
            position: 30,
            index: index(30),
            failures: 1,
        }]
    );

    let frame = &batch.frames[30];
    assert_eq!(frame.index, index(30));
    for reading in &frame.readings {
        assert!(reading.invalid_data);
        assert_eq!(reading.distance, CRC_FAILURE);
        assert!(reading.is_crc_failure());
    }
    // neighbors untouched
    assert_eq!(batch.frames[29].encode(), frame_bytes(29));
    assert_eq!(batch.frames[31].encode(), frame_bytes(31));
}

#[test]
fn corrupt_index_is_replaced_with_expected() {
    let mut bad = frame_bytes(20);
    bad[1] = 0x07;
    let dat = sync_prefix()
        .frames(0..20)
        .raw(&bad)
        .frames(21..FRAMES_PER_REVOLUTION)
        .build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 10);

    let batch = decoder.decode_batch().unwrap();

    assert_eq!(batch.frames[20].index, index(20));
    assert!(batch.frames[20].readings[0].is_crc_failure());
    // no skip notice, the index was corrected
    assert_eq!(batch.events.len(), 1);
}

#[test]
fn bad_start_marker_counts_as_failure() {
    let mut bad = frame_bytes(40);
    bad[0] = 0x00;
    patch_checksum(&mut bad);
    assert!(frame::is_valid(&bad));

    let dat = sync_prefix()
        .frames(0..40)
        .raw(&bad)
        .frames(41..FRAMES_PER_REVOLUTION)
        .build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 10);

    let batch = decoder.decode_batch().unwrap();

    assert_eq!(decoder.crc_failures(), 1);
    assert!(matches!(
        batch.events[..],
        [Event::ChecksumFailure { position: 40, .. }]
    ));
}

#[test]
fn random_bit_flip_is_caught() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..25 {
        let pos = rng.gen_range(1..FRAMES_PER_REVOLUTION);
        let bit = rng.gen_range(0..20 * 8);
        let mut bad = frame_bytes(pos);
        bad[bit / 8] ^= 1 << (bit % 8);

        let dat = sync_prefix()
            .frames(0..pos)
            .raw(&bad)
            .frames(pos + 1..FRAMES_PER_REVOLUTION)
            .build();
        let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 10);
        let batch = decoder.decode_batch().unwrap();

        assert_eq!(
            batch.events,
            vec![Event::ChecksumFailure {
                position: pos,
                index: index(pos),
                failures: 1,
            }],
            "flipped bit {bit} of frame {pos}"
        );
    }
}

#[test]
fn exceeding_budget_loses_sync() {
    // 5% of 90 -> 4 failures tolerated
    let dat = sync_prefix().revolution_with(&[1, 2, 3, 4, 5]).build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 5);
    assert_eq!(decoder.crc_tolerance(), 4);

    let batch = decoder.decode_batch().unwrap();

    assert_eq!(batch.status, Status::SynchronizationLost);
    assert_eq!(decoder.state(), SyncState::Lost);
    // the whole batch is still decoded
    assert_eq!(batch.frames.len(), FRAMES_PER_REVOLUTION);
    assert_eq!(batch.frames[89].index, index(89));

    let lost: Vec<&Event> = batch
        .events
        .iter()
        .filter(|e| matches!(e, Event::SyncLost { .. }))
        .collect();
    assert_eq!(
        lost,
        vec![&Event::SyncLost {
            position: 5,
            failures: 5
        }]
    );
}

#[test]
fn failures_within_budget_succeed() {
    let dat = sync_prefix().revolution_with(&[1, 2, 3, 4]).build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 5);

    let batch = decoder.decode_batch().unwrap();

    assert_eq!(batch.status, Status::Success);
    assert_eq!(decoder.crc_failures(), 4);
    assert_eq!(decoder.state(), SyncState::Locked);
}

#[test]
fn zero_tolerance_loses_sync_on_first_failure() {
    let dat = sync_prefix().revolution_with(&[60]).build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 0);

    let batch = decoder.decode_batch().unwrap();
    assert_eq!(batch.status, Status::SynchronizationLost);
}

#[test]
fn budget_is_per_revolution() {
    let dat = sync_prefix()
        .revolution_with(&[80, 81, 82, 83])
        .revolution_with(&[10, 11, 12, 13])
        .build();
    let mut decoder = locked(&dat, FRAMES_PER_REVOLUTION, 5);

    let first = decoder.decode_batch().unwrap();
    assert_eq!(first.status, Status::Success);
    assert_eq!(decoder.crc_failures(), 4);

    let second = decoder.decode_batch().unwrap();
    assert_eq!(second.status, Status::Success);
    assert_eq!(decoder.crc_failures(), 4);
}

#[test]
fn corrupt_revolution_start_still_resets_failures() {
    let dat = sync_prefix()
        .revolution_with(&[86, 87, 88, 89])
        .revolution_with(&[0])
        .build();
    let mut decoder = locked(&dat, 10, 5);

    for _ in 0..9 {
        let batch = decoder.decode_batch().unwrap();
        assert_eq!(batch.status, Status::Success);
    }
    assert_eq!(decoder.crc_failures(), 4);

    // The fifth failure exceeds the budget, but the replaced frame takes the predicted
    // index 0 and so starts a new revolution.
    let batch = decoder.decode_batch().unwrap();
    assert_eq!(batch.status, Status::SynchronizationLost);
    assert_eq!(batch.frames[0].index, INDEX_BASE);
    assert!(batch.frames[0].readings[0].is_crc_failure());
    assert_eq!(decoder.crc_failures(), 0);
}

#[test]
fn skipped_frames_reanchor_expected_index() {
    let dat = sync_prefix()
        .frames(0..10)
        .frames(15..FRAMES_PER_REVOLUTION)
        .build();
    let mut decoder = locked(&dat, 10, 10);

    let batch = decoder.decode_batch().unwrap();
    assert!(batch.events.is_empty());
    assert_eq!(decoder.expected_index(), index(9));

    let batch = decoder.decode_batch().unwrap();
    assert_eq!(batch.status, Status::Success);
    assert_eq!(
        batch.events,
        vec![Event::FramesSkipped {
            position: 0,
            expected: index(10),
            actual: index(15),
            missing: Some(5),
        }]
    );
    assert_eq!(batch.frames[0].index, index(15));
    assert_eq!(batch.frames[9].index, index(24));
    assert_eq!(decoder.expected_index(), index(24));
    assert_eq!(decoder.crc_failures(), 0);
}

#[test]
fn skip_across_revolution_boundary() {
    let dat = sync_prefix()
        .frames(0..88)
        .frames(2..FRAMES_PER_REVOLUTION)
        .build();
    let mut decoder = locked(&dat, 88, 10);

    decoder.decode_batch().unwrap();
    let batch = decoder.decode_batch().unwrap();

    assert_eq!(
        batch.events,
        vec![Event::FramesSkipped {
            position: 0,
            expected: index(88),
            actual: index(2),
            missing: Some(4),
        }]
    );
}

#[test]
fn truncated_batch_is_transport_error() {
    let dat = sync_prefix().frames(0..15).build();
    let mut decoder = locked(&dat, 10, 10);

    decoder.decode_batch().unwrap();
    match decoder.decode_batch() {
        Err(Error::Transport(err)) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
        Err(err) => panic!("expected transport error, got {err:?}"),
        Ok(_) => panic!("expected transport error"),
    }
}

#[test]
fn decode_from_file() {
    let dat = sync_prefix()
        .revolution()
        .revolution_with(&[3, 50])
        .revolution()
        .build();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&dat).unwrap();
    let reader = file.reopen().unwrap();

    let decoder = xv11::initialize(reader, 10, 5).unwrap();
    let mut summary = Summary::default();
    let mut batches = decoder.batches();
    for zult in batches.by_ref() {
        match zult {
            Ok(batch) => summary.add(&batch),
            Err(err) => {
                assert!(matches!(err, Error::Transport(_)));
            }
        }
    }

    assert_eq!(summary.batches, 27);
    assert_eq!(summary.frames, 3 * FRAMES_PER_REVOLUTION);
    assert_eq!(summary.revolutions, 3);
    assert_eq!(summary.crc_failures, 2);
    assert_eq!(summary.invalid_readings, 8);
    assert_eq!(summary.skips, 0);
    assert_eq!(summary.sync_lost, 0);

    let decoder = batches.into_inner();
    assert_eq!(decoder.offset(), dat.len());
    let _file = decoder.shutdown();
}

#[cfg(feature = "serde")]
#[test]
fn batch_serializes_to_json() {
    let dat = sync_prefix().revolution_with(&[0]).build();
    let mut decoder = locked(&dat, 1, 10);
    let batch = decoder.decode_batch().unwrap();

    let value = serde_json::to_value(&batch).unwrap();
    assert_eq!(value["status"], "Success");
    assert_eq!(value["frames"][0]["index"], 0xa0);
    assert_eq!(value["frames"][0]["readings"][0]["distance"], 0x66);
    assert_eq!(value["events"][0]["ChecksumFailure"]["failures"], 1);
}
