//! Shared-memory ring integration tests
//!
//! Exercises the create/open contract through real POSIX shared memory,
//! using process-unique region names so parallel test runs cannot collide.

use gauge_ring::{status, NormalizedRecord, ShmRing};

fn unique_name(tag: &str) -> String {
    format!("/gauge_test_{}_{}", tag, std::process::id())
}

fn sample(sequence: u32, thickness: f32) -> NormalizedRecord {
    let mut rec = NormalizedRecord {
        timestamp_ns: u64::from(sequence) * 20_000_000,
        sequence,
        thickness_mm: thickness,
        status: status::ALL_OK,
        ..Default::default()
    };
    rec.set_crc();
    rec
}

#[test]
fn producer_and_consumer_share_one_region() {
    let name = unique_name("share");
    let producer = ShmRing::create_named(&name).expect("create region");
    let consumer = ShmRing::open_named(&name).expect("open region");

    producer.push(&sample(1, 1.50));
    producer.push(&sample(2, 1.52));

    let rec = consumer.pop_latest().expect("latest record");
    assert_eq!(rec.sequence, 2);
    assert!((rec.thickness_mm - 1.52).abs() < 1e-6);
    assert!(rec.verify_crc());

    // Latest-only consumption drains the cursor
    assert!(consumer.pop_latest().is_none());
}

#[test]
fn create_unlinks_previous_instance() {
    let name = unique_name("relink");
    {
        let first = ShmRing::create_named(&name).expect("first create");
        first.push(&sample(10, 1.0));
    }
    // A second creator starts from a fresh region
    let second = ShmRing::create_named(&name).expect("second create");
    assert!(second.is_empty());
}

#[test]
fn open_without_creator_fails() {
    let name = unique_name("absent");
    assert!(ShmRing::open_named(&name).is_err());
}

#[test]
fn corrupted_record_is_never_delivered() {
    let name = unique_name("crc");
    let producer = ShmRing::create_named(&name).expect("create region");
    let consumer = ShmRing::open_named(&name).expect("open region");

    // A record whose stored CRC does not match its bytes models a torn slot
    let mut rec = sample(3, 1.44);
    rec.crc8 ^= 0xFF;
    producer.push(&rec);

    assert!(consumer.pop_latest().is_none());

    // A healthy record published afterwards flows through normally
    producer.push(&sample(4, 1.45));
    let rec = consumer.pop_latest().expect("healthy record");
    assert_eq!(rec.sequence, 4);
}

#[test]
fn peek_is_gated_per_handle() {
    let name = unique_name("peek");
    let producer = ShmRing::create_named(&name).expect("create region");
    let a = ShmRing::open_named(&name).expect("open handle a");
    let b = ShmRing::open_named(&name).expect("open handle b");

    producer.push(&sample(7, 1.7));

    // Each handle sees the record once
    assert_eq!(a.peek_latest().expect("a sees it").sequence, 7);
    assert!(a.peek_latest().is_none());
    assert_eq!(b.peek_latest().expect("b sees it").sequence, 7);

    producer.push(&sample(8, 1.8));
    assert_eq!(a.peek_latest().expect("a sees next").sequence, 8);
}
