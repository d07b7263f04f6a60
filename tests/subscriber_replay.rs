//! Subscription semantics: live delivery, replay, and detachment.

mod common;

use bundlestream::{ReassemblyEngine, StreamEvent, StreamOutcome};
use bytes::BytesMut;
use futures::StreamExt;

use crate::common::{drain, sliced, test_config};

const MESSAGE: &[u8] = b"subscribers replay history before following live traffic";

fn engine() -> ReassemblyEngine { ReassemblyEngine::new(test_config()) }

#[tokio::test]
async fn early_subscriber_follows_the_whole_stream() {
    let engine = engine();
    let (id, frames) = sliced(MESSAGE, 6);

    // Subscribed before the first frame exists anywhere.
    let subscription = engine.subscribe(&id).expect("subscribe");
    for frame in frames {
        engine.ingest(frame).expect("ingest frame");
    }

    let (bytes, outcome) = drain(subscription).await;
    assert_eq!(&bytes[..], MESSAGE);
    assert_eq!(outcome, Some(StreamOutcome::Complete));
}

#[tokio::test]
async fn late_subscriber_first_replays_then_follows() {
    let engine = engine();
    let (id, frames) = sliced(MESSAGE, 6);
    let split = frames.len() / 2;

    for frame in &frames[..split] {
        engine.ingest(frame.clone()).expect("ingest frame");
    }
    let subscription = engine.subscribe(&id).expect("subscribe");
    for frame in &frames[split..] {
        engine.ingest(frame.clone()).expect("ingest frame");
    }

    let (bytes, outcome) = drain(subscription).await;
    assert_eq!(&bytes[..], MESSAGE);
    assert_eq!(outcome, Some(StreamOutcome::Complete));
}

#[tokio::test]
async fn terminal_subscriber_receives_the_full_replay() {
    let engine = engine();
    let (id, frames) = sliced(MESSAGE, 6);
    for frame in frames {
        engine.ingest(frame).expect("ingest frame");
    }

    let (bytes, outcome) = drain(engine.subscribe(&id).expect("subscribe")).await;
    assert_eq!(&bytes[..], MESSAGE);
    assert_eq!(outcome, Some(StreamOutcome::Complete));
}

#[tokio::test]
async fn every_subscriber_sees_identical_bytes() {
    let engine = engine();
    let (id, frames) = sliced(MESSAGE, 4);
    let split = frames.len() / 3;

    let early = engine.subscribe(&id).expect("subscribe early");
    for frame in &frames[..split] {
        engine.ingest(frame.clone()).expect("ingest frame");
    }
    let late = engine.subscribe(&id).expect("subscribe late");
    for frame in &frames[split..] {
        engine.ingest(frame.clone()).expect("ingest frame");
    }

    let (early_bytes, early_outcome) = drain(early).await;
    let (late_bytes, late_outcome) = drain(late).await;
    assert_eq!(early_bytes, late_bytes);
    assert_eq!(early_outcome, late_outcome);
    assert_eq!(&early_bytes[..], MESSAGE);
}

#[tokio::test]
async fn subscription_works_as_a_futures_stream() {
    let engine = engine();
    let (id, frames) = sliced(MESSAGE, 10);
    let mut subscription = engine.subscribe(&id).expect("subscribe");
    for frame in frames {
        engine.ingest(frame).expect("ingest frame");
    }

    let mut collected = BytesMut::new();
    let mut outcome = None;
    while let Some(event) = subscription.next().await {
        match event {
            StreamEvent::Segment(segment) => collected.extend_from_slice(&segment),
            StreamEvent::Closed(closed) => outcome = Some(closed),
        }
    }
    assert_eq!(&collected[..], MESSAGE);
    assert_eq!(outcome, Some(StreamOutcome::Complete));
}

#[tokio::test]
async fn unsubscribing_ends_the_event_stream() {
    let engine = engine();
    let (id, frames) = sliced(MESSAGE, 6);
    let mut subscription = engine.subscribe(&id).expect("subscribe");
    engine.ingest(frames[0].clone()).expect("ingest FIRST");

    assert!(engine.unsubscribe(&id, subscription.token()));
    for frame in &frames[1..] {
        engine.ingest(frame.clone()).expect("ingest frame");
    }

    // The replayed opening segment is still delivered, then nothing more.
    assert!(matches!(
        subscription.recv().await,
        Some(StreamEvent::Segment(_))
    ));
    assert_eq!(subscription.recv().await, None);
}
