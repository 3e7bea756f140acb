// Local scale channel: shared device lifetime and event delivery

mod common;

use common::{FakeOpener, next_event};
use futures_util::FutureExt;
use std::sync::Arc;
use weighbridge::models::ChannelEvent;
use weighbridge::scale_channel::{LocalScaleChannel, ScaleChannelConfig};
use weighbridge::stability::StabilityConfig;

fn channel(opener: Arc<FakeOpener>) -> LocalScaleChannel {
    LocalScaleChannel::new(
        ScaleChannelConfig {
            name: "/api/scale".into(),
            device_path: "/dev/ttyTEST0".into(),
            baud_rate: 9600,
            stability: StabilityConfig::default(),
            capacity: 64,
        },
        opener,
    )
}

fn weight_of(event: &ChannelEvent) -> Option<(f64, bool)> {
    match event {
        ChannelEvent::WeightUpdate(u) => Some((u.weight, u.is_stable)),
        _ => None,
    }
}

#[tokio::test]
async fn test_overlapping_consumers_share_one_device() {
    let opener = Arc::new(FakeOpener::scripted(&[]));
    let scale = channel(opener.clone());

    let a = scale.connect().await;
    let b = scale.connect().await;
    let c = scale.connect().await;
    assert_eq!(opener.opens(), 1);
    assert_eq!(scale.stats().consumers, 3);

    b.disconnect().await;
    a.disconnect().await;
    assert_eq!(opener.closes(), 0);

    c.disconnect().await;
    assert_eq!(opener.closes(), 1);
    assert_eq!(scale.stats().consumers, 0);
    assert!(!scale.stats().connected);
}

#[tokio::test]
async fn test_consumer_sees_connection_then_readings() {
    let opener = Arc::new(FakeOpener::scripted(&["20.0", "20.05", "20.02", "garbage", "20.03", "20.01"]));
    let scale = channel(opener.clone());
    let mut handle = scale.connect().await;

    assert_eq!(
        next_event(handle.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );
    let mut readings = Vec::new();
    while readings.len() < 5 {
        let event = next_event(handle.recv()).await;
        if let Some(reading) = weight_of(&event) {
            readings.push(reading);
        }
    }
    assert_eq!(
        readings,
        vec![
            (20.0, false),
            (20.05, false),
            (20.02, false),
            (20.03, false),
            (20.01, true)
        ]
    );
    assert_eq!(handle.stats().dropped_lines, 1);
    assert_eq!(handle.stats().samples_published, 5);
    handle.disconnect().await;
}

#[tokio::test]
async fn test_open_failure_reports_error_then_disconnected() {
    let opener = Arc::new(FakeOpener::scripted(&[]).failing(1));
    let scale = channel(opener.clone());
    let mut handle = scale.connect().await;

    match next_event(handle.recv()).await {
        ChannelEvent::ChannelError { message } => assert!(message.contains("/dev/ttyTEST0")),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(
        next_event(handle.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: false }
    );
    handle.disconnect().await;
    assert_eq!(opener.closes(), 0);
}

#[tokio::test]
async fn test_reconnect_after_open_failure_reopens() {
    let opener = Arc::new(FakeOpener::scripted(&[]).failing(1));
    let scale = channel(opener.clone());

    let failed = scale.connect().await;
    failed.disconnect().await;

    let mut handle = scale.connect().await;
    assert_eq!(
        next_event(handle.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );
    assert_eq!(opener.opens(), 1);
    handle.disconnect().await;
    assert_eq!(opener.closes(), 1);
}

#[tokio::test]
async fn test_late_consumer_gets_current_state() {
    let (opener, feed) = FakeOpener::fed();
    let opener = Arc::new(opener);
    let scale = channel(opener.clone());

    let mut first = scale.connect().await;
    assert_eq!(
        next_event(first.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );

    let mut late = scale.connect().await;
    assert_eq!(
        next_event(late.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );

    feed.send("12.5".into()).unwrap();
    assert_eq!(weight_of(&next_event(first.recv()).await), Some((12.5, false)));
    assert_eq!(weight_of(&next_event(late.recv()).await), Some((12.5, false)));

    first.disconnect().await;
    late.disconnect().await;
    assert_eq!(opener.opens(), 1);
    assert_eq!(opener.closes(), 1);
}

#[tokio::test]
async fn test_device_end_reports_error_and_disconnect() {
    let (opener, feed) = FakeOpener::fed();
    let opener = Arc::new(opener);
    let scale = channel(opener.clone());
    let mut handle = scale.connect().await;
    assert_eq!(
        next_event(handle.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );

    drop(feed);
    assert!(matches!(
        next_event(handle.recv()).await,
        ChannelEvent::ChannelError { .. }
    ));
    assert_eq!(
        next_event(handle.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: false }
    );
    assert!(!handle.stats().connected);
    handle.disconnect().await;
    assert_eq!(opener.closes(), 1);
}

#[tokio::test]
async fn test_dropped_handle_releases_device() {
    let opener = Arc::new(FakeOpener::scripted(&[]));
    let scale = channel(opener.clone());
    let handle = scale.connect().await;
    drop(handle);

    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);
    while opener.closes() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "device not released");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }
    assert_eq!(scale.stats().consumers, 0);
}

#[tokio::test]
async fn test_connect_right_after_device_failure_reopens() {
    let (opener, feed) = FakeOpener::fed();
    let opener = Arc::new(opener);
    let scale = channel(opener.clone());
    let mut first = scale.connect().await;
    assert_eq!(
        next_event(first.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );

    drop(feed);
    assert!(matches!(
        next_event(first.recv()).await,
        ChannelEvent::ChannelError { .. }
    ));

    // The failed reader may still be winding down; the new consumer must not join it.
    let mut second = scale.connect().await;
    assert_eq!(
        next_event(second.recv()).await,
        ChannelEvent::ConnectionStateChanged { connected: true }
    );
    assert_eq!(opener.opens(), 2);
    assert!(second.stats().connected);

    first.disconnect().await;
    second.disconnect().await;
    assert_eq!(opener.closes(), 2);
}

#[tokio::test]
async fn test_abandoned_disconnect_still_releases_device() {
    let opener = Arc::new(FakeOpener::scripted(&[]));
    let scale = channel(opener.clone());
    let handle = scale.connect().await;

    // Poll once, then drop the future.
    let _ = handle.disconnect().now_or_never();

    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);
    while opener.closes() == 0 || scale.stats().connected {
        assert!(tokio::time::Instant::now() < deadline, "device not released");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }
    assert_eq!(scale.stats().consumers, 0);
}
