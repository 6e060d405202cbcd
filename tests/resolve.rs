mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{entity, platform_error, wait_until, MockDriver};
use dnssd_streams::{Discovery, DiscoveryError, MetadataEvent, ResolveEvent};
use futures_util::StreamExt;
use tokio_test::assert_pending;

const TIMEOUT: Duration = Duration::from_secs(5);

fn setup() -> (Arc<MockDriver>, Discovery) {
    let driver = Arc::new(MockDriver::new());
    let discovery = Discovery::from_arc(driver.clone());
    (driver, discovery)
}

fn addr() -> SocketAddr {
    "192.168.1.20:9000".parse().unwrap()
}

#[test_log::test(tokio::test)]
async fn concurrent_resolves_share_one_platform_operation() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut first = discovery.resolve(&e, TIMEOUT);
    let mut second = discovery.resolve(&e, TIMEOUT);

    let (r1, r2, _) = tokio::join!(first.next(), second.next(), async {
        wait_until(|| driver.resolve_count() == 1).await;
        driver.resolve_op(0).send(ResolveEvent::Resolved {
            addresses: vec![addr()],
        });
    });

    assert_eq!(driver.resolve_count(), 1, "single-flight");
    let r1 = r1.unwrap().unwrap();
    let r2 = r2.unwrap().unwrap();
    assert_eq!(r1, e);
    assert_eq!(r2, e);
    assert!(e.is_resolved());
    assert_eq!(e.addresses().unwrap(), vec![addr()]);

    // Terminal success: both producers complete.
    assert!(first.next().await.is_none());
    assert!(second.next().await.is_none());
}

#[test_log::test(tokio::test)]
async fn resolved_entity_short_circuits() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut producer = discovery.resolve(&e, TIMEOUT);
    let (result, _) = tokio::join!(producer.next(), async {
        wait_until(|| driver.resolve_count() == 1).await;
        driver.resolve_op(0).send(ResolveEvent::Resolved {
            addresses: vec![addr()],
        });
    });
    assert!(result.unwrap().is_ok());

    // Second resolve never reaches the platform.
    let mut again = discovery.resolve(&e, TIMEOUT);
    assert_eq!(again.next().await.unwrap().unwrap(), e);
    assert!(again.next().await.is_none());
    assert_eq!(driver.resolve_count(), 1);
}

#[test_log::test(tokio::test)]
async fn disposal_stops_the_operation_and_allows_retry() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut producer = discovery.resolve(&e, TIMEOUT);
    let mut pending = tokio_test::task::spawn(async move { producer.next().await });
    assert_pending!(pending.poll());
    wait_until(|| driver.resolve_count() == 1).await;
    let op = driver.resolve_op(0);
    assert!(!op.is_stopped());

    // Dropping the only subscriber stops the platform resolve.
    drop(pending);
    assert!(op.is_stopped());

    // And the next call is a fresh attempt, not a replay.
    let mut retry = discovery.resolve(&e, TIMEOUT);
    let (result, _) = tokio::join!(retry.next(), async {
        wait_until(|| driver.resolve_count() == 2).await;
        driver.resolve_op(1).send(ResolveEvent::Resolved {
            addresses: vec![addr()],
        });
    });
    assert!(result.unwrap().is_ok());
    assert_eq!(driver.resolve_count(), 2);
}

#[test_log::test(tokio::test)]
async fn platform_failure_maps_to_resolution_error_and_evicts() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut producer = discovery.resolve(&e, TIMEOUT);
    let (result, _) = tokio::join!(producer.next(), async {
        wait_until(|| driver.resolve_count() == 1).await;
        driver
            .resolve_op(0)
            .send(ResolveEvent::Failed(platform_error(-72002)));
    });
    match result.unwrap() {
        Err(DiscoveryError::Resolution(info)) => assert_eq!(info.code, -72002),
        other => panic!("expected resolution error, got {other:?}"),
    }
    assert!(producer.next().await.is_none());
    assert!(!e.is_resolved());

    // Eviction means a retry starts a second platform operation.
    let mut retry = discovery.resolve(&e, TIMEOUT);
    let (_, _) = tokio::join!(retry.next(), async {
        wait_until(|| driver.resolve_count() == 2).await;
        driver.resolve_op(1).send(ResolveEvent::Resolved {
            addresses: vec![addr()],
        });
    });
    assert_eq!(driver.resolve_count(), 2);
}

#[test_log::test(tokio::test)]
async fn start_failure_evicts_even_while_subscribers_hold_it() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    driver.fail_next_resolve();
    let mut failed = discovery.resolve(&e, TIMEOUT);
    assert!(matches!(
        failed.next().await.unwrap(),
        Err(DiscoveryError::Resolution(_))
    ));
    assert_eq!(driver.resolve_count(), 0, "nothing was started");

    // The failed producer is still held, yet a retry must reach the
    // platform rather than replay the stale failure.
    let mut retry = discovery.resolve(&e, TIMEOUT);
    let (result, _) = tokio::join!(retry.next(), async {
        wait_until(|| driver.resolve_count() == 1).await;
        driver.resolve_op(0).send(ResolveEvent::Resolved {
            addresses: vec![addr()],
        });
    });
    assert!(result.unwrap().is_ok());
    drop(failed);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn timeout_surfaces_as_resolution_failure() {
    let (driver, discovery) = setup();
    let e = entity("unreachable");

    let started = tokio::time::Instant::now();
    let mut producer = discovery.resolve(&e, TIMEOUT);
    let result = producer.next().await.unwrap();

    assert!(result.as_ref().unwrap_err().is_timeout(), "{result:?}");
    assert_eq!(started.elapsed(), TIMEOUT);
    assert!(driver.resolve_op(0).is_stopped());
    assert!(producer.next().await.is_none());

    // Timed-out attempts are evicted like any other failure.
    let _retry = discovery.resolve(&e, TIMEOUT).next().await;
    assert_eq!(driver.resolve_count(), 2);
}

#[test_log::test(tokio::test)]
async fn monitor_emits_every_update_and_stores_the_record() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut monitor = discovery.monitor_metadata(&e);
    let (first, _) = tokio::join!(monitor.next(), async {
        wait_until(|| driver.monitor_count() == 1).await;
        driver
            .monitor_op(0)
            .send(MetadataEvent::Updated(b"rev=1".to_vec()));
    });
    assert_eq!(first.unwrap().unwrap().metadata().unwrap(), b"rev=1");

    driver
        .monitor_op(0)
        .send(MetadataEvent::Updated(b"rev=2".to_vec()));
    let second = monitor.next().await.unwrap().unwrap();
    assert_eq!(second.metadata().unwrap(), b"rev=2");
    assert_eq!(driver.monitor_count(), 1);
}

#[test_log::test(tokio::test)]
async fn lookup_completes_after_exactly_one_emission() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut lookup = discovery.lookup_metadata(&e);
    let (first, _) = tokio::join!(lookup.next(), async {
        wait_until(|| driver.monitor_count() == 1).await;
        let op = driver.monitor_op(0);
        op.send(MetadataEvent::Updated(b"rev=1".to_vec()));
        op.send(MetadataEvent::Updated(b"rev=2".to_vec()));
    });
    assert!(first.unwrap().is_ok());
    assert!(lookup.next().await.is_none(), "take-1 over the monitor");

    // The lookup was the monitor's only subscriber, so completing it tears
    // the platform monitor down.
    drop(lookup);
    assert!(driver.monitor_op(0).is_stopped());
}

#[test_log::test(tokio::test)]
async fn monitor_sink_drop_is_an_unknown_failure() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut monitor = discovery.monitor_metadata(&e);
    let (first, _) = tokio::join!(monitor.next(), async {
        wait_until(|| driver.monitor_count() == 1).await;
        driver
            .monitor_op(0)
            .send(MetadataEvent::Updated(b"rev=1".to_vec()));
    });
    assert!(first.unwrap().is_ok());

    // The driver vanishing mid-monitor is a failure, not a completion.
    driver.close_monitor_ops();
    assert_eq!(
        monitor.next().await.unwrap().unwrap_err(),
        DiscoveryError::Unknown
    );
    assert!(monitor.next().await.is_none());
}

#[test_log::test(tokio::test)]
async fn monitor_failure_is_terminal_and_evicts() {
    let (driver, discovery) = setup();
    let e = entity("printer");

    let mut monitor = discovery.monitor_metadata(&e);
    let (result, _) = tokio::join!(monitor.next(), async {
        wait_until(|| driver.monitor_count() == 1).await;
        driver
            .monitor_op(0)
            .send(MetadataEvent::Failed(platform_error(-72005)));
    });
    assert!(matches!(
        result.unwrap(),
        Err(DiscoveryError::Resolution(_))
    ));
    assert!(monitor.next().await.is_none());

    let mut retry = discovery.monitor_metadata(&e);
    let mut pending = tokio_test::task::spawn(async move { retry.next().await });
    assert_pending!(pending.poll());
    wait_until(|| driver.monitor_count() == 2).await;
}
