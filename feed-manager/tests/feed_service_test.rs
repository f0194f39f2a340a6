//! End-to-end service tests against the mock session.

use std::sync::Arc;
use std::time::Duration;

use feed_common::data::Symbol;
use feed_manager::adapter::codes;
use feed_manager::{
    ConnectionPhase, FeedService, MockSession, SessionEvent, Settings, StaticUniverse,
};

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.subscription.universe_refresh_secs = 1;
    settings.reconnect.base_delay_secs = 0;
    settings.reconnect.max_delay_secs = 0;
    settings
}

#[tokio::test]
async fn test_synthetic_feed_populates_books() {
    let universe = Arc::new(StaticUniverse::from_names(&["AAPL", "MSFT"]));
    let (session, events) = MockSession::new();
    let service = FeedService::new(session.clone(), universe, test_settings());

    let feed = session.spawn_synthetic_feed(service.shutdown_handle().subscribe());
    let runner = tokio::spawn(service.clone().start(events));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stats = service.subscription_stats().await;
    assert_eq!(stats.tape_count, 2);
    assert_eq!(stats.depth_count, 2);
    assert_eq!(stats.tick_count, 2);

    let snapshots = service.book_snapshots();
    assert_eq!(snapshots.len(), 2);
    for snapshot in &snapshots {
        assert!(snapshot.best_bid.is_some(), "book {} has no bid", snapshot.symbol);
        assert!(snapshot.best_ask.is_some(), "book {} has no ask", snapshot.symbol);
        assert!(snapshot.l1_age_ms.is_some());
        assert!(snapshot.recent_trades > 0, "no trades on {}", snapshot.symbol);
    }

    service.stop();
    runner.await.unwrap().unwrap();
    feed.await.unwrap();
}

#[tokio::test]
async fn test_tick_ceiling_and_later_promotion() {
    let universe = Arc::new(StaticUniverse::new(vec![]));
    let (session, _events) = MockSession::new();
    let mut settings = test_settings();
    settings.subscription.tick_ceiling = 2;
    let service = FeedService::new(session.clone(), universe, settings);

    service.supervisor().connect().await.unwrap();

    let (a, b, c) = (Symbol::new("A"), Symbol::new("B"), Symbol::new("C"));
    service
        .manager()
        .apply_universe(&[a.clone(), b.clone(), c.clone()], service.as_ref())
        .await;

    let record_c = service.manager().record_for(&c).await.unwrap();
    assert!(record_c.tick_channel.is_none());
    assert!(record_c.tape_channel.is_some());
    assert!(record_c.depth_channel.is_some());
    assert_eq!(service.subscription_stats().await.tick_count, 2);

    // B leaves the universe; the next pass re-evaluates priorities and C
    // inherits the freed slot
    service
        .manager()
        .apply_universe(&[a.clone(), c.clone()], service.as_ref())
        .await;

    assert!(service.manager().record_for(&b).await.is_none());
    let record_c = service.manager().record_for(&c).await.unwrap();
    assert!(record_c.tick_channel.is_some());
    assert_eq!(service.subscription_stats().await.tick_count, 2);
}

#[tokio::test]
async fn test_session_close_triggers_recovery() {
    let universe = Arc::new(StaticUniverse::from_names(&["AAPL", "MSFT"]));
    let (session, events) = MockSession::new();
    let mut settings = test_settings();
    settings.subscription.universe_refresh_secs = 300; // recovery must come from the supervisor
    let service = FeedService::new(session.clone(), universe, settings);

    let runner = tokio::spawn(service.clone().start(events));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(service.subscription_stats().await.tape_count, 2);

    session.push_event(SessionEvent::Closed).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(service.supervisor().state().phase, ConnectionPhase::Connected);
    let stats = service.subscription_stats().await;
    assert_eq!(stats.tape_count, 2, "subscriptions were not recovered");

    service.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_depth_unsupported_error_from_the_wire() {
    let universe = Arc::new(StaticUniverse::from_names(&["VXX"]));
    let (session, events) = MockSession::new();
    let service = FeedService::new(session.clone(), universe, test_settings());

    let runner = tokio::spawn(service.clone().start(events));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let symbol = Symbol::new("VXX");
    let depth_channel = service
        .manager()
        .record_for(&symbol)
        .await
        .unwrap()
        .depth_channel
        .unwrap();

    session
        .push_event(SessionEvent::Error {
            channel: depth_channel,
            code: codes::DEPTH_NOT_SUPPORTED,
            message: "deep data is not supported".to_string(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let record = service.manager().record_for(&symbol).await.unwrap();
    assert!(record.depth_channel.is_none());
    assert!(record.tape_channel.is_some());

    // Later passes must not re-request depth while the marking holds
    service
        .manager()
        .apply_universe(&[symbol.clone()], service.as_ref())
        .await;
    let record = service.manager().record_for(&symbol).await.unwrap();
    assert!(record.depth_channel.is_none());

    service.stop();
    runner.await.unwrap().unwrap();
}
