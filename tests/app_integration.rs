use pricecast::client::SessionExpiredHook;
use pricecast::core::cache::Store;
use pricecast::core::config::AppConfig;
use pricecast::core::error::ApiError;
use pricecast::dashboard::{CURRENT_PRICES_SNAPSHOT, chart_snapshot_key};
use pricecast::reconcile::Displayed;
use pricecast::session::credentials::CredentialPair;
use pricecast::store::KeyValueStore;
use pricecast::{App, AppCommand, SNAPSHOT_COLLECTION};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_utils {
    use super::*;

    pub const ME: &str = r#"{"id": 3, "email": "lee@example.com", "name": "Lee", "is_active": true}"#;

    pub const PRICES: &str = r#"[
        {"date": "2025-01-10", "grade": "특란", "wholesale_price": 5100.0, "retail_price": 6500.0,
         "unit": "30개", "daily_change": 30.0, "daily_change_pct": 0.46},
        {"date": "2025-01-10", "grade": "대란", "wholesale_price": 4800.0, "retail_price": 6200.0,
         "unit": "30개", "daily_change": -10.0, "daily_change_pct": -0.16}
    ]"#;

    pub fn history(grade: &str, rows: &[(&str, f64)]) -> serde_json::Value {
        serde_json::Value::Array(
            rows.iter()
                .enumerate()
                .map(|(i, (date, price))| {
                    serde_json::json!({
                        "id": i,
                        "date": date,
                        "grade": grade,
                        "wholesale_price": null,
                        "retail_price": price,
                        "unit": "30개",
                        "created_at": "2025-01-01T00:00:00"
                    })
                })
                .collect(),
        )
    }

    #[derive(Default)]
    pub struct CountingHook {
        pub calls: AtomicUsize,
    }

    impl SessionExpiredHook for CountingHook {
        fn on_session_expired(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn config(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.api.base_url = server.uri();
        config
    }

    pub fn app(server: &MockServer, store: &KeyValueStore) -> (App, Arc<CountingHook>) {
        let hook = Arc::new(CountingHook::default());
        let app = App::with_store(
            config(server),
            store,
            vec![Arc::clone(&hook) as Arc<dyn SessionExpiredHook>],
        );
        (app, hook)
    }

    pub async fn mount_prices(server: &MockServer, delay: Duration) {
        Mock::given(method("GET"))
            .and(path("/prices/current"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(PRICES)
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }
}

#[test_log::test(tokio::test)]
async fn test_login_command_stores_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "a1", "refresh_token": "r1", "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("Authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(test_utils::ME))
        .mount(&server)
        .await;

    let store = KeyValueStore::in_memory();
    let (app, _) = test_utils::app(&server, &store);
    pricecast::execute(
        &app,
        AppCommand::Login {
            email: "lee@example.com".to_string(),
            password: "secret".to_string(),
        },
    )
    .await
    .unwrap();

    let identity = app.session.identity().unwrap();
    assert_eq!(identity.name, "Lee");

    // A second app over the same store restores the session.
    let (restored, _) = test_utils::app(&server, &store);
    assert_eq!(restored.session.identity(), Some(identity));
    assert_eq!(
        restored.session.credentials().get(),
        Some(CredentialPair::new("a1", "r1"))
    );

    pricecast::execute(&restored, AppCommand::Logout).await.unwrap();
    let (after_logout, _) = test_utils::app(&server, &store);
    assert!(!after_logout.session.is_authenticated());
}

#[test_log::test(tokio::test)]
async fn test_warm_reload_shows_snapshot_before_refresh() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = KeyValueStore::open(temp_dir.path());
    let server = MockServer::start().await;
    test_utils::mount_prices(&server, Duration::from_millis(200)).await;

    let (first, _) = test_utils::app(&server, &store);
    let mut prices = first.dashboard.current_prices();
    assert!(prices.view().displayed.is_loading());
    let view = prices.settled().await;
    assert_eq!(view.displayed.value().unwrap().len(), 2);
    drop(prices);
    drop(first);

    let snapshots = store.get_collection(SNAPSHOT_COLLECTION, true);
    assert!(snapshots.get(CURRENT_PRICES_SNAPSHOT).is_some());

    // Fresh query cache, persisted snapshot: the old value shows at once.
    let (second, _) = test_utils::app(&server, &store);
    let mut prices = second.dashboard.current_prices();
    let view = prices.view();
    info!(?view.refreshing, "Mounted over snapshot");
    assert!(view.refreshing);
    match &view.displayed {
        Displayed::Ready {
            value,
            from_snapshot,
            ..
        } => {
            assert!(*from_snapshot);
            assert_eq!(value.len(), 2);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    let view = prices.settled().await;
    assert!(matches!(
        view.displayed,
        Displayed::Ready {
            from_snapshot: false,
            ..
        }
    ));
}

#[test_log::test(tokio::test)]
async fn test_chart_with_one_failed_grade() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices/history"))
        .and(query_param("grade", "특란"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_utils::history(
            "특란",
            &[("2025-01-09", 6450.0), ("2025-01-10", 6500.0)],
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices/history"))
        .and(query_param("grade", "대란"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = KeyValueStore::in_memory();
    let (app, _) = test_utils::app(&server, &store);
    let grades = vec!["특란".to_string(), "대란".to_string()];
    let mut chart = app.dashboard.chart_series(&grades, 30);

    let view = chart.settled().await;
    let series = view.displayed.value().unwrap();
    assert_eq!(series.series, grades);
    assert_eq!(series.points.len(), 2);
    assert_eq!(series.points[1].values, vec![Some(6500.0), None]);
    assert_eq!(view.failures.len(), 1);
    assert_eq!(
        view.failures[0].status(),
        Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
    );

    let snapshots = store.get_collection(SNAPSHOT_COLLECTION, true);
    assert!(snapshots.get(&chart_snapshot_key(&grades, 30)).is_some());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_expired_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"access_token": "renewed"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices/current"))
        .and(header("Authorization", "Bearer renewed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(test_utils::PRICES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("Authorization", "Bearer renewed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(test_utils::ME))
        .mount(&server)
        .await;

    let store = KeyValueStore::in_memory();
    let (app, hook) = test_utils::app(&server, &store);
    app.session
        .credentials()
        .set(CredentialPair::new("stale", "r1"))
        .unwrap();

    let dashboard = &app.dashboard;
    let prices_query = dashboard.current_prices_query();
    let me_query = dashboard.me_query();
    let (prices, me) = tokio::join!(
        dashboard.load(&prices_query),
        dashboard.load(&me_query),
    );
    assert_eq!(prices.unwrap().len(), 2);
    assert_eq!(me.unwrap().name, "Lee");
    assert_eq!(
        app.session.credentials().get(),
        Some(CredentialPair::new("renewed", "r1"))
    );
    assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_failed_refresh_expires_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices/current"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = KeyValueStore::in_memory();
    let (app, hook) = test_utils::app(&server, &store);
    app.session
        .login(
            CredentialPair::new("a1", "r1"),
            pricecast::session::SessionIdentity {
                id: 3,
                email: "lee@example.com".to_string(),
                name: "Lee".to_string(),
            },
        )
        .unwrap();

    let err = app
        .dashboard
        .load(&app.dashboard.current_prices_query())
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::SessionExpired);
    assert!(!app.session.is_authenticated());
    assert!(app.session.credentials().get().is_none());
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_logout_forgets_cached_queries() {
    let server = MockServer::start().await;
    test_utils::mount_prices(&server, Duration::ZERO).await;

    let store = KeyValueStore::in_memory();
    let (app, _) = test_utils::app(&server, &store);
    app.session
        .credentials()
        .set(CredentialPair::new("a1", "r1"))
        .unwrap();

    let descriptor = app.dashboard.current_prices_query();
    app.dashboard.load(&descriptor).await.unwrap();
    assert!(
        app.dashboard
            .queries()
            .cached::<Vec<pricecast::core::models::PriceWithChange>>(descriptor.key())
            .is_some()
    );

    app.logout();
    assert!(
        app.dashboard
            .queries()
            .cached::<Vec<pricecast::core::models::PriceWithChange>>(descriptor.key())
            .is_none()
    );
}

#[test_log::test(tokio::test)]
async fn test_offline_cold_start_keeps_snapshot() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = KeyValueStore::open(temp_dir.path());

    let mut config = AppConfig::default();
    config.api.base_url = "http://127.0.0.1:9/api/v1".to_string();

    // A previous run left a snapshot behind.
    let snapshots = pricecast::reconcile::snapshot::SnapshotCache::new(
        store.get_collection(SNAPSHOT_COLLECTION, true),
    );
    let previous: Vec<pricecast::core::models::PriceWithChange> =
        serde_json::from_str(test_utils::PRICES).unwrap();
    snapshots.write(CURRENT_PRICES_SNAPSHOT, &previous).unwrap();

    let app = App::with_store(config, &store, Vec::new());
    let mut prices = app.dashboard.current_prices();
    let mounted = prices.view();
    assert!(mounted.displayed.value().is_some());

    let view = prices.settled().await;
    assert_eq!(view.displayed.value().unwrap().as_ref(), &previous);
    assert!(matches!(view.error, Some(ApiError::MergeEmpty { .. })));
    assert!(matches!(view.failures.as_slice(), [ApiError::Network(_)]));
}
