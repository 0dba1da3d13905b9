//! Integration tests for the authenticated client

use authfetch_client::{
    AuthClient, AuthStatus, CancellationToken, ClientConfig, ClientError, CredentialMode,
    Credentials, KeyValueStore, MemoryStore, ProductQuery, RequestDescriptor,
    Result as ClientResult,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STORAGE_KEY: &str = "login_info";

fn client_with_store(server: &MockServer, store: Arc<MemoryStore>) -> AuthClient {
    AuthClient::builder()
        .config(ClientConfig {
            base_url: server.uri(),
            ..ClientConfig::default()
        })
        .store(store)
        .build()
        .unwrap()
}

fn seeded_store(creds: &Credentials) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .set(STORAGE_KEY, &serde_json::to_string(creds).unwrap())
        .unwrap();
    store
}

fn stored(store: &MemoryStore) -> Option<Credentials> {
    store
        .get(STORAGE_KEY)
        .map(|s| serde_json::from_str(&s).unwrap())
}

fn old_credentials() -> Credentials {
    let mut creds = Credentials::new("old-access", "old-refresh");
    creds.extra.insert("username".into(), json!("emilys"));
    creds
}

async fn mount_refresh(server: &MockServer, template: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({
            "refreshToken": "old-refresh",
            "expiresInMins": 30
        })))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

fn new_tokens() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "accessToken": "new-access",
        "refreshToken": "new-refresh"
    }))
}

/// Store whose writes block the calling thread, like a slow disk
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl KeyValueStore for SlowStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        std::thread::sleep(self.delay);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.inner.remove(key)
    }
}

async fn refresh_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count()
}

#[tokio::test]
async fn test_successful_request_returns_json() {
    let server = MockServer::start().await;
    let body = json!({"id": 1, "items": [1, 2, 3], "nested": {"ok": true}});

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("content-type", "application/json"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));
    let result = client.execute(&RequestDescriptor::get("/data")).await.unwrap();

    assert_eq!(result, body);
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"retried": true})))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens(), 1).await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store.clone());

    let result = client.execute(&RequestDescriptor::get("/data")).await.unwrap();
    assert_eq!(result, json!({"retried": true}));

    let mut expected = Credentials::new("new-access", "new-refresh");
    expected.extra.insert("username".into(), json!("emilys"));
    assert_eq!(stored(&store), Some(expected.clone()));
    assert_eq!(client.session().credentials(), Some(expected));
    assert!(!client.session().is_refreshing());

    server.verify().await;
}

#[tokio::test]
async fn test_retry_replaces_caller_authorization() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer caller-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1})))
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens(), 1).await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));
    let request = RequestDescriptor::get("/data").header("Authorization", "Bearer caller-token");

    let result = client.execute(&request).await.unwrap();
    assert_eq!(result, json!({"ok": 1}));
}

#[tokio::test]
async fn test_concurrent_unauthorized_share_one_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 42})))
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens().set_delay(Duration::from_millis(500)), 1).await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));
    let request = RequestDescriptor::get("/data");

    let results = futures::future::join_all((0..8).map(|_| client.execute(&request))).await;

    for result in results {
        assert_eq!(result.unwrap(), json!({"n": 42}));
    }
    assert_eq!(refresh_calls(&server).await, 1);
    server.verify().await;
}

#[tokio::test]
async fn test_concurrent_callers_share_refresh_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(403).set_delay(Duration::from_millis(500)),
        1,
    )
    .await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));
    let request = RequestDescriptor::get("/data");

    let results = futures::future::join_all((0..5).map(|_| client.execute(&request))).await;

    for result in results {
        assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
    }
    assert_eq!(refresh_calls(&server).await, 1);
}

#[tokio::test]
async fn test_refresh_failure_leaves_credentials_unchanged() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(401), 2).await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store.clone());

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert!(err.is_auth_expired());
    assert_eq!(stored(&store), Some(old_credentials()));
    assert_eq!(client.session().credentials(), Some(old_credentials()));
    assert!(!client.session().is_refreshing());

    // The failed refresh does not block a later attempt
    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));

    server.verify().await;
}

#[tokio::test]
async fn test_malformed_refresh_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"accessToken": "only-access"})),
        1,
    )
    .await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store.clone());

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert_eq!(stored(&store), Some(old_credentials()));
}

#[tokio::test]
async fn test_failed_retry_does_not_refresh_again() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens(), 1).await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RetryFailed { status: 401 }));

    server.verify().await;
}

#[tokio::test]
async fn test_unauthorized_without_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client_with_store(&server, Arc::new(MemoryStore::new()));

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert_eq!(refresh_calls(&server).await, 0);
}

#[tokio::test]
async fn test_non_unauthorized_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    match err {
        ClientError::RequestFailed { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(refresh_calls(&server).await, 0);
}

#[tokio::test]
async fn test_non_json_body_is_serialization_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = client_with_store(&server, Arc::new(MemoryStore::new()));

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Serialization(_)));
}

#[tokio::test]
async fn test_post_body_and_caller_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/items"))
        .and(header("x-request-id", "abc"))
        .and(body_json(json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9})))
        .mount(&server)
        .await;

    let client = client_with_store(&server, Arc::new(MemoryStore::new()));
    let request = RequestDescriptor::post("/items")
        .header("X-Request-Id", "abc")
        .json(&json!({"name": "widget"}))
        .unwrap();

    assert_eq!(client.execute(&request).await.unwrap(), json!({"id": 9}));
}

#[tokio::test]
async fn test_network_error() {
    let client = AuthClient::builder()
        .base_url("http://127.0.0.1:1")
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap();

    let err = client
        .execute(&RequestDescriptor::get("/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
}

#[tokio::test]
async fn test_sub_second_timeout_is_honoured() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = AuthClient::builder()
        .base_url(server.uri())
        .timeout(Duration::from_millis(300))
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = client
        .execute(&RequestDescriptor::get("/slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn test_cancelled_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = client_with_store(&server, Arc::new(MemoryStore::new()));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client
        .execute_with_cancel(&RequestDescriptor::get("/slow"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
}

#[tokio::test]
async fn test_login_persists_credentials_and_cookies() {
    let server = MockServer::start().await;

    let login_body = json!({
        "id": 1,
        "username": "emilys",
        "accessToken": "login-access",
        "refreshToken": "login-refresh"
    });
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({
            "username": "emilys",
            "password": "emilyspass",
            "expiresInMins": 30
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&login_body)
                .insert_header("set-cookie", "accessToken=cookie-token; Path=/; HttpOnly"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer login-access"))
        .and(header("cookie", "accessToken=cookie-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "emilys"})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = client_with_store(&server, store.clone());
    let mut status = client.session().subscribe();

    let creds = client.login("emilys", "emilyspass").await.unwrap();
    assert_eq!(creds.access_token, "login-access");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&store.get(STORAGE_KEY).unwrap()).unwrap(),
        login_body
    );
    assert_eq!(*status.borrow_and_update(), AuthStatus::Authenticated);
    assert_eq!(client.session().cookies().len(), 1);

    let me = client.current_user().await.unwrap();
    assert_eq!(me["username"], "emilys");
}

#[tokio::test]
async fn test_login_rejection_does_not_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid credentials"))
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens(), 0).await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store);

    let err = client.login("emilys", "wrong").await.unwrap_err();
    assert!(matches!(err, ClientError::RequestFailed { status: 401, .. }));

    server.verify().await;
}

#[tokio::test]
async fn test_credential_mode_controls_cookies() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": "a", "refreshToken": "r"}))
                .insert_header("set-cookie", "sid=1; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(418))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cookies": false})))
        .mount(&server)
        .await;

    let client = client_with_store(&server, Arc::new(MemoryStore::new()));
    client.login("u", "p").await.unwrap();

    let omit = RequestDescriptor::get("/data").credentials(CredentialMode::Omit);
    assert_eq!(client.execute(&omit).await.unwrap(), json!({"cookies": false}));

    let include = RequestDescriptor::get("/data").credentials(CredentialMode::Include);
    let err = client.execute(&include).await.unwrap_err();
    assert_eq!(err.status(), Some(418));

    // Same origin as the base URL, so the default mode sends cookies too
    let default = RequestDescriptor::get("/data");
    assert_eq!(client.execute(&default).await.unwrap_err().status(), Some(418));
}

#[tokio::test]
async fn test_logout_clears_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": "a", "refreshToken": "r"}))
                .insert_header("set-cookie", "sid=1"),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = client_with_store(&server, store.clone());
    client.login("u", "p").await.unwrap();
    let status = client.session().subscribe();

    client.logout().unwrap();

    assert_eq!(store.get(STORAGE_KEY), None);
    assert_eq!(client.session().credentials(), None);
    assert_eq!(client.session().is_authenticated(), None);
    assert!(client.session().cookies().is_empty());
    assert_eq!(*status.borrow(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn test_refresh_finishing_after_logout_is_discarded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens().set_delay(Duration::from_millis(500)), 1).await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store.clone());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(&RequestDescriptor::get("/data")).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    client.logout().unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert_eq!(client.session().credentials(), None);
    assert_eq!(store.get(STORAGE_KEY), None);
}

#[tokio::test]
async fn test_products_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/products"))
        .and(query_param("limit", "10"))
        .and(query_param("skip", "20"))
        .and(query_param("select", "title,price,thumbnail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "products": [
                {"id": 21, "title": "Lamp", "price": 19.5, "thumbnail": "https://cdn/21.png"}
            ],
            "total": 194,
            "skip": 20,
            "limit": 10
        })))
        .mount(&server)
        .await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));
    let page = client
        .products(ProductQuery { page: 2, limit: 10 })
        .await
        .unwrap();

    assert_eq!(page.skip, 20);
    assert_eq!(page.products.len(), 1);
    assert_eq!(page.products[0].title, "Lamp");
}

#[tokio::test]
async fn test_cancelled_caller_does_not_abandon_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens().set_delay(Duration::from_millis(300)), 1).await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = client
        .execute_with_cancel(&RequestDescriptor::get("/data"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert!(client.session().is_refreshing());

    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(!client.session().is_refreshing());
    assert_eq!(stored(&store).unwrap().access_token, "new-access");
    assert_eq!(
        client.session().credentials().unwrap().refresh_token,
        "new-refresh"
    );
    server.verify().await;
}

#[tokio::test]
async fn test_session_token_stays_on_base_origin() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(418))
        .with_priority(1)
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"foreign": true})))
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&other)
        .await;
    Mock::given(method("GET"))
        .and(path("/own-token"))
        .and(header("authorization", "Bearer caller-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"own": true})))
        .mount(&other)
        .await;
    mount_refresh(&server, new_tokens(), 0).await;

    let client = client_with_store(&server, seeded_store(&old_credentials()));

    let result = client
        .execute(&RequestDescriptor::get(format!("{}/data", other.uri())))
        .await
        .unwrap();
    assert_eq!(result, json!({"foreign": true}));

    // A 401 from another origin says nothing about our session
    let err = client
        .execute(&RequestDescriptor::get(format!("{}/private", other.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestFailed { status: 401, .. }));

    // Caller-supplied authorization still goes through
    let own = RequestDescriptor::get(format!("{}/own-token", other.uri()))
        .header("Authorization", "Bearer caller-token");
    assert_eq!(client.execute(&own).await.unwrap(), json!({"own": true}));

    let leaked = other
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() != "/own-token")
        .any(|r| r.headers.contains_key("authorization"));
    assert!(!leaked);
    server.verify().await;
}

#[tokio::test]
async fn test_new_credentials_drop_in_flight_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, new_tokens().set_delay(Duration::from_millis(500)), 1).await;

    let store = seeded_store(&old_credentials());
    let client = client_with_store(&server, store.clone());

    let pending = {
        let session = client.session().clone();
        tokio::spawn(async move { session.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.session().is_refreshing());

    client
        .session()
        .set_credentials(Credentials::new("fresh-access", "fresh-refresh"))
        .unwrap();
    assert!(!client.session().is_refreshing());

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert_eq!(stored(&store).unwrap().access_token, "fresh-access");
    assert_eq!(
        client.session().credentials().unwrap().access_token,
        "fresh-access"
    );
}

#[tokio::test]
async fn test_refresh_storage_write_does_not_stall_runtime() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    mount_refresh(&server, new_tokens(), 1).await;

    let inner = MemoryStore::new();
    inner
        .set(STORAGE_KEY, &serde_json::to_string(&old_credentials()).unwrap())
        .unwrap();
    let store = Arc::new(SlowStore {
        inner,
        delay: Duration::from_millis(400),
    });
    let client = AuthClient::builder()
        .config(ClientConfig {
            base_url: server.uri(),
            ..ClientConfig::default()
        })
        .store(store.clone())
        .build()
        .unwrap();

    let started = Instant::now();
    let req = RequestDescriptor::get("/data");
    let (result, ticked) = tokio::join!(client.execute(&req), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        started.elapsed()
    });

    assert_eq!(result.unwrap(), json!({"ok": true}));
    assert!(ticked < Duration::from_millis(300), "timer stalled for {ticked:?}");
    assert!(store.inner.get(STORAGE_KEY).unwrap().contains("new-access"));
}
