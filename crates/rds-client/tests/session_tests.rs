use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rds_client::{RdsConfig, RdsSession};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn config(base_url: String) -> RdsConfig {
    RdsConfig {
        base_url,
        username: "bridge".to_string(),
        password: "secret".to_string(),
        language: "en".to_string(),
        request_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn login_extracts_token_from_set_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "JSESSIONID=abc123; Path=/")
                .append_header("Set-Cookie", "OTHER=unused; Path=/"),
        )
        .mount(&server)
        .await;

    let session = RdsSession::new(config(server.uri())).unwrap();
    session.login().await.expect("login should succeed");
}

#[tokio::test]
async fn empty_body_decodes_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(ResponseTemplate::new(200).append_header("Set-Cookie", "JSESSIONID=abc123"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/work-sites/worksiteUnFiled"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let session = RdsSession::new(config(server.uri())).unwrap();
    let result = session.set_work_site_empty("PICK-01").await.expect("call ok");
    assert!(result.is_none());
}

struct CountingResponder {
    calls: Arc<AtomicUsize>,
    fail_status: u16,
    always_fail: bool,
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || call_index == 0 {
            ResponseTemplate::new(self.fail_status)
        } else {
            ResponseTemplate::new(200).set_body_string("")
        }
    }
}

#[tokio::test]
async fn session_expiry_triggers_one_relogin_and_retry() {
    let server = MockServer::start().await;
    let login_calls = Arc::new(AtomicUsize::new(0));
    let login_calls_clone = login_calls.clone();
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(move |_: &Request| {
            login_calls_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).append_header("Set-Cookie", "JSESSIONID=tok; Path=/")
        })
        .mount(&server)
        .await;

    let work_site_calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/api/work-sites/worksiteUnFiled"))
        .respond_with(CountingResponder {
            calls: work_site_calls.clone(),
            fail_status: 401,
            always_fail: false,
        })
        .mount(&server)
        .await;

    let session = RdsSession::new(config(server.uri())).unwrap();
    // Prime the session so the first work-site call already has a token and
    // the 401 is purely a mid-cycle expiry, not the "no token yet" path.
    session.login().await.expect("initial login");

    let result = session
        .set_work_site_empty("PICK-01")
        .await
        .expect("call should succeed after one retry");
    assert!(result.is_none());
    assert_eq!(work_site_calls.load(Ordering::SeqCst), 2);
    assert_eq!(login_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_consecutive_401_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(ResponseTemplate::new(200).append_header("Set-Cookie", "JSESSIONID=tok; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/work-sites/worksiteUnFiled"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = RdsSession::new(config(server.uri())).unwrap();
    let err = session
        .set_work_site_empty("PICK-01")
        .await
        .expect_err("a second consecutive 401 must propagate as an error");
    match err {
        rds_client::RdsError::RequestFailed { status, .. } => assert_eq!(status, 401),
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn status_400_does_not_trigger_relogin() {
    let server = MockServer::start().await;
    let login_calls = Arc::new(AtomicUsize::new(0));
    let login_calls_clone = login_calls.clone();
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(move |_: &Request| {
            login_calls_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).append_header("Set-Cookie", "JSESSIONID=tok; Path=/")
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/work-sites/worksiteUnFiled"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let session = RdsSession::new(config(server.uri())).unwrap();
    let err = session
        .set_work_site_empty("PICK-01")
        .await
        .expect_err("400 should propagate without retry");
    match err {
        rds_client::RdsError::RequestFailed { status, .. } => assert_eq!(status, 400),
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    // Exactly one login: the initial "no token yet" login. 400 must never
    // arm a second login attempt.
    assert_eq!(login_calls.load(Ordering::SeqCst), 1);
}
