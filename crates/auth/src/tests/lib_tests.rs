use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

struct TestAcquirer {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    fail_with: Option<String>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl TestAcquirer {
    fn ok(token: &str) -> Self {
        Self {
            token: token.to_string(),
            expires_at: None,
            fail_with: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(reason: &str) -> Self {
        let mut acquirer = Self::ok("");
        acquirer.fail_with = Some(reason.to_string());
        acquirer
    }

    fn expiring(token: &str, expires_at: DateTime<Utc>) -> Self {
        let mut acquirer = Self::ok(token);
        acquirer.expires_at = Some(expires_at);
        acquirer
    }

    fn gated(token: &str, gate: Arc<Notify>) -> Self {
        let mut acquirer = Self::ok(token);
        acquirer.gate = Some(gate);
        acquirer
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenAcquirer for TestAcquirer {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(AuthError::Transport(reason.clone()));
        }
        match self.expires_at {
            Some(expires_at) => Ok(Credential::with_expiry(self.token.clone(), expires_at)),
            None => Ok(Credential::new(self.token.clone())),
        }
    }
}

#[tokio::test]
async fn cached_token_is_reused() {
    let acquirer = Arc::new(TestAcquirer::ok("tok-1"));
    let provider = CredentialProvider::new(acquirer.clone());

    let first = provider.get_token().await.expect("first token");
    let second = provider.get_token().await.expect("second token");

    assert_eq!(first.token(), "tok-1");
    assert_eq!(second.token(), "tok-1");
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_acquisition() {
    let gate = Arc::new(Notify::new());
    let acquirer = Arc::new(TestAcquirer::gated("tok-1", gate.clone()));
    let provider = CredentialProvider::new(acquirer.clone());

    let first = tokio::spawn({
        let provider = provider.clone();
        async move { provider.get_token().await }
    });
    while acquirer.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let second = tokio::spawn({
        let provider = provider.clone();
        async move { provider.get_token().await }
    });
    tokio::task::yield_now().await;
    gate.notify_one();

    let first = first.await.expect("join first").expect("first token");
    let second = second.await.expect("join second").expect("second token");
    assert_eq!(first.token(), "tok-1");
    assert_eq!(second.token(), "tok-1");
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn expired_token_is_replaced() {
    let acquirer = Arc::new(TestAcquirer::expiring(
        "tok-short",
        Utc::now() + Duration::seconds(5),
    ));
    let provider = CredentialProvider::new(acquirer.clone());

    provider.get_token().await.expect("first token");
    provider.get_token().await.expect("second token");

    assert_eq!(acquirer.calls(), 2);
}

#[test]
fn refresh_skew_counts_soon_to_expire_tokens_as_dead() {
    let soon = Credential::with_expiry("tok", Utc::now() + Duration::seconds(30));
    let later = Credential::with_expiry("tok", Utc::now() + Duration::seconds(600));

    assert!(soon.is_expired(Utc::now()));
    assert!(!later.is_expired(Utc::now()));
}

#[tokio::test]
async fn failed_acquisition_caches_nothing() {
    let acquirer = Arc::new(TestAcquirer::failing("proxy down"));
    let provider = CredentialProvider::new(acquirer.clone());

    let first = provider.get_token().await;
    let second = provider.get_token().await;

    assert!(matches!(first, Err(AuthError::Transport(_))));
    assert!(matches!(second, Err(AuthError::Transport(_))));
    assert_eq!(acquirer.calls(), 2);
}

#[tokio::test]
async fn providers_share_the_session_store() {
    let store = SessionTokenStore::new();
    let acquirer = Arc::new(TestAcquirer::ok("tok-shared"));
    let first = CredentialProvider::with_store(acquirer.clone(), store.clone());
    let second = CredentialProvider::with_store(acquirer.clone(), store);

    first.get_token().await.expect("first token");
    let token = second.get_token().await.expect("second token");

    assert_eq!(token.token(), "tok-shared");
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test]
async fn invalidate_forces_reacquisition() {
    let acquirer = Arc::new(TestAcquirer::ok("tok-1"));
    let provider = CredentialProvider::new(acquirer.clone());

    provider.get_token().await.expect("first token");
    provider.invalidate().await;
    provider.get_token().await.expect("second token");

    assert_eq!(acquirer.calls(), 2);
}

#[tokio::test]
async fn missing_acquirer_fails_soft() {
    let provider = CredentialProvider::new(Arc::new(MissingTokenAcquirer));

    assert!(matches!(
        provider.get_token().await,
        Err(AuthError::Unavailable)
    ));
}

#[test]
fn debug_output_redacts_the_token() {
    let credential = Credential::new("super-secret");
    let rendered = format!("{credential:?}");

    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("redacted"));
}
