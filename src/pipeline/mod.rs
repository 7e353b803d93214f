//! Check execution.
//!
//! - `CheckCycle`: one fetch → extract → compare → persist → notify run
//! - `Scheduler`: fires cycles on each checker's cadence, skip-if-busy
//! - `CycleStats`: per-checker counters

pub mod check;
pub mod scheduler;
pub mod stats;

pub use check::{CheckCycle, CycleFailure, CycleOutcome};
pub use scheduler::{Scheduler, Trigger, join_cycle};
pub use stats::{CheckerStats, CycleStats, FailureKind, StatsSnapshot};

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fakes for the cycle's collaborators.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use crate::error::{FetchError, NotifyError, StoreError};
    use crate::models::{
        Cadence, CheckSchedule, CheckState, CheckerDefinition, NotificationTarget,
    };
    use crate::services::{CssSelector, Fetch, FetchRequest, Notifier, RawResponse};
    use crate::storage::{MemoryStore, StateStore};

    pub fn checker(name: &str) -> CheckerDefinition {
        CheckerDefinition {
            name: name.to_string(),
            url: Url::parse(&format!("https://shop.test/{name}")).unwrap(),
            selector: Arc::new(CssSelector::new("#value", None).unwrap()),
            title_selector: None,
            max_redirects: 10,
            rate_limit_group: "shop.test".into(),
            notification_target: NotificationTarget {
                bot_token: "123:abc".into(),
                chat_id: "42".into(),
            },
            schedule: CheckSchedule {
                cadence: Cadence::parse("*/10 * * * * *", "UTC").unwrap(),
                enabled: true,
            },
            headers: Default::default(),
        }
    }

    pub fn page(value: &str) -> String {
        format!(r#"<html><body><span id="value">{value}</span></body></html>"#)
    }

    /// Serves canned bodies per URL, optionally after a delay.
    #[derive(Default)]
    pub struct FakeFetch {
        responses: Mutex<HashMap<String, Result<(Vec<u8>, Option<String>), FetchError>>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeFetch {
        pub fn respond(&self, url: &Url, response: Result<String, FetchError>) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), response.map(|body| (body.into_bytes(), None)));
        }

        /// Serve raw bytes with the given Content-Type charset.
        pub fn respond_bytes(&self, url: &Url, body: Vec<u8>, charset: Option<&str>) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), Ok((body, charset.map(str::to_string))));
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn max_active(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for FakeFetch {
        async fn fetch(&self, request: &FetchRequest<'_>) -> Result<RawResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let url = request.url.to_string();
            let response = self.responses.lock().unwrap().get(&url).cloned();
            match response {
                Some(Ok((body, charset))) => Ok(RawResponse {
                    status: 200,
                    url,
                    body,
                    charset,
                }),
                Some(Err(e)) => Err(e),
                None => Err(FetchError::Status { status: 404, url }),
            }
        }
    }

    /// Records delivered messages; can be told to fail.
    #[derive(Default)]
    pub struct FakeNotifier {
        sent: Mutex<Vec<String>>,
        failing: AtomicBool,
    }

    impl FakeNotifier {
        pub fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, _: &NotificationTarget, message: &str) -> Result<(), NotifyError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Rejected {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    /// Memory store with switchable read/write failures.
    pub struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        writes: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            }
        }

        pub fn fail_reads(&self, failing: bool) {
            self.fail_reads.store(failing, Ordering::SeqCst);
        }

        pub fn fail_writes(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }

        /// Successful writes so far.
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn read(&self, name: &str) -> Result<Option<CheckState>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("read refused".into()));
            }
            self.inner.read(name).await
        }

        async fn write(&self, name: &str, state: &CheckState) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("write refused".into()));
            }
            self.inner.write(name, state).await?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
