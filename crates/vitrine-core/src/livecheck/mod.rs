//! Object readiness probes
//!
//! A probe answers `Ready` or `Retry`; an `Err` is fatal and aborts
//! provisioning. Polling is owned by [`poll`], not by the probes.

pub mod exec;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use vitrine_common::model::{Exhibit, LivecheckKind, Object};
use vitrine_common::{Context, Result, VitrineError, parse_duration};

pub use exec::ExecLivecheck;
pub use http::HttpLivecheck;

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    Ready,
    Retry,
}

#[async_trait]
pub trait Livecheck: Send + Sync {
    async fn check(&self, ctx: &Context, exhibit: &Exhibit, object: &Object) -> Result<CheckOutcome>;
}

/// Probe implementations keyed by livecheck kind
#[derive(Clone)]
pub struct Livechecks {
    http: Arc<dyn Livecheck>,
    exec: Arc<dyn Livecheck>,
}

impl Livechecks {
    pub fn new(http: Arc<dyn Livecheck>, exec: Arc<dyn Livecheck>) -> Self {
        Self { http, exec }
    }

    pub fn for_kind(&self, kind: LivecheckKind) -> &Arc<dyn Livecheck> {
        match kind {
            LivecheckKind::Http => &self.http,
            LivecheckKind::Exec => &self.exec,
        }
    }
}

/// Attempt budget read from the object's livecheck config
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl PollPolicy {
    pub fn from_object(object: &Object) -> Result<Self> {
        let mut policy = Self::default();
        let Some(livecheck) = &object.livecheck else {
            return Ok(policy);
        };

        if let Some(raw) = livecheck.config_value("maxRetries") {
            policy.max_retries = raw.parse().map_err(|_| {
                VitrineError::Fatal(format!(
                    "livecheck maxRetries '{}' of object '{}' is not an integer",
                    raw, object.name
                ))
            })?;
        }
        if let Some(raw) = livecheck.config_value("interval") {
            policy.interval = parse_duration(raw).map_err(|e| {
                VitrineError::Fatal(format!(
                    "livecheck interval of object '{}': {}",
                    object.name, e
                ))
            })?;
        }

        Ok(policy)
    }
}

/// Poll `object`'s livecheck until ready, out of attempts, or `timeout`
pub async fn poll(
    ctx: &Context,
    livechecks: &Livechecks,
    exhibit: &Exhibit,
    object: &Object,
    timeout: Duration,
) -> Result<()> {
    let Some(livecheck) = &object.livecheck else {
        return Ok(());
    };
    let policy = PollPolicy::from_object(object)?;
    let probe = livechecks.for_kind(livecheck.kind).clone();

    let attempts = async {
        for attempt in 1..=policy.max_retries {
            match probe.check(ctx, exhibit, object).await? {
                CheckOutcome::Ready => {
                    info!(exhibit_id = %exhibit.id, object = %object.name, attempt, "livecheck passed");
                    return Ok(());
                }
                CheckOutcome::Retry => {
                    debug!(exhibit_id = %exhibit.id, object = %object.name, attempt, "livecheck not ready");
                }
            }
            if attempt < policy.max_retries {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(VitrineError::Timeout(format!(
            "livecheck of object '{}' did not pass after {} attempts",
            object.name, policy.max_retries
        )))
    };

    ctx.run(async {
        tokio::time::timeout(timeout, attempts)
            .await
            .map_err(|_| {
                VitrineError::Timeout(format!(
                    "livecheck of object '{}' exceeded {:?}",
                    object.name, timeout
                ))
            })?
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use vitrine_common::model::Livecheck as LivecheckConfig;

    /// Answers `Retry` until the configured attempt, then `Ready`
    struct Scripted {
        ready_at: usize,
        calls: AtomicUsize,
        fatal: bool,
    }

    impl Scripted {
        fn new(ready_at: usize) -> Arc<Self> {
            Arc::new(Self {
                ready_at,
                calls: AtomicUsize::new(0),
                fatal: false,
            })
        }
    }

    #[async_trait]
    impl Livecheck for Scripted {
        async fn check(&self, _: &Context, _: &Exhibit, _: &Object) -> Result<CheckOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fatal {
                return Err(VitrineError::Fatal("bad config".into()));
            }
            Ok(if call >= self.ready_at {
                CheckOutcome::Ready
            } else {
                CheckOutcome::Retry
            })
        }
    }

    fn object(config: &[(&str, &str)]) -> Object {
        Object {
            name: "web".to_string(),
            image: "nginx".to_string(),
            livecheck: Some(LivecheckConfig {
                kind: LivecheckKind::Http,
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            }),
            ..Default::default()
        }
    }

    fn livechecks(probe: Arc<Scripted>) -> Livechecks {
        Livechecks::new(probe.clone(), probe)
    }

    #[test]
    fn test_policy_defaults_and_overrides() {
        assert_eq!(PollPolicy::from_object(&object(&[])).unwrap(), PollPolicy::default());

        let policy = PollPolicy::from_object(&object(&[("maxRetries", "3"), ("interval", "250ms")]))
            .unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.interval, Duration::from_millis(250));

        assert!(PollPolicy::from_object(&object(&[("maxRetries", "many")])).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retries_until_ready() {
        let probe = Scripted::new(3);
        let result = poll(
            &Context::new(),
            &livechecks(probe.clone()),
            &Exhibit::default(),
            &object(&[]),
            Duration::from_secs(60),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhausts_budget() {
        let probe = Scripted::new(usize::MAX);
        let result = poll(
            &Context::new(),
            &livechecks(probe.clone()),
            &Exhibit::default(),
            &object(&[("maxRetries", "4")]),
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(VitrineError::Timeout(_))));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_bounded_by_timeout() {
        let probe = Scripted::new(usize::MAX);
        let result = poll(
            &Context::new(),
            &livechecks(probe.clone()),
            &Exhibit::default(),
            &object(&[("maxRetries", "1000"), ("interval", "1s")]),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(VitrineError::Timeout(_))));
        assert!(probe.calls.load(Ordering::SeqCst) <= 6);
    }

    #[tokio::test]
    async fn test_fatal_aborts_immediately() {
        let probe = Arc::new(Scripted {
            ready_at: 1,
            calls: AtomicUsize::new(0),
            fatal: true,
        });
        let result = poll(
            &Context::new(),
            &livechecks(probe.clone()),
            &Exhibit::default(),
            &object(&[]),
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(VitrineError::Fatal(_))));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_object_without_livecheck_is_ready() {
        let probe = Scripted::new(usize::MAX);
        let plain = Object {
            name: "db".to_string(),
            ..Default::default()
        };
        poll(
            &Context::new(),
            &livechecks(probe.clone()),
            &Exhibit::default(),
            &plain,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }
}
