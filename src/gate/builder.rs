use crate::gate::{AdmissionGate, DeniedDetails};
use crate::policy::Classifier;
use actix_web::dev::ServiceRequest;
use actix_web::http::header::HeaderName;
use once_cell::sync::Lazy;
use std::rc::Rc;
use std::time::Duration;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

const DEFAULT_DENIED_DETAILS: &str = "You have made too many requests. Please try again later.";

pub struct AdmissionGateBuilder<B> {
    classifier: Classifier,
    backend: Option<B>,
    check_timeout: Duration,
    trust_proxy: bool,
    annotate_allowed: bool,
    denied_details: Rc<DeniedDetails>,
}

impl<B> AdmissionGateBuilder<B> {
    pub(super) fn new(backend: Option<B>) -> Self {
        Self {
            classifier: Classifier::default(),
            backend,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            trust_proxy: false,
            annotate_allowed: true,
            denied_details: Rc::new(|_| DEFAULT_DENIED_DETAILS.to_string()),
        }
    }

    /// Override the default [Classifier].
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Bound on the round-trip to the quota tracker.
    ///
    /// A check that exceeds this is treated exactly like an unreachable
    /// tracker: the request is allowed and the timeout logged, never retried.
    ///
    /// Default is 1 second.
    pub fn check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Key quotas by the proxy-reported client IP instead of the connection
    /// peer.
    ///
    /// # Security
    ///
    /// This uses
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr)
    /// internally which is only suitable for applications deployed behind a
    /// proxy that you control.
    pub fn trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// Whether allowed responses also carry the `x-ratelimit-*` status
    /// headers.
    ///
    /// Default is true. Denied responses always carry them.
    pub fn annotate_allowed(mut self, annotate_allowed: bool) -> Self {
        self.annotate_allowed = annotate_allowed;
        self
    }

    /// Supply the user-facing message carried in the deny body, e.g. picked
    /// per request from the `Accept-Language` header.
    ///
    /// Defaults to an English message.
    pub fn denied_details<D>(mut self, denied_details: D) -> Self
    where
        D: Fn(&ServiceRequest) -> String + 'static,
    {
        self.denied_details = Rc::new(denied_details);
        self
    }

    pub fn build(self) -> AdmissionGate<B> {
        AdmissionGate {
            classifier: self.classifier,
            backend: self.backend,
            check_timeout: self.check_timeout,
            trust_proxy: self.trust_proxy,
            annotate_allowed: self.annotate_allowed,
            denied_details: self.denied_details,
        }
    }
}
