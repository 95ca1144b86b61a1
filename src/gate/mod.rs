pub mod builder;

use crate::backend::{Backend, SlidingWindowInput, SlidingWindowOutput};
use crate::pipeline::{ResponseMutation, Stage, StageOutcome};
use crate::policy::Classifier;
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderValue, RETRY_AFTER};
use actix_web::HttpResponse;
use async_trait::async_trait;
use builder::{
    AdmissionGateBuilder, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
use serde::Serialize;
use std::fmt::Display;
use std::net::{AddrParseError, IpAddr, Ipv6Addr};
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;

type DeniedDetails = dyn Fn(&ServiceRequest) -> String;

/// Admission-control stage: classifies each request into a traffic class and
/// consults the quota tracker for the class's sliding window.
///
/// The gate holds no quota state of its own. If the tracker errors out or
/// exceeds the check timeout the request is allowed and the failure logged
/// (fail-open); a gate built without a backend allows everything.
pub struct AdmissionGate<B> {
    classifier: Classifier,
    backend: Option<B>,
    check_timeout: Duration,
    trust_proxy: bool,
    annotate_allowed: bool,
    denied_details: Rc<DeniedDetails>,
}

#[derive(Serialize)]
struct DenyBody<'a> {
    error: &'a str,
    details: &'a str,
}

impl<B> AdmissionGate<B>
where
    B: Backend + 'static,
    B::Error: Display,
{
    /// # Arguments
    ///
    /// * `backend`: The quota tracker, or [None] when no tracker is
    ///   configured, in which case the gate allows every request.
    pub fn builder(backend: Option<B>) -> AdmissionGateBuilder<B> {
        AdmissionGateBuilder::new(backend)
    }

    fn client_identity(&self, req: &ServiceRequest) -> Result<String, IdentityError> {
        let info = req.connection_info();
        let addr = if self.trust_proxy {
            info.realip_remote_addr()
        } else {
            info.peer_addr()
        };
        ip_key(addr.ok_or(IdentityError::Unknown)?)
    }

    fn denied_response(
        &self,
        req: &ServiceRequest,
        output: &SlidingWindowOutput,
    ) -> HttpResponse {
        let details = (self.denied_details)(req);
        let mut response = HttpResponse::TooManyRequests().json(DenyBody {
            error: "Too Many Requests",
            details: &details,
        });
        let map = response.headers_mut();
        map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(output.limit));
        map.insert(
            X_RATELIMIT_REMAINING.clone(),
            HeaderValue::from(output.remaining),
        );
        let seconds = output.seconds_until_reset();
        map.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(seconds));
        map.insert(RETRY_AFTER, HeaderValue::from(seconds));
        response
    }
}

#[async_trait(?Send)]
impl<B> Stage for AdmissionGate<B>
where
    B: Backend + 'static,
    B::Error: Display,
{
    async fn on_request(&self, req: &ServiceRequest) -> StageOutcome {
        let class = self.classifier.classify(req.method(), req.path());
        let Some(quota) = class.quota() else {
            return StageOutcome::Continue(None);
        };
        let Some(backend) = &self.backend else {
            // No tracker configured: the gate is inert by design.
            return StageOutcome::Continue(None);
        };
        let identity = match self.client_identity(req) {
            Ok(identity) => identity,
            Err(e) => {
                log::warn!("Unable to determine client identity: {e}, allowing the request");
                return StageOutcome::Continue(None);
            }
        };
        let input = SlidingWindowInput {
            interval: quota.interval,
            max_requests: quota.max_requests,
            key: format!("{}:{}", class.key_prefix(), identity),
        };

        let checked =
            actix_web::rt::time::timeout(self.check_timeout, backend.check(input)).await;
        let (decision, output) = match checked {
            // Able to successfully query the quota tracker
            Ok(Ok(checked)) => checked,
            // Unable to query the quota tracker
            Ok(Err(e)) => {
                log::warn!("Quota tracker failed: {e}, allowing the request anyway");
                return StageOutcome::Continue(None);
            }
            Err(_elapsed) => {
                log::warn!(
                    "Quota tracker timed out after {:?}, allowing the request anyway",
                    self.check_timeout
                );
                return StageOutcome::Continue(None);
            }
        };

        if decision.is_denied() {
            return StageOutcome::ShortCircuit(self.denied_response(req, &output));
        }
        if self.annotate_allowed {
            let mutation: ResponseMutation = Box::new(move |map| {
                map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(output.limit));
                map.insert(
                    X_RATELIMIT_REMAINING.clone(),
                    HeaderValue::from(output.remaining),
                );
                map.insert(
                    X_RATELIMIT_RESET.clone(),
                    HeaderValue::from(output.seconds_until_reset()),
                );
            });
            StageOutcome::Continue(Some(mutation))
        } else {
            StageOutcome::Continue(None)
        }
    }
}

#[derive(Debug, Error)]
enum IdentityError {
    #[error("No remote address available on the connection")]
    Unknown,
    #[error("Unable to parse remote IP address: {0}")]
    InvalidIp(
        #[source]
        #[from]
        AddrParseError,
    ),
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
// https://support.cloudflare.com/hc/en-us/articles/115001635128-Configuring-Cloudflare-Rate-Limiting
fn ip_key(ip_str: &str) -> Result<String, IdentityError> {
    let ip = ip_str.parse::<IpAddr>()?;
    Ok(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4() {
                return Ok(v4.to_string());
            }
            let zeroes = [0u16; 4];
            let concat = [&v6.segments()[0..4], &zeroes].concat();
            let concat: [u16; 8] = concat.try_into().unwrap();
            let subnet = Ipv6Addr::from(concat);
            format!("{}/64", subnet)
        }
    })
}

#[cfg(test)]
mod ip_tests {
    use super::*;

    #[test]
    fn test_ip_key() {
        // Check that IPv4 addresses are preserved
        assert_eq!(ip_key("142.250.187.206").unwrap(), "142.250.187.206");
        // Check that IPv4 mapped addresses are preserved
        assert_eq!(ip_key("::FFFF:142.250.187.206").unwrap(), "142.250.187.206");
        // Check that IPv6 addresses are grouped into /64 subnets
        assert_eq!(
            ip_key("2a00:1450:4009:81f::200e").unwrap(),
            "2a00:1450:4009:81f::/64"
        );
    }
}
