use crate::gate::builder::DEFAULT_CHECK_TIMEOUT;
use crate::policy::Classifier;
use std::env;
use std::time::Duration;

/// Process configuration for the admission gate.
///
/// Constructed once at startup and passed to the components that need it,
/// rather than read from ambient process state at call sites.
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Quota tracker endpoint and credential; absence disables enforcement.
    pub tracker: Option<TrackerConfig>,
    pub api_prefix: String,
    pub age_verification_path: String,
    pub check_timeout: Duration,
    pub trust_proxy: bool,
}

/// Endpoint + credential pair for the hosted quota tracker.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub url: String,
    pub token: String,
}

impl GateConfig {
    /// Read configuration from the process environment.
    ///
    /// `QUOTA_TRACKER_URL` and `QUOTA_TRACKER_TOKEN` must both be present to
    /// enable enforcement; a partial pair is logged and treated as absent.
    /// Optional overrides: `ADMISSION_API_PREFIX`,
    /// `ADMISSION_AGE_VERIFICATION_PATH`, `ADMISSION_CHECK_TIMEOUT_MS`,
    /// `ADMISSION_TRUST_PROXY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let tracker = match (lookup("QUOTA_TRACKER_URL"), lookup("QUOTA_TRACKER_TOKEN")) {
            (Some(url), Some(token)) => Some(TrackerConfig { url, token }),
            (Some(_), None) | (None, Some(_)) => {
                log::warn!("Quota tracker credentials are incomplete, admission gate disabled");
                None
            }
            (None, None) => None,
        };
        let check_timeout = lookup("ADMISSION_CHECK_TIMEOUT_MS")
            .and_then(|value| {
                value
                    .parse::<u64>()
                    .map_err(|e| log::warn!("Invalid ADMISSION_CHECK_TIMEOUT_MS value: {e}"))
                    .ok()
            })
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CHECK_TIMEOUT);
        Self {
            tracker,
            api_prefix: lookup("ADMISSION_API_PREFIX").unwrap_or_else(|| "/api".to_string()),
            age_verification_path: lookup("ADMISSION_AGE_VERIFICATION_PATH")
                .unwrap_or_else(|| "/api/verify-age".to_string()),
            check_timeout,
            trust_proxy: matches!(
                lookup("ADMISSION_TRUST_PROXY").as_deref(),
                Some("1") | Some("true")
            ),
        }
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(&self.api_prefix, &self.age_verification_path)
    }
}

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
mod tracker {
    use super::*;
    use crate::backend::redis::RedisSlidingWindow;
    use crate::gate::builder::AdmissionGateBuilder;
    use crate::AdmissionGate;
    use redis::aio::ConnectionManager;
    use redis::IntoConnectionInfo;

    impl TrackerConfig {
        /// Connect to the hosted quota tracker.
        pub async fn connect(&self) -> Result<RedisSlidingWindow, redis::RedisError> {
            let mut info = self.url.as_str().into_connection_info()?;
            info.redis.password = Some(self.token.clone());
            let client = redis::Client::open(info)?;
            let manager = ConnectionManager::new(client).await?;
            Ok(RedisSlidingWindow::builder(manager)
                .key_prefix(Some("gate:"))
                .build())
        }
    }

    impl GateConfig {
        /// Assemble the gate from this configuration.
        ///
        /// If no tracker is configured, or the initial connection fails, the
        /// gate is inert and every request is allowed (fail-open extends to
        /// startup).
        pub async fn gate(&self) -> AdmissionGateBuilder<RedisSlidingWindow> {
            let backend = match &self.tracker {
                None => {
                    log::info!("No quota tracker configured, admission gate is inert");
                    None
                }
                Some(tracker) => match tracker.connect().await {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        log::error!(
                            "Unable to reach the quota tracker: {e}, admission gate is inert"
                        );
                        None
                    }
                },
            };
            AdmissionGate::builder(backend)
                .classifier(self.classifier())
                .check_timeout(self.check_timeout)
                .trust_proxy(self.trust_proxy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::from_lookup(lookup(&[]));
        assert!(config.tracker.is_none());
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.age_verification_path, "/api/verify-age");
        assert_eq!(config.check_timeout, DEFAULT_CHECK_TIMEOUT);
        assert!(!config.trust_proxy);
    }

    #[test]
    fn test_tracker_requires_both_credentials() {
        let config = GateConfig::from_lookup(lookup(&[(
            "QUOTA_TRACKER_URL",
            "redis://tracker.example.com",
        )]));
        assert!(config.tracker.is_none());

        let config = GateConfig::from_lookup(lookup(&[("QUOTA_TRACKER_TOKEN", "secret")]));
        assert!(config.tracker.is_none());

        let config = GateConfig::from_lookup(lookup(&[
            ("QUOTA_TRACKER_URL", "redis://tracker.example.com"),
            ("QUOTA_TRACKER_TOKEN", "secret"),
        ]));
        let tracker = config.tracker.unwrap();
        assert_eq!(tracker.url, "redis://tracker.example.com");
        assert_eq!(tracker.token, "secret");
    }

    #[test]
    fn test_overrides() {
        let config = GateConfig::from_lookup(lookup(&[
            ("ADMISSION_API_PREFIX", "/v2"),
            ("ADMISSION_AGE_VERIFICATION_PATH", "/v2/age"),
            ("ADMISSION_CHECK_TIMEOUT_MS", "250"),
            ("ADMISSION_TRUST_PROXY", "true"),
        ]));
        assert_eq!(config.api_prefix, "/v2");
        assert_eq!(config.age_verification_path, "/v2/age");
        assert_eq!(config.check_timeout, Duration::from_millis(250));
        assert!(config.trust_proxy);
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let config =
            GateConfig::from_lookup(lookup(&[("ADMISSION_CHECK_TIMEOUT_MS", "soon")]));
        assert_eq!(config.check_timeout, DEFAULT_CHECK_TIMEOUT);
    }
}
