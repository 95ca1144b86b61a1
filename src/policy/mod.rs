use actix_web::http::Method;
use std::time::Duration;

/// The traffic class a request belongs to.
///
/// Classification is total: every request maps to exactly one class, and the
/// same request always maps to the same class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrafficClass {
    /// Posting a comment.
    CommentWrite,
    /// Authentication endpoints, including age verification.
    Auth,
    /// Any other write to the API.
    GeneralWrite,
    /// Never throttled; the quota tracker is not consulted.
    Unrestricted,
}

impl TrafficClass {
    /// Prefix used to partition quota keys between classes.
    pub fn key_prefix(self) -> &'static str {
        match self {
            TrafficClass::CommentWrite => "comment-write",
            TrafficClass::Auth => "auth",
            TrafficClass::GeneralWrite => "general-write",
            TrafficClass::Unrestricted => "unrestricted",
        }
    }

    /// The quota applied to this class, or [None] for [TrafficClass::Unrestricted].
    pub fn quota(self) -> Option<Quota> {
        match self {
            TrafficClass::CommentWrite => Some(Quota::new(Duration::from_secs(60), 5)),
            TrafficClass::Auth => Some(Quota::new(Duration::from_secs(5 * 60), 10)),
            TrafficClass::GeneralWrite => Some(Quota::new(Duration::from_secs(60), 100)),
            TrafficClass::Unrestricted => None,
        }
    }
}

/// A sliding-window quota: at most `max_requests` within any trailing `interval`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Quota {
    /// The sliding window duration.
    pub interval: Duration,
    /// The total requests to be allowed within the window.
    pub max_requests: u64,
}

impl Quota {
    pub fn new(interval: Duration, max_requests: u64) -> Self {
        Self {
            interval,
            max_requests,
        }
    }
}

/// Maps a request's method and path to a [TrafficClass].
///
/// Rules are evaluated in order, first match wins:
/// 1. Paths outside the API prefix are not subject to admission control.
/// 2. A `POST` to a path with a `comments` segment is [TrafficClass::CommentWrite].
/// 3. A path with an `auth` segment, or the age-verification endpoint, is
///    [TrafficClass::Auth].
/// 4. Any other non-`GET` method is [TrafficClass::GeneralWrite].
/// 5. Everything else is [TrafficClass::Unrestricted].
#[derive(Clone, Debug)]
pub struct Classifier {
    api_prefix: String,
    age_verification_path: String,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            age_verification_path: "/api/verify-age".to_string(),
        }
    }
}

impl Classifier {
    pub fn new(api_prefix: &str, age_verification_path: &str) -> Self {
        Self {
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
            age_verification_path: age_verification_path.to_string(),
        }
    }

    pub fn classify(&self, method: &Method, path: &str) -> TrafficClass {
        if !self.is_api_path(path) {
            return TrafficClass::Unrestricted;
        }
        if has_segment(path, "comments") && *method == Method::POST {
            return TrafficClass::CommentWrite;
        }
        if has_segment(path, "auth") || path == self.age_verification_path {
            return TrafficClass::Auth;
        }
        if *method != Method::GET {
            return TrafficClass::GeneralWrite;
        }
        TrafficClass::Unrestricted
    }

    // Segment-aware prefix check, "/api" must not match "/apix".
    fn is_api_path(&self, path: &str) -> bool {
        match path.strip_prefix(self.api_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

fn has_segment(path: &str, segment: &str) -> bool {
    path.split('/').any(|s| s == segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(method: Method, path: &str) -> TrafficClass {
        Classifier::default().classify(&method, path)
    }

    #[test]
    fn test_non_api_paths_unrestricted() {
        assert_eq!(
            classify(Method::POST, "/reader/series/1/comments"),
            TrafficClass::Unrestricted
        );
        assert_eq!(classify(Method::DELETE, "/"), TrafficClass::Unrestricted);
        // Prefix match must be segment-aware
        assert_eq!(
            classify(Method::POST, "/apiary/comments"),
            TrafficClass::Unrestricted
        );
    }

    #[test]
    fn test_comment_writes() {
        assert_eq!(
            classify(Method::POST, "/api/series/1/comments"),
            TrafficClass::CommentWrite
        );
        // Only POST counts as a comment write
        assert_eq!(
            classify(Method::GET, "/api/series/1/comments"),
            TrafficClass::Unrestricted
        );
        // A comment delete still falls through to the auth/general rules
        assert_eq!(
            classify(Method::DELETE, "/api/series/1/comments/2"),
            TrafficClass::GeneralWrite
        );
    }

    #[test]
    fn test_auth_endpoints() {
        assert_eq!(
            classify(Method::POST, "/api/auth/sign-in"),
            TrafficClass::Auth
        );
        assert_eq!(classify(Method::GET, "/api/auth/session"), TrafficClass::Auth);
        assert_eq!(
            classify(Method::POST, "/api/verify-age"),
            TrafficClass::Auth
        );
        // "auth" must be a whole segment
        assert_eq!(
            classify(Method::GET, "/api/author/1"),
            TrafficClass::Unrestricted
        );
    }

    #[test]
    fn test_general_writes_and_reads() {
        assert_eq!(
            classify(Method::PUT, "/api/library/5"),
            TrafficClass::GeneralWrite
        );
        assert_eq!(
            classify(Method::DELETE, "/api/library/5"),
            TrafficClass::GeneralWrite
        );
        assert_eq!(
            classify(Method::GET, "/api/series/1"),
            TrafficClass::Unrestricted
        );
    }

    #[test]
    fn test_comment_write_beats_auth() {
        // First match wins: a comments POST under an auth-looking path is
        // still a comment write.
        assert_eq!(
            classify(Method::POST, "/api/auth/profile/comments"),
            TrafficClass::CommentWrite
        );
    }

    #[test]
    fn test_quotas() {
        assert_eq!(
            TrafficClass::CommentWrite.quota(),
            Some(Quota::new(Duration::from_secs(60), 5))
        );
        assert_eq!(
            TrafficClass::Auth.quota(),
            Some(Quota::new(Duration::from_secs(300), 10))
        );
        assert_eq!(
            TrafficClass::GeneralWrite.quota(),
            Some(Quota::new(Duration::from_secs(60), 100))
        );
        assert_eq!(TrafficClass::Unrestricted.quota(), None);
    }
}
