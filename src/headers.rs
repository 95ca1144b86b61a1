use crate::pipeline::{Stage, StageOutcome};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{
    HeaderName, HeaderValue, CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::rc::Rc;

static PERMISSIONS_POLICY: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("permissions-policy"));

/// A [Stage] that stamps a fixed set of security headers onto every response,
/// including short-circuit responses produced by later stages.
///
/// The header set is built once by the builder; the Content-Security-Policy
/// varies with the configured image/script hosts.
pub struct SecurityHeaders {
    headers: Rc<Vec<(HeaderName, HeaderValue)>>,
}

impl SecurityHeaders {
    pub fn builder() -> SecurityHeadersBuilder {
        SecurityHeadersBuilder {
            image_hosts: Vec::new(),
            script_hosts: Vec::new(),
            allow_unsafe_eval: false,
        }
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait(?Send)]
impl Stage for SecurityHeaders {
    async fn on_request(&self, _req: &ServiceRequest) -> StageOutcome {
        let headers = self.headers.clone();
        StageOutcome::Continue(Some(Box::new(move |map| {
            for (name, value) in headers.iter() {
                map.insert(name.clone(), value.clone());
            }
        })))
    }
}

pub struct SecurityHeadersBuilder {
    image_hosts: Vec<String>,
    script_hosts: Vec<String>,
    allow_unsafe_eval: bool,
}

impl SecurityHeadersBuilder {
    /// Add an object-storage host that serves page images to `img-src`.
    pub fn image_host(mut self, host: &str) -> Self {
        self.image_hosts.push(host.to_owned());
        self
    }

    /// Add a third-party host to `script-src`.
    pub fn script_host(mut self, host: &str) -> Self {
        self.script_hosts.push(host.to_owned());
        self
    }

    /// Allow `'unsafe-eval'` in `script-src`, required by some dev tooling.
    pub fn allow_unsafe_eval(mut self, allow_unsafe_eval: bool) -> Self {
        self.allow_unsafe_eval = allow_unsafe_eval;
        self
    }

    /// # Panics
    ///
    /// Panics if a configured host contains characters that are not valid in
    /// a header value.
    pub fn build(self) -> SecurityHeaders {
        let csp = self.content_security_policy();
        let headers = vec![
            (
                CONTENT_SECURITY_POLICY,
                HeaderValue::from_str(&csp).expect("Invalid character in a configured CSP host"),
            ),
            (X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (
                REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
            (
                PERMISSIONS_POLICY.clone(),
                HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
            ),
        ];
        SecurityHeaders {
            headers: Rc::new(headers),
        }
    }

    fn content_security_policy(&self) -> String {
        let mut script_src = "script-src 'self'".to_string();
        if self.allow_unsafe_eval {
            script_src.push_str(" 'unsafe-eval'");
        }
        for host in &self.script_hosts {
            script_src.push(' ');
            script_src.push_str(host);
        }
        let mut img_src = "img-src 'self' data: blob:".to_string();
        for host in &self.image_hosts {
            img_src.push(' ');
            img_src.push_str(host);
        }
        format!(
            "default-src 'self'; {script_src}; {img_src}; \
             style-src 'self' 'unsafe-inline'; frame-ancestors 'none'"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::{get, App, HttpResponse, Responder};

    #[test]
    fn test_csp_construction() {
        let default = SecurityHeaders::builder().content_security_policy();
        assert_eq!(
            default,
            "default-src 'self'; script-src 'self'; img-src 'self' data: blob:; \
             style-src 'self' 'unsafe-inline'; frame-ancestors 'none'"
        );

        let customised = SecurityHeaders::builder()
            .image_host("https://images.example.com")
            .allow_unsafe_eval(true)
            .content_security_policy();
        assert!(customised.contains("script-src 'self' 'unsafe-eval';"));
        assert!(customised.contains("img-src 'self' data: blob: https://images.example.com;"));
    }

    #[get("/200")]
    async fn route_200() -> impl Responder {
        HttpResponse::Ok().body("Hello world!")
    }

    #[actix_web::test]
    async fn test_headers_applied() {
        let pipeline = crate::Pipeline::new().stage(SecurityHeaders::default());
        let app = init_service(App::new().service(route_200).wrap(pipeline)).await;
        let response = call_service(&app, TestRequest::get().uri("/200").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers.contains_key("content-security-policy"));
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert!(headers.contains_key("permissions-policy"));
    }
}
