use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::HttpResponse;
use async_trait::async_trait;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::cell::RefCell;
use std::rc::Rc;

/// Applied to the headers of whichever response ultimately leaves the
/// pipeline, whether produced by a later stage or by the route handler.
pub type ResponseMutation = Box<dyn FnOnce(&mut HeaderMap)>;

/// The uniform result of running one [Stage] against a request.
pub enum StageOutcome {
    /// Hand the request to the next stage, optionally registering a mutation
    /// for the eventual response.
    Continue(Option<ResponseMutation>),
    /// Stop here: later stages and the route handler never see the request.
    ShortCircuit(HttpResponse),
}

/// A single request-processing stage.
///
/// Stages run in the order they are added to the [Pipeline], which makes the
/// ordering of concerns such as security-header injection and admission
/// control explicit and testable.
#[async_trait(?Send)]
pub trait Stage {
    async fn on_request(&self, req: &ServiceRequest) -> StageOutcome;
}

/// An explicit ordered pipeline of request-processing stages, mounted as
/// actix middleware.
///
/// A short-circuit response still receives the header mutations registered by
/// the stages that ran before it.
pub struct Pipeline {
    stages: Vec<Rc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage; stages run in insertion order.
    pub fn stage<T: Stage + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Rc::new(stage));
        self
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Pipeline
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = PipelineMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(PipelineMiddleware {
            service: Rc::new(RefCell::new(service)),
            stages: Rc::new(self.stages.clone()),
        })
    }
}

pub struct PipelineMiddleware<S> {
    service: Rc<RefCell<S>>,
    stages: Rc<Vec<Rc<dyn Stage>>>,
}

impl<S, B> Service<ServiceRequest> for PipelineMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let stages = self.stages.clone();

        Box::pin(async move {
            let mut mutations: Vec<ResponseMutation> = Vec::new();
            for stage in stages.iter() {
                match stage.on_request(&req).await {
                    StageOutcome::Continue(None) => {}
                    StageOutcome::Continue(Some(mutation)) => mutations.push(mutation),
                    StageOutcome::ShortCircuit(mut response) => {
                        for mutation in mutations {
                            mutation(response.headers_mut());
                        }
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                }
            }

            let mut service_response = service.call(req).await?;
            for mutation in mutations {
                mutation(service_response.headers_mut());
            }
            Ok(service_response.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::{get, App, HttpResponse, Responder};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[get("/200")]
    async fn route_200() -> impl Responder {
        HttpResponse::Ok().body("Hello world!")
    }

    struct Tag(&'static str, &'static str);

    #[async_trait(?Send)]
    impl Stage for Tag {
        async fn on_request(&self, _req: &ServiceRequest) -> StageOutcome {
            let name = HeaderName::from_static(self.0);
            let value = HeaderValue::from_static(self.1);
            StageOutcome::Continue(Some(Box::new(move |map| {
                // Appends so that ordering across stages is observable
                map.append(name, value);
            })))
        }
    }

    struct Reject;

    #[async_trait(?Send)]
    impl Stage for Reject {
        async fn on_request(&self, _req: &ServiceRequest) -> StageOutcome {
            StageOutcome::ShortCircuit(HttpResponse::Forbidden().finish())
        }
    }

    #[derive(Clone)]
    struct Count(Arc<AtomicU64>);

    #[async_trait(?Send)]
    impl Stage for Count {
        async fn on_request(&self, _req: &ServiceRequest) -> StageOutcome {
            self.0.fetch_add(1, Ordering::Relaxed);
            StageOutcome::Continue(None)
        }
    }

    #[actix_web::test]
    async fn test_mutations_apply_in_stage_order() {
        let pipeline = Pipeline::new()
            .stage(Tag("x-stage", "first"))
            .stage(Tag("x-stage", "second"));
        let app = init_service(App::new().service(route_200).wrap(pipeline)).await;
        let response = call_service(&app, TestRequest::get().uri("/200").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let values: Vec<_> = response
            .headers()
            .get_all("x-stage")
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[actix_web::test]
    async fn test_short_circuit_skips_later_stages_and_handler() {
        let counter = Count(Arc::new(AtomicU64::new(0)));
        let pipeline = Pipeline::new()
            .stage(Tag("x-stage", "first"))
            .stage(Reject)
            .stage(counter.clone());
        let app = init_service(App::new().service(route_200).wrap(pipeline)).await;
        let response = call_service(&app, TestRequest::get().uri("/200").to_request()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        // The early response still carries the first stage's header
        assert_eq!(response.headers().get("x-stage").unwrap(), "first");
        // The stage after the rejection never ran
        assert_eq!(counter.0.load(Ordering::Relaxed), 0);
    }
}
