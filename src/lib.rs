#![cfg_attr(docsrs, feature(doc_cfg))]

//! Traffic-class admission control middleware for actix-web.
//!
//! Inbound API requests are classified into a small set of traffic classes
//! ([TrafficClass]), each carrying its own sliding-window quota. The quota
//! counters live in a [Backend](backend::Backend) (an in-memory store, or a
//! hosted Redis tracker); the [AdmissionGate] only reads decisions from it.
//! If the tracker is unreachable or not configured the gate fails open: the
//! request is allowed and the failure logged.
//!
//! Request processing is an explicit ordered [Pipeline] of [Stage]s, so the
//! ordering of security-header injection and the admission check is visible
//! and testable rather than implied by call order.

pub mod backend;
mod config;
mod gate;
mod headers;
mod pipeline;
mod policy;

pub use config::{GateConfig, TrackerConfig};
pub use gate::builder::AdmissionGateBuilder;
pub use gate::AdmissionGate;
pub use headers::{SecurityHeaders, SecurityHeadersBuilder};
pub use pipeline::{Pipeline, ResponseMutation, Stage, StageOutcome};
pub use policy::{Classifier, Quota, TrafficClass};
