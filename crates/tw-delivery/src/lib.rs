//! Tidewire delivery pipeline
//!
//! - [`ProcessorRegistry`]: per-tenant delivery rules and matching
//! - [`DeliveryTracker`]: delivery/attempt bookkeeping with bounded retry
//! - [`ProcessorDispatcher`]: HTTP webhook and broker publish senders
//! - [`DeliveryRunner`]: claim-gated dispatch and the pending sweep
//! - [`EventProcessor`]: tenant resolution and delivery fan-out for one event
//! - [`EventPublisher`]: persist + enqueue, with an in-process fallback

pub mod broker_sender;
pub mod dispatcher;
pub mod error;
pub mod http_sender;
pub mod pipeline;
pub mod processing;
pub mod publisher;
pub mod registry;
pub mod runner;
pub mod tenant;
pub mod tracker;

pub use broker_sender::{AmqpSender, BrokerSender};
pub use dispatcher::{DispatchOutcome, Dispatcher, ProcessorDispatcher};
pub use error::{DeliveryError, Result};
pub use http_sender::{sign_payload, HttpSender, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use pipeline::DeliveryPipeline;
pub use processing::{EventProcessor, ProcessReport};
pub use publisher::{EventPublisher, PublishOutcome, PublishedEvent};
pub use registry::ProcessorRegistry;
pub use runner::{DeliveryRunner, SweepSummary};
pub use tenant::TenantResolver;
pub use tracker::{AttemptRecord, DeliveryTracker};
