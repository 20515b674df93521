//! LuckyMe service layer.
//!
//! - [`config`] — `config.yaml` loading
//! - [`notifier`] — consumer-facing message relay
//! - [`publisher`] — periodic data-object publishing
//! - [`service`] — [`LuckyService`] start/stop orchestration

pub mod config;
mod error;
pub mod notifier;
pub mod publisher;
pub mod service;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use notifier::{ClientNotifier, ServiceSnapshot};
pub use publisher::{BackgroundPublisher, ObjectFactory, PublisherSettings, PublisherState};
pub use service::{interest_profile, on_interest_list, LuckyService};
