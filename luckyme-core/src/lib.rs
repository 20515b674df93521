//! LuckyMe core library — domain types, errors, interest generation.
//!
//! - [`types`] — attributes, data objects, events, client messages
//! - [`error`] — [`ClientError`]
//! - [`interest`] — binomial and grid interest profiles

pub mod error;
pub mod interest;
pub mod types;

pub use error::{io_err, ClientError};
pub use interest::{InterestProfile, APP_ATTRIBUTE};
pub use types::{
    Attribute, ClientMessage, DaemonStatus, DataObject, Event, EventKind, Node, NodeInterface,
    SessionId,
};
