//! LuckyMe client: everything between an application and the dissemination
//! daemon.
//!
//! - [`lifecycle`] — daemon status and (re)launch policy
//! - [`library`] / [`session`] — session registration and the session handle
//! - [`dispatcher`] — serial event delivery on a dedicated thread
//! - [`link`] — the [`DaemonLink`] boundary, with [`protocol::SocketLink`]
//!   and [`loopback::LoopbackDaemon`] behind it
//! - [`log_rotation`] — numbered backups of daemon files

pub mod dispatcher;
pub mod library;
pub mod lifecycle;
pub mod link;
pub mod log_rotation;
pub mod loopback;
pub mod paths;
pub mod protocol;
pub mod session;

pub use dispatcher::{DispatcherState, EventDispatcher, EventHandler, EventSink, HandlerTable};
pub use library::{init_tracing, ClientLibrary, SessionRegistry};
pub use lifecycle::{ensure_running, read_status, DaemonControl, LaunchOutcome, ProcessDaemon};
pub use link::{Command, DaemonLink};
pub use log_rotation::{backup_daemon_files, LogRotator};
pub use loopback::LoopbackDaemon;
pub use protocol::{send_request, DaemonRequest, DaemonResponse, SocketLink};
pub use session::SessionHandle;
