//! Long-running feed daemon: config watcher, serialized reconciliation
//! passes and a Unix-socket server for feed readers.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_feed, request_progress, request_status, request_stop, request_sync, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, FeedState};
