//! Daemon runtime: detector workers + scheduler worker + socket server.

mod coordinator;
mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
pub mod status;

pub use coordinator::{run, run_with, start_blocking};
pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use status::read_status_file;
