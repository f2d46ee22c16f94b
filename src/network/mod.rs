//! Transport plumbing: the transport contract, its implementations, and the
//! two tasks that drive it (polling and uploading)

pub mod http;
pub mod loopback;
pub mod poll;
pub mod transport;
pub mod upload;

pub use http::HttpTransport;
pub use loopback::LoopbackTransport;
pub use poll::{PollOutcome, PollSchedule, PollScheduler, Poller};
pub use transport::{SharedTransport, Transport};
pub use upload::UploadWorker;
