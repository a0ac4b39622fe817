//! Offline sync: queue draining, connectivity tracking and the remote store
//! contract.

mod clock;
mod connectivity;
mod engine;
mod http;
mod remote;
#[cfg(test)]
pub(crate) mod testing;
mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::{ConnectivityMonitor, ConnectivitySignal, NetworkStatus, Transition};
pub use engine::{DrainPhase, DrainReport, DrainRequest, DrainState, OperationFailure, SyncEngine};
pub use http::HttpRemoteStore;
pub use remote::{RemoteError, RemoteRecord, RemoteStore};
pub use timer::RetryTimer;
