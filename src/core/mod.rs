pub mod diff;
pub mod engine;
pub mod fingerprint;
pub mod remote;
pub mod scanner;
pub mod transfer;

pub use diff::{needs_transfer, Direction, DirectorySet, FileIndex, Transfer, TransferPlan};
pub use engine::{SyncConfig, SyncEngine, SyncEvent, SyncReport};
pub use fingerprint::{compute_fingerprint, Fingerprint, DEFAULT_CHUNK_SIZE};
pub use remote::{RemoteTree, RemoteTreeLister};
pub use scanner::{LocalTree, LocalTreeScanner, ScanConfig};
pub use transfer::{TransferExecutor, TransferOutcome};
