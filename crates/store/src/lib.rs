pub mod config;
pub mod errors;
pub mod firebase;
pub mod memory;
pub mod paths;
pub mod remote;

pub use config::{FirebaseConfig, StoreBackend};
pub use errors::StoreError;
pub use firebase::FirebaseClient;
pub use memory::{MemoryObjectStore, MemoryTree};
pub use remote::{ObjectMeta, ObjectStore, RemoteTree, StoreHandles, open_store};
