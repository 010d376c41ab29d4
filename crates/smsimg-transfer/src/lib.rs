//! smsimg-transfer: one image transfer from selection to reconstructed file
//!
//! ```text
//! image ─► compress ─► split ─► frame+encrypt ─► Transport ─► decrypt ─► sort+join ─► decode ─► ArtifactStore
//! ```

pub mod pipeline;
pub mod reassembly;
pub mod state;
pub mod store;
pub mod transport;

pub use pipeline::{EventFn, TransferEvent, TransferFailure, TransferPipeline, TransferReport};
pub use reassembly::{reassemble, DroppedFragment, Reassembled};
pub use state::StateTracker;
pub use store::{Artifact, ArtifactStore};
pub use transport::{LoopbackTransport, Transport};
