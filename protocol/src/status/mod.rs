pub use snapshot::*;

mod snapshot;
