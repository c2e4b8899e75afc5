mod snapshot;
mod unspent;

pub use snapshot::*;
pub use unspent::*;
