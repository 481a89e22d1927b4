//! The sector interval store: the canonical set of dirty
//! sector ranges tracked per source device.

mod sector_interval;
mod sector_set;
mod store;

pub use sector_interval::SectorInterval;
pub use store::Store;

use snafu::Snafu;

/// Reserved for the arithmetic-overflow programming error noted in
/// the Store's operations never fail in ordinary use.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("sector interval arithmetic overflowed: {lower} + length"))]
    Overflow { lower: u64 },
}
