mod allocator;
pub mod error;
mod report;

pub use allocator::{make_reservation, refresh_reservation, release_reservation, update_reservation};
pub use error::AllocatorError;
pub use report::ReservationOutcome;
