//! Fragmenters split one entity into the sub-units its cost is spread over.

// Calendar-day splitting for interval entities
pub mod interval;

// Product-key splitting for request entities
pub mod request;

pub use interval::IntervalFragmenter;
pub use request::RequestFragmenter;
