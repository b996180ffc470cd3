pub mod accounting;
pub mod greedy;
pub mod throttle;

pub use accounting::*;
pub use greedy::*;
pub use throttle::*;
