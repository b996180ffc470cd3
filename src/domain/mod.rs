pub mod charger;
pub mod price;
pub mod schedule;
pub mod types;
pub mod vehicle;

pub use charger::*;
pub use price::*;
pub use schedule::*;
pub use types::*;
pub use vehicle::*;
