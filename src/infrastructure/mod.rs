pub mod clock;
pub mod factory;
pub mod model_store;
pub mod price_history;

pub use clock::{ManualClock, SystemClock};
pub use factory::ServiceFactory;
