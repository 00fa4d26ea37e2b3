pub mod alert;
pub mod device;
pub mod event;
pub mod reading;
pub mod recommendation;
pub mod session;
pub mod vri;
pub mod water_balance;

pub use alert::*;
pub use device::*;
pub use event::*;
pub use reading::*;
pub use recommendation::*;
pub use session::*;
pub use vri::*;
pub use water_balance::*;
