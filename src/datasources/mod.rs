pub mod openmeteo;

pub use openmeteo::{DailyClimate, OpenMeteoClient};
