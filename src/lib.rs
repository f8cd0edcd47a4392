pub mod core;
pub mod error;
pub mod init;
pub mod logger;
pub mod math;
pub mod problem;
pub mod residuals;
pub mod solver;

pub use error::{PrismError, PrismResult};
pub use logger::{init_logger, init_logger_with_level};
