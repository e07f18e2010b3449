mod constants;
mod dirs;
mod hash;
mod lock;
mod log_util;

pub use constants::*;
pub use dirs::*;
pub use hash::*;
pub use lock::*;
pub use log_util::*;

#[macro_use]
extern crate log;
