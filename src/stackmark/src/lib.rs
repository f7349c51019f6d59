mod config;
mod epoch;
mod frames;
mod iterator;
mod kind;
mod mark;
mod position;
mod set;
mod state;
mod sync;
mod watermark;

#[cfg(test)]
mod test_util;

pub use config::*;
pub use epoch::*;
pub use frames::*;
pub use iterator::*;
pub use kind::*;
pub use mark::*;
pub use position::*;
pub use set::*;
pub use state::*;
pub use watermark::*;
