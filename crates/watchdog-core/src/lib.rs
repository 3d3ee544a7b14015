mod error;
mod model;
mod traits;
#[cfg(test)]
mod tests;

pub use error::{Error, Result, Retryability};
pub use model::*;
pub use traits::*;
