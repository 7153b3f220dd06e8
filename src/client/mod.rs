//! Client-side functionality modules and trait.

mod endpoint;
mod handle;

pub use endpoint::{GenericClient, ResultState};
pub use handle::ClientHandle;
