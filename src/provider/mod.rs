mod types;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(any(feature = "openai", feature = "anthropic"))]
pub mod sse;
pub mod stub;

#[cfg(all(test, any(feature = "openai", feature = "anthropic")))]
pub(crate) mod mock;

pub use types::*;
