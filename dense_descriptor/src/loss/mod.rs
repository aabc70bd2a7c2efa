//! Loss functions for descriptor learning.
//!
//! - Relative response loss: the response at the true correspondence should
//!   dominate its field

mod relative_response;

pub use relative_response::{RelativeResponseLoss, DEFAULT_EPS};
