//! Core functionalities.
mod env;
mod policy;
mod step;
pub use env::Env;
pub use policy::Policy;
use std::fmt::Debug;
pub use step::{Info, Step};

/// An observation of an environment.
pub trait Obs: Clone + Debug {
    /// Returns the number of scalar entries in the observation.
    fn len(&self) -> usize;
}

/// An action on an environment.
pub trait Act: Clone + Debug {
    /// Returns the number of scalar entries in the action.
    fn len(&self) -> usize;
}
