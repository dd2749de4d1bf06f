//! Extensibility boundary for traits that the crate does not want external
//! crates to implement directly (keeps room to add default methods later
//! without a breaking change).

pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
