pub mod pin;

pub use pin::PinGuard;
