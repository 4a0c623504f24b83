//! CLI support library: stub model loading, event display, logging.
//!
//! The binary in `main.rs` stays thin; everything testable lives here.

pub mod display;
pub mod logging;
pub mod stub;

pub use display::EventPrinter;
pub use stub::load_stub_factory;
