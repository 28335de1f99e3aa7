pub mod selftest;
pub mod terminal;

pub use selftest::SelfTest;
pub use terminal::{Terminal, TerminalPorts};
