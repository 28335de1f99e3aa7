pub mod display;
pub mod keyboard;

pub use display::Display;
pub use keyboard::{Keyboard, KeyboardState};
