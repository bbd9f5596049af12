pub mod parser;
pub mod types;

pub use parser::{extract_rationale, parse, terminal_signal, TerminalSignal};
pub use types::{Action, Axis, ParseError, ScreenBounds};
