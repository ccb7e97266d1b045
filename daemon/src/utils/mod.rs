pub use text::*;

mod text;
