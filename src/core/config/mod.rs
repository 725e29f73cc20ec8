mod path;
mod settings;

pub use path::*;
pub use settings::*;
