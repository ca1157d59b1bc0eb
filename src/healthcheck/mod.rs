mod checker;
mod http;
mod runtime;

pub use checker::*;
pub use http::*;
pub use runtime::*;
