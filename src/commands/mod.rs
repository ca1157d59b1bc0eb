mod down;
mod logs;
mod restart;
mod status;
mod up;

pub use down::{run_down, run_reset};
pub use logs::run_logs;
pub use restart::run_restart;
pub use status::run_status;
pub use up::run_up;
