// Command implementations

pub mod extensions;
pub mod watch;
