//! Command implementations.

mod info;
mod send;

pub(crate) use info::cmd_info;
pub(crate) use send::cmd_send;
