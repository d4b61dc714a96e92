#[path = "util/mod.rs"]
#[macro_use]
mod util;

mod message;
mod message_pipe;
mod platform_handle;
mod shared_buffer;
mod waiter;
