pub(crate) mod event;
mod time;

pub(crate) use time::*;
