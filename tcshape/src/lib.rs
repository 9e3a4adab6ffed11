//! tcshape: compile and install traffic shaping policies with tc.
//!
//! A [`ShapingPolicy`](tcshape_shared::ShapingPolicy) is compiled into one
//! rule set per direction by [`compiler`], turned into `tc` invocations by
//! [`commands`], and installed by [`executor::Shaper`].

pub mod commands;
pub mod compiler;
pub mod config;
pub mod environment;
pub mod executor;
pub mod mirror;
pub mod status;
