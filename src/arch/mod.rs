//! # Architecture Port Layer
//!
//! The minimal hardware boundary the kernel core depends on: stack
//! pointer handling, the deferred-switch request, exception handlers,
//! and the linker-supplied heap bounds. Currently the Cortex-M4 port;
//! other targets would add sibling modules.

pub mod cortex_m4;
