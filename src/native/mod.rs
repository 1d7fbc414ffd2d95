/// Native module contains implementations of core traits
/// that talk to the host toolchain and process table directly,
/// without containers or a remote execution service.
pub mod executor;
