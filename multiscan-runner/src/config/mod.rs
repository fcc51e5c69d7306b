// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for multiscan.
//!
//! Configuration is layered: the embedded `default-config.toml` comes first, then the
//! repository's `.config/multiscan.toml` (or a file passed in explicitly). Unknown keys produce
//! warnings rather than errors.

mod imp;
mod retry_policy;

pub use imp::*;
pub use retry_policy::*;
