// Copyright 2025 Scamandrios Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Scamandrios CLI
//!
//! Command-line access to a scamandrios cluster.
//!
//! ## Key Commands
//!
//! - `scamandrios discover`: print the ring behind a seed
//! - `scamandrios call`: build a pool from a seed and make one call
//! - `scamandrios ring-status`: build a pool and print every host's state
//!
//! The subcommands are thin wrappers over [`commands`], which the binary and
//! the integration tests share.

pub mod commands;
