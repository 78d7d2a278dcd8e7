// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Everything that knows about the outside world: typed configuration,
//! structured logging, Prometheus metrics, and the concrete node classes
//! registered with `application::node_registry`.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod nodes;
