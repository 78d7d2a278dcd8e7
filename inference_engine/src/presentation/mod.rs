// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The two server frontends: thin transport adapters that turn
//! wire requests into `PipelineManager` tasks and stream `ResponseNode`
//! callbacks back to the caller. Each frontend owns its own
//! `PipelineManager` instance.

pub mod grpc;
pub mod http;
