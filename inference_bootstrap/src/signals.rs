// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! A SIGINT handler triggers graceful shutdown: stop both server frontends,
//! then both pipeline managers, then exit. `wait_for_shutdown_signal`
//! resolves once SIGINT is observed; the caller drives the stop sequence.

use tokio::signal;

/// Resolves when the process receives SIGINT (Ctrl-C). On non-Unix targets
/// this is the only signal `tokio::signal` exposes portably; SIGTERM/SIGHUP
/// handling is Unix-only and layered on top where available.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_shutdown_signal_does_not_resolve_without_a_signal() {
        let result = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown_signal()).await;
        assert!(result.is_err(), "should time out: no signal was sent");
    }
}
