// /////////////////////////////////////////////////////////////////////////////
// Adaptive Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Unix Platform Implementation
//!
//! POSIX implementation covering Linux and macOS via `libc`.

use super::{Platform, PlatformError};
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Unix platform implementation (Linux, macOS, and other POSIX systems).
pub struct UnixPlatform;

impl UnixPlatform {
    pub fn new() -> Self {
        Self
    }

    fn read_meminfo_field(contents: &str, key: &str) -> Option<u64> {
        contents
            .lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    }
}

impl Default for UnixPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for UnixPlatform {
    fn page_size(&self) -> usize {
        // SAFETY: sysconf(_SC_PAGESIZE) takes no pointers and always returns
        // a value on a POSIX system; a negative result (unsupported) falls
        // back to the universal default.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    fn total_memory(&self) -> Result<u64, PlatformError> {
        let contents = std::fs::read_to_string("/proc/meminfo")?;
        Self::read_meminfo_field(&contents, "MemTotal:")
            .ok_or_else(|| PlatformError::Other("MemTotal not found in /proc/meminfo".to_string()))
    }

    fn available_memory(&self) -> Result<u64, PlatformError> {
        let contents = std::fs::read_to_string("/proc/meminfo")?;
        Self::read_meminfo_field(&contents, "MemAvailable:")
            .ok_or_else(|| PlatformError::Other("MemAvailable not found in /proc/meminfo".to_string()))
    }

    fn line_separator(&self) -> &'static str {
        "\n"
    }

    fn path_separator(&self) -> char {
        ':'
    }

    fn platform_name(&self) -> &'static str {
        if cfg!(target_os = "macos") {
            "macos"
        } else {
            "linux"
        }
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn is_elevated(&self) -> bool {
        // SAFETY: geteuid takes no arguments and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), PlatformError> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn is_executable(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    async fn sync_file(&self, file: &tokio::fs::File) -> Result<(), PlatformError> {
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_platform_basics() {
        let platform = UnixPlatform::new();
        assert!(platform.cpu_count() >= 1);
        let page_size = platform.page_size();
        assert!(page_size >= 512);
        assert!(page_size <= 65536);
    }

    #[test]
    fn test_unix_platform_constants() {
        let platform = UnixPlatform::new();
        assert_eq!(platform.line_separator(), "\n");
        assert_eq!(platform.path_separator(), ':');
    }

    #[test]
    fn test_meminfo_parsing() {
        let sample = "MemTotal:       16384000 kB\nMemFree:         2048000 kB\nMemAvailable:    8192000 kB\n";
        assert_eq!(UnixPlatform::read_meminfo_field(sample, "MemTotal:"), Some(16384000 * 1024));
        assert_eq!(UnixPlatform::read_meminfo_field(sample, "MemAvailable:"), Some(8192000 * 1024));
        assert_eq!(UnixPlatform::read_meminfo_field(sample, "NoSuchField:"), None);
    }
}
