//! Fabric error types and status handling.
//!
//! The VALE control path reports failures as errno-style integers. Each one
//! is carried as a typed status together with the operation and resource
//! that failed.

use std::fmt;
use thiserror::Error;

/// Status codes reported by the fabric control path.
///
/// Values match the errno constants the VALE switch returns.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FabricStatus {
    NotFound = 2,
    NoDevice = 6,
    NoMemory = 12,
    PermissionDenied = 13,
    Busy = 16,
    Exists = 17,
    InvalidArgument = 22,
    NoSpace = 28,
    /// Any code without a dedicated variant.
    Failure = -1,
}

impl FabricStatus {
    /// Returns the raw errno value.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for FabricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FabricStatus::NotFound => "ENOENT",
            FabricStatus::NoDevice => "ENXIO",
            FabricStatus::NoMemory => "ENOMEM",
            FabricStatus::PermissionDenied => "EACCES",
            FabricStatus::Busy => "EBUSY",
            FabricStatus::Exists => "EEXIST",
            FabricStatus::InvalidArgument => "EINVAL",
            FabricStatus::NoSpace => "ENOSPC",
            FabricStatus::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// Control-path operations exposed by a fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FabricOp {
    CreateBridge,
    CreatePort,
    DestroyPort,
    Attach,
    Detach,
    InstallPolicy,
    DestroyBridge,
}

impl FabricOp {
    /// Returns the operation name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FabricOp::CreateBridge => "create_bridge",
            FabricOp::CreatePort => "create_port",
            FabricOp::DestroyPort => "destroy_port",
            FabricOp::Attach => "attach",
            FabricOp::Detach => "detach",
            FabricOp::InstallPolicy => "install_policy",
            FabricOp::DestroyBridge => "destroy_bridge",
        }
    }
}

impl fmt::Display for FabricOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fabric {op} failed on '{resource}': {status} ({code})", code = .status.as_raw())]
pub struct FabricError {
    /// The operation that failed.
    pub op: FabricOp,
    /// Bridge or port name the operation targeted.
    pub resource: String,
    /// Underlying status code.
    pub status: FabricStatus,
}

impl FabricError {
    /// Creates a fabric error.
    pub fn new(op: FabricOp, resource: impl Into<String>, status: FabricStatus) -> Self {
        Self {
            op,
            resource: resource.into(),
            status,
        }
    }

    /// Returns the wrapped status code.
    pub fn status(&self) -> FabricStatus {
        self.status
    }

    /// Returns true if the fabric rejected the control handle.
    pub fn is_permission_denied(&self) -> bool {
        self.status == FabricStatus::PermissionDenied
    }
}

/// Result type for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_raw_codes() {
        assert_eq!(FabricStatus::NotFound.as_raw(), 2);
        assert_eq!(FabricStatus::PermissionDenied.as_raw(), 13);
        assert_eq!(FabricStatus::NoSpace.as_raw(), 28);
        assert_eq!(FabricStatus::Failure.as_raw(), -1);
    }

    #[test]
    fn test_error_display() {
        let err = FabricError::new(FabricOp::CreatePort, "v1", FabricStatus::Exists);
        assert_eq!(
            err.to_string(),
            "fabric create_port failed on 'v1': EEXIST (17)"
        );
    }

    #[test]
    fn test_permission_denied() {
        let err = FabricError::new(FabricOp::Detach, "v0", FabricStatus::PermissionDenied);
        assert!(err.is_permission_denied());
        assert!(!FabricError::new(FabricOp::Detach, "v0", FabricStatus::Busy).is_permission_denied());
    }
}
