//! Typed fabric surface for VALE software bridges.
//!
//! This crate is the boundary between the bridge core and the packet
//! transport runtime that owns ring I/O. It defines the values both sides
//! exchange and the interface the core drives:
//!
//! - [`types`]: port indices, fixed-size destination masks, control handles
//! - [`error`]: errno-style fabric status codes and errors
//! - [`table`]: copy-on-write port table snapshots read on the packet path
//! - [`policy`]: the forwarding strategy seam invoked once per frame
//! - [`fabric`]: the control-path operations the core consumes
//! - [`soft`]: an in-memory fabric for simulation and tests
//!
//! # Example
//!
//! ```
//! use vale_fabric::{Fabric, FrameMeta, PortIndex, SoftFabric};
//!
//! let fabric = SoftFabric::new();
//! let handle = fabric.create_bridge("vale0:").unwrap();
//! fabric.create_port("v0").unwrap();
//! fabric.create_port("v1").unwrap();
//! let v0 = fabric.attach("vale0:", "v0", &handle).unwrap();
//! fabric.attach("vale0:", "v1", &handle).unwrap();
//!
//! // With no policy installed the bridge floods.
//! let datapath = fabric.datapath("vale0:").unwrap();
//! let dst = datapath.forward(&FrameMeta::new(v0, &[]));
//! assert_eq!(dst.iter().collect::<Vec<_>>(), vec![PortIndex::new(1).unwrap()]);
//! ```

pub mod error;
pub mod fabric;
pub mod policy;
pub mod soft;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use error::{FabricError, FabricOp, FabricResult, FabricStatus};
pub use fabric::Fabric;
pub use policy::{ForwardingPolicy, ForwardingTarget, FrameMeta, InstalledPolicy};
pub use soft::{Datapath, FabricCall, SoftFabric};
pub use table::{LivePortTable, PortTable};
pub use types::{ControlHandle, HandleId, PortIndex, PortMask, MAX_PORTS};
