//! # vmm-loader
//!
//! Populates a freshly created guest's physical address space from
//! host-resident images: an ELF kernel and a raw boot sector.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vmm_loader::{LoaderBuilder, Result, SoftHypervisor};
//!
//! fn main() -> Result<()> {
//!     let plan = LoaderBuilder::new("/vmm/kernel")
//!         .boot("/vmm/boot")
//!         .build()?;
//!
//!     let mut hv = SoftHypervisor::new();
//!     let report = plan.execute(&mut hv)?;
//!     println!("guest {} ready", report.guest.id());
//!     Ok(())
//! }
//! ```
//!
//! Every page is allocated, filled from the image, and handed to the
//! hypervisor's mapping primitive. A page ends up either mapped or
//! released, never both.

mod builder;
pub mod debug;
mod error;

pub mod backend;
pub mod loader;
pub mod memory;

// Re-exports
pub use backend::{Guest, GuestMapper, Hypervisor, MapRejected, Permissions, SoftHypervisor};
pub use builder::{LoadPlan, LoadReport, LoaderBuilder};
pub use error::{Error, Result};
pub use loader::{ElfProgramTable, GuestLoader, GuestPageMapper, ImageSource, KernelInfo, Segment};
pub use memory::{GuestPhysicalRange, HostPage, MmapAllocator, PageAllocator, PAGE_SIZE};
