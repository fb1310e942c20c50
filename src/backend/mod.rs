//! Hypervisor interface consumed by the loader.
//!
//! This module defines the guest handle, the second-level mapping primitive
//! the loader installs pages through, and the guest context operations the
//! orchestrating caller needs around a load.

use crate::error::Result;
use crate::memory::HostPage;

pub mod soft;

pub use soft::SoftHypervisor;

/// Opaque handle to a hypervisor-managed guest context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guest {
    id: u32,
    memory_size: u64,
    entry: u64,
}

impl Guest {
    pub(crate) fn new(id: u32, memory_size: u64, entry: u64) -> Self {
        Self {
            id,
            memory_size,
            entry,
        }
    }

    /// Hypervisor-assigned guest id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Guest physical memory size in bytes.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// Address the guest starts executing at.
    pub fn entry(&self) -> u64 {
        self.entry
    }
}

/// Access permissions for a second-level mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub const READ: Permissions = Permissions(0x1);
    pub const WRITE: Permissions = Permissions(0x2);
    pub const EXECUTE: Permissions = Permissions(0x4);
    /// Full access, used for every page the loader installs.
    pub const RWX: Permissions = Permissions(0x7);

    pub fn contains(&self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A mapping the hypervisor refused to install.
///
/// The page travels back to the caller, which still owns it and must
/// release it.
#[derive(Debug)]
pub struct MapRejected {
    pub page: HostPage,
    pub reason: String,
}

impl MapRejected {
    pub fn new(page: HostPage, reason: impl Into<String>) -> Self {
        Self {
            page,
            reason: reason.into(),
        }
    }
}

/// Second-level address translation mapping primitive.
pub trait GuestMapper {
    /// Install `page` at guest physical address `gpa`.
    ///
    /// On success the mapping owns the page.
    fn install(
        &mut self,
        guest: &Guest,
        gpa: u64,
        page: HostPage,
        perms: Permissions,
    ) -> std::result::Result<(), MapRejected>;
}

/// Guest context operations used by the orchestrating caller.
pub trait Hypervisor: GuestMapper {
    /// Create a guest context with `memory_size` bytes of physical memory.
    fn create_guest(&mut self, memory_size: u64, entry: u64) -> Result<Guest>;

    /// Mark a fully loaded guest as runnable.
    fn set_runnable(&mut self, guest: &Guest) -> Result<()>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}
