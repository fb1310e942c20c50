//! Load plan builder for populating a new guest.

use std::path::PathBuf;

use crate::backend::{Guest, Hypervisor};
use crate::error::{Error, Result};
use crate::loader::{GuestLoader, KernelInfo};
use crate::memory::{is_page_aligned, layout, MmapAllocator, PAGE_SIZE};

/// Builder for a [`LoadPlan`].
///
/// # Example
///
/// ```rust,no_run
/// use vmm_loader::{LoaderBuilder, SoftHypervisor};
///
/// let plan = LoaderBuilder::new("/vmm/kernel")
///     .boot("/vmm/boot")
///     .memory_mb(64)
///     .build()?;
/// let report = plan.execute(&mut SoftHypervisor::new())?;
/// println!("entry 0x{:x}", report.kernel.entry);
/// # Ok::<(), vmm_loader::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct LoaderBuilder {
    kernel: PathBuf,
    boot: Option<PathBuf>,
    boot_entry: Option<u64>,
    boot_size: Option<u64>,
    memory_mb: Option<u64>,
}

impl LoaderBuilder {
    /// Create a builder for the given ELF kernel image.
    pub fn new(kernel: impl Into<PathBuf>) -> Self {
        Self {
            kernel: kernel.into(),
            boot: None,
            boot_entry: None,
            boot_size: None,
            memory_mb: None,
        }
    }

    /// Set the path to the raw boot sector image.
    pub fn boot(mut self, path: impl Into<PathBuf>) -> Self {
        self.boot = Some(path.into());
        self
    }

    /// Set the guest physical address the boot sector is loaded at.
    ///
    /// Default: 0x7000
    pub fn boot_entry(mut self, gpa: u64) -> Self {
        self.boot_entry = Some(gpa);
        self
    }

    /// Set the number of boot image bytes to load.
    ///
    /// Default: 512
    pub fn boot_size(mut self, size: u64) -> Self {
        self.boot_size = Some(size);
        self
    }

    /// Set the amount of guest memory in megabytes.
    ///
    /// Default: 64 MB
    pub fn memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    /// Validate the configuration and produce a plan.
    pub fn build(self) -> Result<LoadPlan> {
        let memory_mb = self.memory_mb.unwrap_or(64);
        if memory_mb == 0 {
            return Err(Error::InvalidMemorySize(memory_mb));
        }
        let memory_size = memory_mb
            .checked_mul(1024 * 1024)
            .ok_or(Error::InvalidMemorySize(memory_mb))?;

        if !self.kernel.exists() {
            return Err(Error::NotFound(self.kernel));
        }
        if let Some(ref boot) = self.boot {
            if !boot.exists() {
                return Err(Error::NotFound(boot.clone()));
            }
        }

        let boot_entry = self.boot_entry.unwrap_or(layout::BOOT_ENTRY);
        if !is_page_aligned(boot_entry) {
            return Err(Error::UnalignedGuestAddress(boot_entry));
        }

        Ok(LoadPlan {
            kernel: self.kernel,
            boot: self.boot,
            boot_entry,
            boot_size: self.boot_size.unwrap_or(layout::BOOT_SECTOR_SIZE),
            memory_size,
        })
    }
}

/// A validated load sequence for one guest.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    kernel: PathBuf,
    boot: Option<PathBuf>,
    boot_entry: u64,
    boot_size: u64,
    memory_size: u64,
}

/// Result of a completed [`LoadPlan`].
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub guest: Guest,
    pub kernel: KernelInfo,
    /// Pages installed for the boot image, if one was loaded
    pub boot_pages: Option<u64>,
    pub pages_allocated: u64,
    pub pages_released: u64,
}

impl LoadPlan {
    /// Guest memory size in bytes.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    pub fn boot_entry(&self) -> u64 {
        self.boot_entry
    }

    /// Create a guest, load its images, and mark it runnable.
    ///
    /// On error the guest is left partially populated and is never marked
    /// runnable.
    pub fn execute<H: Hypervisor>(&self, hv: &mut H) -> Result<LoadReport> {
        let guest = hv.create_guest(self.memory_size, self.boot_entry)?;
        log::info!(
            target: "loader",
            "guest {} created on {} backend",
            guest.id(),
            hv.name()
        );

        let mut allocator = MmapAllocator::with_limit(self.memory_size / PAGE_SIZE as u64);
        let mut loader = GuestLoader::new(&mut allocator, &mut *hv);

        let kernel = loader.load_kernel(&guest, &self.kernel)?;
        let boot_pages = match self.boot {
            Some(ref boot) => Some(loader.load_raw(
                &guest,
                self.boot_entry,
                self.boot_size,
                boot,
                0,
            )?),
            None => None,
        };

        hv.set_runnable(&guest)?;
        log::info!(target: "loader", "guest {} runnable", guest.id());

        Ok(LoadReport {
            guest,
            kernel,
            boot_pages,
            pages_allocated: allocator.allocated(),
            pages_released: allocator.released(),
        })
    }
}
