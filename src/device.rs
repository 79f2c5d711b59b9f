//! Descriptors for the supported SPI NOR parts.
//!
//! The driver is parameterised over a closed set of flash parts. Each entry
//! carries the part's geometry and single-byte instruction set; a part is
//! selected by its index into [`FLASH_TYPES`] when the driver is built and
//! never changes afterwards.

use bitflags::bitflags;

/// Geometry and instruction set of one SPI NOR part.
///
/// Addresses are transferred as 24-bit big-endian words directly after the
/// instruction byte; all listed parts use the classic 25-series command set.
#[derive(Debug, PartialEq, Eq)]
pub struct FlashType {
    /// Part name, used in log output only.
    pub name: &'static str,
    /// Total capacity in bytes.
    pub total_size: u32,
    /// Smallest erasable unit in bytes.
    pub sector_size: u32,
    /// Smallest programmable unit in bytes.
    pub page_size: u32,
    /// Read data bytes.
    pub read_data: u8,
    /// Read the status register.
    pub read_status: u8,
    /// Set the write enable latch.
    pub write_enable: u8,
    /// Erase one sector.
    pub erase_sector: u8,
    /// Program one page.
    pub page_program: u8,
    /// Mask selecting the write-in-progress bit(s) of the status byte.
    pub wip_mask: u8,
}

impl FlashType {
    /// Number of pages in one sector.
    pub fn pages_per_sector(&self) -> u32 {
        self.sector_size / self.page_size
    }
}

bitflags! {
    /// Status register bits common to the supported parts.
    pub struct Status: u8 {
        /// Erase or write in progress.
        const WIP = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
    }
}

/// The supported flash parts, indexed by the `flash_type` argument of
/// [`crate::Driver::new`].
pub const FLASH_TYPES: &[FlashType] = &[
    // Winbond W25Q16JV, 2 MiB
    FlashType {
        name: "W25Q16JV",
        total_size: 2 * 1024 * 1024,
        sector_size: 4096,
        page_size: 256,
        read_data: 0x03,
        read_status: 0x05,
        write_enable: 0x06,
        erase_sector: 0x20,
        page_program: 0x02,
        wip_mask: 0x01,
    },
    // Micron MT25QU128, 16 MiB, 4 KiB subsector erase
    FlashType {
        name: "MT25QU128",
        total_size: 16 * 1024 * 1024,
        sector_size: 4096,
        page_size: 256,
        read_data: 0x03,
        read_status: 0x05,
        write_enable: 0x06,
        erase_sector: 0x20,
        page_program: 0x02,
        wip_mask: 0x01,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_consistent() {
        for flash in FLASH_TYPES {
            assert_eq!(
                flash.sector_size,
                flash.pages_per_sector() * flash.page_size,
                "{}: sector size must be a whole number of pages",
                flash.name
            );
            assert_eq!(flash.total_size % flash.sector_size, 0, "{}", flash.name);
        }
    }

    #[test]
    fn test_status_bits() {
        let status = Status::from_bits_truncate(0x03);
        assert!(status.contains(Status::WIP | Status::WEL));
        assert!(Status::from_bits_truncate(0x00).is_empty());
    }
}
