//! Queue descriptors and sector-range planning.

use crate::device::FlashType;
use crate::record::Header;
use crate::util::ceil_div;
use crate::Error;

/// Management slot for one logical queue.
///
/// The caller allocates an array of these and hands it to
/// [`crate::Driver::new`]; the driver owns the contents from then on. All
/// `page_*` fields are absolute page indices (byte address divided by the
/// page size) — they only become byte addresses when a packet is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    /// Slot is occupied.
    pub(crate) used: bool,
    /// Metadata below reflects the flash contents; appending is safe.
    /// Cleared by every append, set again by mount.
    pub(crate) ready: bool,
    /// Magic tagging this queue's records on flash.
    pub(crate) magic: u32,
    /// Pages one record occupies.
    pub(crate) pages_per_elem: u16,
    /// First sector of the owned range.
    pub(crate) first_sector: u32,
    /// Last sector of the owned range, inclusive. The range spans at least
    /// two sectors, otherwise the round-robin erase would wipe the whole
    /// queue.
    pub(crate) last_sector: u32,
    /// Record capacity of the owned range.
    pub(crate) max_entries: u16,
    /// Live records seen by the last mount.
    pub(crate) entries: u16,
    /// Lowest record id seen by the last mount.
    pub(crate) id_min: u32,
    /// Highest record id seen by the last mount; the next append uses
    /// `id_max + 1`.
    pub(crate) id_max: u32,
    /// First page of the record carrying `id_min`; its sector is the erase
    /// victim when the queue wraps.
    pub(crate) page_id_min: u32,
    /// First page of the record carrying `id_max`.
    pub(crate) page_id_max: u32,
    /// First free page, where the next append starts.
    pub(crate) page_write: u32,
}

impl Queue {
    /// An unoccupied table slot.
    pub const fn empty() -> Self {
        Queue {
            used: false,
            ready: false,
            magic: 0,
            pages_per_elem: 0,
            first_sector: 0,
            last_sector: 0,
            max_entries: 0,
            entries: 0,
            id_min: 0,
            id_max: 0,
            page_id_min: 0,
            page_id_max: 0,
            page_write: 0,
        }
    }

    /// Whether the queue metadata is valid for append/get.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Records the last mount saw.
    pub fn entries(&self) -> u16 {
        self.entries
    }

    /// Record capacity of the sector range.
    pub fn max_entries(&self) -> u16 {
        self.max_entries
    }

    /// Pages occupied by one record, header included.
    pub fn pages_per_elem(&self) -> u16 {
        self.pages_per_elem
    }

    /// Owned sector range, inclusive on both ends.
    pub fn sectors(&self) -> (u32, u32) {
        (self.first_sector, self.last_sector)
    }

    /// Lowest and highest record id seen by the last mount.
    pub fn id_range(&self) -> (u32, u32) {
        (self.id_min, self.id_max)
    }

    /// Page index the next append starts at.
    pub fn write_page(&self) -> u32 {
        self.page_write
    }

    /// Payload bytes one record can carry.
    pub(crate) fn payload_capacity(&self, flash: &FlashType) -> u32 {
        self.pages_per_elem as u32 * flash.page_size - Header::SIZE as u32
    }

    /// Absolute page index of the first page of element `elem`.
    pub(crate) fn elem_page(&self, flash: &FlashType, elem: u16) -> u32 {
        self.first_sector * flash.pages_per_sector() + self.pages_per_elem as u32 * elem as u32
    }

    /// Drops the scan results; the next mount starts from a clean slate.
    pub(crate) fn reset_scan(&mut self) {
        self.entries = 0;
        self.id_min = u32::max_value();
        self.id_max = 0;
    }
}

impl Default for Queue {
    fn default() -> Self {
        Queue::empty()
    }
}

/// Plans the descriptor for a new queue starting at `first_sector`.
///
/// One record reserves its payload plus one on-flash header, rounded up to
/// whole pages; the sector count is rounded up to hold `num_elems` such
/// records, with a floor of two so the wrap erase never hits every record.
pub(crate) fn plan(
    flash: &FlashType,
    magic: u32,
    elem_size: u16,
    num_elems: u16,
    first_sector: u32,
) -> Result<Queue, Error> {
    let pages_per_sector = flash.pages_per_sector();
    let pages_per_elem = ceil_div(elem_size as u32 + Header::SIZE as u32, flash.page_size);
    let num_sectors = ceil_div(num_elems as u32 * pages_per_elem, pages_per_sector).max(2);
    let last_sector = first_sector + num_sectors - 1;
    if (last_sector as u64 + 1) * flash.sector_size as u64 > flash.total_size as u64 {
        return Err(Error::FlashFull);
    }
    let mut queue = Queue::empty();
    queue.used = true;
    queue.magic = magic;
    queue.pages_per_elem = pages_per_elem as u16;
    queue.first_sector = first_sector;
    queue.last_sector = last_sector;
    queue.max_entries = (num_sectors * pages_per_sector / pages_per_elem) as u16;
    queue.reset_scan();
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FLASH_TYPES;

    #[test]
    fn test_plan_single_page_elements() {
        let flash = &FLASH_TYPES[0];
        // 100 byte payload + 8 byte header fits one 256 byte page
        let q = plan(flash, 0xA, 100, 32, 0).unwrap();
        assert_eq!(q.pages_per_elem, 1);
        assert_eq!(q.sectors(), (0, 1));
        assert_eq!(q.max_entries, 32);
        assert!(!q.is_ready());
        assert_eq!(q.id_range(), (u32::max_value(), 0));
    }

    #[test]
    fn test_plan_tiles_after_predecessor() {
        let flash = &FLASH_TYPES[0];
        let q0 = plan(flash, 0xA, 100, 32, 0).unwrap();
        let q1 = plan(flash, 0xB, 250, 8, q0.last_sector + 1).unwrap();
        // 250 + 8 byte header spills into a second page
        assert_eq!(q1.pages_per_elem, 2);
        assert_eq!(q1.sectors(), (2, 3));
        assert_eq!(q1.max_entries, 16);
        assert!(q0.last_sector < q1.first_sector);
    }

    #[test]
    fn test_plan_sector_floor_of_two() {
        let flash = &FLASH_TYPES[0];
        // a single one-page element still claims two sectors
        let q = plan(flash, 0xA, 1, 1, 0).unwrap();
        assert_eq!(q.sectors(), (0, 1));
        assert_eq!(q.max_entries, 32);
    }

    #[test]
    fn test_plan_multi_sector_element() {
        let flash = &FLASH_TYPES[0];
        // 12280 + 8 bytes = 48 pages = 3 sectors per record
        let q = plan(flash, 0xB, 12280, 16, 0).unwrap();
        assert_eq!(q.pages_per_elem, 48);
        assert_eq!(q.sectors(), (0, 47));
        assert_eq!(q.max_entries, 16);
    }

    #[test]
    fn test_plan_rejects_overflowing_flash() {
        let flash = &FLASH_TYPES[0]; // 2 MiB = 512 sectors
        assert_eq!(plan(flash, 0xA, 100, 32, 511), Err(Error::FlashFull));
        assert!(plan(flash, 0xA, 100, 32, 510).is_ok());
    }

    #[test]
    fn test_payload_capacity() {
        let flash = &FLASH_TYPES[0];
        let q = plan(flash, 0xA, 100, 32, 0).unwrap();
        assert_eq!(q.payload_capacity(flash), 248);
    }

    #[test]
    fn test_elem_page() {
        let flash = &FLASH_TYPES[0];
        let q = plan(flash, 0xB, 250, 8, 2).unwrap();
        assert_eq!(q.elem_page(flash, 0), 32);
        assert_eq!(q.elem_page(flash, 3), 38);
    }
}
