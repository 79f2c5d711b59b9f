//! The driver handle, job staging and the cooperative worker.
//!
//! One job is in flight at a time. Staging a job only records what to do;
//! all flash interaction happens in [`Driver::worker`], which the host calls
//! repeatedly. Each call either leaves one SPI packet in the shared buffer
//! (length in [`Driver::spi_len`]) or finishes the job. The host must clock
//! a pending packet out full-duplex, response into the same buffer, before
//! the next call.

use crate::device::{FlashType, FLASH_TYPES};
#[cfg(feature = "log")]
use crate::device::Status;
use crate::queue::{self, Queue};
use crate::record::{classify, Header, PageKind, CMD_OVERHEAD};
use crate::util::put_addr;
#[cfg(feature = "log")]
use crate::util::HexSlice;
use crate::Error;

/// Job classes the worker executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmd {
    Idle,
    Mount,
    Push,
    Get,
    Raw,
}

/// Execution stage within the current job. A stage ends whenever a packet
/// has to go to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    S0,
    S1,
    S2,
    S3,
}

/// Handle for a set of circular-buffer queues on one flash part.
///
/// The queue table and the SPI packet buffer are borrowed from the caller;
/// the SPI buffer must hold at least one page plus [`CMD_OVERHEAD`]. Buffers
/// handed to [`Driver::get`], [`Driver::get_last`] and [`Driver::read_raw`]
/// are held by the driver until the job completes and are handed back by
/// [`Driver::take_read_buf`].
#[derive(Debug)]
pub struct Driver<'a> {
    flash: &'static FlashType,
    queues: &'a mut [Queue],
    spi: &'a mut [u8],
    spi_len: u16,
    busy: bool,
    cmd: Cmd,
    stage: Stage,
    last_error: Option<Error>,
    /// Queue the current job works on.
    iter_queue: u8,
    /// Mount: element index being scanned. Push: payload bytes written.
    iter_elem: u16,
    /// Page the next packet addresses; for mount also the page the pending
    /// response came from.
    iter_page: u32,
    /// Byte address of a raw read.
    raw_addr: u32,
    /// Bytes a get/raw job returns.
    rd_len: u16,
    wr_data: Option<&'a [u8]>,
    rd_data: Option<&'a mut [u8]>,
}

impl<'a> Driver<'a> {
    /// Builds the handle for the flash part at `flash_type` in
    /// [`FLASH_TYPES`].
    ///
    /// All queue slots are cleared; register queues with
    /// [`Driver::create_queue`] afterwards.
    pub fn new(
        flash_type: u8,
        queues: &'a mut [Queue],
        spi: &'a mut [u8],
    ) -> Result<Self, Error> {
        let flash = FLASH_TYPES
            .get(flash_type as usize)
            .ok_or(Error::UnknownFlashType)?;
        if spi.len() < flash.page_size as usize + CMD_OVERHEAD {
            return Err(Error::BufferTooSmall);
        }
        for slot in queues.iter_mut() {
            *slot = Queue::empty();
        }
        info!("init: flash '{}', {} queue slots", flash.name, queues.len());
        Ok(Driver {
            flash,
            queues,
            spi,
            spi_len: 0,
            busy: false,
            cmd: Cmd::Idle,
            stage: Stage::S0,
            last_error: None,
            iter_queue: 0,
            iter_elem: 0,
            iter_page: 0,
            raw_addr: 0,
            rd_len: 0,
            wr_data: None,
            rd_data: None,
        })
    }

    /// Registers a queue of `num_elems` records of `elem_size` payload
    /// bytes, tagged with `magic` on flash. Returns the queue id.
    ///
    /// Purely in-memory; the sector range starts right after the previously
    /// registered queue. The range is sized per [`queue`] planning rules, so
    /// it may hold more records than requested.
    pub fn create_queue(
        &mut self,
        magic: u32,
        elem_size: u16,
        num_elems: u16,
    ) -> Result<u8, Error> {
        if self.busy {
            return Err(Error::Busy);
        }
        let mut first_sector = 0;
        let mut slot = None;
        for (i, q) in self.queues.iter().enumerate() {
            if q.used {
                first_sector = q.last_sector + 1;
            } else {
                slot = Some(i);
                break;
            }
        }
        let slot = slot.ok_or(Error::NoFreeSlot)?;
        let queue = queue::plan(self.flash, magic, elem_size, num_elems, first_sector)?;
        info!(
            "queue {}: magic {:#010x}, sectors {}..={}, {} x {} page(s)",
            slot,
            magic,
            queue.sectors().0,
            queue.sectors().1,
            queue.max_entries(),
            queue.pages_per_elem()
        );
        self.queues[slot] = queue;
        Ok(slot as u8)
    }

    /// Stages the metadata rebuild: every registered queue that is not
    /// [`Queue::is_ready`] gets its sector range scanned, and a full queue
    /// gets its oldest sector erased to make room.
    pub fn mount(&mut self) -> Result<(), Error> {
        if self.busy {
            return Err(Error::Busy);
        }
        if !self.queues.first().map_or(false, |q| q.used) {
            return Err(Error::NoQueue);
        }
        for q in self.queues.iter_mut() {
            if q.used && !q.ready {
                q.reset_scan();
            }
        }
        self.iter_queue = self
            .next_unready(0)
            .unwrap_or_else(|| self.queues.len() as u8);
        self.iter_elem = 0;
        self.start_job(Cmd::Mount);
        info!("mount: scanning from queue {}", self.iter_queue);
        Ok(())
    }

    /// Stages an append of `data` as the next record of queue `id`.
    ///
    /// The queue is marked not ready right here: once the record is on
    /// flash the cached write page is stale, so a [`Driver::mount`] has to
    /// run before the next append or get on this queue.
    pub fn push(&mut self, id: u8, data: &'a [u8]) -> Result<(), Error> {
        if self.busy {
            return Err(Error::Busy);
        }
        let flash = self.flash;
        let q = self
            .queues
            .get_mut(id as usize)
            .ok_or(Error::QueueNotFound)?;
        if !q.used || !q.ready {
            return Err(Error::NotReady);
        }
        if data.len() as u32 > q.payload_capacity(flash) {
            return Err(Error::TooLarge);
        }
        q.ready = false;
        self.iter_queue = id;
        self.iter_page = self.queues[id as usize].page_write;
        self.iter_elem = 0;
        self.wr_data = Some(data);
        self.start_job(Cmd::Push);
        info!(
            "push: queue {}, {} bytes at page {}",
            id,
            data.len(),
            self.iter_page
        );
        Ok(())
    }

    /// Stages a read of the oldest record of queue `id` into `buf`.
    ///
    /// The read length is `buf.len()`, clamped to the record payload
    /// capacity; queue state is not changed — records are only ever removed
    /// by the wrap erase during mount.
    pub fn get(&mut self, id: u8, buf: &'a mut [u8]) -> Result<(), Error> {
        self.stage_get(id, buf, false)
    }

    /// Stages a read of the newest record of queue `id` into `buf`.
    pub fn get_last(&mut self, id: u8, buf: &'a mut [u8]) -> Result<(), Error> {
        self.stage_get(id, buf, true)
    }

    fn stage_get(&mut self, id: u8, buf: &'a mut [u8], newest: bool) -> Result<(), Error> {
        if self.busy {
            return Err(Error::Busy);
        }
        let flash = self.flash;
        let q = self.queues.get(id as usize).ok_or(Error::QueueNotFound)?;
        if !q.used || !q.ready {
            return Err(Error::NotReady);
        }
        if q.entries == 0 {
            return Err(Error::Empty);
        }
        let len = (buf.len() as u32).min(q.payload_capacity(flash)) as usize;
        if CMD_OVERHEAD + Header::SIZE + len > self.spi.len() {
            return Err(Error::BufferTooSmall);
        }
        self.iter_queue = id;
        self.iter_page = if newest { q.page_id_max } else { q.page_id_min };
        self.rd_len = len as u16;
        self.rd_data = Some(buf);
        self.start_job(Cmd::Get);
        info!(
            "get: queue {}, {} record, {} bytes from page {}",
            id,
            if newest { "newest" } else { "oldest" },
            len,
            self.iter_page
        );
        Ok(())
    }

    /// Stages a raw flash read of `buf.len()` bytes starting at byte
    /// address `addr`, bypassing all queue bookkeeping.
    pub fn read_raw(&mut self, addr: u32, buf: &'a mut [u8]) -> Result<(), Error> {
        if self.busy {
            return Err(Error::Busy);
        }
        if buf.len() > u16::max_value() as usize {
            return Err(Error::BufferTooSmall);
        }
        self.raw_addr = addr;
        self.rd_len = buf.len() as u16;
        self.rd_data = Some(buf);
        self.start_job(Cmd::Raw);
        Ok(())
    }

    /// Whether a job is in flight.
    pub fn busy(&self) -> bool {
        self.busy
    }

    /// Length of the packet the host has to transfer before the next
    /// [`Driver::worker`] call; 0 when nothing is pending.
    pub fn spi_len(&self) -> u16 {
        self.spi_len
    }

    /// The pending packet. The host clocks it out and stores the response
    /// over it.
    pub fn spi_packet(&mut self) -> &mut [u8] {
        &mut self.spi[..self.spi_len as usize]
    }

    /// Error of the most recently finished job, if it failed mid-flight.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// Hands the buffer of a finished get/raw job back to the caller.
    pub fn take_read_buf(&mut self) -> Option<&'a mut [u8]> {
        self.rd_data.take()
    }

    /// Read-only view of a queue descriptor.
    pub fn queue(&self, id: u8) -> Option<&Queue> {
        self.queues.get(id as usize).filter(|q| q.used)
    }

    /// Highest record id of queue `id`; 0 when the slot is unused.
    pub fn id_max(&self, id: u8) -> u32 {
        self.queue(id).map_or(0, |q| q.id_range().1)
    }

    /// Total size of the selected flash part in bytes.
    pub fn flash_size(&self) -> u32 {
        self.flash.total_size
    }

    /// Advances the staged job by one step.
    ///
    /// Must not be called with an untransferred packet pending; the worker
    /// reads the response from the shared buffer in place.
    pub fn worker(&mut self) {
        match self.cmd {
            Cmd::Idle => {}
            Cmd::Mount => self.step_mount(),
            Cmd::Push => self.step_push(),
            Cmd::Get => self.step_get(),
            Cmd::Raw => self.step_raw(),
        }
    }

    fn start_job(&mut self, cmd: Cmd) {
        self.busy = true;
        self.cmd = cmd;
        self.stage = Stage::S0;
        self.last_error = None;
        self.spi_len = 0;
    }

    fn finish_job(&mut self) {
        self.spi_len = 0;
        self.cmd = Cmd::Idle;
        self.stage = Stage::S0;
        self.busy = false;
    }

    fn fail_job(&mut self, error: Error) {
        error!("job failed: {:?}", error);
        self.last_error = Some(error);
        self.finish_job();
    }

    /// Re-emits the status-register read while the flash reports a write in
    /// progress. Returns `true` while a packet is pending; on `false` the
    /// flash is idle and the buffer is released for the next packet.
    ///
    /// A non-status response in the buffer (the echo of a program or erase
    /// packet, where the part drives the line high) also lands here and
    /// triggers a real poll.
    fn wip_poll(&mut self) -> bool {
        if self.spi_len == 0 || self.spi[1] & self.flash.wip_mask != 0 {
            self.emit_status_read();
            return true;
        }
        trace!(
            "wip poll: idle, status {:?}",
            Status::from_bits_truncate(self.spi[1])
        );
        self.spi_len = 0;
        false
    }

    fn emit_status_read(&mut self) {
        self.spi[0] = self.flash.read_status;
        self.spi[1] = 0;
        self.spi_len = 2;
    }

    fn emit_write_enable(&mut self) {
        self.spi[0] = self.flash.write_enable;
        self.spi_len = 1;
    }

    /// Fills the buffer with a read-data packet for `count` bytes at byte
    /// address `addr`. The data phase clocks out zeroes.
    fn emit_read(&mut self, addr: u32, count: usize) {
        let total = CMD_OVERHEAD + count;
        for byte in self.spi[..total].iter_mut() {
            *byte = 0;
        }
        self.spi[0] = self.flash.read_data;
        put_addr(addr, &mut self.spi[1..CMD_OVERHEAD]);
        self.spi_len = total as u16;
        trace!(
            "read: {} bytes at {:#08x}, cmd {:?}",
            count,
            addr,
            HexSlice(&self.spi[..CMD_OVERHEAD])
        );
    }

    /// First queue at or after `from` that still needs a scan. The table is
    /// packed, so the first unused slot ends the search.
    fn next_unready(&self, from: u8) -> Option<u8> {
        for (i, q) in self.queues.iter().enumerate().skip(from as usize) {
            if !q.used {
                return None;
            }
            if !q.ready {
                return Some(i as u8);
            }
        }
        None
    }

    /*
     * Mount: scan every element slot of every queue that needs it,
     * rebuilding counts, id extremes and the write page. A full queue gets
     * its oldest sector erased and is scanned again.
     */
    fn step_mount(&mut self) {
        match self.stage {
            Stage::S0 => {
                if self.wip_poll() {
                    return;
                }
                self.stage = Stage::S1;
                self.mount_scan();
            }
            Stage::S1 => self.mount_scan(),
            Stage::S2 => {
                // write enable is latched; erase the sector holding the
                // oldest record
                let q = &self.queues[self.iter_queue as usize];
                let sector = q.page_id_min / self.flash.pages_per_sector();
                let addr = sector * self.flash.sector_size;
                info!(
                    "mount: queue {} full, erasing sector {} (oldest id {})",
                    self.iter_queue,
                    sector,
                    q.id_range().0
                );
                self.spi[0] = self.flash.erase_sector;
                put_addr(addr, &mut self.spi[1..CMD_OVERHEAD]);
                self.spi_len = CMD_OVERHEAD as u16;
                self.stage = Stage::S3;
            }
            Stage::S3 => {
                // erase is in flight; rescan this queue from a clean slate
                // once the flash goes idle
                self.queues[self.iter_queue as usize].reset_scan();
                self.iter_elem = 0;
                self.emit_status_read();
                self.stage = Stage::S0;
            }
        }
    }

    fn mount_scan(&mut self) {
        // consume the header read emitted by the previous call
        if self.spi_len != 0 {
            let page = self.iter_page;
            let q = &mut self.queues[self.iter_queue as usize];
            let raw = &self.spi[CMD_OVERHEAD..CMD_OVERHEAD + Header::SIZE];
            match classify(raw, q.magic) {
                PageKind::Valid(head) => {
                    q.entries += 1;
                    let (id_min, id_max) = q.id_range();
                    if head.id > id_max {
                        q.id_max = head.id;
                        q.page_id_max = page;
                    }
                    if head.id < id_min {
                        q.id_min = head.id;
                        q.page_id_min = page;
                    }
                    trace!("mount: record id {} at page {}", head.id, page);
                }
                PageKind::Empty => {
                    if !q.ready {
                        q.page_write = page;
                        q.ready = true;
                        trace!("mount: free page {} for queue writes", page);
                    }
                }
                PageKind::Corrupt => {
                    if !q.ready {
                        error!("mount: corrupt header at page {}, skipping", page);
                    }
                }
            }
        }
        loop {
            if self.iter_queue as usize >= self.queues.len() {
                info!("mount: done");
                self.finish_job();
                return;
            }
            let q = self.queues[self.iter_queue as usize];
            if self.iter_elem < q.max_entries() {
                // request the next element header
                self.iter_page = q.elem_page(self.flash, self.iter_elem);
                let addr = self.iter_page * self.flash.page_size;
                self.emit_read(addr, Header::SIZE);
                self.iter_elem += 1;
                return;
            }
            if q.is_ready() {
                // queue fully scanned and a free page exists; next queue
                match self.next_unready(self.iter_queue + 1) {
                    Some(next) => {
                        self.iter_queue = next;
                        self.iter_elem = 0;
                    }
                    None => {
                        info!("mount: done");
                        self.finish_job();
                        return;
                    }
                }
            } else {
                // no free page in the whole range: make room
                self.emit_write_enable();
                self.stage = Stage::S2;
                return;
            }
        }
    }

    /*
     * Push: program the record page by page, write-enable and WIP poll
     * around every page. The header goes in front of the first fragment.
     */
    fn step_push(&mut self) {
        match self.stage {
            Stage::S0 => {
                if self.wip_poll() {
                    return;
                }
                self.stage = Stage::S1;
                self.push_fragment_or_finish();
            }
            Stage::S1 => self.push_fragment_or_finish(),
            Stage::S2 => self.push_program_page(),
            // stage S3 does not occur for this job
            Stage::S3 => self.finish_job(),
        }
    }

    fn push_fragment_or_finish(&mut self) {
        let len = self.wr_data.map_or(0, |d| d.len());
        if (self.iter_elem as usize) < len {
            self.emit_write_enable();
            self.stage = Stage::S2;
        } else {
            self.wr_data = None;
            info!("push: done, {} bytes", len);
            self.finish_job();
        }
    }

    fn push_program_page(&mut self) {
        let data = match self.wr_data {
            Some(data) => data,
            None => return self.finish_job(),
        };
        let q = self.queues[self.iter_queue as usize];
        let page_size = self.flash.page_size as usize;
        self.spi[0] = self.flash.page_program;
        put_addr(
            self.iter_page * self.flash.page_size,
            &mut self.spi[1..CMD_OVERHEAD],
        );
        let mut used = CMD_OVERHEAD;
        let mut avail = page_size;
        if self.iter_elem == 0 {
            // first fragment carries the record header
            let (_, id_max) = q.id_range();
            let head = Header {
                magic: q.magic,
                id: id_max.wrapping_add(1),
            };
            head.write_to(&mut self.spi[used..used + Header::SIZE]);
            used += Header::SIZE;
            avail -= Header::SIZE;
        }
        let cursor = self.iter_elem as usize;
        let chunk = (data.len() - cursor).min(avail);
        self.spi[used..used + chunk].copy_from_slice(&data[cursor..cursor + chunk]);
        self.spi_len = (used + chunk) as u16;
        trace!(
            "push: {} bytes to page {}, cursor {}",
            chunk,
            self.iter_page,
            cursor
        );
        self.iter_elem += chunk as u16;
        self.iter_page += 1;
        self.stage = Stage::S0;
    }

    /*
     * Get: one read covering header plus the clamped payload, then copy the
     * payload out. Which record was fixed at staging via iter_page.
     */
    fn step_get(&mut self) {
        match self.stage {
            Stage::S0 => {
                if self.wip_poll() {
                    return;
                }
                self.stage = Stage::S1;
                self.get_request();
            }
            Stage::S1 => self.get_request(),
            Stage::S2 => {
                let start = CMD_OVERHEAD + Header::SIZE;
                let count = self.rd_len as usize;
                if let Some(buf) = self.rd_data.as_mut() {
                    buf[..count].copy_from_slice(&self.spi[start..start + count]);
                }
                info!("get: done, {} bytes", count);
                self.finish_job();
            }
            Stage::S3 => self.finish_job(),
        }
    }

    fn get_request(&mut self) {
        let addr = self.iter_page * self.flash.page_size;
        self.emit_read(addr, Header::SIZE + self.rd_len as usize);
        self.stage = Stage::S2;
    }

    /*
     * Raw read: like get, minus every piece of queue bookkeeping.
     */
    fn step_raw(&mut self) {
        match self.stage {
            Stage::S0 => {
                if self.wip_poll() {
                    return;
                }
                self.stage = Stage::S1;
                self.raw_request();
            }
            Stage::S1 => self.raw_request(),
            Stage::S2 => {
                let count = self.rd_len as usize;
                if let Some(buf) = self.rd_data.as_mut() {
                    buf[..count].copy_from_slice(&self.spi[CMD_OVERHEAD..CMD_OVERHEAD + count]);
                }
                self.finish_job();
            }
            Stage::S3 => self.finish_job(),
        }
    }

    fn raw_request(&mut self) {
        if CMD_OVERHEAD + self.rd_len as usize > self.spi.len() {
            self.fail_job(Error::BufferTooSmall);
            return;
        }
        self.emit_read(self.raw_addr, self.rd_len as usize);
        self.stage = Stage::S2;
    }
}
