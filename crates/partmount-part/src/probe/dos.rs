//! DOS/MBR partition table prober (spec §4.3.1).

use crate::error::ProbeError;
use crate::list::{PartitionEntry, PartitionList};
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_bytes::types::endian::Endian;
use partmount_bytes::types::number::U32;
use partmount_bytes::LittleEndian;
use partmount_io::SectorSource;

const SIGNATURE_OFFSET: u64 = 510;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];
const TABLE_OFFSET: u64 = 446;
const ENTRY_SIZE: usize = 16;
const PRIMARY_SLOTS: usize = 4;

const TYPE_EMPTY: u8 = 0x00;
const TYPE_GPT_PROTECTIVE: u8 = 0xEE;
const TYPE_DOS_EXTENDED: u8 = 0x05;
const TYPE_WIN98_EXTENDED_LBA: u8 = 0x0F;
const TYPE_LINUX_EXTENDED: u8 = 0x85;

const MAX_EXTENDED_CHAIN: u32 = 100;

fn is_extended(type_code: u8) -> bool {
    matches!(
        type_code,
        TYPE_DOS_EXTENDED | TYPE_WIN98_EXTENDED_LBA | TYPE_LINUX_EXTENDED
    )
}

/// Scheme name a DOS partition's type code should be sub-probed with, if
/// any (spec §4.3.1's BSD/Sun/UnixWare/Solaris/Minix nesting). The
/// dispatcher owns the actual recursive probe call.
pub(crate) fn nested_scheme_for_type(type_code: u8) -> Option<&'static str> {
    match type_code {
        0xA5 | 0xA6 | 0xA9 | 0xEB => Some("bsd"),
        0x82 | 0xBF => Some("sun"),
        _ => None,
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RawEntry {
    boot_indicator: u8,
    start_chs: [u8; 3],
    partition_type: u8,
    end_chs: [u8; 3],
    start_sector: U32<LittleEndian>,
    sector_count: U32<LittleEndian>,
}

impl RawEntry {
    fn from_bytes(bytes: &[u8]) -> Self {
        *bytemuck::from_bytes(&bytes[..core::mem::size_of::<Self>()])
    }

    fn is_boot_indicator_valid(&self) -> bool {
        matches!(self.boot_indicator, 0x00 | 0x80)
    }
}

pub struct DosProber;

static_assertions::const_assert_eq!(core::mem::size_of::<RawEntry>(), ENTRY_SIZE);

const MAGICS: [Magic; 1] = [Magic {
    pattern: &SIGNATURE,
    offset: SIGNATURE_OFFSET,
}];

impl Prober for DosProber {
    fn name(&self) -> &'static str {
        "dos"
    }

    fn magics(&self) -> &'static [Magic] {
        &MAGICS
    }

    fn probe(
        &self,
        source: &dyn SectorSource,
        list: &mut PartitionList,
        ctx: &ProbeContext<'_>,
    ) -> Result<ProbeOutcome, ProbeError> {
        let sector_bytes = source.read_bytes(0, 512)?;
        if sector_bytes[SIGNATURE_OFFSET as usize..SIGNATURE_OFFSET as usize + 2] != SIGNATURE {
            log::debug!("dos: missing boot signature");
            return Ok(ProbeOutcome::None);
        }
        let entries_bytes = &sector_bytes[TABLE_OFFSET as usize..SIGNATURE_OFFSET as usize];

        let entries: Vec<RawEntry> = entries_bytes
            .chunks_exact(ENTRY_SIZE)
            .map(RawEntry::from_bytes)
            .collect();
        debug_assert_eq!(entries.len(), PRIMARY_SLOTS);

        if entries.iter().any(|e| !e.is_boot_indicator_valid()) {
            log::debug!("dos: invalid boot indicator byte, rejecting");
            return Ok(ProbeOutcome::None);
        }

        if is_protective_gpt(&entries, source.total_bytes() / 512) {
            log::debug!("dos: looks like a protective MBR, deferring to gpt");
            return Ok(ProbeOutcome::None);
        }

        if ctx.is_vfat(source) {
            log::debug!("dos: vfat oracle claimed this sector, rejecting");
            return Ok(ProbeOutcome::None);
        }

        let disk_id: [u8; 4] = sector_bytes[440..444].try_into().unwrap();
        let table = list.new_table("dos", 0, partmount_bytes::checksum::dos_disk_id(disk_id));

        if ctx.summary_only {
            return Ok(ProbeOutcome::Ok);
        }

        let mut extended_start: Option<u64> = None;
        for entry in &entries {
            let partno = list.alloc_partno();
            if entry.partition_type == TYPE_EMPTY {
                continue;
            }
            if is_extended(entry.partition_type) {
                if extended_start.is_none() {
                    extended_start = Some(entry.start_sector.get() as u64);
                }
                continue;
            }
            push_entry(list, table, entry, partno)?;
        }

        list.force_next_partno(5);

        if let Some(head_lba) = extended_start {
            walk_extended_chain(source, list, table, head_lba)?;
        }

        Ok(ProbeOutcome::Ok)
    }
}

fn is_protective_gpt(entries: &[RawEntry], disk_sectors: u64) -> bool {
    let protective: Vec<&RawEntry> = entries
        .iter()
        .filter(|e| e.partition_type == TYPE_GPT_PROTECTIVE)
        .collect();
    let [only] = protective[..] else {
        return false;
    };
    only.start_sector.get() == 1 && (only.sector_count.get() as u64) >= disk_sectors.saturating_sub(1).min(u32::MAX as u64)
}

fn push_entry(
    list: &mut PartitionList,
    table: crate::list::TableRef,
    entry: &RawEntry,
    partno: u32,
) -> Result<(), ProbeError> {
    let start = entry.start_sector.get() as u64;
    let size = entry.sector_count.get() as u64;
    let type_code = entry.partition_type;
    match list.add_entry(
        table,
        PartitionEntry {
            start_sector: start,
            size_sector: size,
            type_code: type_code as u64,
            type_string: format!("0x{:02x}", type_code),
            flags: entry.boot_indicator as u64,
            part_number: partno,
            uuid: String::new(),
            name: String::new(),
            table,
        },
    ) {
        Ok(()) => Ok(()),
        Err(dup) => {
            log::debug!("dos: duplicate start sector {} skipped", dup.start_sector);
            Ok(())
        }
    }
}

fn walk_extended_chain(
    source: &dyn SectorSource,
    list: &mut PartitionList,
    table: crate::list::TableRef,
    head_lba: u64,
) -> Result<(), ProbeError> {
    let mut ebr_lba = head_lba;
    for hop in 0..MAX_EXTENDED_CHAIN {
        let offset = ebr_lba * 512;
        let sector = match source.read_bytes(offset, 512) {
            Ok(bytes) => bytes,
            Err(_) => break,
        };
        if sector[SIGNATURE_OFFSET as usize..SIGNATURE_OFFSET as usize + 2] != SIGNATURE {
            log::debug!("dos: ebr at lba {ebr_lba} missing signature, stopping chain");
            break;
        }
        let slots = &sector[TABLE_OFFSET as usize..SIGNATURE_OFFSET as usize];
        let data = RawEntry::from_bytes(&slots[0..ENTRY_SIZE]);
        let link = RawEntry::from_bytes(&slots[ENTRY_SIZE..2 * ENTRY_SIZE]);

        let partno = list.alloc_partno();
        if data.partition_type != TYPE_EMPTY {
            let mut entry = data;
            let absolute_start = ebr_lba + entry.start_sector.get() as u64;
            entry.start_sector = U32::new(absolute_start.min(u32::MAX as u64) as u32);
            push_entry_absolute(list, table, &entry, absolute_start, partno)?;
        }

        if link.partition_type == TYPE_EMPTY || !is_extended(link.partition_type) {
            break;
        }
        let next = head_lba + link.start_sector.get() as u64;
        if next == ebr_lba {
            return Err(ProbeError::ChainTooLong {
                limit: MAX_EXTENDED_CHAIN,
            });
        }
        ebr_lba = next;
        if hop + 1 == MAX_EXTENDED_CHAIN {
            return Err(ProbeError::ChainTooLong {
                limit: MAX_EXTENDED_CHAIN,
            });
        }
    }
    Ok(())
}

fn push_entry_absolute(
    list: &mut PartitionList,
    table: crate::list::TableRef,
    entry: &RawEntry,
    absolute_start: u64,
    partno: u32,
) -> Result<(), ProbeError> {
    let size = entry.sector_count.get() as u64;
    let type_code = entry.partition_type;
    match list.add_entry(
        table,
        PartitionEntry {
            start_sector: absolute_start,
            size_sector: size,
            type_code: type_code as u64,
            type_string: format!("0x{:02x}", type_code),
            flags: entry.boot_indicator as u64,
            part_number: partno,
            uuid: String::new(),
            name: String::new(),
            table,
        },
    ) {
        Ok(()) => Ok(()),
        Err(dup) => {
            log::debug!(
                "dos: duplicate logical start sector {} skipped",
                dup.start_sector
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    fn write_entry(buf: &mut [u8], boot: u8, ptype: u8, start: u32, count: u32) {
        buf[0] = boot;
        buf[1..4].fill(0);
        buf[4] = ptype;
        buf[5..8].fill(0);
        buf[8..12].copy_from_slice(&start.to_le_bytes());
        buf[12..16].copy_from_slice(&count.to_le_bytes());
    }

    fn blank_disk(sectors: u64) -> Vec<u8> {
        vec![0u8; (sectors * 512) as usize]
    }

    #[test]
    fn probes_two_primary_partitions() {
        let mut disk = blank_disk(4096);
        write_entry(&mut disk[446..462], 0x80, 0x83, 2048, 1024);
        write_entry(&mut disk[462..478], 0x00, 0x83, 3072, 1024);
        disk[510] = 0x55;
        disk[511] = 0xAA;
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = DosProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert_eq!(list.entries().len(), 2);
        assert_eq!(list.entries()[0].part_number, 1);
        assert_eq!(list.entries()[1].part_number, 2);
    }

    #[test]
    fn rejects_missing_signature() {
        let disk = blank_disk(64);
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = DosProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::None);
    }

    #[test]
    fn defers_to_gpt_on_protective_entry() {
        let mut disk = blank_disk(4096);
        write_entry(&mut disk[446..462], 0x00, TYPE_GPT_PROTECTIVE, 1, 4095);
        disk[510] = 0x55;
        disk[511] = 0xAA;
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = DosProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::None);
    }

    #[test]
    fn empty_primary_slot_still_advances_partno() {
        let mut disk = blank_disk(4096);
        write_entry(&mut disk[462..478], 0x00, 0x83, 2048, 1024);
        disk[510] = 0x55;
        disk[511] = 0xAA;
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        DosProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(list.entries()[0].part_number, 2);
        assert_eq!(list.peek_next_partno(), 5);
    }
}
