//! BSD disklabel prober (spec §4.3.1, BSD nesting case).
//!
//! A BSD disklabel sits 512 bytes into the slice it describes (whether
//! that slice is a whole disk or, as is usual on i386/amd64, a single
//! DOS primary partition the dispatcher is recursing into).

use crate::error::ProbeError;
use crate::list::{PartitionEntry, PartitionList};
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_bytes::types::endian::Endian;
use partmount_bytes::types::number::{U16, U32};
use partmount_bytes::LittleEndian;
use partmount_io::SectorSource;

const LABEL_OFFSET: u64 = 512;
const MAGIC: u32 = 0x8256_4557;
const PARTITIONS_OFFSET: usize = 148;
const PARTITION_ENTRY_SIZE: usize = 16;
const MAX_PARTITIONS: u16 = 22;

const FSTYPE_UNUSED: u8 = 0;

const MAGICS: [Magic; 1] = [Magic {
    pattern: &MAGIC.to_le_bytes(),
    offset: LABEL_OFFSET,
}];

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RawPartition {
    size: U32<LittleEndian>,
    offset: U32<LittleEndian>,
    fsize: U32<LittleEndian>,
    fstype: u8,
    frag: u8,
    cpg: U16<LittleEndian>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawPartition>(), PARTITION_ENTRY_SIZE);

pub struct BsdProber;

impl Prober for BsdProber {
    fn name(&self) -> &'static str {
        "bsd"
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
        let header = source.read_bytes(LABEL_OFFSET, 152)?;
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != MAGIC {
            log::debug!("bsd: magic mismatch at label offset");
            return Ok(ProbeOutcome::None);
        }
        let npartitions = u16::from_le_bytes(header[138..140].try_into().unwrap());
        if npartitions == 0 || npartitions > MAX_PARTITIONS {
            log::debug!("bsd: implausible partition count {npartitions}");
            return Ok(ProbeOutcome::None);
        }

        let table = list.new_table("bsd", LABEL_OFFSET, String::new());
        if ctx.summary_only {
            return Ok(ProbeOutcome::Ok);
        }

        let array_len = npartitions as usize * PARTITION_ENTRY_SIZE;
        let array = source.read_bytes(LABEL_OFFSET + PARTITIONS_OFFSET as u64, array_len)?;
        for raw in array.chunks_exact(PARTITION_ENTRY_SIZE) {
            let entry: RawPartition = *bytemuck::from_bytes(raw);
            let partno = list.alloc_partno();
            if entry.fstype == FSTYPE_UNUSED || entry.size.get() == 0 {
                continue;
            }
            let result = list.add_entry(
                table,
                PartitionEntry {
                    start_sector: entry.offset.get() as u64,
                    size_sector: entry.size.get() as u64,
                    type_code: entry.fstype as u64,
                    type_string: format!("{:#x}", entry.fstype),
                    flags: 0,
                    part_number: partno,
                    uuid: String::new(),
                    name: String::new(),
                    table,
                },
            );
            if let Err(dup) = result {
                log::debug!("bsd: duplicate start sector {} skipped", dup.start_sector);
            }
        }

        Ok(ProbeOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    #[test]
    fn probes_two_slices() {
        let mut disk = vec![0u8; 4096];
        disk[512..516].copy_from_slice(&MAGIC.to_le_bytes());
        disk[512 + 138..512 + 140].copy_from_slice(&2u16.to_le_bytes());
        let p0 = 512 + PARTITIONS_OFFSET;
        disk[p0..p0 + 4].copy_from_slice(&200u32.to_le_bytes());
        disk[p0 + 4..p0 + 8].copy_from_slice(&0u32.to_le_bytes());
        disk[p0 + 12] = 7; // fstype
        let p1 = p0 + PARTITION_ENTRY_SIZE;
        disk[p1..p1 + 4].copy_from_slice(&300u32.to_le_bytes());
        disk[p1 + 4..p1 + 8].copy_from_slice(&200u32.to_le_bytes());
        disk[p1 + 12] = 7;

        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = BsdProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert_eq!(list.entries().len(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let disk = vec![0u8; 4096];
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        assert_eq!(
            BsdProber.probe(&source, &mut list, &ctx).unwrap(),
            ProbeOutcome::None
        );
    }
}
