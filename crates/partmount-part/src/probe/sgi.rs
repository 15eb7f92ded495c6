//! SGI volume header prober (spec §4.3.1).

use crate::error::ProbeError;
use crate::list::{PartitionEntry, PartitionList};
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_bytes::checksum::sgi_checksum;
use partmount_io::SectorSource;

const MAGIC: [u8; 4] = [0x0B, 0xE5, 0xA9, 0x41];
const NPARTITIONS: usize = 16;
const PARTITIONS_OFFSET: usize = 100;
const PARTITION_ENTRY_SIZE: usize = 12;
const TYPE_UNUSED: u32 = 0;

const MAGICS: [Magic; 1] = [Magic {
    pattern: &MAGIC,
    offset: 0,
}];

pub struct SgiProber;

impl Prober for SgiProber {
    fn name(&self) -> &'static str {
        "sgi"
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
        let header_bytes = source.read_bytes(0, 512)?;
        let header: [u8; 512] = header_bytes.try_into().unwrap();

        if header[0..4] != MAGIC {
            log::debug!("sgi: magic mismatch");
            return Ok(ProbeOutcome::None);
        }
        if sgi_checksum(&header) != 0 {
            log::debug!("sgi: header checksum mismatch");
            return Ok(ProbeOutcome::None);
        }

        let table = list.new_table("sgi", 0, String::new());
        if ctx.summary_only {
            return Ok(ProbeOutcome::Ok);
        }

        for i in 0..NPARTITIONS {
            let off = PARTITIONS_OFFSET + i * PARTITION_ENTRY_SIZE;
            let num_blocks = u32::from_be_bytes(header[off..off + 4].try_into().unwrap());
            let first_block = u32::from_be_bytes(header[off + 4..off + 8].try_into().unwrap());
            let part_type = u32::from_be_bytes(header[off + 8..off + 12].try_into().unwrap());
            let partno = list.alloc_partno();
            if part_type == TYPE_UNUSED || num_blocks == 0 {
                continue;
            }
            let result = list.add_entry(
                table,
                PartitionEntry {
                    start_sector: first_block as u64,
                    size_sector: num_blocks as u64,
                    type_code: part_type as u64,
                    type_string: format!("{:#x}", part_type),
                    flags: 0,
                    part_number: partno,
                    uuid: String::new(),
                    name: String::new(),
                    table,
                },
            );
            if let Err(dup) = result {
                log::debug!("sgi: duplicate start sector {} skipped", dup.start_sector);
            }
        }

        Ok(ProbeOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    fn header_with_checksum(mut header: Vec<u8>) -> Vec<u8> {
        header[0..4].copy_from_slice(&MAGIC);
        let csum_off = 4;
        header[csum_off..csum_off + 4].copy_from_slice(&[0, 0, 0, 0]);
        let fixed: [u8; 512] = header[..512].try_into().unwrap();
        let sum = sgi_checksum(&fixed);
        let csum = (0u32).wrapping_sub(sum);
        header[csum_off..csum_off + 4].copy_from_slice(&csum.to_be_bytes());
        header
    }

    #[test]
    fn probes_one_partition() {
        let mut header = vec![0u8; 512];
        let off = PARTITIONS_OFFSET;
        header[off..off + 4].copy_from_slice(&4096u32.to_be_bytes());
        header[off + 4..off + 8].copy_from_slice(&0u32.to_be_bytes());
        header[off + 8..off + 12].copy_from_slice(&1u32.to_be_bytes());
        let header = header_with_checksum(header);

        let source = InMemorySource::with_default_sector_size(header);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = SgiProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].size_sector, 4096);
    }

    #[test]
    fn rejects_bad_magic() {
        let header = vec![0u8; 512];
        let source = InMemorySource::with_default_sector_size(header);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        assert_eq!(
            SgiProber.probe(&source, &mut list, &ctx).unwrap(),
            ProbeOutcome::None
        );
    }
}
