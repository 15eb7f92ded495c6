//! Sun (SPARC) disklabel prober (spec §4.3.1).

use crate::error::ProbeError;
use crate::list::{PartitionEntry, PartitionList};
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_bytes::checksum::sun_checksum;
use partmount_io::SectorSource;

const MAGIC_OFFSET: u64 = 508;
const MAGIC: [u8; 2] = [0xDA, 0xBE];
const NPARTITIONS: usize = 8;
/// Each `sun_partition` is 8 bytes (cylinder, num_sectors as big-endian
/// u32 pairs); the array starts right after the 128-byte ASCII label.
const PARTITIONS_OFFSET: usize = 128;
const PARTITION_ENTRY_SIZE: usize = 8;
/// `vtoc` partition tags live in a parallel array further in the label;
/// tag 0 means unused.
const TAGS_OFFSET: usize = 192;

const MAGICS: [Magic; 1] = [Magic {
    pattern: &MAGIC,
    offset: MAGIC_OFFSET,
}];

pub struct SunProber;

impl Prober for SunProber {
    fn name(&self) -> &'static str {
        "sun"
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
        let label_bytes = source.read_bytes(0, 512)?;
        let label: [u8; 512] = label_bytes.try_into().unwrap();

        if label[MAGIC_OFFSET as usize..MAGIC_OFFSET as usize + 2] != MAGIC {
            log::debug!("sun: magic mismatch");
            return Ok(ProbeOutcome::None);
        }
        if sun_checksum(&label) != 0 {
            log::debug!("sun: label checksum mismatch");
            return Ok(ProbeOutcome::None);
        }

        let table = list.new_table("sun", 0, String::new());
        if ctx.summary_only {
            return Ok(ProbeOutcome::Ok);
        }

        for i in 0..NPARTITIONS {
            let off = PARTITIONS_OFFSET + i * PARTITION_ENTRY_SIZE;
            let start_cylinder = u32::from_be_bytes(label[off..off + 4].try_into().unwrap());
            let num_sectors = u32::from_be_bytes(label[off + 4..off + 8].try_into().unwrap());
            let tag = u16::from_be_bytes(
                label[TAGS_OFFSET + i * 2..TAGS_OFFSET + i * 2 + 2]
                    .try_into()
                    .unwrap(),
            );
            let partno = list.alloc_partno();
            if tag == 0 || num_sectors == 0 {
                continue;
            }
            let result = list.add_entry(
                table,
                PartitionEntry {
                    start_sector: start_cylinder as u64,
                    size_sector: num_sectors as u64,
                    type_code: tag as u64,
                    type_string: format!("{:#x}", tag),
                    flags: 0,
                    part_number: partno,
                    uuid: String::new(),
                    name: String::new(),
                    table,
                },
            );
            if let Err(dup) = result {
                log::debug!("sun: duplicate start sector {} skipped", dup.start_sector);
            }
        }

        Ok(ProbeOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    fn label_with_checksum(mut label: Vec<u8>) -> Vec<u8> {
        label[MAGIC_OFFSET as usize] = MAGIC[0];
        label[MAGIC_OFFSET as usize + 1] = MAGIC[1];
        let csum_off = 510;
        label[csum_off..csum_off + 2].copy_from_slice(&[0, 0]);
        let fixed: [u8; 512] = label[..512].try_into().unwrap();
        let csum = sun_checksum(&fixed);
        label[csum_off..csum_off + 2].copy_from_slice(&csum.to_be_bytes());
        label
    }

    #[test]
    fn probes_one_slice() {
        let mut label = vec![0u8; 512];
        let off = PARTITIONS_OFFSET;
        label[off..off + 4].copy_from_slice(&0u32.to_be_bytes());
        label[off + 4..off + 8].copy_from_slice(&2048u32.to_be_bytes());
        label[TAGS_OFFSET..TAGS_OFFSET + 2].copy_from_slice(&2u16.to_be_bytes());
        let label = label_with_checksum(label);

        let source = InMemorySource::with_default_sector_size(label);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = SunProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].size_sector, 2048);
    }

    #[test]
    fn rejects_bad_magic() {
        let label = vec![0u8; 512];
        let source = InMemorySource::with_default_sector_size(label);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        assert_eq!(
            SunProber.probe(&source, &mut list, &ctx).unwrap(),
            ProbeOutcome::None
        );
    }
}
