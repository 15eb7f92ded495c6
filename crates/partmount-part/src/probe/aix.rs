//! AIX volume magic-only prober (spec §4.3.1).
//!
//! AIX disks are recognized solely by their big-endian magic number; no
//! partition geometry is parsed, matching blkid's own AIX prober which
//! only ever reports `PTTYPE=aix`.

use crate::error::ProbeError;
use crate::list::PartitionList;
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_io::SectorSource;

const MAGIC: [u8; 4] = [0xC9, 0xC2, 0xD4, 0xC1];

const MAGICS: [Magic; 1] = [Magic {
    pattern: &MAGIC,
    offset: 0,
}];

pub struct AixProber;

impl Prober for AixProber {
    fn name(&self) -> &'static str {
        "aix"
    }

    fn magics(&self) -> &'static [Magic] {
        &MAGICS
    }

    fn probe(
        &self,
        source: &dyn SectorSource,
        list: &mut PartitionList,
        _ctx: &ProbeContext<'_>,
    ) -> Result<ProbeOutcome, ProbeError> {
        let magic = source.read_bytes(0, 4)?;
        if magic != MAGIC {
            log::debug!("aix: magic mismatch");
            return Ok(ProbeOutcome::None);
        }
        list.new_table("aix", 0, String::new());
        Ok(ProbeOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    #[test]
    fn matches_magic_and_reports_no_entries() {
        let mut disk = vec![0u8; 512];
        disk[0..4].copy_from_slice(&MAGIC);
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext::default();
        let outcome = AixProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert_eq!(list.entries().len(), 0);
        assert_eq!(list.tables().count(), 1);
    }
}
