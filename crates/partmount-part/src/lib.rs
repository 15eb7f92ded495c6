//! Partition table probing for MBR/DOS, GPT, BSD, Sun, SGI, Atari and
//! AIX disks (§C3, §C4, §C5).
//!
//! The entry point is [`Dispatcher`]: it runs every scheme prober in a
//! fixed order over a [`partmount_io::SectorSource`] and returns a
//! [`PartitionList`] describing every table and entry it found,
//! including tables nested inside another scheme's partitions (a BSD
//! disklabel inside a DOS primary partition, for instance).

mod dispatch;
mod error;
mod list;
mod prober;
mod probe;

pub use dispatch::Dispatcher;
pub use error::ProbeError;
pub use list::{DuplicateStart, PartitionEntry, PartitionList, PartitionTable, TableRef};
pub use prober::{Magic, ProbeContext, ProbeOutcome, Prober};
pub use probe::{AixProber, AtariProber, BsdProber, DosProber, GptProber, SgiProber, SunProber};

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    fn write_mbr_entry(buf: &mut [u8], boot: u8, ptype: u8, start: u32, count: u32) {
        buf[0] = boot;
        buf[4] = ptype;
        buf[8..12].copy_from_slice(&start.to_le_bytes());
        buf[12..16].copy_from_slice(&count.to_le_bytes());
    }

    /// Scenario E1 (spec §8): a plain DOS MBR image with two data
    /// partitions probes cleanly end to end through the dispatcher.
    #[test]
    fn dos_two_partition_image_end_to_end() {
        let mut disk = vec![0u8; 8192 * 512];
        write_mbr_entry(&mut disk[446..462], 0x80, 0x83, 2048, 2048);
        write_mbr_entry(&mut disk[462..478], 0x00, 0x83, 4096, 2048);
        disk[510] = 0x55;
        disk[511] = 0xAA;

        let source = InMemorySource::with_default_sector_size(disk);
        let list = Dispatcher::new().probe(&source, None, false).unwrap();

        assert_eq!(list.tables().count(), 1);
        let (table_ref, table) = list.tables().next().unwrap();
        assert_eq!(table.type_name, "dos");
        let entries: Vec<_> = list.entries_of(table_ref).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].start_sector, 2048);
        assert_eq!(entries[1].start_sector, 4096);
    }
}
