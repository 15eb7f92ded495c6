//! GUID Partition Table prober (spec §4.3.2).

use crate::error::ProbeError;
use crate::list::{PartitionEntry, PartitionList};
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_bytes::crc::crc32_exclude;
use partmount_bytes::types::endian::Endian;
use partmount_bytes::types::number::{U32, U64};
use partmount_bytes::utf16::FixedUtf16Str;
use partmount_bytes::{Guid, LittleEndian};
use partmount_io::SectorSource;

const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
const HEADER_FIXED_SIZE: usize = 92;
const ENTRY_SIZE_EXPECTED: u32 = 128;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RawHeader {
    signature: [u8; 8],
    revision: U32<LittleEndian>,
    header_size: U32<LittleEndian>,
    header_crc32: U32<LittleEndian>,
    reserved: U32<LittleEndian>,
    my_lba: U64<LittleEndian>,
    alternate_lba: U64<LittleEndian>,
    first_usable_lba: U64<LittleEndian>,
    last_usable_lba: U64<LittleEndian>,
    disk_guid: Guid,
    partition_entry_lba: U64<LittleEndian>,
    num_partition_entries: U32<LittleEndian>,
    size_of_partition_entry: U32<LittleEndian>,
    partition_entry_array_crc32: U32<LittleEndian>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawHeader>(), HEADER_FIXED_SIZE);

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RawEntry {
    partition_type_guid: Guid,
    unique_partition_guid: Guid,
    starting_lba: U64<LittleEndian>,
    ending_lba: U64<LittleEndian>,
    attributes: U64<LittleEndian>,
    partition_name: FixedUtf16Str<36>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawEntry>(), ENTRY_SIZE_EXPECTED as usize);

pub struct GptProber;

impl Prober for GptProber {
    fn name(&self) -> &'static str {
        "gpt"
    }

    fn magics(&self) -> &'static [Magic] {
        &[]
    }

    fn probe(
        &self,
        source: &dyn SectorSource,
        list: &mut PartitionList,
        ctx: &ProbeContext<'_>,
    ) -> Result<ProbeOutcome, ProbeError> {
        let sector_size = source.logical_sector_size() as u64;
        let total_sectors = source.total_bytes() / sector_size;

        if ctx.pmbr_gate && !protective_mbr_present(source)? {
            log::debug!("gpt: no protective MBR, rejecting");
            return Ok(ProbeOutcome::None);
        }

        let primary = read_and_validate_header(source, 1, sector_size, total_sectors)?;
        let header = match primary {
            Some(h) => h,
            None => {
                log::debug!("gpt: primary header invalid, trying backup");
                match read_and_validate_header(source, total_sectors - 1, sector_size, total_sectors)? {
                    Some(h) => h,
                    None => {
                        log::debug!("gpt: backup header also invalid, rejecting");
                        return Ok(ProbeOutcome::None);
                    }
                }
            }
        };

        let array_bytes_len = header.num_partition_entries.get() as u64
            * header.size_of_partition_entry.get() as u64;
        if header.size_of_partition_entry.get() != ENTRY_SIZE_EXPECTED || array_bytes_len == 0 {
            log::debug!("gpt: implausible entry array size, rejecting");
            return Ok(ProbeOutcome::None);
        }
        let array_bytes = source.read_bytes(
            header.partition_entry_lba.get() * sector_size,
            array_bytes_len as usize,
        )?;
        if partmount_bytes::crc::Crc32IsoHdlc::checksum(&array_bytes)
            != header.partition_entry_array_crc32.get()
        {
            log::debug!("gpt: partition entry array crc32 mismatch, rejecting");
            return Ok(ProbeOutcome::None);
        }

        let disk_id = header.disk_guid.guid_swap().to_printable_string().to_string();
        let table = list.new_table("gpt", header.my_lba.get() * sector_size, disk_id);

        if ctx.summary_only {
            return Ok(ProbeOutcome::Ok);
        }

        for raw in array_bytes.chunks_exact(ENTRY_SIZE_EXPECTED as usize) {
            let entry: RawEntry = *bytemuck::from_bytes(raw);
            let partno = list.alloc_partno();
            if entry.partition_type_guid.is_zero() {
                continue;
            }
            let start = entry.starting_lba.get();
            let end = entry.ending_lba.get();
            if start < header.first_usable_lba.get() || end > header.last_usable_lba.get() || end < start {
                log::debug!("gpt: entry {partno} out of usable range, skipping");
                continue;
            }
            let sector_factor = sector_size / 512;
            let start_512 = start * sector_factor;
            let size_512 = (end - start + 1) * sector_factor;
            let type_guid = entry.partition_type_guid.guid_swap();
            let unique_guid = entry.unique_partition_guid.guid_swap();
            let name = entry.partition_name.to_trimmed_string();
            let result = list.add_entry(
                table,
                PartitionEntry {
                    start_sector: start_512,
                    size_sector: size_512,
                    type_code: u32::from_le_bytes(
                        entry.partition_type_guid.as_bytes()[0..4].try_into().unwrap(),
                    ) as u64,
                    type_string: type_guid.to_printable_string().to_string(),
                    flags: entry.attributes.get(),
                    part_number: partno,
                    uuid: unique_guid.to_printable_string().to_string(),
                    name: PartitionEntry::truncate_name(&name),
                    table,
                },
            );
            if let Err(dup) = result {
                log::debug!("gpt: duplicate start lba {} skipped", dup.start_sector);
            }
        }

        Ok(ProbeOutcome::Ok)
    }
}

fn protective_mbr_present(source: &dyn SectorSource) -> Result<bool, ProbeError> {
    let sector = source.read_bytes(0, 512)?;
    if sector[510..512] != [0x55, 0xAA] {
        return Ok(false);
    }
    let entries = &sector[446..510];
    Ok(entries.chunks_exact(16).any(|e| e[4] == 0xEE))
}

fn read_and_validate_header(
    source: &dyn SectorSource,
    lba: u64,
    sector_size: u64,
    total_sectors: u64,
) -> Result<Option<RawHeader>, ProbeError> {
    let bytes = match source.read_bytes(lba * sector_size, HEADER_FIXED_SIZE) {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    let header: RawHeader = *bytemuck::from_bytes(&bytes[..]);
    if header.signature != GPT_SIGNATURE {
        return Ok(None);
    }
    let stored_crc = header.header_crc32.get();
    let header_len = header.header_size.get() as usize;
    if !(HEADER_FIXED_SIZE..=sector_size as usize).contains(&header_len) {
        return Ok(None);
    }
    let full_header_bytes = source.read_bytes(lba * sector_size, header_len)?;
    let computed = crc32_exclude(&full_header_bytes, 16..20);
    if computed != stored_crc {
        return Ok(None);
    }
    if header.my_lba.get() != lba {
        return Ok(None);
    }
    if header.first_usable_lba.get() > header.last_usable_lba.get()
        || header.last_usable_lba.get() >= total_sectors
    {
        return Ok(None);
    }
    Ok(Some(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    fn build_disk() -> Vec<u8> {
        let sector_size = 512u64;
        let total_sectors = 2048u64;
        let mut disk = vec![0u8; (total_sectors * sector_size) as usize];

        // Protective MBR.
        disk[446] = 0x00;
        disk[450] = 0xEE;
        disk[454..458].copy_from_slice(&1u32.to_le_bytes());
        disk[458..462].copy_from_slice(&(total_sectors as u32 - 1).to_le_bytes());
        disk[510] = 0x55;
        disk[511] = 0xAA;

        let entry_lba = 2u64;
        let num_entries = 128u32;
        let entry_size = 128u32;
        let array_bytes_len = (num_entries * entry_size) as usize;
        let mut array = vec![0u8; array_bytes_len];
        let type_guid = Guid::BASIC_DATA_PART.guid_swap();
        array[0..16].copy_from_slice(type_guid.as_bytes());
        array[32..40].copy_from_slice(&34u64.to_le_bytes());
        array[40..48].copy_from_slice(&(34u64 + 99).to_le_bytes());
        let array_crc = partmount_bytes::crc::Crc32IsoHdlc::checksum(&array);

        let header_offset = (sector_size) as usize;
        disk[header_offset..header_offset + 8].copy_from_slice(&GPT_SIGNATURE);
        disk[header_offset + 8..header_offset + 12].copy_from_slice(&1u32.to_le_bytes());
        disk[header_offset + 12..header_offset + 16]
            .copy_from_slice(&(HEADER_FIXED_SIZE as u32).to_le_bytes());
        // header_crc32 at +16 left zero for now.
        disk[header_offset + 24..header_offset + 32].copy_from_slice(&1u64.to_le_bytes());
        disk[header_offset + 32..header_offset + 40]
            .copy_from_slice(&(total_sectors - 1).to_le_bytes());
        disk[header_offset + 40..header_offset + 48].copy_from_slice(&34u64.to_le_bytes());
        disk[header_offset + 48..header_offset + 56]
            .copy_from_slice(&(total_sectors - 34).to_le_bytes());
        disk[header_offset + 56..header_offset + 72].copy_from_slice(Guid::ZERO.as_bytes());
        disk[header_offset + 72..header_offset + 80].copy_from_slice(&entry_lba.to_le_bytes());
        disk[header_offset + 80..header_offset + 84].copy_from_slice(&num_entries.to_le_bytes());
        disk[header_offset + 84..header_offset + 88].copy_from_slice(&entry_size.to_le_bytes());
        disk[header_offset + 88..header_offset + 92].copy_from_slice(&array_crc.to_le_bytes());

        let header_crc = crc32_exclude(&disk[header_offset..header_offset + HEADER_FIXED_SIZE], 16..20);
        disk[header_offset + 16..header_offset + 20].copy_from_slice(&header_crc.to_le_bytes());

        let array_offset = (entry_lba * sector_size) as usize;
        disk[array_offset..array_offset + array_bytes_len].copy_from_slice(&array);

        disk
    }

    #[test]
    fn probes_single_partition() {
        let disk = build_disk();
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext {
            pmbr_gate: true,
            ..Default::default()
        };
        let outcome = GptProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::Ok);
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].start_sector, 34);
        assert_eq!(list.entries()[0].size_sector, 100);
    }

    #[test]
    fn rejects_without_protective_mbr() {
        let mut disk = build_disk();
        disk[510] = 0x00;
        disk[511] = 0x00;
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext {
            pmbr_gate: true,
            ..Default::default()
        };
        let outcome = GptProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::None);
    }

    #[test]
    fn rejects_bad_header_crc() {
        let mut disk = build_disk();
        disk[512 + 16] ^= 0xFF;
        let source = InMemorySource::with_default_sector_size(disk);
        let mut list = PartitionList::new();
        let ctx = ProbeContext {
            pmbr_gate: true,
            ..Default::default()
        };
        let outcome = GptProber.probe(&source, &mut list, &ctx).unwrap();
        assert_eq!(outcome, ProbeOutcome::None);
    }
}
