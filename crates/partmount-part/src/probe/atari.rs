//! Atari ST partition table prober (spec §4.3.1).
//!
//! The root sector holds up to 4 entries at offset 0x1C2 and a checksum
//! at offset 510 (big-endian 16-bit words over the whole sector must sum
//! to `0x1234`). An entry whose 3-character id is `XGM` (or, on ICD-style
//! disks, a second table read from the same sector) chains to another
//! root sector holding up to 4 more entries, exactly like a DOS extended
//! partition.

use crate::error::ProbeError;
use crate::list::{PartitionEntry, PartitionList};
use crate::prober::{Magic, ProbeContext, ProbeOutcome, Prober};
use partmount_io::SectorSource;

const ENTRIES_OFFSET: usize = 0x1C2;
const ENTRY_SIZE: usize = 12;
const MAX_ENTRIES: usize = 4;
const CHECKSUM_OFFSET: usize = 510;
const CHECKSUM_TARGET: u16 = 0x1234;
const MAX_CHAIN: u32 = 100;

/// ASCII-only alnum class table (the Atari id field is never treated as
/// locale-dependent alnum, matching the kernel's own partition code).
const fn ascii_alnum_table() -> [bool; 256] {
    let mut table = [false; 256];
    let mut c = 0u8;
    while c < 255 {
        table[c as usize] = c.is_ascii_alphanumeric();
        c += 1;
    }
    table[255] = (255u8).is_ascii_alphanumeric();
    table
}
const ASCII_ALNUM: [bool; 256] = ascii_alnum_table();

fn id_is_valid(id: &[u8; 3]) -> bool {
    id.iter().all(|&b| ASCII_ALNUM[b as usize])
}

fn checksum_ok(sector: &[u8; 512]) -> bool {
    let sum = sector
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_be_bytes([w[0], w[1]])));
    sum == CHECKSUM_TARGET
}

struct RawEntry {
    flag: u8,
    id: [u8; 3],
    start: u32,
    size: u32,
}

fn parse_entry(bytes: &[u8]) -> RawEntry {
    RawEntry {
        flag: bytes[0],
        id: [bytes[1], bytes[2], bytes[3]],
        start: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        size: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
    }
}

fn is_extended(id: &[u8; 3]) -> bool {
    id == b"XGM"
}

pub struct AtariProber;

const MAGICS: [Magic; 0] = [];

impl Prober for AtariProber {
    fn name(&self) -> &'static str {
        "atari"
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
        let sector: [u8; 512] = sector_bytes.try_into().unwrap();

        if !checksum_ok(&sector) {
            log::debug!("atari: root sector checksum mismatch");
            return Ok(ProbeOutcome::None);
        }

        let entries: Vec<RawEntry> = (0..MAX_ENTRIES)
            .map(|i| parse_entry(&sector[ENTRIES_OFFSET + i * ENTRY_SIZE..][..ENTRY_SIZE]))
            .collect();

        if entries.iter().all(|e| e.flag & 0x01 == 0) {
            log::debug!("atari: no active entries in root sector");
            return Ok(ProbeOutcome::None);
        }
        if entries
            .iter()
            .any(|e| e.flag & 0x01 != 0 && !id_is_valid(&e.id))
        {
            log::debug!("atari: non-ASCII-alnum partition id, rejecting");
            return Ok(ProbeOutcome::None);
        }

        let table = list.new_table("atari", 0, String::new());
        if ctx.summary_only {
            return Ok(ProbeOutcome::Ok);
        }

        let mut extended: Option<u32> = None;
        for entry in &entries {
            let partno = list.alloc_partno();
            if entry.flag & 0x01 == 0 {
                continue;
            }
            if is_extended(&entry.id) {
                if extended.is_none() {
                    extended = Some(entry.start);
                }
                continue;
            }
            push(list, table, &entry.id, entry.start as u64, entry.size as u64, partno)?;
        }

        if let Some(root) = extended {
            walk_chain(source, list, table, root as u64)?;
        }

        Ok(ProbeOutcome::Ok)
    }
}

fn push(
    list: &mut PartitionList,
    table: crate::list::TableRef,
    id: &[u8; 3],
    start: u64,
    size: u64,
    partno: u32,
) -> Result<(), ProbeError> {
    let type_string = String::from_utf8_lossy(id).into_owned();
    let type_code = u32::from_be_bytes([0, id[0], id[1], id[2]]) as u64;
    let result = list.add_entry(
        table,
        PartitionEntry {
            start_sector: start,
            size_sector: size,
            type_code,
            type_string,
            flags: 0,
            part_number: partno,
            uuid: String::new(),
            name: String::new(),
            table,
        },
    );
    if let Err(dup) = result {
        log::debug!("atari: duplicate start sector {} skipped", dup.start_sector);
    }
    Ok(())
}

fn walk_chain(
    source: &dyn SectorSource,
    list: &mut PartitionList,
    table: crate::list::TableRef,
    root_start: u64,
) -> Result<(), ProbeError> {
    let mut sub_lba = root_start;
    for hop in 0..MAX_CHAIN {
        let bytes = match source.read_bytes(sub_lba * 512, 512) {
            Ok(b) => b,
            Err(_) => break,
        };
        let sector: [u8; 512] = bytes.try_into().unwrap();
        if !checksum_ok(&sector) {
            log::debug!("atari: extension sector at lba {sub_lba} failed checksum, stopping");
            break;
        }
        let entries: Vec<RawEntry> = (0..MAX_ENTRIES)
            .map(|i| parse_entry(&sector[ENTRIES_OFFSET + i * ENTRY_SIZE..][..ENTRY_SIZE]))
            .collect();

        let mut next = None;
        for entry in &entries {
            let partno = list.alloc_partno();
            if entry.flag & 0x01 == 0 {
                continue;
            }
            if is_extended(&entry.id) {
                if next.is_none() {
                    next = Some(root_start + entry.start as u64);
                }
                continue;
            }
            let absolute_start = sub_lba + entry.start as u64;
            push(list, table, &entry.id, absolute_start, entry.size as u64, partno)?;
        }

        match next {
            Some(n) if n != sub_lba => sub_lba = n,
            _ => break,
        }
        if hop + 1 == MAX_CHAIN {
            return Err(ProbeError::ChainTooLong { limit: MAX_CHAIN });
        }
    }
    Ok(())
}
