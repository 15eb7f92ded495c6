//! In-memory representation of partition tables and their entries (§C3).

/// Index of a [`PartitionTable`] within a [`PartitionList`]'s table
/// arena. Stands in for the reference-counted table pointer of a
/// pointer-based implementation (spec §9 design note): instead of a
/// manual refcount, the arena tracks how many live entries reference
/// each table and a table is considered released once that count
/// reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef(pub(crate) usize);

/// A probed partition table: one DOS MBR, one GPT header, one BSD
/// disklabel, etc.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    /// Scheme name, e.g. `"dos"`, `"gpt"`, `"bsd"`. Matches the
    /// `PTTYPE` vocabulary in spec §6.
    pub type_name: &'static str,
    /// Byte offset of the table's anchor structure (sector 0 for DOS,
    /// the primary GPT header's LBA*sector_size for GPT, …) on the
    /// device it was probed from. For a nested table this offset is
    /// relative to the same device as the parent, not to the parent's
    /// own window.
    pub byte_offset: u64,
    /// Disk-level identifier: an 8-hex-char DOS disk signature or a
    /// printable GPT disk GUID. Empty for schemes with no disk id.
    pub id_string: String,
    /// The table this one was nested inside of, if any (e.g. a BSD
    /// disklabel inside a DOS partition).
    pub parent: Option<TableRef>,
    pub(crate) entry_count: usize,
}

impl PartitionTable {
    /// A table is released once its last referencing entry is
    /// removed; `PartitionList::remove_entry` enforces this.
    pub fn is_released(&self) -> bool {
        self.entry_count == 0
    }
}

/// A single partition as produced by a prober.
///
/// Sector units are always expressed in 512-byte logical sectors
/// regardless of the underlying device's native sector size; the
/// conversion from the device's actual sector size happens once, at
/// ingestion, inside the probers (spec §3).
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    /// Start, in 512-byte sectors.
    pub start_sector: u64,
    /// Size, in 512-byte sectors.
    pub size_sector: u64,
    /// Raw, scheme-specific type code (e.g. the DOS type byte, or the
    /// low 32 bits of a GPT type GUID's first field) for quick
    /// comparisons; `type_string` carries the full printable form.
    pub type_code: u64,
    pub type_string: String,
    pub flags: u64,
    /// Kernel-compatible partition number; may skip numbers for empty
    /// primary slots (spec §3).
    pub part_number: u32,
    pub uuid: String,
    /// Partition name, UTF-8, truncated to at most 128 bytes (spec
    /// §3's `name[128 bytes UTF-8]`).
    pub name: String,
    pub table: TableRef,
}

impl PartitionEntry {
    pub const MAX_NAME_BYTES: usize = 128;

    /// Truncates `name` to at most [`Self::MAX_NAME_BYTES`] bytes,
    /// always on a UTF-8 character boundary.
    pub fn truncate_name(name: &str) -> String {
        if name.len() <= Self::MAX_NAME_BYTES {
            return name.to_owned();
        }
        let mut end = Self::MAX_NAME_BYTES;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_owned()
    }

    /// End sector (exclusive), in 512-byte sectors.
    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.size_sector
    }
}

/// Owns every [`PartitionTable`] and [`PartitionEntry`] discovered
/// while probing one device, plus the counters that make kernel
/// partition numbering and nested-table linkage well-defined.
#[derive(Debug, Clone, Default)]
pub struct PartitionList {
    tables: Vec<PartitionTable>,
    entries: Vec<PartitionEntry>,
    /// Monotonically increasing counter used for kernel-compatible
    /// partition numbering, including reserved gaps for empty primary
    /// slots (spec §3).
    next_partno: u32,
    /// Back-reference set while a nested probe is in flight, so newly
    /// created tables can record their `parent` (spec §3, §4.4).
    next_parent: Option<TableRef>,
}

impl PartitionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new table, returning a stable reference to it. If a
    /// nested probe is in progress ([`PartitionList::set_parent_hint`]),
    /// the new table's `parent` is set automatically.
    pub fn new_table(
        &mut self,
        type_name: &'static str,
        byte_offset: u64,
        id_string: impl Into<String>,
    ) -> TableRef {
        let table = PartitionTable {
            type_name,
            byte_offset,
            id_string: id_string.into(),
            parent: self.next_parent,
            entry_count: 0,
        };
        self.tables.push(table);
        TableRef(self.tables.len() - 1)
    }

    pub fn table(&self, r: TableRef) -> &PartitionTable {
        &self.tables[r.0]
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableRef, &PartitionTable)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(i, t)| (TableRef(i), t))
    }

    /// Sets the parent table newly-created tables should link to,
    /// for the duration of a nested probe. Cleared with
    /// [`PartitionList::clear_parent_hint`].
    pub fn set_parent_hint(&mut self, parent: TableRef) {
        self.next_parent = Some(parent);
    }

    pub fn clear_parent_hint(&mut self) {
        self.next_parent = None;
    }

    /// Next kernel-compatible partition number, without consuming it.
    pub fn peek_next_partno(&self) -> u32 {
        self.next_partno.max(1)
    }

    /// Forces the next partition number to at least `n` (DOS forces
    /// this to 5 once primary slots are exhausted, spec §4.3.1).
    pub fn force_next_partno(&mut self, n: u32) {
        self.next_partno = self.next_partno.max(n);
    }

    /// Allocates and returns the next partition number, advancing the
    /// counter. Called even for slots that end up emitting no entry
    /// (empty primary slots, out-of-range GPT entries) so that
    /// numbering stays kernel-compatible (spec §3).
    pub fn alloc_partno(&mut self) -> u32 {
        let n = self.next_partno.max(1);
        self.next_partno = n + 1;
        n
    }

    /// Adds an entry to `table`, rejecting a duplicate start sector
    /// within the same table (spec §3 invariant) while still having
    /// advanced the partition-number counter for it via
    /// [`Self::alloc_partno`] before calling this.
    pub fn add_entry(&mut self, table: TableRef, entry: PartitionEntry) -> Result<(), DuplicateStart> {
        let duplicate = self
            .entries
            .iter()
            .any(|e| e.table.0 == table.0 && e.start_sector == entry.start_sector);
        if duplicate {
            return Err(DuplicateStart {
                start_sector: entry.start_sector,
            });
        }
        self.tables[table.0].entry_count += 1;
        self.entries.push(entry);
        Ok(())
    }

    /// Removes the entry at `index`, releasing its table if that was
    /// the table's last live entry.
    pub fn remove_entry(&mut self, index: usize) -> PartitionEntry {
        let entry = self.entries.remove(index);
        self.tables[entry.table.0].entry_count -= 1;
        entry
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn entries_of(&self, table: TableRef) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(move |e| e.table.0 == table.0)
    }

    /// The top-level (parentless) table, if any has been probed yet.
    pub fn root_table(&self) -> Option<(TableRef, &PartitionTable)> {
        self.tables()
            .find(|(_, t)| t.parent.is_none())
    }

    /// Number of tables registered so far; paired with
    /// [`Self::entry_count`] and [`Self::rebase_since`] so a caller that
    /// just ran a nested probe (whose prober necessarily worked in
    /// window-relative coordinates) can convert everything that probe
    /// added into device-absolute coordinates.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of entries registered so far. See [`Self::table_count`].
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Adds `byte_offset` to every table's `byte_offset` and
    /// `sector_offset` to every entry's `start_sector`, for tables/entries
    /// registered at or after the given watermarks. Used by the
    /// dispatcher to rebase a nested prober's window-relative output
    /// onto the parent device once the nested probe returns (spec §4.4).
    pub fn rebase_since(
        &mut self,
        table_watermark: usize,
        entry_watermark: usize,
        byte_offset: u64,
        sector_offset: u64,
    ) {
        for table in &mut self.tables[table_watermark..] {
            table.byte_offset += byte_offset;
        }
        for entry in &mut self.entries[entry_watermark..] {
            entry.start_sector += sector_offset;
        }
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("duplicate partition start sector {start_sector}")]
pub struct DuplicateStart {
    pub start_sector: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(table: TableRef, start: u64, partno: u32) -> PartitionEntry {
        PartitionEntry {
            start_sector: start,
            size_sector: 100,
            type_code: 0x83,
            type_string: "0x83".into(),
            flags: 0,
            part_number: partno,
            uuid: String::new(),
            name: String::new(),
            table,
        }
    }

    #[test]
    fn partno_advances_even_for_empty_slots() {
        let mut list = PartitionList::new();
        let table = list.new_table("dos", 0, "");
        let _ = list.alloc_partno(); // slot 1, empty
        let partno = list.alloc_partno(); // slot 2, used
        list.add_entry(table, sample_entry(table, 2048, partno)).unwrap();
        assert_eq!(partno, 2);
        assert_eq!(list.peek_next_partno(), 3);
    }

    #[test]
    fn duplicate_start_rejected_but_partno_consumed() {
        let mut list = PartitionList::new();
        let table = list.new_table("dos", 0, "");
        let partno1 = list.alloc_partno();
        list.add_entry(table, sample_entry(table, 2048, partno1)).unwrap();
        let partno2 = list.alloc_partno();
        let err = list
            .add_entry(table, sample_entry(table, 2048, partno2))
            .unwrap_err();
        assert_eq!(err.start_sector, 2048);
        // partno2 was still consumed even though the entry was rejected.
        assert_eq!(list.peek_next_partno(), 3);
    }

    #[test]
    fn removing_last_entry_releases_table() {
        let mut list = PartitionList::new();
        let table = list.new_table("dos", 0, "");
        let partno = list.alloc_partno();
        list.add_entry(table, sample_entry(table, 2048, partno)).unwrap();
        assert!(!list.table(table).is_released());
        list.remove_entry(0);
        assert!(list.table(table).is_released());
    }

    #[test]
    fn nested_table_links_to_parent_hint() {
        let mut list = PartitionList::new();
        let parent = list.new_table("dos", 0, "");
        list.set_parent_hint(parent);
        let child = list.new_table("bsd", 512, "");
        list.clear_parent_hint();
        assert_eq!(list.table(child).parent, Some(parent));
        let standalone = list.new_table("gpt", 0, "");
        assert_eq!(list.table(standalone).parent, None);
    }
}
