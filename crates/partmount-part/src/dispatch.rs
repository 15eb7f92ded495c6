//! Partition dispatcher: fixed prober order plus nested sub-probing
//! (spec §4.4).

use crate::error::ProbeError;
use crate::list::PartitionList;
use crate::probe::{
    AixProber, AtariProber, BsdProber, DosProber, GptProber, SgiProber, SunProber,
};
use crate::prober::{magics_match, ProbeContext, ProbeOutcome, Prober};
use partmount_io::{SectorSource, WindowedSource};

/// Depth limit on recursive sub-probing (a BSD disklabel nested inside a
/// DOS partition, say); guards against a pathological chain of
/// self-referential nested tables.
const MAX_NEST_DEPTH: u32 = 8;

/// Runs every registered [`Prober`] against a device in a fixed order,
/// recursing into nested partitions that declare a known sub-scheme.
pub struct Dispatcher {
    probers: Vec<Box<dyn Prober>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            probers: vec![
                Box::new(DosProber),
                Box::new(GptProber),
                Box::new(SunProber),
                Box::new(SgiProber),
                Box::new(BsdProber),
                Box::new(AtariProber),
                Box::new(AixProber),
            ],
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes `source`, optionally restricting to the prober named
    /// `filter_name`, and optionally only establishing `PTTYPE`/disk id
    /// (`summary_only`) rather than enumerating every entry.
    pub fn probe(
        &self,
        source: &dyn SectorSource,
        filter_name: Option<&str>,
        summary_only: bool,
    ) -> Result<PartitionList, ProbeError> {
        let mut list = PartitionList::new();
        let ctx = ProbeContext {
            parent_table: None,
            vfat_oracle: None,
            summary_only,
            pmbr_gate: true,
        };
        self.probe_one_level(source, &mut list, &ctx, filter_name, 0)?;
        Ok(list)
    }

    fn probe_one_level(
        &self,
        source: &dyn SectorSource,
        list: &mut PartitionList,
        ctx: &ProbeContext<'_>,
        filter_name: Option<&str>,
        depth: u32,
    ) -> Result<(), ProbeError> {
        for prober in &self.probers {
            if let Some(filter) = filter_name {
                if prober.name() != filter {
                    continue;
                }
            }
            if !magics_match(source, prober.magics()) {
                continue;
            }
            log::debug!("dispatch: trying {} prober", prober.name());
            match prober.probe(source, list, ctx)? {
                ProbeOutcome::Ok => {
                    if !ctx.summary_only && depth < MAX_NEST_DEPTH {
                        self.probe_nested(source, list, ctx, depth)?;
                    }
                    return Ok(());
                }
                ProbeOutcome::None => continue,
            }
        }
        Ok(())
    }

    fn probe_nested(
        &self,
        source: &dyn SectorSource,
        list: &mut PartitionList,
        ctx: &ProbeContext<'_>,
        depth: u32,
    ) -> Result<(), ProbeError> {
        let candidates: Vec<(crate::list::TableRef, u64, u64, &'static str)> = list
            .entries()
            .iter()
            .filter_map(|e| {
                crate::probe::dos::nested_scheme_for_type(e.type_code as u8)
                    .map(|scheme| (e.table, e.start_sector, e.size_sector, scheme))
            })
            .collect();

        for (parent_table, start_sector, size_sector, scheme) in candidates {
            let byte_offset = start_sector * 512;
            let byte_len = size_sector * 512;
            if byte_offset.checked_add(byte_len).is_none_or(|end| end > source.total_bytes()) {
                log::debug!("dispatch: nested {scheme} window overflows parent, skipping");
                continue;
            }
            let window = WindowedSource::new(source, byte_offset, byte_len);
            list.set_parent_hint(parent_table);
            let nested_ctx = ProbeContext {
                parent_table: Some(parent_table),
                ..*ctx
            };
            let table_watermark = list.table_count();
            let entry_watermark = list.entry_count();
            let result = self.probe_one_level(&window, list, &nested_ctx, Some(scheme), depth + 1);
            list.clear_parent_hint();
            result?;
            // The nested prober worked in coordinates relative to its
            // own window; translate whatever it added back onto the
            // parent device.
            list.rebase_since(table_watermark, entry_watermark, byte_offset, start_sector);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmount_io::InMemorySource;

    #[test]
    fn empty_disk_yields_no_tables() {
        let disk = vec![0u8; 4096];
        let source = InMemorySource::with_default_sector_size(disk);
        let dispatcher = Dispatcher::new();
        let list = dispatcher.probe(&source, None, false).unwrap();
        assert_eq!(list.tables().count(), 0);
        assert_eq!(list.entries().len(), 0);
    }

    #[test]
    fn name_filter_skips_other_probers() {
        let mut disk = vec![0u8; 4096];
        disk[0..4].copy_from_slice(&[0xC9, 0xC2, 0xD4, 0xC1]);
        let source = InMemorySource::with_default_sector_size(disk);
        let dispatcher = Dispatcher::new();
        let list = dispatcher.probe(&source, Some("gpt"), false).unwrap();
        assert_eq!(list.tables().count(), 0);
    }
}
