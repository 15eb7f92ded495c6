use crate::error::ProbeError;
use crate::list::{PartitionList, TableRef};
use partmount_io::SectorSource;

/// A byte pattern the dispatcher checks before invoking a prober, so
/// that probers which declare one never even run on a device that
/// obviously isn't theirs (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct Magic {
    pub pattern: &'static [u8],
    pub offset: u64,
}

/// Result of a single [`Prober::probe`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The prober recognized and parsed a table; entries (if any) were
    /// added to the [`PartitionList`] passed in.
    Ok,
    /// The prober's signature did not match, or matched but failed
    /// validation (bad CRC/checksum, out-of-range sizes, …). Never
    /// used for I/O or allocation failures — those are `Err` (spec
    /// §4.3.4).
    None,
}

/// Context threaded through a probe call by the [`crate::Dispatcher`].
#[derive(Clone, Copy, Default)]
pub struct ProbeContext<'a> {
    /// Table this probe is nested inside of, set by the dispatcher
    /// while recursing into a child window (spec §4.4).
    pub parent_table: Option<TableRef>,
    /// Resolves the open question in spec §9: rather than duplicate
    /// FAT-superblock detection inside the DOS prober, the dispatcher
    /// (or a caller probing standalone) may supply an oracle the DOS
    /// prober calls to ask "is this sector actually a VFAT
    /// superblock?" before accepting an MBR match.
    pub vfat_oracle: Option<&'a dyn Fn(&dyn SectorSource) -> bool>,
    /// When set, a prober may stop as soon as it has established
    /// `PTTYPE`/disk id and skip enumerating individual entries (spec
    /// §4.4 "type summary" mode).
    pub summary_only: bool,
    /// Whether the GPT prober should validate a protective MBR before
    /// trusting the GPT header (spec §4.3.2).
    pub pmbr_gate: bool,
}

impl ProbeContext<'_> {
    pub fn is_vfat(&self, source: &dyn SectorSource) -> bool {
        self.vfat_oracle.is_some_and(|f| f(source))
    }
}

/// One partition-table scheme's detection and parsing logic (spec §4.3).
pub trait Prober {
    /// Scheme name; matches the `PTTYPE` vocabulary in spec §6.
    fn name(&self) -> &'static str;

    /// Magic byte patterns the dispatcher short-circuits on. An empty
    /// slice means the prober is always invoked (GPT, AIX — spec §4.3
    /// notes these report `ProbeOutcome::None` themselves when absent).
    fn magics(&self) -> &'static [Magic];

    fn probe(
        &self,
        source: &dyn SectorSource,
        list: &mut PartitionList,
        ctx: &ProbeContext<'_>,
    ) -> Result<ProbeOutcome, ProbeError>;
}

/// Checks every magic pattern declared by `magics` against `source`,
/// short-circuiting the prober on the first mismatch. Probers with no
/// declared magics are always considered a match at this stage.
pub fn magics_match(source: &dyn SectorSource, magics: &[Magic]) -> bool {
    magics.iter().all(|m| {
        match source.read_bytes(m.offset, m.pattern.len()) {
            Ok(bytes) => bytes == m.pattern,
            Err(_) => false,
        }
    })
}
