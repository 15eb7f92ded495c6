//! Option map registry: named tables translating mount option tokens to
//! numeric flag bits and back.

/// Per-entry behavior switches, analogous to libmount's `MNT_INVERT` /
/// `MNT_NOHLPS` / `MNT_NOMTAB` / `MNT_SEP_NODATA` bits.
bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionMaskBits: u32 {
        /// The option name means "clear this bit", not set it.
        const INVERT = 0x01;
        /// Omit this option when emitting a string for external helpers.
        const NO_HLPS = 0x02;
        /// Omit this option when emitting a string for the persistent mount record.
        const NO_MTAB = 0x04;
        /// Do not pass this option through to the kernel's `data` argument.
        const SEPNODATA = 0x08;
    }
}

/// A single entry in an [`OptionMap`]: `name` (possibly `name=` to denote a
/// value-taking option), a numeric `id` (the flag bit(s) it controls), and
/// a [`OptionMaskBits`] describing how it behaves.
#[derive(Debug, Clone)]
pub struct OptionMapEntry {
    pub name: &'static str,
    pub id: u64,
    pub mask: OptionMaskBits,
    /// Whether this entry is presently treated as "external only" (i.e.
    /// never passed to the kernel at all). Switchable at runtime, unlike
    /// the rest of the entry which is immutable once registered.
    pub external_only: bool,
}

impl OptionMapEntry {
    const fn new(name: &'static str, id: u64, mask: OptionMaskBits) -> Self {
        Self {
            name,
            id,
            mask,
            external_only: false,
        }
    }

    /// The bare option name, with any trailing `=` stripped.
    pub fn bare_name(&self) -> &str {
        self.name.strip_suffix('=').unwrap_or(self.name)
    }

    /// Whether this entry's token takes a value (`name=value`).
    pub fn takes_value(&self) -> bool {
        self.name.ends_with('=')
    }
}

/// A table of [`OptionMapEntry`] values. Immutable once registered: an
/// [`crate::optlist::OptionList`] only ever holds a shared reference into
/// one of these.
#[derive(Debug, Clone)]
pub struct OptionMap {
    pub name: &'static str,
    entries: Vec<OptionMapEntry>,
}

impl OptionMap {
    pub fn new(name: &'static str, entries: Vec<OptionMapEntry>) -> Self {
        Self { name, entries }
    }

    pub fn entries(&self) -> &[OptionMapEntry] {
        &self.entries
    }

    /// Finds the entry whose bare name matches `name`, if any.
    pub fn find(&self, name: &str) -> Option<&OptionMapEntry> {
        self.entries.iter().find(|e| e.bare_name() == name)
    }

    pub fn find_by_id(&self, id: u64) -> Option<&OptionMapEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

// Well-known linux-vfs ids, reused by `crate::optlist` for O(1) aggregate
// bit maintenance (spec §4.6).
pub const MS_RDONLY: u64 = 1 << 0;
pub const MS_NOSUID: u64 = 1 << 1;
pub const MS_NODEV: u64 = 1 << 2;
pub const MS_NOEXEC: u64 = 1 << 3;
pub const MS_SYNCHRONOUS: u64 = 1 << 4;
pub const MS_REMOUNT: u64 = 1 << 5;
pub const MS_MANDLOCK: u64 = 1 << 6;
pub const MS_DIRSYNC: u64 = 1 << 7;
pub const MS_NOATIME: u64 = 1 << 10;
pub const MS_NODIRATIME: u64 = 1 << 11;
pub const MS_BIND: u64 = 1 << 12;
pub const MS_MOVE: u64 = 1 << 13;
pub const MS_REC: u64 = 1 << 14;
pub const MS_SILENT: u64 = 1 << 15;
pub const MS_POSIXACL: u64 = 1 << 16;
pub const MS_UNBINDABLE: u64 = 1 << 17;
pub const MS_PRIVATE: u64 = 1 << 18;
pub const MS_SLAVE: u64 = 1 << 19;
pub const MS_SHARED: u64 = 1 << 20;
pub const MS_RELATIME: u64 = 1 << 21;
pub const MS_STRICTATIME: u64 = 1 << 24;
pub const MS_LAZYTIME: u64 = 1 << 25;

/// Bitmask of every `MS_PROPAGATION`-family id (spec §4.6's "MS_PROPAGATION block").
pub const MS_PROPAGATION: u64 = MS_UNBINDABLE | MS_PRIVATE | MS_SLAVE | MS_SHARED;

/// The built-in **linux-vfs** map: kernel `MS_*` flags plus their bind/
/// recursive/propagation modifiers.
pub fn linux_vfs() -> OptionMap {
    use OptionMaskBits as M;
    OptionMap::new(
        "linux-vfs",
        vec![
            OptionMapEntry::new("ro", MS_RDONLY, M::empty()),
            OptionMapEntry::new("rw", MS_RDONLY, M::INVERT),
            OptionMapEntry::new("suid", MS_NOSUID, M::INVERT),
            OptionMapEntry::new("nosuid", MS_NOSUID, M::empty()),
            OptionMapEntry::new("dev", MS_NODEV, M::INVERT),
            OptionMapEntry::new("nodev", MS_NODEV, M::empty()),
            OptionMapEntry::new("exec", MS_NOEXEC, M::INVERT),
            OptionMapEntry::new("noexec", MS_NOEXEC, M::empty()),
            OptionMapEntry::new("sync", MS_SYNCHRONOUS, M::empty()),
            OptionMapEntry::new("async", MS_SYNCHRONOUS, M::INVERT),
            OptionMapEntry::new("remount", MS_REMOUNT, M::empty()),
            OptionMapEntry::new("mand", MS_MANDLOCK, M::empty()),
            OptionMapEntry::new("nomand", MS_MANDLOCK, M::INVERT),
            OptionMapEntry::new("dirsync", MS_DIRSYNC, M::empty()),
            OptionMapEntry::new("atime", MS_NOATIME, M::INVERT),
            OptionMapEntry::new("noatime", MS_NOATIME, M::empty()),
            OptionMapEntry::new("diratime", MS_NODIRATIME, M::INVERT),
            OptionMapEntry::new("nodiratime", MS_NODIRATIME, M::empty()),
            OptionMapEntry::new("bind", MS_BIND, M::empty()),
            OptionMapEntry::new("rbind", MS_BIND | MS_REC, M::empty()),
            OptionMapEntry::new("move", MS_MOVE, M::empty()),
            OptionMapEntry::new("silent", MS_SILENT, M::empty()),
            OptionMapEntry::new("loud", MS_SILENT, M::INVERT),
            OptionMapEntry::new("acl", MS_POSIXACL, M::empty()),
            OptionMapEntry::new("noacl", MS_POSIXACL, M::INVERT),
            OptionMapEntry::new("unbindable", MS_UNBINDABLE, M::empty()),
            OptionMapEntry::new("runbindable", MS_UNBINDABLE | MS_REC, M::empty()),
            OptionMapEntry::new("private", MS_PRIVATE, M::empty()),
            OptionMapEntry::new("rprivate", MS_PRIVATE | MS_REC, M::empty()),
            OptionMapEntry::new("slave", MS_SLAVE, M::empty()),
            OptionMapEntry::new("rslave", MS_SLAVE | MS_REC, M::empty()),
            OptionMapEntry::new("shared", MS_SHARED, M::empty()),
            OptionMapEntry::new("rshared", MS_SHARED | MS_REC, M::empty()),
            OptionMapEntry::new("relatime", MS_RELATIME, M::empty()),
            OptionMapEntry::new("norelatime", MS_RELATIME, M::INVERT),
            OptionMapEntry::new("strictatime", MS_STRICTATIME, M::empty()),
            OptionMapEntry::new("lazytime", MS_LAZYTIME, M::empty()),
        ],
    )
}

/// The built-in **userspace** map: options `mount(8)` consumes itself and
/// never forwards to the kernel (loop setup, `noauto`, ownership/helper
/// gating, `X-mount.*` annotations).
pub fn userspace() -> OptionMap {
    use OptionMaskBits as M;
    OptionMap::new(
        "userspace",
        vec![
            OptionMapEntry::new("loop", 1, M::NO_MTAB),
            OptionMapEntry::new("loop=", 2, M::NO_MTAB),
            OptionMapEntry::new("offset=", 3, M::NO_MTAB | M::SEPNODATA),
            OptionMapEntry::new("sizelimit=", 4, M::NO_MTAB | M::SEPNODATA),
            OptionMapEntry::new("noauto", 5, M::NO_HLPS | M::NO_MTAB),
            OptionMapEntry::new("auto", 5, M::INVERT | M::NO_HLPS | M::NO_MTAB),
            OptionMapEntry::new("user", 6, M::NO_HLPS),
            OptionMapEntry::new("nouser", 6, M::INVERT | M::NO_HLPS),
            OptionMapEntry::new("users", 7, M::NO_HLPS),
            OptionMapEntry::new("owner", 8, M::NO_HLPS),
            OptionMapEntry::new("group", 9, M::NO_HLPS),
            OptionMapEntry::new("comment=", 10, M::NO_HLPS | M::SEPNODATA),
            OptionMapEntry::new("uhelper=", 11, M::NO_HLPS | M::SEPNODATA),
            OptionMapEntry::new("helper=", 12, M::NO_HLPS | M::SEPNODATA),
            OptionMapEntry::new("X-mount.mkdir", 13, M::NO_HLPS | M::NO_MTAB | M::SEPNODATA),
            OptionMapEntry::new("X-mount.mkdir=", 14, M::NO_HLPS | M::NO_MTAB | M::SEPNODATA),
            OptionMapEntry::new("X-mount.subdir=", 15, M::NO_HLPS | M::NO_MTAB | M::SEPNODATA),
            OptionMapEntry::new("uid=", 16, M::SEPNODATA),
            OptionMapEntry::new("gid=", 17, M::SEPNODATA),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_vfs_round_trips_ro_and_rw() {
        let map = linux_vfs();
        let ro = map.find("ro").unwrap();
        let rw = map.find("rw").unwrap();
        assert_eq!(ro.id, rw.id);
        assert!(!ro.mask.contains(OptionMaskBits::INVERT));
        assert!(rw.mask.contains(OptionMaskBits::INVERT));
    }

    #[test]
    fn userspace_value_entries_report_takes_value() {
        let map = userspace();
        let entry = map.find("uid").unwrap();
        assert!(entry.takes_value());
        assert_eq!(entry.bare_name(), "uid");
    }

    #[test]
    fn find_by_id_resolves_bind_and_rbind_distinctly() {
        let map = linux_vfs();
        assert_eq!(map.find("bind").unwrap().id, MS_BIND);
        assert_eq!(map.find("rbind").unwrap().id, MS_BIND | MS_REC);
    }
}
