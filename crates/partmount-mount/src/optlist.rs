//! Stores, transforms, and emits the option set for a single mount
//! request (spec §4.6).

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{MountError, Result};
use crate::optmap::{
    OptionMap, OptionMaskBits, MS_BIND, MS_MOVE, MS_PROPAGATION, MS_RDONLY, MS_REC, MS_REMOUNT,
    MS_SILENT,
};

/// Where an [`Opt`] came from, kept so `set_from_*` can selectively drop
/// prior entries of the same origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionSource {
    FromString,
    FromFlag,
}

/// A single parsed/flag-derived option.
#[derive(Debug, Clone)]
pub struct Opt {
    pub name: String,
    pub value: Option<String>,
    /// Index into the map this option was resolved against, if any.
    pub map_name: Option<&'static str>,
    pub id: u64,
    pub source: OptionSource,
    pub external: bool,
}

impl Opt {
    fn bare(&self) -> &str {
        &self.name
    }
}

/// `get_optstr`'s filter kinds (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptFilter {
    Default,
    All,
    Unknown,
    Helpers,
    Mtab,
}

/// Which kernel-attribute-bit computation mode [`OptionList::get_attrs`]
/// should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrMode {
    Rec,
    Norec,
}

#[derive(Default)]
struct AggregateBits {
    remount: bool,
    bind: bool,
    rbind: bool,
    rdonly: bool,
    move_: bool,
    silent: bool,
    recursive: bool,
    propagation: u64,
}

/// An ordered collection of [`Opt`] values for one mount request, plus the
/// registered [`OptionMap`]s it resolves tokens against.
pub struct OptionList {
    opts: Vec<Opt>,
    maps: Vec<OptionMap>,
    merged: bool,
    age: u64,
    cache: RefCell<HashMap<(OptFilter, Option<&'static str>), (u64, String)>>,
    flag_cache: RefCell<HashMap<(&'static str, u64), (u64, u64)>>,
    bits: AggregateBits,
}

impl OptionList {
    pub fn new() -> Self {
        Self {
            opts: Vec::new(),
            maps: Vec::new(),
            merged: false,
            age: 0,
            cache: RefCell::new(HashMap::new()),
            flag_cache: RefCell::new(HashMap::new()),
            bits: AggregateBits::default(),
        }
    }

    pub fn register_map(&mut self, map: OptionMap) {
        self.maps.push(map);
    }

    /// The option list's current entries, in insertion order.
    pub fn opts(&self) -> &[Opt] {
        &self.opts
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    fn bump_age(&mut self) {
        self.age += 1;
        self.cache.borrow_mut().clear();
        self.flag_cache.borrow_mut().clear();
    }

    fn resolve<'a>(
        &'a self,
        name: &str,
        preferred: Option<&'a OptionMap>,
    ) -> Option<(&'a OptionMap, &'a crate::optmap::OptionMapEntry)> {
        if let Some(map) = preferred {
            if let Some(e) = map.find(name) {
                return Some((map, e));
            }
        }
        self.maps.iter().find_map(|m| m.find(name).map(|e| (m, e)))
    }

    /// Tokenizes `s` by `,`, trims quotes, parses `name[=value]`, and
    /// attributes each token to the matching map entry, searching
    /// `preferred` first then every registered map. Unknown tokens are
    /// stored with a null map reference.
    pub fn append_from_string(&mut self, s: &str, preferred: Option<&OptionMap>) -> Result<()> {
        for token in split_unquoted_commas(s) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (name, value) = match token.split_once('=') {
                Some((n, v)) => (n, Some(unquote(v).to_string())),
                None => (token, None),
            };

            let resolved = self.resolve(name, preferred);
            let (map_name, id, external, invert) = match resolved {
                Some((m, e)) => (
                    Some(m.name),
                    e.id,
                    e.external_only,
                    e.mask.contains(OptionMaskBits::INVERT),
                ),
                None => (None, 0, false, false),
            };

            self.opts.push(Opt {
                name: name.to_string(),
                value,
                map_name,
                id,
                source: OptionSource::FromString,
                external,
            });
            self.update_aggregate_on_add(map_name, id, invert);
        }
        self.bump_age();
        Ok(())
    }

    /// For every entry of `map` whose id bits are entirely set in `flags`
    /// and whose name does not require a value, creates a corresponding
    /// [`Opt`] with source [`OptionSource::FromFlag`]. Entries with the
    /// [`OptionMaskBits::INVERT`] mask or a zero id are skipped; `MS_REC`
    /// is kept regardless of whether its owning entry's id subset test
    /// passes (it is a modifier, not a standalone flag).
    pub fn append_from_flags(&mut self, flags: u64, map: &OptionMap) {
        for entry in map.entries() {
            if entry.mask.contains(OptionMaskBits::INVERT) || entry.id == 0 {
                continue;
            }
            if entry.takes_value() {
                continue;
            }
            let id_matches = (flags & entry.id) == entry.id;
            let is_rec = entry.id & MS_REC != 0;
            if id_matches || is_rec && (flags & MS_REC != 0) {
                self.opts.push(Opt {
                    name: entry.bare_name().to_string(),
                    value: None,
                    map_name: Some(map.name),
                    id: entry.id,
                    source: OptionSource::FromFlag,
                    external: entry.external_only,
                });
                self.update_aggregate_on_add(Some(map.name), entry.id, false);
            }
        }
        self.bump_age();
    }

    fn drop_source(&mut self, source: OptionSource, map_name: Option<&'static str>) {
        self.opts
            .retain(|o| !(o.source == source && (map_name.is_none() || o.map_name == map_name)));
    }

    /// Like [`Self::append_from_string`], but first drops all existing
    /// entries of [`OptionSource::FromString`] (or, in merged mode, of the
    /// same map).
    pub fn set_from_string(&mut self, s: &str, preferred: Option<&OptionMap>) -> Result<()> {
        let scope = if self.merged {
            preferred.map(|m| m.name)
        } else {
            None
        };
        self.drop_source(OptionSource::FromString, scope);
        self.append_from_string(s, preferred)
    }

    /// Like [`Self::append_from_flags`], but first drops all existing
    /// entries of [`OptionSource::FromFlag`] for `map` (or, in merged
    /// mode, of the same map).
    pub fn set_from_flags(&mut self, flags: u64, map: &OptionMap) {
        let scope = if self.merged { Some(map.name) } else { None };
        self.drop_source(OptionSource::FromFlag, scope);
        self.append_from_flags(flags, map);
    }

    /// Inserts the flag-derived entries immediately after the option
    /// named `after_name` (resolved against `after_map`, which must
    /// already exist in the list).
    pub fn insert_flags(
        &mut self,
        flags: u64,
        map: &OptionMap,
        after_name: &str,
        after_map: Option<&'static str>,
    ) -> Result<()> {
        let anchor = self
            .opts
            .iter()
            .position(|o| o.bare() == after_name && (after_map.is_none() || o.map_name == after_map))
            .ok_or_else(|| MountError::AnchorNotFound(after_name.to_string()))?;

        let mut to_insert = Vec::new();
        for entry in map.entries() {
            if entry.mask.contains(OptionMaskBits::INVERT) || entry.id == 0 || entry.takes_value() {
                continue;
            }
            if (flags & entry.id) == entry.id {
                to_insert.push(Opt {
                    name: entry.bare_name().to_string(),
                    value: None,
                    map_name: Some(map.name),
                    id: entry.id,
                    source: OptionSource::FromFlag,
                    external: entry.external_only,
                });
            }
        }
        for (offset, opt) in to_insert.into_iter().enumerate() {
            let map_name = opt.map_name;
            let id = opt.id;
            self.opts.insert(anchor + 1 + offset, opt);
            self.update_aggregate_on_add(map_name, id, false);
        }
        self.bump_age();
        Ok(())
    }

    pub fn remove_opt(&mut self, index: usize) {
        if index < self.opts.len() {
            self.opts.remove(index);
            self.bump_age();
        }
    }

    pub fn remove_flags(&mut self, flags: u64, map: &OptionMap) {
        self.opts.retain(|o| {
            !(o.map_name == Some(map.name) && o.id != 0 && (o.id & flags) == o.id)
        });
        self.bump_age();
    }

    pub fn remove_named(&mut self, name: &str, map_name: Option<&'static str>) {
        self.opts
            .retain(|o| !(o.bare() == name && (map_name.is_none() || o.map_name == map_name)));
        self.bump_age();
    }

    /// Sets "merged" mode and collapses to at most one active entry per
    /// `(map, id)`, keeping the last occurrence: an `INVERT` entry
    /// shares its id with the non-inverted option it cancels (`ro`/`rw`
    /// both key on `MS_RDONLY`), so the later one simply wins. Tokens
    /// that resolved to no map (id `0`) have no id to key on and are
    /// deduplicated by name instead.
    pub fn merge(&mut self) {
        self.merged = true;
        let mut seen: std::collections::HashSet<(Option<&'static str>, Option<u64>, Option<String>)> =
            std::collections::HashSet::new();
        let mut kept = Vec::with_capacity(self.opts.len());
        for opt in self.opts.drain(..).rev() {
            let key = if opt.map_name.is_some() && opt.id != 0 {
                (opt.map_name, Some(opt.id), None)
            } else {
                (opt.map_name, None, Some(opt.name.clone()))
            };
            if seen.insert(key) {
                kept.push(opt);
            }
        }
        kept.reverse();

        self.opts = kept;
        self.bits = AggregateBits::default();
        for opt in &self.opts {
            let invert = self.entry_is_invert(opt);
            OptionList::apply_aggregate(&mut self.bits, opt.map_name, opt.id, invert);
        }
        self.bump_age();
    }

    fn entry_is_invert(&self, opt: &Opt) -> bool {
        opt.map_name
            .and_then(|mn| self.maps.iter().find(|m| m.name == mn))
            .and_then(|m| m.find(&opt.name))
            .is_some_and(|e| e.mask.contains(OptionMaskBits::INVERT))
    }

    fn update_aggregate_on_add(&mut self, map_name: Option<&'static str>, id: u64, invert: bool) {
        let mut bits = std::mem::take(&mut self.bits);
        OptionList::apply_aggregate(&mut bits, map_name, id, invert);
        self.bits = bits;
    }

    /// Folds `id`'s bits into `bits`, setting them normally or clearing
    /// them when `invert` is set (an `INVERT`-masked entry like `rw`
    /// shares `rdonly`'s id but means "clear it", not "set it").
    fn apply_aggregate(bits: &mut AggregateBits, map_name: Option<&'static str>, id: u64, invert: bool) {
        if map_name != Some("linux-vfs") {
            return;
        }
        if id & MS_REMOUNT != 0 {
            bits.remount = !invert;
        }
        if id & MS_BIND != 0 {
            bits.bind = !invert;
            if id & MS_REC != 0 {
                bits.rbind = !invert;
            }
        }
        if id & MS_RDONLY != 0 {
            bits.rdonly = !invert;
        }
        if id & MS_MOVE != 0 {
            bits.move_ = !invert;
        }
        if id & MS_SILENT != 0 {
            bits.silent = !invert;
        }
        if id & MS_REC != 0 {
            bits.recursive = !invert;
        }
        if id & MS_PROPAGATION != 0 {
            if invert {
                bits.propagation &= !(id & MS_PROPAGATION);
            } else {
                bits.propagation |= id & MS_PROPAGATION;
            }
        }
    }

    pub fn is_remount(&self) -> bool {
        self.bits.remount
    }
    pub fn is_bind(&self) -> bool {
        self.bits.bind
    }
    pub fn is_rbind(&self) -> bool {
        self.bits.rbind
    }
    pub fn is_move(&self) -> bool {
        self.bits.move_
    }
    pub fn is_rdonly(&self) -> bool {
        self.bits.rdonly
    }
    pub fn is_silent(&self) -> bool {
        self.bits.silent
    }
    pub fn is_recursive(&self) -> bool {
        self.bits.recursive
    }
    pub fn propagation_word(&self) -> u64 {
        self.bits.propagation
    }
    /// Whether the effective flag set consists solely of propagation bits
    /// (plus silent/rec modifiers), used by the mount context to
    /// short-circuit the `mount()` call entirely (spec §4.7).
    pub fn propagation_only(&self) -> bool {
        self.bits.propagation != 0 && !self.bits.bind && !self.bits.move_ && !self.bits.remount
    }

    /// Returns the OR of every matching entry's `id`, restricted to `map`
    /// and to options matching `filter`.
    pub fn get_flags(&self, map: &OptionMap, filter: OptFilter) -> u64 {
        let cache_key = (map.name, filter_discriminant(filter));
        if let Some(&(age, flags)) = self.flag_cache.borrow().get(&cache_key) {
            if age == self.age {
                return flags;
            }
        }
        let mut flags = 0u64;
        for opt in &self.opts {
            if opt.map_name != Some(map.name) {
                continue;
            }
            if !matches_filter(opt, filter) {
                continue;
            }
            let entry = map.find(&opt.name);
            match entry {
                Some(e) if e.mask.contains(OptionMaskBits::INVERT) => flags &= !opt.id,
                _ => flags |= opt.id,
            }
        }
        self.flag_cache.borrow_mut().insert(cache_key, (self.age, flags));
        flags
    }

    /// Converts linux-vfs flags to kernel-attribute bits
    /// (`MOUNT_ATTR_*`-shaped): `read-only`, `nosuid`, `nodev`, `noexec`,
    /// `nodiratime`, `relatime`, `noatime`, `strictatime`, `nosymfollow`.
    pub fn get_attrs(&self, linux_vfs: &OptionMap, mode: AttrMode) -> (u64, u64) {
        let mut set = self.get_flags(linux_vfs, OptFilter::All);
        let mut clr = 0u64;

        const ATIME_BITS: u64 =
            crate::optmap::MS_NOATIME | crate::optmap::MS_RELATIME | crate::optmap::MS_STRICTATIME;
        if set & ATIME_BITS != 0 {
            clr |= ATIME_BITS;
        }

        if !self.is_bind() && !self.is_remount() {
            // Classic (non-bind) mounts implicitly clear a handful of
            // default-off atoms the kernel would otherwise treat as
            // "inherit from prior state".
            const DEFAULT_OFF_RESET: u64 = crate::optmap::MS_NODIRATIME;
            set |= DEFAULT_OFF_RESET;
        }

        if mode == AttrMode::Norec {
            set &= !crate::optmap::MS_REC;
        }

        (set, clr)
    }

    /// Rebuilds (or returns the cached) comma-separated option string for
    /// `filter`, optionally scoped to `map`.
    pub fn get_optstr(&self, map: Option<&OptionMap>, filter: OptFilter) -> String {
        let map_name = map.map(|m| m.name);
        let key = (filter, map_name);
        if let Some((age, s)) = self.cache.borrow().get(&key) {
            if *age == self.age {
                return s.clone();
            }
        }

        // A leading `ro`/`rw` prefix is synthesized below from the
        // aggregate bits whenever the caller wants an unscoped string;
        // the stored linux-vfs token for it must be skipped here or it
        // would appear twice.
        let synthesizes_rdonly_prefix = map_name.is_none()
            && matches!(filter, OptFilter::Default | OptFilter::All | OptFilter::Helpers);

        let mut parts: Vec<String> = Vec::new();
        for opt in &self.opts {
            if let Some(name) = map_name {
                if opt.map_name != Some(name) {
                    continue;
                }
            }
            if !matches_filter(opt, filter) {
                continue;
            }
            if synthesizes_rdonly_prefix && opt.map_name == Some("linux-vfs") && opt.id == MS_RDONLY {
                continue;
            }
            let entry = opt
                .map_name
                .and_then(|mn| self.maps.iter().find(|m| m.name == mn))
                .and_then(|m| m.find(&opt.name));
            if let Some(e) = entry {
                if filter == OptFilter::Helpers && e.mask.contains(OptionMaskBits::NO_HLPS) {
                    continue;
                }
                if filter == OptFilter::Mtab && e.mask.contains(OptionMaskBits::NO_MTAB) {
                    continue;
                }
            }
            match &opt.value {
                Some(v) => parts.push(format!("{}={}", opt.name, v)),
                None => parts.push(opt.name.clone()),
            }
        }

        let mut out = parts.join(",");
        if synthesizes_rdonly_prefix {
            let prefix = if self.is_rdonly() { "ro" } else { "rw" };
            out = if out.is_empty() {
                prefix.to_string()
            } else {
                format!("{prefix},{out}")
            };
        }

        self.cache.borrow_mut().insert(key, (self.age, out.clone()));
        out
    }
}

impl Default for OptionList {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_discriminant(filter: OptFilter) -> u64 {
    filter as u64
}

fn matches_filter(opt: &Opt, filter: OptFilter) -> bool {
    match filter {
        OptFilter::Default => opt.map_name.is_some() && !opt.external,
        OptFilter::All => true,
        OptFilter::Unknown => opt.map_name.is_none() && !opt.external,
        OptFilter::Helpers => true,
        OptFilter::Mtab => true,
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Splits `s` by top-level `,` only, treating bytes inside a `"..."` run
/// as opaque (spec §6: "value may be double-quoted and contains
/// arbitrary bytes except the unquoted `,`").
fn split_unquoted_commas(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optmap::linux_vfs;

    #[test]
    fn append_from_string_resolves_known_and_unknown_tokens() {
        let mut list = OptionList::new();
        list.register_map(linux_vfs());
        let vfs = linux_vfs();
        list.append_from_string("ro,noatime,funky_opt=1", Some(&vfs)).unwrap();
        assert_eq!(list.opts.len(), 3);
        assert!(list.opts[0].map_name.is_some());
        assert!(list.opts[2].map_name.is_none());
        assert_eq!(list.opts[2].value.as_deref(), Some("1"));
    }

    #[test]
    fn append_from_flags_includes_rec_modifier() {
        let mut list = OptionList::new();
        let vfs = linux_vfs();
        list.append_from_flags(MS_BIND | MS_REC, &vfs);
        assert!(list.opts.iter().any(|o| o.name == "rbind"));
    }

    #[test]
    fn set_from_string_drops_prior_string_entries() {
        let mut list = OptionList::new();
        let vfs = linux_vfs();
        list.append_from_string("ro", Some(&vfs)).unwrap();
        list.set_from_string("rw,noexec", Some(&vfs)).unwrap();
        assert_eq!(list.opts.len(), 2);
    }

    #[test]
    fn merge_keeps_last_occurrence() {
        let mut list = OptionList::new();
        list.register_map(linux_vfs());
        let vfs = linux_vfs();
        list.append_from_string("ro", Some(&vfs)).unwrap();
        list.append_from_string("rw", Some(&vfs)).unwrap();
        list.merge();
        assert_eq!(list.opts.len(), 1);
        assert_eq!(list.opts[0].name, "rw");
        assert!(!list.is_rdonly());
    }

    #[test]
    fn append_from_string_rw_clears_rdonly_bit_immediately() {
        let mut list = OptionList::new();
        list.register_map(linux_vfs());
        let vfs = linux_vfs();
        list.append_from_string("ro", Some(&vfs)).unwrap();
        assert!(list.is_rdonly());
        list.append_from_string("rw", Some(&vfs)).unwrap();
        assert!(!list.is_rdonly());
    }

    #[test]
    fn get_optstr_does_not_duplicate_stored_ro_token() {
        let mut list = OptionList::new();
        list.register_map(linux_vfs());
        let vfs = linux_vfs();
        list.append_from_string("ro,nosuid,nodev", Some(&vfs)).unwrap();
        let s = list.get_optstr(None, OptFilter::All);
        assert_eq!(s, "ro,nosuid,nodev");
    }

    #[test]
    fn get_optstr_default_prefixes_rw_or_ro() {
        let mut list = OptionList::new();
        list.register_map(linux_vfs());
        let vfs = linux_vfs();
        list.append_from_string("noatime", Some(&vfs)).unwrap();
        let s = list.get_optstr(None, OptFilter::Default);
        assert!(s.starts_with("rw,"));

        list.append_from_string("ro", Some(&vfs)).unwrap();
        let s = list.get_optstr(None, OptFilter::Default);
        assert!(s.starts_with("ro,"));
    }

    #[test]
    fn insert_flags_requires_existing_anchor() {
        let mut list = OptionList::new();
        let vfs = linux_vfs();
        let err = list.insert_flags(MS_BIND, &vfs, "ro", Some("linux-vfs"));
        assert!(err.is_err());
    }

    #[test]
    fn split_unquoted_commas_respects_quotes() {
        let parts = split_unquoted_commas(r#"context="system_u:object_r:foo_t,s0",ro"#);
        assert_eq!(parts.len(), 2);
    }
}
