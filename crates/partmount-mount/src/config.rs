//! Overridable defaults for the locations of the fstab/utab collaborator
//! files, read the way `mount(8)`-alikes take environment overrides.

use std::path::PathBuf;

const FSTAB_ENV: &str = "PARTMOUNT_FSTAB";
const UTAB_ENV: &str = "PARTMOUNT_UTAB";

const DEFAULT_FSTAB: &str = "/etc/fstab";
const DEFAULT_UTAB: &str = "/run/mount/utab";

/// Struct-of-options configuration for [`crate::context::MountContext`],
/// rather than scattering `std::env::var` lookups through the mount path.
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub fstab_path: PathBuf,
    pub utab_path: PathBuf,
    /// Filesystem types tried, in order, when the caller requests `auto`.
    pub auto_fstypes: Vec<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fstab_path: std::env::var_os(FSTAB_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FSTAB)),
            utab_path: std::env::var_os(UTAB_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UTAB)),
            auto_fstypes: vec![
                "ext4".to_string(),
                "xfs".to_string(),
                "btrfs".to_string(),
                "vfat".to_string(),
                "ntfs3".to_string(),
            ],
        }
    }
}

impl MountConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env_overrides() {
        unsafe {
            std::env::remove_var(FSTAB_ENV);
            std::env::remove_var(UTAB_ENV);
        }
        let cfg = MountConfig::new();
        assert_eq!(cfg.fstab_path, PathBuf::from(DEFAULT_FSTAB));
        assert_eq!(cfg.utab_path, PathBuf::from(DEFAULT_UTAB));
    }

    #[test]
    fn honors_env_overrides() {
        unsafe {
            std::env::set_var(FSTAB_ENV, "/tmp/my-fstab");
        }
        let cfg = MountConfig::new();
        assert_eq!(cfg.fstab_path, PathBuf::from("/tmp/my-fstab"));
        unsafe {
            std::env::remove_var(FSTAB_ENV);
        }
    }
}
