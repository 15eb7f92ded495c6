//! Mount-option composition and staged mount orchestration, modeled on
//! libmount: option maps and lists (C6/C7), a staged mount context
//! (C8), and a hookset engine driving stage-anchored plugins (C9).

pub mod config;
pub mod context;
pub mod error;
pub mod hookset;
pub mod optlist;
pub mod optmap;

pub use config::MountConfig;
pub use context::{MountContext, MountFs, MountInfoTable, MountState, MountStatus};
pub use error::{MountError, Result};
pub use hookset::{mkdir_hookset, selinux_hookset, subdir_hookset, HookCtx, HookEngine, Hookset, Stage};
pub use optlist::{AttrMode, Opt, OptFilter, OptionList, OptionSource};
pub use optmap::{OptionMap, OptionMapEntry, OptionMaskBits};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_bind_remount_mount_lifecycle() {
        let mut ctx = MountContext::new(MountConfig::default(), false, 0);
        ctx.register_hookset(mkdir_hookset(true));
        ctx.configure(MountFs {
            source: Some("/srv/data".to_string()),
            target: Some("/mnt/data".to_string()),
            fstype: Some("none".to_string()),
            optstr: Some("ro,bind".to_string()),
        });
        ctx.prepare_mount().unwrap();
        ctx.do_mount().unwrap();
        ctx.finalize_mount().unwrap();
        assert_eq!(ctx.state(), MountState::Final);
        assert!(ctx.status().bind_then_remount);
    }
}
