//! `partmount`: probe partition tables and compose/run mount requests.

use clap::{Parser, Subcommand};
use partmount_io::{FileSource, SectorSource};
use partmount_mount::{MountConfig, MountContext, MountFs};
use partmount_part::Dispatcher;

#[derive(Debug, Parser)]
#[command(name = "partmount", version, about = "Partition probing and mount composition")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe a block device or image file for partition tables.
    Probe {
        /// Path to the device or image file.
        path: std::path::PathBuf,
        /// Logical sector size the device reports (default 512).
        #[arg(long, default_value_t = 512)]
        sector_size: u32,
        /// Restrict probing to a single named scheme (dos, gpt, bsd, sun, sgi, atari, aix).
        #[arg(long)]
        r#type: Option<String>,
        /// Only publish PTTYPE/PTUUID, skip entry enumeration.
        #[arg(long)]
        summary: bool,
    },
    /// Compose and, unless --fake is given, perform a mount.
    ComposeMount {
        source: String,
        target: String,
        #[arg(long, default_value = "auto")]
        fstype: String,
        #[arg(short = 'o', long, default_value = "")]
        options: String,
        /// Compute and print the composed request, never call the kernel.
        #[arg(long)]
        fake: bool,
        /// Run as though the caller were an unprivileged user.
        #[arg(long)]
        restricted: bool,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Command::Probe {
            path,
            sector_size,
            r#type,
            summary,
        } => probe(&path, sector_size, r#type.as_deref(), summary),
        Command::ComposeMount {
            source,
            target,
            fstype,
            options,
            fake,
            restricted,
        } => compose_mount(&source, &target, &fstype, &options, fake, restricted),
    };

    if let Err(err) = result {
        eprintln!("partmount: {err}");
        std::process::exit(1);
    }
}

fn probe(
    path: &std::path::Path,
    sector_size: u32,
    type_filter: Option<&str>,
    summary: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = FileSource::open(path, sector_size)?;
    let list = Dispatcher::new().probe(&source, type_filter, summary)?;

    for (table_ref, table) in list.tables() {
        println!("PTTYPE={} PTUUID={}", table.type_name, table.id_string);
        if summary {
            continue;
        }
        for entry in list.entries_of(table_ref) {
            println!(
                "  PART_ENTRY_NUMBER={} PART_ENTRY_OFFSET={} PART_ENTRY_SIZE={} \
                 PART_ENTRY_TYPE={} PART_ENTRY_UUID={} PART_ENTRY_NAME={:?}",
                entry.part_number,
                entry.start_sector,
                entry.size_sector,
                entry.type_string,
                entry.uuid,
                entry.name,
            );
        }
    }

    if list.tables().next().is_none() {
        log::info!("partmount: no recognized partition table on {}", path.display());
    }

    let _ = source.total_bytes();
    Ok(())
}

fn compose_mount(
    source: &str,
    target: &str,
    fstype: &str,
    options: &str,
    fake: bool,
    restricted: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = MountConfig::new();
    let caller_uid = current_uid();
    let mut ctx = MountContext::new(config, restricted, caller_uid);
    ctx.register_hookset(partmount_mount::mkdir_hookset(!restricted));
    ctx.register_hookset(partmount_mount::selinux_hookset(false, false, true));
    ctx.register_hookset(partmount_mount::subdir_hookset(false));

    ctx.configure(MountFs {
        source: Some(source.to_string()),
        target: Some(target.to_string()),
        fstype: Some(fstype.to_string()),
        optstr: if options.is_empty() {
            None
        } else {
            Some(options.to_string())
        },
    });

    ctx.prepare_mount()?;

    let optstr = ctx.optlist().get_optstr(None, partmount_mount::OptFilter::Default);
    println!("mount -t {fstype} -o {optstr} {source} {target}");

    if fake {
        println!("(--fake given, not calling the kernel)");
        return Ok(());
    }

    ctx.do_mount()?;
    ctx.finalize_mount()?;
    println!("mounted.");
    Ok(())
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
