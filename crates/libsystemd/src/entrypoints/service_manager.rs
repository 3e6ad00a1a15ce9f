//! The PID 1 entrypoint: bootstrap the early environment, construct a
//! [`Manager`], enqueue a start job for the configured target, and drive
//! it through the event loop until signaled to stop.
//!
//! The PID-1-specific setup below (`pid1_specific_setup`,
//! `ensure_home_directories`, `unrecoverable_error`, `move_to_new_session`,
//! `find_shell_path`) is carried over unchanged from the teacher: none of
//! it depends on the old `RuntimeInfo`/thread-per-concern design, it's
//! ambient boot-time setup a service manager has to do regardless of how
//! its unit engine is structured. What's rebuilt here is everything that
//! used to hand off to `runtime_info`/`signal_handler`/`notification_handler`
//! threads — that's now [`crate::manager::Manager`] driven by
//! [`crate::event_loop::EventLoop`] on a single thread (spec §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{trace, warn};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::config;
use crate::event_loop::EventLoop;
use crate::job::{JobMode, JobType};
use crate::logging;
use crate::manager::Manager;

pub fn run_service_manager() {
    pid1_specific_setup();

    let cli_args = CliArgs::try_parse().unwrap_or_else(|e| {
        unrecoverable_error(e.to_string());
        unreachable!();
    });

    let (log_conf, conf) = config::load_config();
    logging::setup_logging(&log_conf).unwrap();

    // Augment PATH with binary directories derived from the unit search
    // paths. Many upstream systemd unit files use bare command names in
    // ExecStart= (e.g. `systemd-tmpfiles`, `udevadm`); real systemd
    // resolves these via compiled-in prefix paths, systemd-rs instead adds
    // the relevant package directories to PATH.
    config::augment_path_from_unit_dirs(&conf.unit_dirs);

    // TODO make configurable
    let should_go_to_new_session = false;
    if should_go_to_new_session && !move_to_new_session() {
        return;
    }

    let target_unit = conf.target_unit.clone();
    let mut manager = Manager::new(conf);

    match manager.enqueue(&target_unit, JobType::Start, JobMode::Replace) {
        Ok(job_id) => trace!("enqueued start job {job_id} for {target_unit}"),
        Err(e) => unrecoverable_error(format!("failed to enqueue {target_unit}: {e}")),
    }

    if cli_args.dry_run {
        warn!("Exiting after enqueueing the boot target because --dry-run was passed");
        return;
    }

    let should_stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&should_stop)) {
            warn!("failed to register handler for signal {signal}: {e}");
        }
    }

    let mut event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            unrecoverable_error(format!("couldn't set up the event loop: {e}"));
            unreachable!();
        }
    };

    trace!("Entering the event loop, activating {target_unit}");
    event_loop.run(&mut manager, || should_stop.load(Ordering::Relaxed));
}

fn find_shell_path() -> Option<std::path::PathBuf> {
    let possible_paths = vec![
        std::path::PathBuf::from("/bin/sh"),
        std::path::PathBuf::from("/sbin/sh"),
        std::path::PathBuf::from("/usr/bin/sh"),
    ];

    // TODO make configurable
    possible_paths.into_iter().find(|p| p.exists())
}

fn unrecoverable_error(error: String) {
    if nix::unistd::getpid().as_raw() == 1 {
        eprintln!("Unrecoverable error: {error}");
        if let Some(shell_path) = find_shell_path() {
            match std::process::Command::new(shell_path).spawn() {
                Ok(mut child) => match child.wait() {
                    Ok(_) => {
                        let dur = std::time::Duration::from_secs(10);
                        eprintln!("Returned from shell. Will exit after sleeping: {dur:?}");
                        std::thread::sleep(dur);
                        std::process::exit(1);
                    }
                    Err(e) => {
                        let dur = std::time::Duration::from_secs(1_000_000);
                        eprintln!(
                            "Error while waiting on the shell: {e}. Will sleep for {dur:?} and then exit"
                        );
                        std::thread::sleep(dur);
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    let dur = std::time::Duration::from_secs(1_000_000);
                    eprintln!(
                        "Error while starting the shell: {e}. Will sleep for {dur:?} and then exit"
                    );
                    std::thread::sleep(dur);
                    std::process::exit(1);
                }
            }
        } else {
            let dur = std::time::Duration::from_secs(10);
            eprintln!("Cannot find a shell for emergency. Will sleep for {dur:?} and then exit");
            std::thread::sleep(dur);
            std::process::exit(1);
        }
    } else {
        panic!("{}", error);
    }
}

fn move_to_new_session() -> bool {
    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Child) => {
            nix::unistd::setsid().unwrap();
            true
        }
        Ok(nix::unistd::ForkResult::Parent { .. }) => false,
        Err(e) => {
            log::error!("Fork before setsid failed: {e}");
            false
        }
    }
}

#[cfg(target_os = "linux")]
fn pid1_specific_setup() {
    if nix::unistd::getpid().as_raw() != 1 {
        return;
    }

    // When running as PID 1, the inherited stdin/stdout/stderr may be broken
    // pipes (e.g. the NixOS stage-2 init script redirects stdout through a
    // tee process that can die before exec'ing the service manager). Reopen
    // the standard file descriptors matching what real systemd does at startup:
    //   - stdin  -> /dev/null   (PID 1 never reads from the console)
    //   - stdout -> /dev/console (write-only, O_NOCTTY)
    //   - stderr -> /dev/console (write-only, O_NOCTTY)
    //
    // Opening /dev/console without O_NOCTTY would make it PID 1's controlling
    // terminal, which prevents getty from later acquiring it via TIOCSCTTY and
    // breaks terminal control for login shells. Real systemd uses
    // make_null_stdio() + a separate write-only /dev/console fd for logging.

    // stdin -> /dev/null
    let null_fd = unsafe { libc::open(b"/dev/null\0".as_ptr().cast(), libc::O_RDWR | libc::O_CLOEXEC) };
    if null_fd >= 0 {
        let _ = unsafe { libc::dup2(null_fd, libc::STDIN_FILENO) };
        if null_fd > libc::STDERR_FILENO {
            unsafe { libc::close(null_fd) };
        }
    }

    // stdout/stderr -> /dev/console (write-only, O_NOCTTY)
    let console_fd =
        unsafe { libc::open(b"/dev/console\0".as_ptr().cast(), libc::O_WRONLY | libc::O_NOCTTY | libc::O_CLOEXEC) };
    if console_fd >= 0 {
        let _ = unsafe { libc::dup2(console_fd, libc::STDOUT_FILENO) };
        let _ = unsafe { libc::dup2(console_fd, libc::STDERR_FILENO) };
        if console_fd > libc::STDERR_FILENO {
            unsafe { libc::close(console_fd) };
        }
    }

    // Remount root filesystem read-write if needed.
    let flags = nix::mount::MsFlags::MS_REMOUNT;
    let source: Option<&str> = None;
    let fs_type: Option<&str> = None;
    let data: Option<&str> = None;
    let _ = nix::mount::mount(source, "/", fs_type, flags, data);

    // Mount essential tmpfs mount points early, before the unit loading
    // pipeline runs. Several services have RequiresMountsFor= dependencies
    // on paths that need a tmpfs to exist at all before their mount units
    // can even be considered.
    let tmpfs_mounts: &[(&str, nix::mount::MsFlags, &str)] = &[
        ("/run/wrappers", nix::mount::MsFlags::MS_NODEV, "mode=755,size=50%"),
        ("/run/initramfs", nix::mount::MsFlags::empty(), "mode=0700"),
    ];

    for &(where_path, flags, options) in tmpfs_mounts {
        let _ = std::fs::create_dir_all(where_path);
        match nix::mount::mount(Some("tmpfs"), where_path, Some("tmpfs"), flags, Some(options)) {
            Ok(()) => eprintln!("systemd-rs: mounted tmpfs on {where_path}"),
            Err(nix::Error::EBUSY) => {}
            Err(e) => eprintln!("systemd-rs: failed to mount tmpfs on {where_path}: {e}"),
        }
    }

    // Mount cgroup2 at /sys/fs/cgroup. Many services (notably
    // systemd-journald) need cgroups to work at all.
    let _ = std::fs::create_dir_all("/sys/fs/cgroup");
    match nix::mount::mount(
        Some("cgroup2"),
        "/sys/fs/cgroup",
        Some("cgroup2"),
        nix::mount::MsFlags::MS_NOSUID | nix::mount::MsFlags::MS_NODEV | nix::mount::MsFlags::MS_NOEXEC,
        Some("nsdelegate,memory_recursiveprot"),
    ) {
        Ok(()) => eprintln!("systemd-rs: mounted cgroup2 on /sys/fs/cgroup"),
        Err(nix::Error::EBUSY) => {}
        Err(e) => eprintln!("systemd-rs: failed to mount cgroup2 on /sys/fs/cgroup: {e}"),
    }

    // Ensure /etc/machine-id exists; systemd-journald names its persistent
    // storage directory after it.
    let machine_id_path = std::path::Path::new("/etc/machine-id");
    if !machine_id_path.exists() || std::fs::metadata(machine_id_path).map(|m| m.len() == 0).unwrap_or(true) {
        let mut buf = [0u8; 16];
        if let Ok(mut f) = std::fs::File::open("/dev/urandom") {
            use std::io::Read;
            if f.read_exact(&mut buf).is_ok() {
                let hex: String = buf.iter().map(|b| format!("{b:02x}")).collect();
                if std::fs::write(machine_id_path, format!("{hex}\n")).is_ok() {
                    eprintln!("systemd-rs: generated /etc/machine-id");
                }
            }
        }
    }

    // Set the kernel hostname from /etc/hostname.
    let hostname_path = std::path::Path::new("/etc/hostname");
    if hostname_path.exists()
        && let Ok(raw) = std::fs::read_to_string(hostname_path)
    {
        let hostname = raw.trim();
        if !hostname.is_empty() {
            match nix::unistd::sethostname(hostname) {
                Ok(()) => eprintln!("systemd-rs: set hostname to '{hostname}'"),
                Err(e) => eprintln!("systemd-rs: failed to set hostname: {e}"),
            }
        }
    }

    // Create any home directories missing from the activation script's
    // user provisioning, before services (including getty) start.
    ensure_home_directories();

    let _ = std::fs::create_dir_all("/var/log/journal");
}

/// Read /etc/passwd and create any missing home directories with the
/// correct ownership and mode. Skips trivial homes like "/" and
/// "/var/empty".
fn ensure_home_directories() {
    let passwd_path = std::path::Path::new("/etc/passwd");
    if !passwd_path.exists() {
        eprintln!("systemd-rs: /etc/passwd does not exist, skipping home directory creation");
        return;
    }
    let passwd_contents = match std::fs::read_to_string(passwd_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("systemd-rs: failed to read /etc/passwd: {e}");
            return;
        }
    };

    for line in passwd_contents.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        // passwd format: name:x:uid:gid:gecos:home:shell
        if fields.len() < 7 {
            continue;
        }
        let user = fields[0];
        let home = fields[5];
        if home.is_empty() || home == "/" || home == "/nonexistent" || home == "/dev/null" || home == "/var/empty" || home == "/run/systemd" {
            continue;
        }
        let home_path = std::path::Path::new(home);
        if home_path.exists() {
            continue;
        }
        let Ok(uid) = fields[2].parse::<u32>() else { continue };
        let Ok(gid) = fields[3].parse::<u32>() else { continue };
        if let Err(e) = std::fs::create_dir_all(home_path) {
            eprintln!("systemd-rs: failed to create home {home} for {user}: {e}");
            continue;
        }
        let Ok(c_path) = std::ffi::CString::new(home) else { continue };
        unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
        unsafe { libc::chmod(c_path.as_ptr(), 0o700) };
        eprintln!("systemd-rs: created home directory {home} for {user} (uid={uid}, gid={gid})");
    }
}

#[cfg(not(target_os = "linux"))]
fn pid1_specific_setup() {}

#[derive(Parser, Debug)]
struct CliArgs {
    #[arg(short, long)]
    dry_run: bool,
}
