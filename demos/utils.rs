//! Shared command-line/device setup glue for the example binaries.
//!
//! Kept separate from the library itself: none of this is `no_std`-safe or
//! reusable outside a host binary, it just wires a TAP device and an
//! `env_logger` subscriber from argv the way every example needs to.

use std::os::unix::io::RawFd;
use std::{io, mem, process};

use tapip_rs::phy::{Medium, TunTapInterface};
use tapip_rs::time::Duration;

pub fn create_options() -> (getopts::Options, Vec<&'static str>) {
    (getopts::Options::new(), Vec::new())
}

pub fn add_tuntap_options(opts: &mut getopts::Options, _free: &mut Vec<&str>) {
    opts.optopt("", "tap", "TAP interface to attach to", "NAME");
}

pub fn parse_options(opts: &getopts::Options, free: Vec<&str>) -> getopts::Matches {
    let args: Vec<String> = std::env::args().collect();
    match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", opts.usage(&format!("Usage: {} [options]", args[0])));
            let _ = &free;
            process::exit(2);
        }
    }
}

pub fn parse_tuntap_options(matches: &mut getopts::Matches) -> TunTapInterface {
    let tap_name = matches.opt_str("tap").unwrap_or_else(|| "tap0".into());
    TunTapInterface::new(&tap_name, Medium::Ethernet)
        .unwrap_or_else(|err| panic!("failed to attach to TAP device {tap_name}: {err}"))
}

pub fn setup_logging(filter: &str) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(filter);
    builder.format_timestamp_nanos();
    builder.init();
}

/// Blocks until `fd` is readable, or `duration` elapses. The stack's own
/// `phy::sys::wait` does the same `select()` dance but is private to the
/// crate, so examples carry their own copy.
pub fn phy_wait(fd: RawFd, duration: Option<Duration>) -> io::Result<()> {
    unsafe {
        let mut readfds = {
            let mut readfds = mem::MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(readfds.as_mut_ptr());
            libc::FD_SET(fd, readfds.as_mut_ptr());
            readfds.assume_init()
        };

        let mut timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        let timeout_ptr = if let Some(duration) = duration {
            timeout.tv_sec = (duration.total_millis() / 1000) as libc::time_t;
            timeout.tv_usec = ((duration.total_millis() % 1000) * 1_000) as libc::suseconds_t;
            &mut timeout as *mut _
        } else {
            std::ptr::null_mut()
        };

        let res = libc::select(
            fd + 1,
            &mut readfds,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            timeout_ptr,
        );
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
