//! Stack configuration: the directive-per-line config file format plus a
//! handful of process-environment overrides.
//!
//! Grounded in `UTILS.CPP`'s `Utils::parseEnv`/`getAppValue`/`getNextToken`:
//! whitespace-separated `KEY value` lines, case-insensitive keys, a fixed
//! line-length ceiling (a truncated line is a hard error, not silently
//! accepted), and a generic by-name lookup for keys the stack itself does
//! not know about so callers can stash their own settings in the same file.

use core::fmt;
use std::fs;
use std::io::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Lines longer than this are rejected outright, mirroring the original's
/// fixed-size `lineBuffer`.
pub const MAX_LINE_LEN: usize = 255;

/// Capacity of the interface's ARP neighbor cache. The original kept a fixed
/// `ArpEntry[MAX_ARP_ENTRIES]` table rather than growing one dynamically;
/// this stack keeps the same fixed-capacity discipline via `heapless`.
pub const IFACE_NEIGHBOR_CACHE_COUNT: usize = 16;

/// Capacity of the interface's route table. mTCP only ever needs the single
/// default gateway route, but a small amount of headroom keeps the table
/// from being a special case of one.
pub const IFACE_MAX_ROUTE_COUNT: usize = 4;

/// Capacity of the DNS resolver's name -> address cache.
pub const DNS_CACHE_COUNT: usize = 16;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A line exceeded `MAX_LINE_LEN`.
    LineTooLong(u32),
    /// A recognized directive's operand didn't parse.
    BadValue(&'static str),
    /// A recognized directive was never set.
    Missing(&'static str),
    Io,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::LineTooLong(line) => write!(f, "line {line} too long"),
            Error::BadValue(parm) => write!(f, "'{parm}' is the wrong format or not set correctly"),
            Error::Missing(parm) => write!(f, "'{parm}' must be set"),
            Error::Io => write!(f, "config file I/O error"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone)]
pub struct Config {
    pub packet_int: u8,
    pub hostname: String,
    pub ip_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub nameserver: Option<Ipv4Addr>,
    pub nameserver_preferred: Option<Ipv4Addr>,
    pub mtu: u16,
    /// Every directive line, keys kept in their original case for
    /// case-insensitive re-lookup via `get`.
    raw: Vec<(String, String)>,
}

impl Config {
    /// Parses a config file in mTCP's directive format. Unlike the process
    /// env fallback, a config file is required to exist; the caller decides
    /// where `MTCPCFG` points.
    pub fn parse(path: impl AsRef<Path>) -> Result<Config, Error> {
        let text = fs::read_to_string(path).map_err(|_| Error::Io)?;

        let mut packet_int = None;
        let mut hostname = None;
        let mut ip_addr = None;
        let mut netmask = None;
        let mut gateway = None;
        let mut nameserver = None;
        let mut nameserver_preferred = None;
        let mut mtu = None;
        let mut raw = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let lineno = lineno as u32 + 1;
            if line.len() > MAX_LINE_LEN {
                return Err(Error::LineTooLong(lineno));
            }

            let trimmed_end = line.trim_end_matches([' ', '\t']);
            if trimmed_end.len() != line.len() {
                log::warn!("trailing whitespace detected on line {lineno} of the config file");
            }

            let mut tokens = trimmed_end.splitn(2, char::is_whitespace);
            let key = match tokens.next() {
                Some(k) if !k.is_empty() => k,
                _ => continue, // blank line
            };
            let operand = tokens.next().unwrap_or("").trim_start();

            raw.push((key.to_string(), operand.to_string()));

            match key.to_ascii_uppercase().as_str() {
                "PACKETINT" => {
                    packet_int = Some(
                        u8::from_str_radix(operand.trim_start_matches("0x"), 16)
                            .map_err(|_| Error::BadValue("PACKETINT"))?,
                    );
                }
                "HOSTNAME" => hostname = Some(operand.to_string()),
                "IPADDR" => {
                    ip_addr = Some(operand.parse().map_err(|_| Error::BadValue("IPADDR"))?);
                }
                "NETMASK" => {
                    netmask = Some(operand.parse().map_err(|_| Error::BadValue("NETMASK"))?);
                }
                "GATEWAY" => {
                    gateway = Some(operand.parse().map_err(|_| Error::BadValue("GATEWAY"))?);
                }
                "NAMESERVER" => {
                    nameserver =
                        Some(operand.parse().map_err(|_| Error::BadValue("NAMESERVER"))?);
                }
                "NAMESERVER_PREFERRED" => {
                    nameserver_preferred = Some(
                        operand
                            .parse()
                            .map_err(|_| Error::BadValue("NAMESERVER_PREFERRED"))?,
                    );
                }
                "MTU" => {
                    let v: u16 = operand.parse().map_err(|_| Error::BadValue("MTU"))?;
                    if !(crate::wire::ethernet::ETH_MTU_MIN..=crate::wire::ethernet::ETH_MTU_MAX)
                        .contains(&v)
                    {
                        return Err(Error::BadValue("MTU"));
                    }
                    mtu = Some(v);
                }
                _ => {}
            }
        }

        let packet_int = packet_int.ok_or(Error::Missing("PACKETINT"))?;
        let ip_addr = ip_addr.ok_or(Error::Missing("IPADDR"))?;
        let netmask = netmask.ok_or(Error::Missing("NETMASK"))?;
        let gateway = gateway.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if ip_addr == Ipv4Addr::BROADCAST {
            return Err(Error::Missing("IPADDR"));
        }
        if netmask == Ipv4Addr::BROADCAST {
            return Err(Error::Missing("NETMASK"));
        }

        // A preferred nameserver overrides a plain NAMESERVER entry, same
        // precedence the original gives DHCP-supplied vs. configured servers.
        let nameserver = nameserver_preferred.or(nameserver);

        Ok(Config {
            packet_int,
            hostname: hostname.unwrap_or_default(),
            ip_addr,
            netmask,
            gateway,
            nameserver,
            nameserver_preferred,
            mtu: mtu.unwrap_or(crate::wire::ethernet::ETH_MTU_MAX),
            raw,
        })
    }

    /// Generic by-name lookup for application-specific directives the
    /// stack itself doesn't interpret. Case-insensitive, first match wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Writes every directive back out, temp-file-then-rename so a reader
    /// never observes a half-written file. The generic persistence
    /// primitive the DHCP lease-renewal path would use; this stack doesn't
    /// implement DHCP itself.
    pub fn save_atomic(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let mut tmp: PathBuf = path.to_path_buf();
        let mut file_name = tmp.file_name().unwrap_or_default().to_os_string();
        file_name.push(".tmp");
        tmp.set_file_name(file_name);

        let mut f = fs::File::create(&tmp).map_err(|_| Error::Io)?;
        writeln!(f, "PACKETINT 0x{:x}", self.packet_int).map_err(|_| Error::Io)?;
        writeln!(f, "HOSTNAME {}", self.hostname).map_err(|_| Error::Io)?;
        writeln!(f, "IPADDR {}", self.ip_addr).map_err(|_| Error::Io)?;
        writeln!(f, "NETMASK {}", self.netmask).map_err(|_| Error::Io)?;
        writeln!(f, "GATEWAY {}", self.gateway).map_err(|_| Error::Io)?;
        if let Some(ns) = self.nameserver {
            writeln!(f, "NAMESERVER {ns}").map_err(|_| Error::Io)?;
        }
        if let Some(ns) = self.nameserver_preferred {
            writeln!(f, "NAMESERVER_PREFERRED {ns}").map_err(|_| Error::Io)?;
        }
        writeln!(f, "MTU {}", self.mtu).map_err(|_| Error::Io)?;
        for (k, v) in &self.raw {
            if matches!(
                k.to_ascii_uppercase().as_str(),
                "PACKETINT"
                    | "HOSTNAME"
                    | "IPADDR"
                    | "NETMASK"
                    | "GATEWAY"
                    | "NAMESERVER"
                    | "NAMESERVER_PREFERRED"
                    | "MTU"
            ) {
                continue;
            }
            writeln!(f, "{k} {v}").map_err(|_| Error::Io)?;
        }
        f.sync_all().map_err(|_| Error::Io)?;
        fs::rename(&tmp, path).map_err(|_| Error::Io)?;
        Ok(())
    }
}

/// Process-environment overrides, read independently of the config file:
/// `DEBUGGING` (hex `0x...` or decimal), `LOGFILE`, `MTCPSLEEP`.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub debugging: u16,
    pub logfile: Option<String>,
    pub sleep_calls_enabled: bool,
}

impl EnvOverrides {
    pub fn from_process_env() -> EnvOverrides {
        let mut debugging: u16 = 0;
        if let Ok(val) = std::env::var("DEBUGGING") {
            let parsed = val
                .strip_prefix("0x")
                .and_then(|hex| u16::from_str_radix(hex, 16).ok())
                .or_else(|| val.parse().ok());
            debugging |= parsed.unwrap_or(0);
            if debugging & 0xFF == 0 {
                debugging = 0;
            }
        }

        let logfile = std::env::var("LOGFILE").ok();

        let sleep_calls_enabled = std::env::var("MTCPSLEEP")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .map(|v| v != 0)
            .unwrap_or(false);

        EnvOverrides {
            debugging,
            logfile,
            sleep_calls_enabled,
        }
    }
}

/// Finds the config file path from the `MTCPCFG` environment variable, the
/// same way every mTCP client locates its config.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os("MTCPCFG").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mtcp-test-cfg-{}", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_minimal_config() {
        let path = write_temp(
            "PACKETINT 0x60\nIPADDR 192.168.1.5\nNETMASK 255.255.255.0\nGATEWAY 192.168.1.1\n",
        );
        let cfg = Config::parse(&path).unwrap();
        assert_eq!(cfg.packet_int, 0x60);
        assert_eq!(cfg.ip_addr, Ipv4Addr::new(192, 168, 1, 5));
        assert_eq!(cfg.gateway, Ipv4Addr::new(192, 168, 1, 1));
        fs::remove_file(path).ok();
    }

    #[test]
    fn missing_required_key_errors() {
        let path = write_temp("PACKETINT 0x60\n");
        let err = Config::parse(&path).unwrap_err();
        assert_eq!(err, Error::Missing("IPADDR"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn arbitrary_application_key_is_retrievable() {
        let path = write_temp(
            "PACKETINT 0x60\nIPADDR 10.0.0.2\nNETMASK 255.0.0.0\nGATEWAY 10.0.0.1\nMYAPPKEY hello world\n",
        );
        let cfg = Config::parse(&path).unwrap();
        assert_eq!(cfg.get("myappkey"), Some("hello world"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn preferred_nameserver_overrides_plain_one() {
        let path = write_temp(
            "PACKETINT 0x60\nIPADDR 10.0.0.2\nNETMASK 255.0.0.0\nGATEWAY 10.0.0.1\nNAMESERVER 8.8.8.8\nNAMESERVER_PREFERRED 1.1.1.1\n",
        );
        let cfg = Config::parse(&path).unwrap();
        assert_eq!(cfg.nameserver, Some(Ipv4Addr::new(1, 1, 1, 1)));
        fs::remove_file(path).ok();
    }
}
