//! Per-host instructions and their `iptables-restore` rendering.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::model::{Action, PortSpec, Protocol};

/// Longest prefix iptables accepts for `--log-prefix`.
const LOG_PREFIX_MAX: usize = 28;

/// Built-in filter chain an instruction lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    /// Traffic terminating on the host.
    Input,
    /// Traffic originating on the host.
    Output,
    /// Traffic routed through the host.
    Forward,
}

impl Chain {
    /// Chain name as iptables spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::Forward => "FORWARD",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One match-and-act entry on a host, derived from one rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Name of the originating rule.
    pub rule: String,
    /// Target chain.
    pub chain: Chain,
    /// Interface to match (`-i` on INPUT, `-o` on OUTPUT).
    pub iface: Option<String>,
    /// Source address, `None` for any.
    pub src: Option<Ipv4Addr>,
    /// Destination address, `None` for any.
    pub dst: Option<Ipv4Addr>,
    /// Protocol, `None` for any.
    pub protocol: Option<Protocol>,
    /// Source ports.
    pub src_ports: Option<PortSpec>,
    /// Destination ports.
    pub dst_ports: Option<PortSpec>,
    /// ICMP type.
    pub icmp_type: Option<u8>,
    /// Verdict.
    pub action: Action,
    /// Syslog level of the LOG entry, if logged.
    pub log_level: Option<u8>,
}

fn ports_match(out: &mut String, direction: &str, ports: &PortSpec) {
    if ports.is_simple() {
        out.push_str(&format!(" --{direction}port {ports}"));
    } else {
        out.push_str(&format!(" -m multiport --{direction}ports {ports}"));
    }
}

impl Instruction {
    /// The match part shared by the LOG and verdict lines.
    fn matcher(&self) -> String {
        let mut out = format!("-A {}", self.chain);
        match (self.chain, &self.iface) {
            (Chain::Input, Some(iface)) => out.push_str(&format!(" -i {iface}")),
            (Chain::Output, Some(iface)) => out.push_str(&format!(" -o {iface}")),
            _ => {}
        }
        if let Some(src) = self.src {
            out.push_str(&format!(" -s {src}/32"));
        }
        if let Some(dst) = self.dst {
            out.push_str(&format!(" -d {dst}/32"));
        }
        if let Some(protocol) = self.protocol {
            out.push_str(&format!(" -p {protocol}"));
        }
        if let Some(ports) = &self.src_ports {
            ports_match(&mut out, "s", ports);
        }
        if let Some(ports) = &self.dst_ports {
            ports_match(&mut out, "d", ports);
        }
        if let Some(icmp_type) = self.icmp_type {
            out.push_str(&format!(" --icmp-type {icmp_type}"));
        }
        out
    }

    /// Renders the instruction as `iptables-restore` lines.
    ///
    /// A logged instruction yields a LOG line followed by the verdict line.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let matcher = self.matcher();
        let mut lines = Vec::with_capacity(2);
        if let Some(level) = self.log_level {
            let prefix = log_prefix(&format!("{} {} ", self.rule, self.action));
            lines.push(format!(
                "{matcher} -j LOG --log-prefix \"{prefix}\" --log-level {level}"
            ));
        }
        lines.push(format!("{matcher} -j {}", self.action));
        lines
    }
}

/// Printable part of `text` that fits the `--log-prefix` byte budget.
fn log_prefix(text: &str) -> String {
    let mut prefix = String::with_capacity(LOG_PREFIX_MAX);
    for c in text.chars().filter(|c| !c.is_control() && *c != '"') {
        if prefix.len() + c.len_utf8() > LOG_PREFIX_MAX {
            break;
        }
        prefix.push(c);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction() -> Instruction {
        Instruction {
            rule: String::from("ssh"),
            chain: Chain::Input,
            iface: Some(String::from("eth0")),
            src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            dst: Some(Ipv4Addr::new(10, 0, 0, 2)),
            protocol: Some(Protocol::Tcp),
            src_ports: None,
            dst_ports: "22".parse().ok(),
            icmp_type: None,
            action: Action::Accept,
            log_level: None,
        }
    }

    #[test]
    fn test_render_simple() {
        assert_eq!(
            instruction().render(),
            vec!["-A INPUT -i eth0 -s 10.0.0.1/32 -d 10.0.0.2/32 -p tcp --dport 22 -j ACCEPT"]
        );
    }

    #[test]
    fn test_render_multiport_and_log() {
        let mut ins = instruction();
        ins.chain = Chain::Forward;
        ins.dst_ports = "80,443".parse().ok();
        ins.action = Action::Drop;
        ins.log_level = Some(4);

        let lines = ins.render();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "-A FORWARD -s 10.0.0.1/32 -d 10.0.0.2/32 -p tcp -m multiport --dports 80,443 \
             -j LOG --log-prefix \"ssh DROP \" --log-level 4"
        );
        assert!(lines[1].ends_with("--dports 80,443 -j DROP"));
    }

    #[test]
    fn test_render_any() {
        let ins = Instruction {
            rule: String::from("all"),
            chain: Chain::Output,
            iface: None,
            src: None,
            dst: None,
            protocol: None,
            src_ports: None,
            dst_ports: None,
            icmp_type: None,
            action: Action::Accept,
            log_level: None,
        };
        assert_eq!(ins.render(), vec!["-A OUTPUT -j ACCEPT"]);
    }

    #[test]
    fn test_log_prefix_stays_on_one_line() {
        let mut ins = instruction();
        ins.rule = String::from("x\nCOMMIT\n*filter\"");
        ins.log_level = Some(4);

        let lines = ins.render();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| !l.contains('\n') && !l.contains('\r')));
        assert!(lines[0].contains("--log-prefix \"xCOMMIT*filter ACCEPT \""));
    }

    #[test]
    fn test_log_prefix_byte_budget() {
        let prefix = log_prefix(&"é".repeat(20));
        assert!(prefix.len() <= LOG_PREFIX_MAX);
        assert_eq!(prefix.chars().count(), LOG_PREFIX_MAX / 2);

        assert_eq!(log_prefix("a\tb\u{7f}c\"d"), "abcd");
    }
}
