use crate::error::{Result, RipError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Timers, port plan and address plan shared by every router of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub update_interval_secs: f64,
    pub max_jitter_secs: f64,
    pub timeout_secs: f64,
    pub garbage_secs: f64,
    pub receive_grace_secs: f64,
    pub output_port_base: u16,
    pub input_port_base: u16,
    pub network_prefix: [u8; 3],
    pub bind_address: Ipv4Addr,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 5.0,
            max_jitter_secs: 8.0,
            timeout_secs: 180.0,
            garbage_secs: 120.0,
            receive_grace_secs: 5.0,
            output_port_base: 7200,
            input_port_base: 8200,
            network_prefix: [192, 0, 2],
            bind_address: Ipv4Addr::LOCALHOST,
        }
    }
}

/// Name, mock address and port pair of one simulated router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterIdentity {
    pub name: String,
    pub addr: Ipv4Addr,
    pub output_port: u16,
    pub input_port: u16,
}

impl ProtocolConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| RipError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ProtocolConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| RipError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        let timers = [
            ("update_interval_secs", self.update_interval_secs),
            ("max_jitter_secs", self.max_jitter_secs),
            ("timeout_secs", self.timeout_secs),
            ("garbage_secs", self.garbage_secs),
            ("receive_grace_secs", self.receive_grace_secs),
        ];
        for (name, value) in timers {
            if !value.is_finite() || value < 0.0 {
                return Err(RipError::Config(format!("{name} must be a non-negative number, got {value}")));
            }
        }
        if self.update_interval_secs == 0.0 {
            return Err(RipError::Config("update_interval_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Base interval plus a jitter drawn uniformly from `[0, max_jitter)`.
    /// Sampled anew on every call so routers drift apart.
    pub fn update_interval(&self) -> Duration {
        let jitter = if self.max_jitter_secs > 0.0 {
            rand::thread_rng().gen_range(0.0..self.max_jitter_secs)
        } else {
            0.0
        };
        Duration::from_secs_f64(self.update_interval_secs + jitter)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.update_interval_secs + self.receive_grace_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn garbage(&self) -> Duration {
        Duration::from_secs_f64(self.garbage_secs)
    }

    /// Derives address and ports from a router name of the form `R<n>`.
    pub fn identity_for(&self, name: &str) -> Result<RouterIdentity> {
        let name = name.trim();
        let number: u8 = name
            .strip_prefix('R')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| RipError::InvalidRouterName(name.to_string()))?;

        let output_port = self.output_port_base.checked_add(number.into());
        let input_port = self.input_port_base.checked_add(number.into());
        let (Some(output_port), Some(input_port)) = (output_port, input_port) else {
            return Err(RipError::Config(format!("port base too high for router {name}")));
        };

        let [a, b, c] = self.network_prefix;
        Ok(RouterIdentity {
            name: name.to_string(),
            addr: Ipv4Addr::new(a, b, c, number),
            output_port,
            input_port,
        })
    }
}

/// Splits `R<i>-R<j>` into its two router names.
pub fn parse_link(spec: &str) -> Result<(String, String)> {
    let spec = spec.trim();
    let invalid = || RipError::InvalidLink(spec.to_string());

    let (left, right) = spec.split_once('-').ok_or_else(invalid)?;
    let (left, right) = (left.trim(), right.trim());

    let is_router_name = |s: &str| s.strip_prefix('R').is_some_and(|n| n.parse::<u8>().is_ok());
    if !is_router_name(left) || !is_router_name(right) || left == right {
        return Err(invalid());
    }
    Ok((left.to_string(), right.to_string()))
}

/// Router and link lists that seed a network at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Startup {
    pub routers: Vec<String>,
    pub links: Vec<String>,
}

impl Startup {
    pub fn load(routers: impl AsRef<Path>, links: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            routers: read_lines(routers.as_ref())?,
            links: read_lines(links.as_ref())?,
        })
    }

    pub fn parse(routers: &str, links: &str) -> Self {
        Self {
            routers: non_empty_lines(routers),
            links: non_empty_lines(links),
        }
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| RipError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(non_empty_lines(&content))
}

fn non_empty_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
