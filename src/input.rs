//! Provides a means to read, parse and hold configuration options for scans.
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use itertools::Itertools;
use serde_derive::Deserialize;

use crate::error::ScanError;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Port probed when the caller does not name any.
pub const DEFAULT_PORT: u16 = 80;

/// Per-attempt timeout used when the caller does not name one.
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;

/// How many times a probe retries a target after the process ran out of
/// file descriptors, unless configured otherwise.
pub const DEFAULT_EXHAUSTION_RETRIES: u32 = 10;

/// Transport used for a connection attempt.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Full TCP handshake.
    #[default]
    Tcp,
    /// Datagram probe, open only when the target answers.
    Udp,
}

impl Protocol {
    /// Lowercase name of the transport.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Scheme of the optional verification request.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

/// Describes an HTTP(S) request that could confirm an open port belongs to
/// the expected kind of device.
///
/// Carried through the configuration so callers can keep it next to the
/// rest of their scan settings. The scan path does not issue it.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyOptions {
    /// Request path, e.g. `/api/v1/status`.
    pub endpoint: String,
    /// Query string without the leading `?`.
    #[serde(default)]
    pub params: String,
    /// HTTP method.
    #[serde(default)]
    pub method: String,
    /// Whether the request goes over plain HTTP or TLS.
    #[serde(default)]
    pub scheme: Scheme,
    /// Request body.
    #[serde(default)]
    pub payload: Option<String>,
}

/// Immutable settings for one scan.
///
/// Built through [`ScanConfig::builder`], which validates that the timeout
/// is positive and that at least one port is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    protocol: Protocol,
    timeout: Duration,
    ports: Vec<u16>,
    expand_entire_block: bool,
    return_only_open: bool,
    exhaustion_retries: u32,
    verify: Option<VerifyOptions>,
}

impl ScanConfig {
    /// Starts a builder holding every default.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Transport used for every target.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Per-attempt timeout, also used as the backoff after resource exhaustion.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ports crossed with every expanded address, deduplicated.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Whether CIDR blocks are enumerated instead of taken as one host.
    pub fn expand_entire_block(&self) -> bool {
        self.expand_entire_block
    }

    /// Whether closed devices are dropped from the result.
    pub fn return_only_open(&self) -> bool {
        self.return_only_open
    }

    /// Upper bound on retries after the process ran out of file descriptors.
    pub fn exhaustion_retries(&self) -> u32 {
        self.exhaustion_retries
    }

    /// Optional verification request, not issued by the scan path.
    pub fn verify(&self) -> Option<&VerifyOptions> {
        self.verify.as_ref()
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ports: vec![DEFAULT_PORT],
            expand_entire_block: false,
            return_only_open: false,
            exhaustion_retries: DEFAULT_EXHAUSTION_RETRIES,
            verify: None,
        }
    }
}

/// Named overrides for [`ScanConfig`].
#[derive(Debug, Clone, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Transport used for every target.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Per-attempt timeout. Must be non-zero.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Replaces the port set. Duplicates are dropped, first occurrence wins.
    pub fn ports<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.config.ports = ports.into_iter().unique().collect();
        self
    }

    /// Enumerate CIDR blocks instead of taking their host part.
    pub fn expand_entire_block(mut self, expand: bool) -> Self {
        self.config.expand_entire_block = expand;
        self
    }

    /// Drop closed devices from the result.
    pub fn return_only_open(mut self, only_open: bool) -> Self {
        self.config.return_only_open = only_open;
        self
    }

    /// Retries allowed after running out of file descriptors.
    pub fn exhaustion_retries(mut self, retries: u32) -> Self {
        self.config.exhaustion_retries = retries;
        self
    }

    /// Attaches a verification request.
    pub fn verify(mut self, verify: VerifyOptions) -> Self {
        self.config.verify = Some(verify);
        self
    }

    /// Validates and freezes the configuration.
    pub fn build(self) -> Result<ScanConfig, ScanError> {
        if self.config.timeout.is_zero() {
            return Err(ScanError::InvalidConfig(
                "timeout must be greater than zero".to_owned(),
            ));
        }
        if self.config.ports.is_empty() {
            return Err(ScanError::InvalidConfig(
                "at least one port is required".to_owned(),
            ));
        }
        Ok(self.config)
    }
}

/// Port list as parsed from the command line or the config file.
pub type Ports = Vec<u16>;

/// Parses `80,443,8000-8010` style port lists, sorted and deduplicated.
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let Some((start, end)) = range_str.split('-').collect_tuple() else {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 8000-8010.",
        ));
    };

    let start: u16 = start
        .parse()
        .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
    let end: u16 = end
        .parse()
        .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "netsweep",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Finds reachable services across address ranges and CIDR blocks without
/// opening more sockets than the open file limit allows.
pub struct Opts {
    /// A comma-delimited list of address ranges (10.0.0.1-10.0.0.20), CIDR blocks or hosts.
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// A list of ports and/or port ranges to probe. Examples: 80,443,8080 or 8000-8010
    #[arg(short, long, value_parser = parse_ports_and_ranges)]
    pub ports: Option<Ports>,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output the open devices.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Print every device as JSON once the scan completes.
    #[arg(long)]
    pub json: bool,

    /// Transport used for the connection attempt.
    #[arg(long, value_enum, ignore_case = true, default_value = "tcp")]
    pub protocol: Protocol,

    /// The timeout in milliseconds before a target is assumed to be closed.
    #[arg(short, long, default_value = "1000")]
    pub timeout: u32,

    /// How often a target is retried when the process runs out of file descriptors.
    #[arg(long, default_value = "10")]
    pub retries: u32,

    /// Enumerate every usable address of a CIDR block instead of probing its host part.
    #[arg(short, long)]
    pub entire_block: bool,

    /// Only report devices with a reachable port.
    #[arg(short, long)]
    pub only_open: bool,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Number of probes allowed in flight. Inferred from the open file limit when omitted.
    #[arg(short, long)]
    pub budget: Option<usize>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    /// Parses the command line, falling back to port 80 when no ports are given.
    pub fn read() -> Self {
        let mut opts = Opts::parse();

        if opts.ports.is_none() {
            opts.ports = Some(vec![DEFAULT_PORT]);
        }

        opts
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    ///
    /// Values set in the configuration file win over the command line;
    /// pass `--no-config` to scan with the flags alone.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            addresses,
            greppable,
            accessible,
            json,
            protocol,
            timeout,
            retries,
            entire_block,
            only_open
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(ports, ulimit, budget);
    }

    /// Freezes the merged options into the settings of one scan.
    pub fn to_scan_config(&self) -> Result<ScanConfig, ScanError> {
        ScanConfig::builder()
            .protocol(self.protocol)
            .timeout(Duration::from_millis(u64::from(self.timeout)))
            .ports(self.ports.clone().unwrap_or_else(|| vec![DEFAULT_PORT]))
            .expand_entire_block(self.entire_block)
            .return_only_open(self.only_open)
            .exhaustion_retries(self.retries)
            .build()
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addresses: vec![],
            ports: None,
            no_config: true,
            config_path: None,
            greppable: true,
            accessible: false,
            json: false,
            protocol: Protocol::Tcp,
            timeout: 0,
            retries: 0,
            entire_block: false,
            only_open: false,
            ulimit: None,
            budget: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    ports: Option<Vec<u16>>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    json: Option<bool>,
    protocol: Option<Protocol>,
    timeout: Option<u32>,
    retries: Option<u32>,
    entire_block: Option<bool>,
    only_open: Option<bool>,
    ulimit: Option<u64>,
    budget: Option<usize>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty configuration.
    ///
    /// # Format
    ///
    /// addresses = ["192.168.1.0/24"]
    /// ports = [80, 554, 8000]
    /// protocol = "tcp"
    /// timeout = 1500
    /// entire_block = true
    /// only_open = true
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Config::default());
        };
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", config_path.display()))
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".netsweep.toml");
    Some(config_path)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use parameterized::parameterized;
    use std::time::Duration;

    use super::{parse_ports_and_ranges, Config, Opts, Protocol, ScanConfig};
    use crate::error::ScanError;

    impl Config {
        fn sample() -> Self {
            Self {
                addresses: Some(vec!["192.168.0.0/30".to_owned()]),
                ports: None,
                greppable: Some(true),
                accessible: Some(true),
                json: Some(false),
                protocol: Some(Protocol::Udp),
                timeout: Some(1_500),
                retries: Some(3),
                entire_block: Some(true),
                only_open: Some(true),
                ulimit: None,
                budget: None,
            }
        }
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn scan_config_defaults() {
        let config = ScanConfig::builder().build().unwrap();

        assert_eq!(config.protocol(), Protocol::Tcp);
        assert_eq!(config.timeout(), Duration::from_millis(1_000));
        assert_eq!(config.ports(), &[80]);
        assert!(!config.expand_entire_block());
        assert!(!config.return_only_open());
        assert_eq!(config.exhaustion_retries(), 10);
        assert!(config.verify().is_none());
    }

    #[test]
    fn scan_config_rejects_zero_timeout() {
        let result = ScanConfig::builder().timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn scan_config_rejects_empty_ports() {
        let result = ScanConfig::builder().ports(Vec::new()).build();
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn scan_config_dedups_ports_in_order() {
        let config = ScanConfig::builder()
            .ports([554, 80, 554, 8000, 80])
            .build()
            .unwrap();
        assert_eq!(config.ports(), &[554, 80, 8000]);
    }

    #[parameterized(input = {
        vec!["netsweep", "-a", "10.0.0.1-10.0.0.9"],
        vec!["netsweep", "-a", "10.0.0.0/24", "--entire-block", "-p", "80,554"],
        vec!["netsweep", "-a", "10.0.0.1", "--protocol", "UDP", "-t", "250"],
    }, protocol = {
        Protocol::Tcp,
        Protocol::Tcp,
        Protocol::Udp,
    })]
    fn parse_protocol_flag(input: Vec<&str>, protocol: Protocol) {
        let opts = Opts::parse_from(input);
        assert_eq!(opts.protocol, protocol);
    }

    #[test]
    fn opts_convert_to_scan_config() {
        let opts = Opts::parse_from([
            "netsweep",
            "-a",
            "10.0.0.0/24",
            "-p",
            "554,80",
            "-t",
            "250",
            "--entire-block",
            "--only-open",
        ]);
        let config = opts.to_scan_config().unwrap();

        assert_eq!(config.ports(), &[80, 554]);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(config.expand_entire_block());
        assert!(config.return_only_open());
    }

    #[test]
    fn opts_no_merge_when_config_is_ignored() {
        let mut opts = Opts::default();
        let config = Config::sample();

        opts.merge(&config);

        assert_eq!(opts.addresses, vec![] as Vec<String>);
        assert_eq!(opts.protocol, Protocol::Tcp);
        assert_eq!(opts.timeout, 0);
        assert!(!opts.entire_block);
    }

    #[test]
    fn opts_merge_required_arguments() {
        let mut opts = Opts::default();
        let config = Config::sample();

        opts.merge_required(&config);

        assert_eq!(opts.addresses, config.addresses.unwrap());
        assert_eq!(opts.protocol, Protocol::Udp);
        assert_eq!(opts.timeout, 1_500);
        assert_eq!(opts.retries, 3);
        assert!(opts.entire_block);
        assert!(opts.only_open);
        assert!(opts.accessible);
    }

    #[test]
    fn opts_merge_optional_arguments() {
        let mut opts = Opts::default();
        let mut config = Config::sample();
        config.ports = Some(vec![80, 554]);
        config.ulimit = Some(4_096);
        config.budget = Some(64);

        opts.merge_optional(&config);

        assert_eq!(opts.ports, Some(vec![80, 554]));
        assert_eq!(opts.ulimit, Some(4_096));
        assert_eq!(opts.budget, Some(64));
    }

    #[test]
    fn config_file_wins_over_command_line() {
        let mut opts = Opts::parse_from(["netsweep", "-a", "10.0.0.1", "-t", "250"]);
        opts.merge(&Config::sample());
        assert_eq!(opts.timeout, 1_500);
        assert_eq!(opts.addresses, vec!["192.168.0.0/30".to_owned()]);

        let mut opts = Opts::parse_from(["netsweep", "-a", "10.0.0.1", "-t", "250", "--no-config"]);
        opts.merge(&Config::sample());
        assert_eq!(opts.timeout, 250);
        assert_eq!(opts.addresses, vec!["10.0.0.1".to_owned()]);
    }

    #[test]
    fn config_parses_toml() {
        let config = Config::parse(
            r#"
            addresses = ["10.0.0.1-10.0.0.5"]
            ports = [80, 8080]
            protocol = "udp"
            timeout = 200
            only_open = true
            "#,
        )
        .unwrap();

        assert_eq!(config.ports, Some(vec![80, 8080]));
        assert_eq!(config.protocol, Some(Protocol::Udp));
        assert_eq!(config.timeout, Some(200));
        assert_eq!(config.only_open, Some(true));
        assert!(config.entire_block.is_none());
    }

    #[test]
    fn config_rejects_unknown_protocol() {
        assert!(Config::parse(r#"protocol = "sctp""#).is_err());
    }

    #[test]
    fn test_parse_ports_and_ranges_single_port() {
        assert_eq!(parse_ports_and_ranges("80"), Ok(vec![80]));
    }

    #[test]
    fn test_parse_ports_and_ranges_mixed_ports_and_ranges() {
        let result = parse_ports_and_ranges("554, 80, 8000-8002");
        assert_eq!(result, Ok(vec![80, 554, 8000, 8001, 8002]));
    }

    #[test]
    fn test_parse_ports_and_ranges_duplicates() {
        assert_eq!(parse_ports_and_ranges("80,443,80,443"), Ok(vec![80, 443]));
    }

    #[test]
    fn test_parse_ports_and_ranges_empty_input() {
        let result = parse_ports_and_ranges("");
        assert!(result
            .unwrap_err()
            .contains("No valid ports or ranges provided"));
    }

    #[test]
    fn test_parse_ports_and_ranges_invalid_range_format() {
        let result = parse_ports_and_ranges("80,1-2-3,443");
        assert!(result
            .unwrap_err()
            .contains("Invalid range format '1-2-3'. Expected 'start-end'"));
    }

    #[test]
    fn test_parse_ports_and_ranges_reverse_range() {
        let result = parse_ports_and_ranges("80,5-1,443");
        assert!(result
            .unwrap_err()
            .contains("Start port 5 is greater than end port 1 in range '5-1'"));
    }

    #[test]
    fn test_parse_ports_and_ranges_zero_port() {
        let result = parse_ports_and_ranges("80,0,443");
        assert!(result
            .unwrap_err()
            .contains("Port 0 must be between 1 and 65535"));
    }
}
