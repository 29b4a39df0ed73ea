use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, WireError};

// MARK: - ContentKind

/// Declared type of a payload, carried as a single tag byte in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ContentKind {
    /// Compressed camera image (JPEG).
    Image = 0x01,
    /// Raw binary blob, e.g. a float16 depth map.
    Binary = 0x02,
    /// Textual metadata (CSV calibration / IMU records).
    Metadata = 0x03,
}

impl ContentKind {
    pub const ALL: [Self; 3] = [Self::Image, Self::Binary, Self::Metadata];

    /// Wire tag for this kind.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// File extension (without the dot) the collector stores this kind under.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Binary => "bin",
            Self::Metadata => "csv",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension().eq_ignore_ascii_case(ext))
    }
}

impl TryFrom<u8> for ContentKind {
    type Error = WireError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(Self::Image),
            0x02 => Ok(Self::Binary),
            0x03 => Ok(Self::Metadata),
            other => Err(WireError::UnknownContentKind(other)),
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Binary => write!(f, "binary"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

// MARK: - Endpoint

/// Remote collector address. Port 0 is never a valid endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub const DEFAULT_HOST: &'static str = "10.129.164.22";
    pub const DEFAULT_PORT: u16 = 5678;

    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let host: String = host.into();
        let host = host.trim().to_owned();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort { value: port.to_string() });
        }
        Ok(Self { host, port })
    }

    /// Build an endpoint from user-entered text, e.g. a settings form.
    pub fn parse(host: &str, port: &str) -> Result<Self, ConfigError> {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort { value: port.to_owned() })?;
        Self::new(host, port)
    }

    /// Re-check host and port after deserialising from an untrusted source.
    pub fn validate(self) -> Result<Self, ConfigError> {
        Self::new(self.host, self.port)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_owned(),
            port: Self::DEFAULT_PORT,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// MARK: - ConnectionState

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected  => "Disconnected",
            Self::Connecting    => "Connecting…",
            Self::Connected     => "Connected",
            Self::Disconnecting => "Disconnecting…",
            Self::Failed        => "Failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// MARK: - LinkStatus

/// Snapshot published to status indicators whenever the link changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// Sends are accepted only while this is true.
    pub ready: bool,
    pub endpoint: Endpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_tags_match_wire_values() {
        assert_eq!(ContentKind::Image.tag(), 0x01);
        assert_eq!(ContentKind::Binary.tag(), 0x02);
        assert_eq!(ContentKind::Metadata.tag(), 0x03);
        for kind in ContentKind::ALL {
            assert_eq!(ContentKind::try_from(kind.tag()), Ok(kind));
        }
        assert_eq!(
            ContentKind::try_from(0x07),
            Err(WireError::UnknownContentKind(0x07))
        );
    }

    #[test]
    fn content_kind_extensions() {
        assert_eq!(ContentKind::from_extension("JPG"), Some(ContentKind::Image));
        assert_eq!(ContentKind::from_extension("csv"), Some(ContentKind::Metadata));
        assert_eq!(ContentKind::from_extension("png"), None);
    }

    #[test]
    fn endpoint_rejects_port_zero_and_empty_host() {
        assert_eq!(
            Endpoint::new("10.0.0.5", 0),
            Err(ConfigError::InvalidPort { value: "0".into() })
        );
        assert_eq!(Endpoint::new("  ", 9000), Err(ConfigError::EmptyHost));
        assert!(Endpoint::parse("10.0.0.5", "65536").is_err());
        assert!(Endpoint::parse("10.0.0.5", "port").is_err());

        let ep = Endpoint::parse(" 10.0.0.5 ", " 9000").unwrap();
        assert_eq!(ep.host, "10.0.0.5");
        assert_eq!(ep.port, 9000);
        assert_eq!(ep.to_string(), "10.0.0.5:9000");
    }

    #[test]
    fn default_endpoint() {
        let ep = Endpoint::default();
        assert_eq!(ep.socket_addr(), "10.129.164.22:5678");
    }
}
