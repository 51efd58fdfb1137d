//! WireGuard configuration file parser
//!
//! Parses `.conf` files with one [Interface] and one [Peer] section into an
//! identity plus the settings of the channel to that peer.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::Zeroizing;

use crate::channel::ChannelConfig;
use crate::error::ConfigError;
use crate::identity::Identity;

/// Identity and peer settings for one channel
#[derive(Debug, Clone)]
pub struct WgChanConfig {
    /// Our static identity, from `[Interface] PrivateKey`
    pub identity: Arc<Identity>,
    /// Settings for the channel to the single `[Peer]`
    pub channel: ChannelConfig,
}

impl WgChanConfig {
    /// Parse a configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?);
        Self::parse(&content)
    }

    /// Parse a configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut private_key: Option<Zeroizing<[u8; 32]>> = None;
        let mut seen_interface = false;
        let mut peer: Option<PeerBuilder> = None;
        let mut current_section: Option<Section> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1; // 1-indexed
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.eq_ignore_ascii_case("[interface]") {
                if seen_interface {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Duplicate [Interface] section".to_string(),
                    });
                }
                seen_interface = true;
                current_section = Some(Section::Interface);
                continue;
            } else if line.eq_ignore_ascii_case("[peer]") {
                if peer.is_some() {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "A channel has exactly one [Peer]".to_string(),
                    });
                }
                peer = Some(PeerBuilder::default());
                current_section = Some(Section::Peer);
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Interface) => match key.as_str() {
                    "privatekey" => {
                        private_key = Some(Zeroizing::new(parse_key(value, "PrivateKey")?));
                    }
                    _ => {
                        // Addressing and port keys belong to the host
                        tracing::debug!("Ignoring interface key: {}", key);
                    }
                },
                Some(Section::Peer) => {
                    let peer = peer.as_mut().ok_or(ConfigError::ParseError {
                        line: line_num,
                        message: "Peer value outside of [Peer] section".to_string(),
                    })?;

                    match key.as_str() {
                        "publickey" => {
                            peer.public_key = Some(parse_key(value, "PublicKey")?);
                        }
                        "presharedkey" => {
                            peer.preshared_key = Some(parse_key(value, "PresharedKey")?);
                        }
                        "persistentkeepalive" => {
                            peer.persistent_keepalive = if value.eq_ignore_ascii_case("off") {
                                None
                            } else {
                                Some(value.parse().map_err(|_| ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid PersistentKeepalive: {}", value),
                                })?)
                            };
                        }
                        "padpayloads" => {
                            peer.pad_payloads = parse_bool(value).ok_or(ConfigError::ParseError {
                                line: line_num,
                                message: format!("Invalid PadPayloads: {}", value),
                            })?;
                        }
                        _ => {
                            tracing::debug!("Ignoring peer key: {}", key);
                        }
                    }
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        if !seen_interface {
            return Err(ConfigError::MissingField {
                field: "[Interface] section".to_string(),
            });
        }
        let private_key = private_key.ok_or(ConfigError::MissingField {
            field: "PrivateKey".to_string(),
        })?;
        let channel = peer
            .ok_or(ConfigError::MissingField {
                field: "[Peer] section".to_string(),
            })?
            .build()?;

        Ok(WgChanConfig {
            identity: Arc::new(Identity::from_private_bytes(&private_key)),
            channel,
        })
    }

    /// Split into the pieces `Channel::new` takes
    pub fn into_parts(self) -> (Arc<Identity>, ChannelConfig) {
        (self.identity, self.channel)
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Interface,
    Peer,
}

/// Builder for the peer's ChannelConfig during parsing
#[derive(Default)]
struct PeerBuilder {
    public_key: Option<[u8; 32]>,
    preshared_key: Option<[u8; 32]>,
    persistent_keepalive: Option<u16>,
    pad_payloads: bool,
}

impl PeerBuilder {
    fn build(self) -> Result<ChannelConfig, ConfigError> {
        let public_key = self.public_key.ok_or(ConfigError::MissingField {
            field: "PublicKey in [Peer]".to_string(),
        })?;
        if public_key == [0u8; 32] {
            return Err(ConfigError::InvalidKey {
                field: "PublicKey".to_string(),
            });
        }

        let mut config = ChannelConfig::new(public_key);
        config.preshared_key = self.preshared_key;
        config.persistent_keepalive = self.persistent_keepalive;
        config.pad_payloads = self.pad_payloads;
        Ok(config)
    }
}

/// Parse a base64-encoded 32-byte key
fn parse_key(value: &str, field_name: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = Zeroizing::new(BASE64.decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })?);

    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ConfigError::InvalidKey {
            field: field_name.to_string(),
        })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
