//! Configuration loading and validation
//!
//! The bridge is configured by a single INI file. Two mandatory sections,
//! `[Brokers]` and `[Channels]`, each carry an `Enabled` list of section
//! names; every enabled name must have a matching section describing one
//! MQTT broker or one outbound channel. A channel additionally references
//! an `UpdateFields` section mapping HTTP field names to
//! `brokerName topicPath` pairs.
//!
//! All validation happens here, once, at startup. The rest of the bridge
//! consumes only the typed descriptors this module produces.

use crate::data::{DataIdentifier, FieldMapping};
use ini::{Ini, Properties};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// ThingSpeak updates carry at most eight field parameters.
const THINGSPEAK_FIELD_LIMIT: usize = 8;

/// Errors raised while loading or validating the configuration file.
/// Every variant is a startup-fatal condition; the process reports it
/// once and exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration file: {0}")]
    Load(#[from] ini::Error),

    #[error("mandatory section [{0}] is missing")]
    MissingSection(String),

    #[error("section [{section}]: option {option} is missing")]
    MissingOption { section: String, option: String },

    #[error("section [{section}]: {option} value {value:?} is not a valid integer")]
    InvalidInteger {
        section: String,
        option: String,
        value: String,
    },

    #[error("section [{section}]: unknown channel type {value:?}")]
    UnknownChannelType { section: String, value: String },

    #[error("section [{section}]: unknown update type {value:?}")]
    UnknownUpdateType { section: String, value: String },

    #[error("channel {0}: phant channels require the Id option")]
    MissingChannelId(String),

    #[error("section [{0}]: User and Password must be configured together")]
    PartialCredentials(String),

    #[error("section [{0}]: User and Password must be non-empty")]
    EmptyCredentials(String),

    #[error("section [{0}]: at least one Topic subscription is required")]
    NoSubscriptions(String),

    #[error(
        "section [{section}]: {field} must contain two whitespace separated values \
         (broker name and topic)"
    )]
    MalformedMapping { section: String, field: String },

    #[error("section [{section}]: broker {broker} is not defined or enabled")]
    UnknownBroker { section: String, broker: String },

    #[error("channel {0}: UpdateFields section maps no fields")]
    EmptyMapping(String),

    #[error("channel {channel}: ThingSpeak supports at most 8 mapped fields, {count} given")]
    TooManyFields { channel: String, count: usize },
}

/// MQTT authentication credentials, always configured as a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// An addressable MQTT endpoint, created from configuration and immutable
/// for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}:{}", self.name, self.host, self.port)
    }
}

/// One broker together with its topic subscription patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenDescriptor {
    pub broker: Broker,
    pub subscriptions: Vec<String>,
}

/// Which cloud service a channel uploads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    ThingSpeak,
    Phant,
}

/// An outbound destination at a cloud service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub kind: ChannelKind,
    pub api_key: String,
    /// Required for phant, unused for ThingSpeak.
    pub channel_id: Option<String>,
    /// Bounded grace period for partial measurements. When absent, the
    /// channel never emits incomplete data.
    pub waiting: Option<Duration>,
}

/// Which update-rate discipline governs a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterKind {
    Blackout,
    Buffered,
    Average,
    OnChange,
}

/// Everything needed to build one channel's update pipeline: the channel
/// itself, its rate limit, its discipline and its field mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDescriptor {
    pub channel: Channel,
    pub update_interval: Duration,
    pub updater: UpdaterKind,
    pub mapping: FieldMapping,
}

/// The fully validated program configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub listen: Vec<ListenDescriptor>,
    pub updates: Vec<UpdateDescriptor>,
}

impl BridgeConfig {
    /// Load and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Parse an already loaded INI document. Split out from `load` so the
    /// tests can feed documents from strings.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let listen = parse_brokers(ini)?;
        let updates = parse_channels(ini, &listen)?;
        Ok(Self { listen, updates })
    }
}

/// Parse the `[Brokers]` section and every enabled broker section.
fn parse_brokers(ini: &Ini) -> Result<Vec<ListenDescriptor>, ConfigError> {
    let names = enabled_names(ini, "Brokers")?;
    let mut listen = Vec::with_capacity(names.len());
    for name in names {
        let props = section(ini, &name)?;
        let broker = parse_broker(&name, props)?;
        let subscriptions = parse_subscriptions(&name, props)?;
        listen.push(ListenDescriptor {
            broker,
            subscriptions,
        });
    }
    Ok(listen)
}

fn parse_broker(name: &str, props: &Properties) -> Result<Broker, ConfigError> {
    let host = props.get("Host").unwrap_or("127.0.0.1").to_string();
    let port = match props.get("Port") {
        Some(value) => parse_int::<u16>(name, "Port", value)?,
        None => 1883,
    };
    let credentials = parse_credentials(name, props)?;
    Ok(Broker {
        name: name.to_string(),
        host,
        port,
        credentials,
    })
}

/// Credentials are all-or-nothing: configuring only one of User/Password
/// is a configuration error, as is configuring either as an empty string.
fn parse_credentials(name: &str, props: &Properties) -> Result<Option<Credentials>, ConfigError> {
    let user = props.get("User");
    let password = props.get("Password");
    match (user, password) {
        (None, None) => Ok(None),
        (Some(user), Some(password)) => {
            if user.is_empty() || password.is_empty() {
                return Err(ConfigError::EmptyCredentials(name.to_string()));
            }
            Ok(Some(Credentials {
                user: user.to_string(),
                password: password.to_string(),
            }))
        }
        _ => Err(ConfigError::PartialCredentials(name.to_string())),
    }
}

fn parse_subscriptions(name: &str, props: &Properties) -> Result<Vec<String>, ConfigError> {
    let raw = require(props, name, "Topic")?;
    let subscriptions: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if subscriptions.is_empty() {
        return Err(ConfigError::NoSubscriptions(name.to_string()));
    }
    Ok(subscriptions)
}

/// Parse the `[Channels]` section and every enabled channel section,
/// resolving each channel's field mapping against the enabled brokers.
fn parse_channels(
    ini: &Ini,
    listen: &[ListenDescriptor],
) -> Result<Vec<UpdateDescriptor>, ConfigError> {
    let names = enabled_names(ini, "Channels")?;
    let mut updates = Vec::with_capacity(names.len());
    for name in names {
        let props = section(ini, &name)?;
        updates.push(parse_channel(ini, listen, &name, props)?);
    }
    Ok(updates)
}

fn parse_channel(
    ini: &Ini,
    listen: &[ListenDescriptor],
    name: &str,
    props: &Properties,
) -> Result<UpdateDescriptor, ConfigError> {
    let kind = match require(props, name, "Type")? {
        "thingspeak" => ChannelKind::ThingSpeak,
        "phant" => ChannelKind::Phant,
        other => {
            return Err(ConfigError::UnknownChannelType {
                section: name.to_string(),
                value: other.to_string(),
            })
        }
    };

    let api_key = require(props, name, "Key")?.to_string();
    let channel_id = props.get("Id").map(str::to_string);
    if kind == ChannelKind::Phant && channel_id.is_none() {
        return Err(ConfigError::MissingChannelId(name.to_string()));
    }

    let update_rate = parse_int::<u64>(name, "UpdateRate", require(props, name, "UpdateRate")?)?;
    let updater = match require(props, name, "UpdateType")? {
        "blackout" => UpdaterKind::Blackout,
        "buffered" => UpdaterKind::Buffered,
        "average" => UpdaterKind::Average,
        "onchange" => UpdaterKind::OnChange,
        other => {
            return Err(ConfigError::UnknownUpdateType {
                section: name.to_string(),
                value: other.to_string(),
            })
        }
    };

    let waiting = match props.get("WaitInterval") {
        Some(value) => Some(Duration::from_secs(parse_int::<u64>(
            name,
            "WaitInterval",
            value,
        )?)),
        None => None,
    };

    let fields_section = require(props, name, "UpdateFields")?.to_string();
    let mapping = parse_field_mapping(ini, listen, &fields_section)?;
    if mapping.is_empty() {
        return Err(ConfigError::EmptyMapping(name.to_string()));
    }
    if kind == ChannelKind::ThingSpeak && mapping.len() > THINGSPEAK_FIELD_LIMIT {
        return Err(ConfigError::TooManyFields {
            channel: name.to_string(),
            count: mapping.len(),
        });
    }

    Ok(UpdateDescriptor {
        channel: Channel {
            name: name.to_string(),
            kind,
            api_key,
            channel_id,
            waiting,
        },
        update_interval: Duration::from_secs(update_rate),
        updater,
        mapping,
    })
}

/// Parse one `UpdateFields` section: every option is a field name, every
/// value is a `brokerName topicPath` pair referencing an enabled broker.
fn parse_field_mapping(
    ini: &Ini,
    listen: &[ListenDescriptor],
    section_name: &str,
) -> Result<FieldMapping, ConfigError> {
    let props = section(ini, section_name)?;
    let mut mapping = HashMap::new();
    for (field, value) in props.iter() {
        let mut parts = value.split_whitespace();
        let (broker, topic) = match (parts.next(), parts.next(), parts.next()) {
            (Some(broker), Some(topic), None) => (broker, topic),
            _ => {
                return Err(ConfigError::MalformedMapping {
                    section: section_name.to_string(),
                    field: field.to_string(),
                })
            }
        };
        if !listen.iter().any(|l| l.broker.name == broker) {
            return Err(ConfigError::UnknownBroker {
                section: section_name.to_string(),
                broker: broker.to_string(),
            });
        }
        mapping.insert(
            DataIdentifier::new(broker, topic),
            field.to_string(),
        );
    }
    Ok(FieldMapping::new(mapping))
}

/// The `Enabled` list of a top-level section, split on whitespace.
fn enabled_names(ini: &Ini, section_name: &str) -> Result<Vec<String>, ConfigError> {
    let props = section(ini, section_name)?;
    let raw = require(props, section_name, "Enabled")?;
    Ok(raw.split_whitespace().map(str::to_string).collect())
}

fn section<'a>(ini: &'a Ini, name: &str) -> Result<&'a Properties, ConfigError> {
    ini.section(Some(name))
        .ok_or_else(|| ConfigError::MissingSection(name.to_string()))
}

fn require<'a>(props: &'a Properties, section: &str, option: &str) -> Result<&'a str, ConfigError> {
    props.get(option).ok_or_else(|| ConfigError::MissingOption {
        section: section.to_string(),
        option: option.to_string(),
    })
}

fn parse_int<T: std::str::FromStr>(
    section: &str,
    option: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidInteger {
        section: section.to_string(),
        option: option.to_string(),
        value: value.to_string(),
    })
}
