use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    // Lookup
    UnknownApp(String),
    UnknownCmd { app: String, cmd: String },
    UnknownAvp(String),
    UnknownAvpType { avp: String, avp_type: String },
    UnknownEnumItem { avp: String, value: String },
    UnknownProto(String),

    // Value
    InvalidValue(String),
    InvalidAvpValue { avp: String, value: String },
    InvalidYamlValue { avp: String, node: String },
    IndexOutOfRange { avp: String, index: i32 },

    // Schema
    ReqAvpAbsent(String),
    NoValueForReqAvp(String),

    // Frame
    MessageTooShort(usize),

    // Peer
    UnknownPeer(String),
    PeerExists(String),
    NotConnected(String),
    AlreadyConnected(String),
    Connect { peer: String, source: std::io::Error },
    Disconnect { peer: String, source: std::io::Error },
    SendTo { peer: String, detail: String },
    RecvFrom { peer: String, detail: String },
    NoData(String),
    NoSuitableAddr(String),
    Interrupted,
    DiameterResultCode(u32),

    // I/O
    OpenFile { file: String, source: std::io::Error },
    WriteFile { file: String, source: std::io::Error },
    ReadYaml { file: String, source: std::io::Error },
    ParseYaml(String),
    ParseDictionary(String),
    SerializeLayers(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownApp(id) => write!(f, "unknown application: '{}'", id),
            Error::UnknownCmd { app, cmd } => {
                write!(f, "unknown command for app {}: '{}'", app, cmd)
            }
            Error::UnknownAvp(id) => write!(f, "unknown AVP: '{}'", id),
            Error::UnknownAvpType { avp, avp_type } => {
                write!(f, "AVP {}: unknown type '{}'", avp, avp_type)
            }
            Error::UnknownEnumItem { avp, value } => {
                write!(f, "AVP {}: unknown enum item '{}'", avp, value)
            }
            Error::UnknownProto(proto) => write!(f, "unknown protocol: {}", proto),
            Error::InvalidValue(value) => write!(f, "invalid value '{}'", value),
            Error::InvalidAvpValue { avp, value } => {
                write!(f, "AVP {}: invalid value '{}'", avp, value)
            }
            Error::InvalidYamlValue { avp, node } => {
                write!(f, "AVP {}: invalid YAML value '{}'", avp, node)
            }
            Error::IndexOutOfRange { avp, index } => {
                write!(f, "AVP {}: index out of data range: {}", avp, index)
            }
            Error::ReqAvpAbsent(avp) => write!(f, "mandatory AVP '{}' is absent", avp),
            Error::NoValueForReqAvp(avp) => {
                write!(f, "missing value for the required AVP: '{}'", avp)
            }
            Error::MessageTooShort(len) => write!(f, "message too short: {}", len),
            Error::UnknownPeer(peer) => write!(f, "unknown peer: '{}'", peer),
            Error::PeerExists(peer) => write!(f, "peer '{}' already exists", peer),
            Error::NotConnected(peer) => write!(f, "peer '{}' not connected", peer),
            Error::AlreadyConnected(peer) => write!(f, "peer '{}' already connected", peer),
            Error::Connect { peer, source } => {
                write!(f, "peer '{}' connect error: {}", peer, source)
            }
            Error::Disconnect { peer, source } => {
                write!(f, "peer '{}' disconnect error: {}", peer, source)
            }
            Error::SendTo { peer, detail } => write!(f, "peer '{}' send error: {}", peer, detail),
            Error::RecvFrom { peer, detail } => {
                write!(f, "peer '{}' recv error: {}", peer, detail)
            }
            Error::NoData(peer) => write!(f, "no data from peer '{}'", peer),
            Error::NoSuitableAddr(addr) => {
                write!(f, "no suitable IP address found: {}", addr)
            }
            Error::Interrupted => write!(f, "interrupted"),
            Error::DiameterResultCode(code) => write!(f, "diameter error: {}", code),
            Error::OpenFile { file, source } => {
                write!(f, "error opening file {}: {}", file, source)
            }
            Error::WriteFile { file, source } => {
                write!(f, "error writing file {}: {}", file, source)
            }
            Error::ReadYaml { file, source } => {
                write!(f, "failed to read '{}': {}", file, source)
            }
            Error::ParseYaml(detail) => write!(f, "failed to parse YAML: {}", detail),
            Error::ParseDictionary(detail) => {
                write!(f, "failed to parse dictionary: {}", detail)
            }
            Error::SerializeLayers(detail) => {
                write!(f, "failed to serialize capture layers: {}", detail)
            }
            Error::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::ParseYaml(err.to_string())
    }
}
