//! Connection Record Schema
//!
//! Fixed 41-column NSL-KDD layout: one duration column, three categorical
//! columns, then 37 traffic counters and rates.

use crate::{DlhaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Total number of columns in a connection record
pub const FIELD_COUNT: usize = 41;
/// Number of numeric columns
pub const NUMERIC_FIELD_COUNT: usize = 38;
/// Number of categorical columns
pub const CATEGORICAL_FIELD_COUNT: usize = 3;

macro_rules! numeric_fields {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Numeric columns of a connection record, in schema order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NumericField {
            $(
                #[doc = $name]
                $variant
            ),+
        }

        impl NumericField {
            /// Every numeric field in schema order
            pub const ALL: [NumericField; NUMERIC_FIELD_COUNT] = [$(NumericField::$variant),+];

            /// NSL-KDD column name
            pub const fn name(self) -> &'static str {
                match self {
                    $(NumericField::$variant => $name),+
                }
            }
        }
    };
}

numeric_fields! {
    Duration => "duration",
    SrcBytes => "src_bytes",
    DstBytes => "dst_bytes",
    Land => "land",
    WrongFragment => "wrong_fragment",
    Urgent => "urgent",
    Hot => "hot",
    NumFailedLogins => "num_failed_logins",
    LoggedIn => "logged_in",
    NumCompromised => "num_compromised",
    RootShell => "root_shell",
    SuAttempted => "su_attempted",
    NumRoot => "num_root",
    NumFileCreations => "num_file_creations",
    NumShells => "num_shells",
    NumAccessFiles => "num_access_files",
    NumOutboundCmds => "num_outbound_cmds",
    IsHostLogin => "is_host_login",
    IsGuestLogin => "is_guest_login",
    Count => "count",
    SrvCount => "srv_count",
    SerrorRate => "serror_rate",
    SrvSerrorRate => "srv_serror_rate",
    RerrorRate => "rerror_rate",
    SrvRerrorRate => "srv_rerror_rate",
    SameSrvRate => "same_srv_rate",
    DiffSrvRate => "diff_srv_rate",
    SrvDiffHostRate => "srv_diff_host_rate",
    DstHostCount => "dst_host_count",
    DstHostSrvCount => "dst_host_srv_count",
    DstHostSameSrvRate => "dst_host_same_srv_rate",
    DstHostDiffSrvRate => "dst_host_diff_srv_rate",
    DstHostSameSrcPortRate => "dst_host_same_src_port_rate",
    DstHostSrvDiffHostRate => "dst_host_srv_diff_host_rate",
    DstHostSerrorRate => "dst_host_serror_rate",
    DstHostSrvSerrorRate => "dst_host_srv_serror_rate",
    DstHostRerrorRate => "dst_host_rerror_rate",
    DstHostSrvRerrorRate => "dst_host_srv_rerror_rate",
}

impl NumericField {
    /// Position among the numeric fields
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Categorical columns of a connection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoricalField {
    /// Transport protocol
    ProtocolType,
    /// Destination network service
    Service,
    /// Connection status flag
    Flag,
}

impl CategoricalField {
    /// Every categorical field in schema order
    pub const ALL: [CategoricalField; CATEGORICAL_FIELD_COUNT] = [
        CategoricalField::ProtocolType,
        CategoricalField::Service,
        CategoricalField::Flag,
    ];

    /// NSL-KDD column name
    pub const fn name(self) -> &'static str {
        match self {
            CategoricalField::ProtocolType => "protocol_type",
            CategoricalField::Service => "service",
            CategoricalField::Flag => "flag",
        }
    }

    /// Position among the categorical fields
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A column of the record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Numeric column
    Numeric(NumericField),
    /// Categorical column
    Categorical(CategoricalField),
}

impl Field {
    /// Field at a schema column position
    pub fn at(column: usize) -> Option<Field> {
        match column {
            0 => Some(Field::Numeric(NumericField::Duration)),
            1..=3 => Some(Field::Categorical(CategoricalField::ALL[column - 1])),
            4..=40 => Some(Field::Numeric(NumericField::ALL[column - 3])),
            _ => None,
        }
    }

    /// Schema column position
    pub fn column(self) -> usize {
        match self {
            Field::Numeric(NumericField::Duration) => 0,
            Field::Numeric(field) => field.index() + 3,
            Field::Categorical(field) => field.index() + 1,
        }
    }

    /// Column name
    pub fn name(self) -> &'static str {
        match self {
            Field::Numeric(field) => field.name(),
            Field::Categorical(field) => field.name(),
        }
    }

    /// Look up a field by column name
    pub fn from_name(name: &str) -> Option<Field> {
        Self::schema().find(|field| field.name() == name)
    }

    /// All fields in column order
    pub fn schema() -> impl Iterator<Item = Field> {
        (0..FIELD_COUNT).filter_map(Field::at)
    }
}

/// Transport protocol of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ProtocolType {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// Any other value, kept verbatim
    Other(String),
    /// Not supplied
    #[default]
    Unspecified,
}

impl ProtocolType {
    /// Parse a protocol name (case-insensitive)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => ProtocolType::Tcp,
            "udp" => ProtocolType::Udp,
            "icmp" => ProtocolType::Icmp,
            "" => ProtocolType::Unspecified,
            _ => ProtocolType::Other(value.trim().to_string()),
        }
    }

    /// Canonical string form, as stored in the encoder vocabulary
    pub fn as_str(&self) -> &str {
        match self {
            ProtocolType::Tcp => "tcp",
            ProtocolType::Udp => "udp",
            ProtocolType::Icmp => "icmp",
            ProtocolType::Other(value) => value,
            ProtocolType::Unspecified => "",
        }
    }
}

/// Connection status flag (Bro/Zeek connection states used by NSL-KDD)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ConnectionFlag {
    /// Normal establishment and termination
    Sf,
    /// Connection attempt seen, no reply
    S0,
    /// Established, not terminated
    S1,
    /// Established, close attempt by originator only
    S2,
    /// Established, close attempt by responder only
    S3,
    /// Connection attempt rejected
    Rej,
    /// Established, originator aborted
    Rsto,
    /// Established, responder aborted
    Rstr,
    /// Originator sent SYN then RST
    Rstos0,
    /// Originator sent SYN then FIN
    Sh,
    /// No SYN seen, midstream traffic
    Oth,
    /// Any other value, kept verbatim
    Other(String),
    /// Not supplied
    #[default]
    Unspecified,
}

impl ConnectionFlag {
    /// Parse a flag name (case-insensitive)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "SF" => ConnectionFlag::Sf,
            "S0" => ConnectionFlag::S0,
            "S1" => ConnectionFlag::S1,
            "S2" => ConnectionFlag::S2,
            "S3" => ConnectionFlag::S3,
            "REJ" => ConnectionFlag::Rej,
            "RSTO" => ConnectionFlag::Rsto,
            "RSTR" => ConnectionFlag::Rstr,
            "RSTOS0" => ConnectionFlag::Rstos0,
            "SH" => ConnectionFlag::Sh,
            "OTH" => ConnectionFlag::Oth,
            "" => ConnectionFlag::Unspecified,
            _ => ConnectionFlag::Other(value.trim().to_string()),
        }
    }

    /// Canonical string form, as stored in the encoder vocabulary
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionFlag::Sf => "SF",
            ConnectionFlag::S0 => "S0",
            ConnectionFlag::S1 => "S1",
            ConnectionFlag::S2 => "S2",
            ConnectionFlag::S3 => "S3",
            ConnectionFlag::Rej => "REJ",
            ConnectionFlag::Rsto => "RSTO",
            ConnectionFlag::Rstr => "RSTR",
            ConnectionFlag::Rstos0 => "RSTOS0",
            ConnectionFlag::Sh => "SH",
            ConnectionFlag::Oth => "OTH",
            ConnectionFlag::Other(value) => value,
            ConnectionFlag::Unspecified => "",
        }
    }
}

/// One network connection in the NSL-KDD feature layout.
///
/// Numeric values are `None` when missing or unparseable; the normalizer
/// imputes them. A freshly built record has every numeric field at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    /// Transport protocol
    pub protocol_type: ProtocolType,
    /// Destination service (`http`, `ftp_data`, `private`, ...)
    pub service: String,
    /// Connection status flag
    pub flag: ConnectionFlag,
    numeric: [Option<f64>; NUMERIC_FIELD_COUNT],
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        Self {
            protocol_type: ProtocolType::Unspecified,
            service: String::new(),
            flag: ConnectionFlag::Unspecified,
            numeric: [Some(0.0); NUMERIC_FIELD_COUNT],
        }
    }
}

impl ConnectionRecord {
    /// Create a record with the given categorical values and zeroed counters
    pub fn new(protocol_type: ProtocolType, service: impl Into<String>, flag: ConnectionFlag) -> Self {
        Self {
            protocol_type,
            service: service.into(),
            flag,
            ..Self::default()
        }
    }

    /// Builder-style numeric setter
    pub fn with(mut self, field: NumericField, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    /// Numeric value, `None` when missing
    pub fn get(&self, field: NumericField) -> Option<f64> {
        self.numeric[field.index()]
    }

    /// Set a numeric value; non-finite values are stored as missing
    pub fn set(&mut self, field: NumericField, value: Option<f64>) {
        self.numeric[field.index()] = value.filter(|v| v.is_finite());
    }

    /// Categorical value in its canonical string form
    pub fn categorical(&self, field: CategoricalField) -> &str {
        match field {
            CategoricalField::ProtocolType => self.protocol_type.as_str(),
            CategoricalField::Service => self.service.trim(),
            CategoricalField::Flag => self.flag.as_str(),
        }
    }

    /// Set a categorical value from its string form
    pub fn set_categorical(&mut self, field: CategoricalField, value: &str) {
        match field {
            CategoricalField::ProtocolType => self.protocol_type = ProtocolType::parse(value),
            CategoricalField::Service => self.service = value.trim().to_string(),
            CategoricalField::Flag => self.flag = ConnectionFlag::parse(value),
        }
    }

    /// Build from the first 41 columns of an NSL-KDD row.
    ///
    /// Unparseable numeric cells become missing values.
    pub fn from_columns<'a, I>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut record = Self::default();
        let mut seen = 0;

        for (column, value) in columns.into_iter().take(FIELD_COUNT).enumerate() {
            match Field::at(column) {
                Some(Field::Numeric(field)) => record.set(field, parse_numeric(value)),
                Some(Field::Categorical(field)) => record.set_categorical(field, value),
                None => {}
            }
            seen += 1;
        }

        if seen < FIELD_COUNT {
            return Err(DlhaError::InvalidRecord(format!(
                "expected {} columns, got {}",
                FIELD_COUNT, seen
            )));
        }
        Ok(record)
    }

    /// Build from a loosely-typed field map.
    ///
    /// Absent fields default to zero (categoricals to an empty value that
    /// the encoder maps to its fallback). Unknown field names are rejected.
    pub fn from_raw(raw: &RawRecord) -> Result<Self> {
        let mut record = Self::default();

        for (name, value) in &raw.0 {
            let field = Field::from_name(name)
                .ok_or_else(|| DlhaError::InvalidRecord(format!("unknown field '{}'", name)))?;

            match field {
                Field::Numeric(field) => {
                    let parsed = match value {
                        RawValue::Number(n) => Some(*n),
                        RawValue::Text(text) => parse_numeric(text),
                    };
                    record.set(field, parsed);
                }
                Field::Categorical(field) => {
                    record.set_categorical(field, &value.to_string());
                }
            }
        }

        Ok(record)
    }
}

fn parse_numeric(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Raw field value as supplied by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// Numeric value
    Number(f64),
    /// String value (categorical, or a number still to be parsed)
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// Field-name to raw-value map, the transport-independent request shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub HashMap<String, RawValue>);

impl RawRecord {
    /// Insert a value
    pub fn insert(&mut self, name: impl Into<String>, value: RawValue) {
        self.0.insert(name.into(), value);
    }
}

/// Coarse attack family used for training labels.
///
/// Variant order matches the lexical order of the label strings, which is
/// the class order both detector layers report probabilities in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackCategory {
    /// Denial of service
    DoS,
    /// Benign traffic
    Normal,
    /// Probing / scanning
    Probe,
    /// Remote to local
    R2L,
    /// User to root
    U2R,
}

impl AttackCategory {
    /// All categories in class order
    pub const ALL: [AttackCategory; 5] = [
        AttackCategory::DoS,
        AttackCategory::Normal,
        AttackCategory::Probe,
        AttackCategory::R2L,
        AttackCategory::U2R,
    ];

    /// Map a raw NSL-KDD attack name to its family.
    ///
    /// Case-insensitive; names outside the table fall back to `Normal`.
    pub fn from_attack_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "neptune" | "back" | "land" | "pod" | "smurf" | "teardrop" => AttackCategory::DoS,
            "satan" | "ipsweep" | "nmap" | "portsweep" => AttackCategory::Probe,
            "guess_passwd" | "ftp_write" | "imap" | "phf" | "multihop" | "warezmaster"
            | "warezclient" | "spy" => AttackCategory::R2L,
            "buffer_overflow" | "loadmodule" | "perl" | "rootkit" => AttackCategory::U2R,
            _ => AttackCategory::Normal,
        }
    }

    /// Display name
    pub const fn as_str(self) -> &'static str {
        match self {
            AttackCategory::DoS => "DoS",
            AttackCategory::Normal => "Normal",
            AttackCategory::Probe => "Probe",
            AttackCategory::R2L => "R2L",
            AttackCategory::U2R => "U2R",
        }
    }

    /// Position in class order
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final classification output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Benign traffic
    Normal,
    /// Denial of service
    DoS,
    /// Probing / scanning
    Probe,
    /// Remote to local
    R2L,
    /// User to root
    U2R,
    /// Classification failed for this record
    Unknown,
}

impl Verdict {
    /// Display name
    pub const fn as_str(self) -> &'static str {
        match self {
            Verdict::Normal => "Normal",
            Verdict::DoS => "DoS",
            Verdict::Probe => "Probe",
            Verdict::R2L => "R2L",
            Verdict::U2R => "U2R",
            Verdict::Unknown => "Unknown",
        }
    }

    /// Whether this verdict names an attack family
    pub fn is_attack(self) -> bool {
        !matches!(self, Verdict::Normal | Verdict::Unknown)
    }

    /// Underlying category, if known
    pub fn category(self) -> Option<AttackCategory> {
        match self {
            Verdict::Normal => Some(AttackCategory::Normal),
            Verdict::DoS => Some(AttackCategory::DoS),
            Verdict::Probe => Some(AttackCategory::Probe),
            Verdict::R2L => Some(AttackCategory::R2L),
            Verdict::U2R => Some(AttackCategory::U2R),
            Verdict::Unknown => None,
        }
    }
}

impl From<AttackCategory> for Verdict {
    fn from(category: AttackCategory) -> Self {
        match category {
            AttackCategory::Normal => Verdict::Normal,
            AttackCategory::DoS => Verdict::DoS,
            AttackCategory::Probe => Verdict::Probe,
            AttackCategory::R2L => Verdict::R2L,
            AttackCategory::U2R => Verdict::U2R,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Training example: a record plus its mapped category
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    /// Feature record
    pub record: ConnectionRecord,
    /// Attack family
    pub label: AttackCategory,
}

impl LabeledRecord {
    /// Label a record from its raw attack name
    pub fn from_attack_name(record: ConnectionRecord, attack_name: &str) -> Self {
        Self {
            record,
            label: AttackCategory::from_attack_name(attack_name),
        }
    }
}
