use serde::{Deserialize, Deserializer};
use serde_json::Value;

/*  QUIRKS HANDLED
    ==============

    1) RPKI validators export the origin either as a number or as "AS64500"
        => Roa::asn() accepts both, checked per entry

    2) PeeringDB leaves text fields null or drops them entirely
        => every optional text field defaults to ""
*/

// PEERINGDB
// ============================================

/// `{"data": [...]}` wrapper around every PeeringDB listing
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct Net {
    pub asn: i64,
    pub org_id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub aka: String,
    #[serde(default, deserialize_with = "de_text")]
    pub route_server: String,
    #[serde(default, deserialize_with = "de_text")]
    pub looking_glass: String,
    #[serde(default, deserialize_with = "de_text")]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct Org {
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub address1: String,
    #[serde(default, deserialize_with = "de_text")]
    pub address2: String,
    #[serde(default, deserialize_with = "de_text")]
    pub city: String,
    #[serde(default, deserialize_with = "de_text")]
    pub state: String,
    #[serde(default, deserialize_with = "de_text")]
    pub zipcode: String,
    #[serde(default, deserialize_with = "de_text")]
    pub country: String,
}

// RPKI
// ============================================

#[derive(Debug, Deserialize)]
pub struct RoaExport {
    pub roas: Vec<Roa>,
}

/// Fields stay raw so one malformed entry cannot fail the whole export
#[derive(Debug, Default, Deserialize)]
pub struct Roa {
    #[serde(default)]
    pub asn: Value,
    #[serde(default)]
    pub prefix: Value,
    #[serde(default, rename = "maxLength")]
    pub max_length: Value,
}

impl Roa {
    pub fn asn(&self) -> Result<i64, String> {
        parse_asn(&self.asn)
    }

    pub fn prefix(&self) -> Result<&str, String> {
        self.prefix
            .as_str()
            .ok_or_else(|| format!("invalid prefix: {}", self.prefix))
    }

    pub fn max_length(&self) -> Result<u8, String> {
        self.max_length
            .as_u64()
            .and_then(|len| u8::try_from(len).ok())
            .ok_or_else(|| format!("invalid maxLength: {}", self.max_length))
    }
}

// Functions for the quirks above
// ============================

fn parse_asn(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(num) => num
            .as_i64()
            .filter(|asn| *asn >= 0)
            .ok_or_else(|| format!("ASN out of range: {num}")),

        Value::String(s) => {
            let digits = s.trim().trim_start_matches("AS").trim_start_matches("as");
            digits.parse().map_err(|_| format!("invalid ASN: {s}"))
        }

        other => Err(format!("invalid ASN: {other}")),
    }
}

fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}
