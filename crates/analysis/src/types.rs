// Analysis data types
//
// Everything that crosses the worker boundary is serialized to JSON text and
// carried in a `Payload`. Field names are camelCase on the wire.

use std::fmt;
use std::str::FromStr;

use cladeworks_workers::Payload;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};

/// One parsed input sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// Zero-based position in the input file
    pub index: usize,
    pub name: String,
    /// Upper-cased nucleotides, whitespace removed
    pub sequence: String,
}

/// A nucleotide differing from the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    /// One-based reference position
    pub position: usize,
    pub ref_nuc: char,
    pub query_nuc: char,
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.ref_nuc, self.position, self.query_nuc)
    }
}

/// Overall quality verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcStatus {
    Good,
    Mediocre,
    Bad,
}

impl QcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Mediocre => "mediocre",
            Self::Bad => "bad",
        }
    }
}

impl fmt::Display for QcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sequence analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub index: usize,
    pub name: String,
    pub substitutions: Vec<Substitution>,
    /// Count of `N` nucleotides
    pub missing: usize,
    /// Fraction of G/C among unambiguous nucleotides
    pub gc_content: f64,
    /// Query length minus reference length
    pub length_difference: i64,
    pub qc_score: f64,
    pub qc_status: QcStatus,
}

/// Column separator for serialized result tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    #[default]
    Tab,
    Comma,
    Semicolon,
}

impl Delimiter {
    pub fn as_char(&self) -> char {
        match self {
            Self::Tab => '\t',
            Self::Comma => ',',
            Self::Semicolon => ';',
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tab => "tab",
            Self::Comma => "comma",
            Self::Semicolon => "semicolon",
        })
    }
}

impl FromStr for Delimiter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tab" | "\t" | "tsv" => Ok(Self::Tab),
            "comma" | "," | "csv" => Ok(Self::Comma),
            "semicolon" | ";" => Ok(Self::Semicolon),
            other => Err(format!(
                "unknown delimiter '{other}', expected tab, comma or semicolon"
            )),
        }
    }
}

/// Arguments of `serializeResults`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializeRequest {
    pub results: Vec<AnalysisResult>,
    pub delimiter: Delimiter,
}

/// Arguments of `finalizeTree`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub tree: serde_json::Value,
    pub results: Vec<AnalysisResult>,
}

/// Encode a value as a JSON text payload
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload, serde_json::Error> {
    serde_json::to_string(value).map(Payload::Text)
}

/// Decode a JSON payload (text or binary)
pub fn from_payload<T: DeserializeOwned>(payload: &Payload) -> Result<T, serde_json::Error> {
    serde_json::from_slice(payload.as_bytes())
}

/// Take the text out of a payload that must be text
pub fn text_payload(payload: Payload) -> Result<String, serde_json::Error> {
    match payload {
        Payload::Text(text) => Ok(text),
        other => Err(serde_json::Error::custom(format!(
            "expected a text payload, got {} bytes of non-text",
            other.len()
        ))),
    }
}
