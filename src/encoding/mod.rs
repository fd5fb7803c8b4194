//! Categorical codecs: reversible conversion of discrete columns to numbers.
//!
//! Two variants are offered:
//! - [`label`]: one integer code per distinct value, the mapping is kept in a [`label::LabelMap`]
//! - [`indicator`]: one indicator column per distinct value, `<column>_<value>`

pub mod indicator;
pub mod label;

pub use label::LabelMaps;

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderKind {
    #[default]
    Label,
    OneHot,
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderKind::Label => write!(f, "label"),
            EncoderKind::OneHot => write!(f, "one-hot"),
        }
    }
}

impl FromStr for EncoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "label" => Ok(EncoderKind::Label),
            "one-hot" | "onehot" | "one_hot" => Ok(EncoderKind::OneHot),
            other => Err(format!("unknown encoder '{}', expected 'label' or 'one-hot'", other)),
        }
    }
}
