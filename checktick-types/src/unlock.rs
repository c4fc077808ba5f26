use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a session unlocked a survey.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockMethod {
    Password,
    Recovery,
    Identity,
    OrgRecovery,
    Legacy,
}

impl UnlockMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Recovery => "recovery",
            Self::Identity => "identity",
            Self::OrgRecovery => "org_recovery",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for UnlockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnlockMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(Self::Password),
            "recovery" => Ok(Self::Recovery),
            "identity" => Ok(Self::Identity),
            "org_recovery" => Ok(Self::OrgRecovery),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown unlock method: {other}")),
        }
    }
}
