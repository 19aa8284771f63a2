use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The identity attributed to an event (spec §3, GLOSSARY: `by`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Principal {
    User,
    System,
    Actor(String),
    Svc(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User => write!(f, "user"),
            Principal::System => write!(f, "system"),
            Principal::Actor(id) => write!(f, "{id}"),
            Principal::Svc(name) => write!(f, "svc:{name}"),
        }
    }
}

impl FromStr for Principal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("principal must not be empty".to_string());
        }
        match s {
            "user" => Ok(Principal::User),
            "system" => Ok(Principal::System),
            _ => {
                if let Some(name) = s.strip_prefix("svc:") {
                    Ok(Principal::Svc(name.to_string()))
                } else {
                    Ok(Principal::Actor(s.to_string()))
                }
            }
        }
    }
}

impl TryFrom<String> for Principal {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Principal::from_str(&s)
    }
}

impl From<Principal> for String {
    fn from(p: Principal) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        for s in ["user", "system", "svc:relay", "foreman-1"] {
            let p: Principal = s.parse().unwrap();
            assert_eq!(p.to_string(), s);
        }
    }
}
