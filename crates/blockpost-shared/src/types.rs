use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Registered user.
    UserId
);
row_id!(
    /// Chat of any kind.
    ChatId
);
row_id!(
    /// Block in the message chain.
    BlockId
);
row_id!(
    /// One recipient's copy of a message event.
    TransactionId
);

/// The closed set of chat kinds.
///
/// Kind-specific rules live here so that creation and membership changes
/// check them in one place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    /// Whether members may join or leave after creation.
    pub fn allows_membership_changes(&self) -> bool {
        !matches!(self, Self::Private)
    }

    /// Channels restrict who may add members to owners and admins.
    pub fn add_requires_admin(&self) -> bool {
        matches!(self, Self::Channel)
    }

    /// Private chats derive their display name from the other member.
    pub fn requires_name(&self) -> bool {
        !matches!(self, Self::Private)
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            other => Err(format!("unknown chat kind: {other}")),
        }
    }
}
