use crate::prelude::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// How an inverter interprets a power-limit value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum PowerLimitControl {
    AbsoluteNonPersistent = 0x0000,
    RelativeNonPersistent = 0x0001,
    AbsolutePersistent = 0x0100,
    RelativePersistent = 0x0101,
}

/// Commands handed to the inverter dispatcher.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    PowerLimit(Serial, u16, PowerLimitControl),
    Power(Serial, bool), // start (true) / stop (false)
}

impl Command {
    pub fn serial(&self) -> Serial {
        match self {
            Command::PowerLimit(serial, _, _) | Command::Power(serial, _) => *serial,
        }
    }

    pub fn to_topic(&self) -> String {
        use Command::*;

        let rest = match self {
            PowerLimit(_, _, PowerLimitControl::AbsoluteNonPersistent) => "limit_nonpersistent_absolute",
            PowerLimit(_, _, PowerLimitControl::RelativeNonPersistent) => "limit_nonpersistent_relative",
            PowerLimit(_, _, PowerLimitControl::AbsolutePersistent) => "limit_persistent_absolute",
            PowerLimit(_, _, PowerLimitControl::RelativePersistent) => "limit_persistent_relative",
            Power(_, _) => "power",
        };

        format!("{}/cmd/{}", self.serial(), rest)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::PowerLimit(_, watts, _) => write!(f, "{} = {} W", self.to_topic(), watts),
            Command::Power(_, on) => write!(f, "{} = {}", self.to_topic(), if *on { "ON" } else { "OFF" }),
        }
    }
}
