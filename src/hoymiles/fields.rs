use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Channel number within a statistics table. Channel 0 carries the AC and
/// inverter-level fields, DC inputs are numbered from 1.
pub type Channel = u8;

pub const CH0: Channel = 0;
pub const CH1: Channel = 1;
pub const CH2: Channel = 2;
pub const CH3: Channel = 3;
pub const CH4: Channel = 4;
pub const CH5: Channel = 5;
pub const CH6: Channel = 6;

// UnitId {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum UnitId {
    Volt = 0,
    Ampere,
    Watt,
    WattHour,
    KiloWattHour,
    Hertz,
    Celsius,
    Percent,
    Var,
    Unitless,
}

impl UnitId {
    pub fn symbol(&self) -> &'static str {
        use UnitId::*;

        match self {
            Volt => "V",
            Ampere => "A",
            Watt => "W",
            WattHour => "Wh",
            KiloWattHour => "kWh",
            Hertz => "Hz",
            Celsius => "°C",
            Percent => "%",
            Var => "var",
            Unitless => "",
        }
    }
} // }}}

// FieldId {{{
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FieldId {
    Udc = 0,
    Idc,
    Pdc,
    YieldDay,
    YieldTotal,
    Uac,
    Iac,
    Pac,
    Frequency,
    Temperature,
    PowerFactor,
    Efficiency,
    Irradiation,
    ReactivePower,
    EventLogCount,
    // three-phase models only
    UacPh1N,
    UacPh2N,
    UacPh3N,
    UacPh12,
    UacPh23,
    UacPh31,
    IacPh1,
    IacPh2,
    IacPh3,
}

impl FieldId {
    pub fn name(&self) -> &'static str {
        use FieldId::*;

        match self {
            Udc | Uac => "Voltage",
            Idc | Iac => "Current",
            Pdc | Pac => "Power",
            YieldDay => "YieldDay",
            YieldTotal => "YieldTotal",
            Frequency => "Frequency",
            Temperature => "Temperature",
            PowerFactor => "PowerFactor",
            Efficiency => "Efficiency",
            Irradiation => "Irradiation",
            ReactivePower => "ReactivePower",
            EventLogCount => "EventLogCount",
            UacPh1N => "Voltage Ph1-N",
            UacPh2N => "Voltage Ph2-N",
            UacPh3N => "Voltage Ph3-N",
            UacPh12 => "Voltage Ph1-Ph2",
            UacPh23 => "Voltage Ph2-Ph3",
            UacPh31 => "Voltage Ph3-Ph1",
            IacPh1 => "Current Ph1",
            IacPh2 => "Current Ph2",
            IacPh3 => "Current Ph3",
        }
    }
} // }}}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ChannelKind {
    Ac,
    Dc,
    Inverter,
}

/// Derived values computed from other fields rather than read from the buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CalcFunction {
    /// Sum of YieldTotal over all DC channels.
    SumYieldTotal = 0,
    /// Sum of YieldDay over all DC channels.
    SumYieldDay,
    /// DC voltage of the channel given as argument (inputs sharing one MPPT).
    ChannelDcVoltage,
    /// Sum of DC power over all DC channels.
    SumDcPower,
    /// AC power / total DC power * 100.
    AcDcEfficiency,
    /// DC power of the argument channel / its configured max power * 100.
    ChannelIrradiation,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldSource {
    Raw {
        offset: usize,
        length: usize,
        divisor: u16,
    },
    Calculated {
        function: CalcFunction,
        argument: Channel,
    },
}

/// Where to find (or how to derive) one telemetry field of a hardware model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldDescriptor {
    pub kind: ChannelKind,
    pub channel: Channel,
    pub field: FieldId,
    pub unit: UnitId,
    pub source: FieldSource,
    pub signed: bool,
    pub digits: u8,
}

impl FieldDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub const fn raw(
        kind: ChannelKind,
        channel: Channel,
        field: FieldId,
        unit: UnitId,
        offset: usize,
        length: usize,
        divisor: u16,
        signed: bool,
        digits: u8,
    ) -> Self {
        Self {
            kind,
            channel,
            field,
            unit,
            source: FieldSource::Raw {
                offset,
                length,
                divisor,
            },
            signed,
            digits,
        }
    }

    pub const fn calculated(
        kind: ChannelKind,
        channel: Channel,
        field: FieldId,
        unit: UnitId,
        function: CalcFunction,
        argument: Channel,
        digits: u8,
    ) -> Self {
        Self {
            kind,
            channel,
            field,
            unit,
            source: FieldSource::Calculated { function, argument },
            signed: false,
            digits,
        }
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.source, FieldSource::Calculated { .. })
    }
}
